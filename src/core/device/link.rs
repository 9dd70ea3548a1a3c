use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::clock::{Clock, DeviceTiming, TokioClock};
use crate::domain::error::DeviceError;

/// Default attempts per command
pub const DEFAULT_RETRIES: u32 = 3;

/// One command to send to the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialCommand {
    /// Command text, without the line terminator
    pub text: String,
    /// Number of response lines to collect
    pub expected_lines: u32,
    /// Attempts before giving up
    pub retries: u32,
}

impl SerialCommand {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            expected_lines: 1,
            retries: DEFAULT_RETRIES,
        }
    }

    pub fn expect_lines(mut self, lines: u32) -> Self {
        self.expected_lines = lines.max(1);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }
}

/// Line-oriented access to an open serial connection
#[async_trait]
pub trait SerialLine: Send {
    /// Discard anything buffered in either direction
    async fn clear(&mut self) -> io::Result<()>;

    /// Write `text` followed by a newline
    async fn write_line(&mut self, text: &str) -> io::Result<()>;

    /// Read one line; an empty string means nothing arrived within `timeout`
    async fn read_line(&mut self, timeout: Duration) -> io::Result<String>;
}

/// Command/response engine over a serial line
pub struct DeviceLink<L, C = TokioClock> {
    line: Option<L>,
    clock: C,
    timing: DeviceTiming,
}

impl<L: SerialLine> DeviceLink<L, TokioClock> {
    /// Create a link over an open line
    pub fn new(line: L, timing: DeviceTiming) -> Self {
        Self::with_clock(Some(line), timing, TokioClock)
    }

    /// Create a link with no device attached; every command fails with `NotConnected`
    pub fn disconnected(timing: DeviceTiming) -> Self {
        Self::with_clock(None, timing, TokioClock)
    }
}

impl<L: SerialLine, C: Clock> DeviceLink<L, C> {
    pub fn with_clock(line: Option<L>, timing: DeviceTiming, clock: C) -> Self {
        Self { line, clock, timing }
    }

    pub fn is_connected(&self) -> bool {
        self.line.is_some()
    }

    pub fn timing(&self) -> &DeviceTiming {
        &self.timing
    }

    /// Send a command and collect its response lines.
    ///
    /// Each attempt clears the line, writes the command, waits for the device
    /// to settle and then reads `expected_lines` slots. An empty slot is read
    /// a second time after a short grace interval and dropped if still empty.
    /// The first attempt that yields at least one non-empty line wins; I/O
    /// errors only fail the current attempt.
    pub async fn send_command(&mut self, command: &SerialCommand) -> Result<Vec<String>, DeviceError> {
        let Self { line, clock, timing } = self;
        let line = line.as_mut().ok_or(DeviceError::NotConnected)?;
        let attempts = command.retries.max(1);

        for attempt in 1..=attempts {
            match exchange(line, clock, timing, command).await {
                Ok(lines) if !lines.is_empty() => {
                    debug!(command = %command.text, attempt, lines = lines.len(), "device responded");
                    return Ok(lines);
                }
                Ok(_) => {
                    warn!(command = %command.text, attempt, "no response from device");
                }
                Err(e) => {
                    warn!(command = %command.text, attempt, error = %e, "device communication error");
                }
            }

            if attempt < attempts {
                clock.sleep(timing.backoff).await;
            }
        }

        info!(command = %command.text, attempts, "giving up on device command");
        Err(DeviceError::NoResponse {
            command: command.text.clone(),
            attempts,
        })
    }
}

async fn exchange<L: SerialLine, C: Clock>(
    line: &mut L,
    clock: &C,
    timing: &DeviceTiming,
    command: &SerialCommand,
) -> io::Result<Vec<String>> {
    line.clear().await?;
    line.write_line(&command.text).await?;
    clock.sleep(timing.settle).await;

    let mut lines = Vec::new();
    for slot in 0..command.expected_lines.max(1) {
        let mut text = line.read_line(timing.read_timeout).await?.trim().to_string();
        if text.is_empty() {
            clock.sleep(timing.grace).await;
            text = line.read_line(timing.read_timeout).await?.trim().to_string();
        }

        if text.is_empty() {
            debug!(command = %command.text, slot, "line slot stayed empty");
        } else {
            lines.push(text);
        }
    }

    Ok(lines)
}
