use async_trait::async_trait;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{info, trace};

use crate::core::device::SerialLine;
use crate::domain::config::{DeviceConfig, FlowControlConfig, ParityConfig};
use crate::domain::error::{BridgeError, BridgeResult};

/// Blocking read granularity
const READ_CHUNK: usize = 256;

/// `SerialLine` over a real serial port.
///
/// Every port call runs on the blocking pool; the port is moved into the task
/// and handed back when it completes.
pub struct SerialPortLine {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    pending: Vec<u8>,
}

impl SerialPortLine {
    pub fn new(name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            name: name.into(),
            port: Some(port),
            pending: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn blocking<T, F>(&mut self, op: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>, &mut Vec<u8>) -> io::Result<T> + Send + 'static,
    {
        let mut port = self.port.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, format!("serial port {} is unavailable", self.name))
        })?;
        let mut pending = std::mem::take(&mut self.pending);

        let (port, pending, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut port, &mut pending);
            (port, pending, result)
        })
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("serial task failed: {e}")))?;

        self.port = Some(port);
        self.pending = pending;
        result
    }
}

#[async_trait]
impl SerialLine for SerialPortLine {
    async fn clear(&mut self) -> io::Result<()> {
        self.blocking(|port, pending| {
            pending.clear();
            port.clear(serialport::ClearBuffer::All).map_err(io::Error::from)
        })
        .await
    }

    async fn write_line(&mut self, text: &str) -> io::Result<()> {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(b'\n');
        trace!(port = %self.name, data = %hex::encode(&bytes), "serial tx");

        self.blocking(move |port, _| {
            port.write_all(&bytes)?;
            port.flush()
        })
        .await
    }

    async fn read_line(&mut self, timeout: Duration) -> io::Result<String> {
        let bytes = self
            .blocking(move |port, pending| read_line_blocking(&mut **port, pending, timeout))
            .await?;

        if !bytes.is_empty() {
            trace!(port = %self.name, data = %hex::encode(&bytes), "serial rx");
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Read up to and including the next newline.
///
/// When `timeout` expires first, whatever arrived so far is returned, which
/// may be nothing.
fn read_line_blocking(
    port: &mut dyn SerialPort,
    pending: &mut Vec<u8>,
    timeout: Duration,
) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            return Ok(pending.drain(..=pos).collect());
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(std::mem::take(pending));
        }

        port.set_timeout(remaining).map_err(io::Error::from)?;
        match port.read(&mut chunk) {
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(std::mem::take(pending)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Open `name` with the configured line settings.
///
/// Waits out the board reset that opening the port triggers and discards
/// whatever the board printed while booting.
pub async fn open_port(name: &str, config: &DeviceConfig) -> BridgeResult<SerialPortLine> {
    let builder = serialport::new(name, config.baud_rate)
        .data_bits(match config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            8 => serialport::DataBits::Eight,
            other => {
                return Err(BridgeError::Config {
                    message: format!("Invalid data bits: {}", other),
                })
            }
        })
        .stop_bits(match config.stop_bits {
            1 => serialport::StopBits::One,
            2 => serialport::StopBits::Two,
            other => {
                return Err(BridgeError::Config {
                    message: format!("Invalid stop bits: {}", other),
                })
            }
        })
        .parity(match config.parity {
            ParityConfig::None => serialport::Parity::None,
            ParityConfig::Even => serialport::Parity::Even,
            ParityConfig::Odd => serialport::Parity::Odd,
        })
        .flow_control(match config.flow_control {
            FlowControlConfig::None => serialport::FlowControl::None,
            FlowControlConfig::Software => serialport::FlowControl::Software,
            FlowControlConfig::Hardware => serialport::FlowControl::Hardware,
        })
        .timeout(Duration::from_millis(config.timing.read_timeout_ms));

    let port = builder.open()?;
    info!(port = name, baud = config.baud_rate, "serial port opened");

    tokio::time::sleep(Duration::from_millis(config.reset_delay_ms)).await;

    let mut line = SerialPortLine::new(name, port);
    line.clear().await?;
    Ok(line)
}
