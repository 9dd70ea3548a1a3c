use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Serial Bridge configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Serial device settings
    #[serde(default)]
    pub device: DeviceConfig,
    /// JSON-RPC session settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Server child process settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// AI backend settings
    #[serde(default)]
    pub ai: AiConfig,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Serial device configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path; auto-detected when absent
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: ParityConfig,
    #[serde(default = "default_flow_control")]
    pub flow_control: FlowControlConfig,
    /// Time the board needs after the port opens (most boards reset on open)
    #[serde(default = "default_reset_delay")]
    pub reset_delay_ms: u64,
    /// Attempts per command
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Command exchange timing
    #[serde(default)]
    pub timing: TimingConfig,
}

/// Intervals used by the command/response exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait after writing a command before reading
    #[serde(default = "default_settle")]
    pub settle_ms: u64,
    /// Wait before re-reading an empty line slot
    #[serde(default = "default_grace")]
    pub grace_ms: u64,
    /// Wait between failed attempts
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    /// Per-read timeout
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// Parity configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParityConfig {
    None,
    Odd,
    Even,
}

/// Flow control configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FlowControlConfig {
    None,
    Hardware,
    Software,
}

/// JSON-RPC session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Protocol version announced in the handshake
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    /// Client name announced in the handshake
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

/// Server child process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Server executable; defaults to the running binary
    #[serde(default)]
    pub server_command: Option<String>,
    /// Arguments passed to the server executable
    #[serde(default = "default_server_args")]
    pub server_args: Vec<String>,
    /// Wait after spawning before the liveness probe
    #[serde(default = "default_launch_settle")]
    pub settle_ms: u64,
    /// Bound on reading a dead child's output
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Wait for a cooperative exit before killing
    #[serde(default = "default_grace_period")]
    pub grace_ms: u64,
}

/// AI backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// API key; `GEMINI_API_KEY` takes precedence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> ParityConfig {
    ParityConfig::None
}

fn default_flow_control() -> FlowControlConfig {
    FlowControlConfig::None
}

fn default_reset_delay() -> u64 {
    2000
}

fn default_retries() -> u32 {
    3
}

fn default_settle() -> u64 {
    200
}

fn default_grace() -> u64 {
    100
}

fn default_backoff() -> u64 {
    500
}

fn default_read_timeout() -> u64 {
    2000
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

fn default_client_name() -> String {
    "Serial Bridge Client".to_string()
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_call_timeout() -> u64 {
    30_000
}

fn default_server_args() -> Vec<String> {
    vec!["serve".to_string()]
}

fn default_launch_settle() -> u64 {
    3000
}

fn default_drain_timeout() -> u64 {
    1000
}

fn default_grace_period() -> u64 {
    5000
}

fn default_api_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash-exp".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_output_tokens() -> u32 {
    1024
}

fn default_request_timeout() -> u64 {
    30_000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            flow_control: default_flow_control(),
            reset_delay_ms: default_reset_delay(),
            retries: default_retries(),
            timing: TimingConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_ms: default_settle(),
            grace_ms: default_grace(),
            backoff_ms: default_backoff(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl Default for ParityConfig {
    fn default() -> Self {
        default_parity()
    }
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        default_flow_control()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            handshake_timeout_ms: default_handshake_timeout(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            server_command: None,
            server_args: default_server_args(),
            settle_ms: default_launch_settle(),
            drain_timeout_ms: default_drain_timeout(),
            grace_ms: default_grace_period(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            model: default_model(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_ms: default_request_timeout(),
            api_key: None,
        }
    }
}

impl SessionConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl SupervisorConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl AiConfig {
    /// Copy of this configuration that is safe to print
    pub fn redacted(&self) -> Self {
        Self {
            api_key: self.api_key.as_ref().map(|_| "********".to_string()),
            ..self.clone()
        }
    }
}
