use thiserror::Error;

use crate::core::protocol::SessionState;

/// Serial Bridge unified error type
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error(transparent)]
    Ai(#[from] AiError),

    #[error("Output error: {0}")]
    Output(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Failures of the serial command/response exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Device not connected")]
    NotConnected,

    #[error("No response from device for '{command}' after {attempts} attempts")]
    NoResponse { command: String, attempts: u32 },

    #[error("Could not parse device response: '{raw}'")]
    UnparseableResponse { raw: String },
}

/// Failures of the client side of a JSON-RPC session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Handshake rejected by server: {message} (code {code})")]
    HandshakeRejected { code: i64, message: String },

    #[error("Malformed message from server: '{raw_line}'")]
    MalformedResponse { raw_line: String },

    #[error("Connection to server lost: {detail}")]
    ConnectionLost { detail: String },

    #[error("Server did not respond to request {id} within {timeout_ms}ms")]
    Timeout { id: u64, timeout_ms: u64 },

    #[error("Session is not ready (state: {state})")]
    NotReady { state: SessionState },

    #[error("Server rejected '{method}': {message} (code {code})")]
    Remote {
        method: String,
        code: i64,
        message: String,
    },
}

impl SessionError {
    /// Whether the session can keep being used after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::ConnectionLost { .. })
    }
}

/// Failures while starting a supervised child process
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Executable not found: {program}")]
    ExecutableNotFound { program: String },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Child process {stream} was not captured")]
    PipeUnavailable { stream: &'static str },

    #[error("Server process died during startup ({status})\nSTDERR: {stderr}\nSTDOUT: {stdout}")]
    ProcessDiedAtStartup {
        status: String,
        stdout: String,
        stderr: String,
    },
}

/// Failures of the AI completion backend
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI backend not configured: set GEMINI_API_KEY or [ai].api_key")]
    NotConfigured,

    #[error("AI request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("AI backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid AI response: {0}")]
    InvalidResponse(String),
}

/// Failures a tool registry reports to the RPC layer instead of as a tool result
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },
}
