use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::framing::{Frame, LineReader};
use super::message::{JsonMap, Notification, Request, Response, RpcMessage};
use super::state::SessionState;
use crate::core::tools::ToolDescriptor;
use crate::domain::error::SessionError;

/// Confirmation sent once the server has accepted `initialize`
pub const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// Name and version of one side of the session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Implementation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// What the client announces in its handshake
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolInfo {
    pub protocol_version: String,
    pub client: Implementation,
    pub capabilities: JsonMap,
}

/// What the server announced in its handshake reply
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: String,
    #[serde(rename = "serverInfo", default)]
    pub server: Implementation,
    #[serde(default)]
    pub capabilities: JsonMap,
}

impl ProtocolInfo {
    pub fn new(protocol_version: impl Into<String>, client_name: impl Into<String>) -> Self {
        let mut capabilities = JsonMap::new();
        capabilities.insert("tools".to_string(), Value::Object(JsonMap::new()));

        Self {
            protocol_version: protocol_version.into(),
            client: Implementation {
                name: client_name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities,
        }
    }

    fn to_params(&self) -> JsonMap {
        let mut params = JsonMap::new();
        params.insert("protocolVersion".to_string(), self.protocol_version.clone().into());
        params.insert("capabilities".to_string(), Value::Object(self.capabilities.clone()));
        params.insert(
            "clientInfo".to_string(),
            json!({ "name": self.client.name, "version": self.client.version }),
        );
        params
    }
}

impl ServerInfo {
    fn from_result(result: &JsonMap) -> Self {
        serde_json::from_value(Value::Object(result.clone())).unwrap_or_else(|e| {
            warn!(error = %e, "server handshake reply has an unexpected shape");
            ServerInfo::default()
        })
    }
}

/// Client side of a line-delimited JSON-RPC session.
///
/// Strictly sequential: at most one request is in flight, so a response is
/// matched against the single pending id. Reads go through a persistent
/// buffer so a call abandoned on timeout never leaves half a line behind.
/// Every write has a deadline; a write that misses it closes the session,
/// since a half-written frame cannot be taken back.
pub struct SessionClient<R, W> {
    reader: R,
    writer: W,
    state: SessionState,
    next_id: u64,
    pending_id: Option<u64>,
    lines: LineReader,
    handshake_timeout: Duration,
    write_timeout: Duration,
}

impl<R, W> SessionClient<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            state: SessionState::Unstarted,
            next_id: 1,
            pending_id: None,
            lines: LineReader::default(),
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Deadline for writes that are not part of a call (notifications)
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Longest line accepted from the server
    pub fn with_max_frame(mut self, bytes: usize) -> Self {
        self.lines = LineReader::new(bytes);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pending_id(&self) -> Option<u64> {
        self.pending_id
    }

    /// Perform the initialize / initialized handshake.
    ///
    /// The confirmation notification is only sent after the server has
    /// answered, so tool calls can never reach a server that is still
    /// setting up.
    pub async fn initialize(&mut self, info: &ProtocolInfo) -> Result<ServerInfo, SessionError> {
        if self.state != SessionState::Unstarted {
            return Err(SessionError::NotReady { state: self.state });
        }

        self.state = SessionState::Starting;
        let response = match self.request("initialize", info.to_params(), self.handshake_timeout).await {
            Ok(response) => response,
            Err(e) => {
                if self.state.is_open() {
                    self.state = SessionState::Failed;
                }
                return Err(e);
            }
        };

        let result = match response.outcome {
            Ok(result) => result,
            Err(error) => {
                warn!(code = error.code, message = %error.message, "server rejected handshake");
                self.state = SessionState::Failed;
                return Err(SessionError::HandshakeRejected {
                    code: error.code,
                    message: error.message,
                });
            }
        };

        self.state = SessionState::Handshaking;
        let server = ServerInfo::from_result(&result);

        let deadline = Instant::now() + self.write_timeout;
        self.send(&Notification::new(INITIALIZED_NOTIFICATION, JsonMap::new()).into(), deadline)
            .await?;
        self.state = SessionState::Ready;

        info!(
            server = %server.server.name,
            version = %server.server.version,
            protocol = %server.protocol_version,
            "session ready"
        );
        Ok(server)
    }

    /// Send a request and wait for its response
    pub async fn call(
        &mut self,
        method: &str,
        params: JsonMap,
        timeout: Duration,
    ) -> Result<Response, SessionError> {
        if self.state != SessionState::Ready || self.pending_id.is_some() {
            return Err(SessionError::NotReady { state: self.state });
        }

        self.request(method, params, timeout).await
    }

    /// Send a notification; nothing is read back
    pub async fn notify(&mut self, method: &str, params: JsonMap) -> Result<(), SessionError> {
        if !self.state.is_open() {
            return Err(SessionError::NotReady { state: self.state });
        }

        let deadline = Instant::now() + self.write_timeout;
        self.send(&Notification::new(method, params).into(), deadline).await
    }

    /// Fetch the server's tool catalog
    pub async fn list_tools(&mut self, timeout: Duration) -> Result<Vec<ToolDescriptor>, SessionError> {
        let response = self.call("tools/list", JsonMap::new(), timeout).await?;
        let result = response.outcome.map_err(|error| SessionError::Remote {
            method: "tools/list".to_string(),
            code: error.code,
            message: error.message,
        })?;

        let tools = result.get("tools").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(tools).map_err(|e| SessionError::MalformedResponse {
            raw_line: format!("unexpected tools/list result: {e}"),
        })
    }

    /// Invoke a tool and decode the JSON payload it returned.
    ///
    /// Error responses and empty results are folded into a
    /// `{"success": false, "error": ...}` object.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: JsonMap,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let mut params = JsonMap::new();
        params.insert("name".to_string(), name.into());
        params.insert("arguments".to_string(), Value::Object(arguments));

        let response = self.call("tools/call", params, timeout).await?;
        Ok(match response.outcome {
            Ok(result) => tool_payload(&result),
            Err(error) => json!({ "success": false, "error": error.to_value() }),
        })
    }

    /// Stop using the session; later calls fail with `NotReady`
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            debug!(state = %self.state, "closing session");
            self.state = SessionState::Closed;
        }
    }

    async fn request(
        &mut self,
        method: &str,
        params: JsonMap,
        timeout: Duration,
    ) -> Result<Response, SessionError> {
        let deadline = Instant::now() + timeout;
        let id = self.next_id;
        self.next_id += 1;

        self.send(&Request::new(id, method, params).into(), deadline).await?;
        self.pending_id = Some(id);
        debug!(id, method, "request sent");

        let outcome = timeout_at(deadline, self.await_response(id)).await;
        self.pending_id = None;

        match outcome {
            Ok(result) => result,
            Err(_) => {
                warn!(id, method, timeout_ms = timeout.as_millis() as u64, "request timed out");
                Err(SessionError::Timeout {
                    id,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    async fn await_response(&mut self, id: u64) -> Result<Response, SessionError> {
        loop {
            let line = match self.lines.next_frame(&mut self.reader).await {
                Ok(Frame::Line(line)) => line,
                Ok(Frame::Oversized { len }) => {
                    warn!(len, "server sent an oversized line");
                    return Err(SessionError::MalformedResponse {
                        raw_line: format!("line longer than {len} bytes"),
                    });
                }
                Ok(Frame::Closed) => {
                    return Err(self.connection_lost("server closed its output".to_string()))
                }
                Err(e) => return Err(self.connection_lost(format!("read failed: {e}"))),
            };

            let text = line.trim();
            if text.is_empty() {
                continue;
            }

            match RpcMessage::decode(text) {
                Ok(RpcMessage::Response(response)) if response.id == id => return Ok(response),
                Ok(RpcMessage::Response(response)) => {
                    warn!(expected = id, received = response.id, "discarding response with unmatched id");
                }
                Ok(other) => {
                    debug!(method = ?other.method(), "discarding server-initiated message");
                }
                Err(e) => {
                    warn!(error = %e, line = text, "malformed line from server");
                    return Err(SessionError::MalformedResponse {
                        raw_line: text.to_string(),
                    });
                }
            }
        }
    }

    async fn send(&mut self, message: &RpcMessage, deadline: Instant) -> Result<(), SessionError> {
        let line = message.to_line();
        let writer = &mut self.writer;
        let written = timeout_at(deadline, async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        })
        .await;

        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.connection_lost(format!("write failed: {e}"))),
            Err(_) => Err(self.connection_lost("write timed out, server is not reading".to_string())),
        }
    }

    fn connection_lost(&mut self, detail: String) -> SessionError {
        warn!(%detail, "connection to server lost");
        self.state = SessionState::Closed;
        self.pending_id = None;
        SessionError::ConnectionLost { detail }
    }
}

fn tool_payload(result: &JsonMap) -> Value {
    let text = result
        .get("content")
        .and_then(Value::as_array)
        .and_then(|items| items.first())
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str);

    match text {
        Some(text) => serde_json::from_str(text)
            .unwrap_or_else(|_| json!({ "success": true, "content": text })),
        None => json!({ "success": false, "error": "No content in response" }),
    }
}
