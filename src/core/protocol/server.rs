use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use super::client::{Implementation, INITIALIZED_NOTIFICATION};
use super::framing::{Frame, LineReader, MAX_FRAME_BYTES};
use super::message::{JsonMap, Notification, Request, Response, RpcError, RpcMessage};
use crate::core::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingInitialize,
    Initialized,
    Ready,
}

/// Server side of the session: answers requests from a single client
pub struct SessionServer<T> {
    registry: T,
    info: Implementation,
    protocol_version: String,
    phase: Phase,
    max_frame: usize,
}

impl<T: ToolRegistry> SessionServer<T> {
    pub fn new(registry: T, protocol_version: impl Into<String>) -> Self {
        Self {
            registry,
            info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            protocol_version: protocol_version.into(),
            phase: Phase::AwaitingInitialize,
            max_frame: MAX_FRAME_BYTES,
        }
    }

    /// Longest request line accepted; longer lines are dropped
    pub fn with_max_frame(mut self, bytes: usize) -> Self {
        self.max_frame = bytes;
        self
    }

    pub fn registry(&self) -> &T {
        &self.registry
    }

    /// Whether the client has completed the handshake
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }

    /// Answer messages until the client closes its end
    pub async fn serve<R, W>(&mut self, mut reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = LineReader::new(self.max_frame);
        loop {
            let line = match lines.next_frame(&mut reader).await? {
                Frame::Line(line) => line,
                Frame::Oversized { len } => {
                    warn!(len, "dropping oversized line");
                    continue;
                }
                Frame::Closed => break,
            };

            if let Some(reply) = self.handle_line(&line).await {
                writer.write_all(reply.to_line().as_bytes()).await?;
                writer.flush().await?;
            }
        }

        info!("client closed the session");
        Ok(())
    }

    /// Process one incoming line; returns the reply to write, if any
    pub async fn handle_line(&mut self, line: &str) -> Option<RpcMessage> {
        let text = line.trim();
        if text.is_empty() {
            return None;
        }

        match RpcMessage::decode(text) {
            Ok(RpcMessage::Request(request)) => Some(self.handle_request(request).await.into()),
            Ok(RpcMessage::Notification(notification)) => {
                self.handle_notification(notification);
                None
            }
            Ok(RpcMessage::Response(response)) => {
                warn!(id = response.id, "ignoring unexpected response from client");
                None
            }
            Err(e) => {
                warn!(error = %e, line = text, "skipping undecodable line");
                None
            }
        }
    }

    async fn handle_request(&mut self, request: Request) -> Response {
        debug!(id = request.id, method = %request.method, "request received");

        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(&request.params),
            "ping" => Ok(JsonMap::new()),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(&request.params).await,
            other => Err(RpcError::method_not_found(other)),
        };

        if let Err(error) = &outcome {
            debug!(id = request.id, code = error.code, message = %error.message, "request failed");
        }

        Response {
            id: request.id,
            outcome,
        }
    }

    fn handle_notification(&mut self, notification: Notification) {
        match notification.method.as_str() {
            INITIALIZED_NOTIFICATION if self.phase == Phase::Initialized => {
                self.phase = Phase::Ready;
                info!("client initialized, accepting tool calls");
            }
            INITIALIZED_NOTIFICATION => {
                warn!(phase = ?self.phase, "ignoring initialized notification out of sequence");
            }
            other => debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&mut self, params: &JsonMap) -> Result<JsonMap, RpcError> {
        if self.phase != Phase::AwaitingInitialize {
            return Err(RpcError::invalid_request("Session already initialized"));
        }

        let client = params
            .get("clientInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(client, "client connected");

        self.phase = Phase::Initialized;
        Ok(object(json!({
            "protocolVersion": self.protocol_version,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": self.info.name, "version": self.info.version },
        })))
    }

    fn list_tools(&self) -> JsonMap {
        let tools: Vec<Value> = self
            .registry
            .list_tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();

        object(json!({ "tools": tools }))
    }

    async fn call_tool(&mut self, params: &JsonMap) -> Result<JsonMap, RpcError> {
        if self.phase != Phase::Ready {
            return Err(RpcError::not_initialized());
        }

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("Missing tool name"))?;

        let arguments = match params.get("arguments") {
            None | Some(Value::Null) => JsonMap::new(),
            Some(Value::Object(arguments)) => arguments.clone(),
            Some(_) => return Err(RpcError::invalid_params("Tool arguments must be an object")),
        };

        let result = self
            .registry
            .call_tool(name, &arguments)
            .await
            .map_err(|e| RpcError::invalid_params(e.to_string()))?;

        let success = result.get("success").and_then(Value::as_bool).unwrap_or(true);
        debug!(tool = name, success, "tool finished");

        Ok(object(json!({
            "content": [{ "type": "text", "text": result.to_string() }],
            "isError": !success,
        })))
    }
}

fn object(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        _ => JsonMap::new(),
    }
}
