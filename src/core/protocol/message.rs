use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Version tag carried by every message
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON object used for params and results
pub type JsonMap = serde_json::Map<String, Value>;

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const SERVER_NOT_INITIALIZED: i64 = -32002;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn not_initialized() -> Self {
        Self::new(Self::SERVER_NOT_INITIALIZED, "Server not initialized")
    }

    pub fn to_value(&self) -> Value {
        let mut object = JsonMap::new();
        object.insert("code".to_string(), self.code.into());
        object.insert("message".to_string(), self.message.clone().into());
        if let Some(data) = &self.data {
            object.insert("data".to_string(), data.clone());
        }
        Value::Object(object)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Call expecting a correlated response
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: JsonMap,
}

/// Answer to exactly one earlier request
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub outcome: Result<JsonMap, RpcError>,
}

/// One-way message; never answered
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: JsonMap,
}

/// A single line on the wire
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

/// Reasons a line is not a valid message
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("invalid message shape: {0}")]
    Shape(String),
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: JsonMap) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }
}

impl Response {
    pub fn success(id: u64, result: JsonMap) -> Self {
        Self {
            id,
            outcome: Ok(result),
        }
    }

    pub fn failure(id: u64, error: RpcError) -> Self {
        Self {
            id,
            outcome: Err(error),
        }
    }
}

impl Notification {
    pub fn new(method: impl Into<String>, params: JsonMap) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Loose view of an incoming object, classified by `RpcMessage::from_value`
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl RpcMessage {
    /// Decode one line of the stream
    pub fn decode(line: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(line.trim()).map_err(|e| FrameError::Json(e.to_string()))?;
        Self::from_value(value)
    }

    /// Classify a JSON value as exactly one of the three message shapes
    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        if !value.is_object() {
            return Err(shape("message is not a JSON object"));
        }

        let raw: RawMessage =
            serde_json::from_value(value).map_err(|e| FrameError::Shape(e.to_string()))?;

        if let Some(version) = &raw.jsonrpc {
            if version != JSONRPC_VERSION {
                return Err(shape(format!("unsupported jsonrpc version '{version}'")));
            }
        }

        let id = match raw.id {
            Some(id) => Some(
                id.as_u64()
                    .ok_or_else(|| shape(format!("id must be a non-negative integer, got {id}")))?,
            ),
            None => None,
        };

        match (raw.method, id) {
            (Some(method), id) => {
                if raw.result.is_some() || raw.error.is_some() {
                    return Err(shape("a call cannot carry result or error"));
                }
                let params = into_map(raw.params, "params")?;
                Ok(match id {
                    Some(id) => RpcMessage::Request(Request { id, method, params }),
                    None => RpcMessage::Notification(Notification { method, params }),
                })
            }
            (None, Some(id)) => match (raw.result, raw.error) {
                (Some(result), None) => Ok(RpcMessage::Response(Response::success(
                    id,
                    into_map(Some(result), "result")?,
                ))),
                (None, Some(error)) => {
                    let error: RpcError = serde_json::from_value(error)
                        .map_err(|e| shape(format!("malformed error object: {e}")))?;
                    Ok(RpcMessage::Response(Response::failure(id, error)))
                }
                _ => Err(shape("response must carry exactly one of result or error")),
            },
            (None, None) => Err(shape("message has neither method nor id")),
        }
    }

    /// Wire form, without the line terminator
    pub fn to_value(&self) -> Value {
        let mut object = JsonMap::new();
        object.insert("jsonrpc".to_string(), JSONRPC_VERSION.into());

        match self {
            RpcMessage::Request(request) => {
                object.insert("id".to_string(), request.id.into());
                object.insert("method".to_string(), request.method.clone().into());
                object.insert("params".to_string(), Value::Object(request.params.clone()));
            }
            RpcMessage::Response(response) => {
                object.insert("id".to_string(), response.id.into());
                match &response.outcome {
                    Ok(result) => object.insert("result".to_string(), Value::Object(result.clone())),
                    Err(error) => object.insert("error".to_string(), error.to_value()),
                };
            }
            RpcMessage::Notification(notification) => {
                object.insert("method".to_string(), notification.method.clone().into());
                object.insert("params".to_string(), Value::Object(notification.params.clone()));
            }
        }

        Value::Object(object)
    }

    /// Newline-terminated wire form
    pub fn to_line(&self) -> String {
        let mut line = self.to_value().to_string();
        line.push('\n');
        line
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            RpcMessage::Request(request) => Some(&request.method),
            RpcMessage::Notification(notification) => Some(&notification.method),
            RpcMessage::Response(_) => None,
        }
    }
}

impl From<Request> for RpcMessage {
    fn from(request: Request) -> Self {
        RpcMessage::Request(request)
    }
}

impl From<Response> for RpcMessage {
    fn from(response: Response) -> Self {
        RpcMessage::Response(response)
    }
}

impl From<Notification> for RpcMessage {
    fn from(notification: Notification) -> Self {
        RpcMessage::Notification(notification)
    }
}

fn shape(message: impl Into<String>) -> FrameError {
    FrameError::Shape(message.into())
}

fn into_map(value: Option<Value>, field: &str) -> Result<JsonMap, FrameError> {
    match value {
        None => Ok(JsonMap::new()),
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(shape(format!("{field} must be an object, got {other}"))),
    }
}
