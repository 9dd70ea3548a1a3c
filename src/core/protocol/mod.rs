// Protocol module - Line-delimited JSON-RPC session over a byte stream
pub mod client;
pub mod framing;
pub mod message;
pub mod server;
pub mod state;

pub use client::{Implementation, ProtocolInfo, ServerInfo, SessionClient};
pub use framing::{Frame, LineReader, MAX_FRAME_BYTES};
pub use message::{
    FrameError, JsonMap, Notification, Request, Response, RpcError, RpcMessage,
};
pub use server::SessionServer;
pub use state::SessionState;
