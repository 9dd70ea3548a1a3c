//! Serial Bridge Library
//!
//! Exposes a line-oriented serial microcontroller as JSON-RPC tools over
//! stdio, with the matching client, a child-process supervisor and an
//! interactive shell.

pub mod cli;
pub mod core;
pub mod domain;
pub mod infrastructure;

pub use crate::core::device::DeviceLink;
pub use crate::core::protocol::{SessionClient, SessionServer};
pub use crate::core::supervisor::Supervisor;
pub use crate::domain::config::BridgeConfig;
pub use crate::domain::error::{BridgeError, BridgeResult};
