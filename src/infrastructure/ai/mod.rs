// AI module - Completion backends
pub mod gemini;

pub use gemini::{backend_from_config, GeminiBackend};
