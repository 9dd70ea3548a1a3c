// Infrastructure module - External dependencies and adapters
pub mod ai;
pub mod config;
pub mod logging;
pub mod serial;
