// Supervisor module - Child process lifecycle for the client role
pub mod process;

pub use process::{shutdown, LaunchSpec, ManagedProcess, ShutdownOutcome, Supervisor};
