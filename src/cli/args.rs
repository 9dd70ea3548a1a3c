use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command line arguments for Serial Bridge
#[derive(Parser, Debug)]
#[command(
    name = "serial-bridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Bridge a serial microcontroller to a JSON-RPC tool session over stdio",
    long_about = "Exposes a line-oriented serial device (LED, IR sensor) as JSON-RPC tools on stdin/stdout, \
                  and provides an interactive shell that launches and drives such a server."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (replaces global and project files)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve device tools over stdin/stdout
    Serve(ServeArgs),
    /// Launch a server and control it interactively
    Shell(ShellArgs),
    /// List serial ports
    Ports,
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Server role arguments
#[derive(ClapArgs, Debug, Default)]
pub struct ServeArgs {
    /// Serial port path (auto-detected when omitted)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Start without opening a serial device
    #[arg(long)]
    pub no_device: bool,
}

/// Interactive client arguments
#[derive(ClapArgs, Debug, Default)]
pub struct ShellArgs {
    /// Server executable (defaults to this binary)
    #[arg(long)]
    pub server: Option<String>,

    /// Arguments for the server executable
    #[arg(last = true)]
    pub server_args: Vec<String>,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write a default project configuration
    Init {
        /// Directory to create `.serial-bridge/` in (defaults to the current directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Show the effective configuration
    Show,
}
