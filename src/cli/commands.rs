use crate::cli::args::{Args, Command, ConfigArgs, ConfigCommand, ServeArgs, ShellArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::cli::shell::Shell;
use crate::core::device::{DeviceLink, DeviceTiming};
use crate::core::protocol::{ProtocolInfo, SessionClient, SessionServer};
use crate::core::supervisor::{shutdown, LaunchSpec, ManagedProcess, ShutdownOutcome, Supervisor};
use crate::core::tools::{DeviceToolbox, PortInfo};
use crate::domain::config::{BridgeConfig, DeviceConfig};
use crate::domain::error::BridgeResult;
use crate::infrastructure::ai::backend_from_config;
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::{detect_port, list_ports, open_port, SerialPortLine};
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing::{info, warn};

/// Execute CLI command
pub async fn execute_command(args: Args) -> BridgeResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new().with_explicit_path(args.config.clone());
    let config = config_manager.load_config()?;

    if let Err(e) = init_logging(&config.global.log_level, args.verbose) {
        eprintln!("Warning: logging unavailable: {e}");
    }

    match args.command {
        Command::Serve(serve_args) => execute_serve(serve_args, config).await,
        Command::Shell(shell_args) => {
            execute_shell(shell_args, args.config, &config, &writer).await
        }
        Command::Ports => {
            writer.write_ports(&list_ports())?;
            Ok(())
        }
        Command::Config(config_args) => {
            execute_config_command(config_args, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("serial-bridge {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

/// Server role: answer the session protocol on stdin/stdout until the client
/// hangs up
async fn execute_serve(args: ServeArgs, mut config: BridgeConfig) -> BridgeResult<()> {
    if let Some(port) = args.port {
        config.device.port = Some(port);
    }
    if let Some(baud) = args.baud {
        config.device.baud_rate = baud;
    }

    let timing = DeviceTiming::from(&config.device.timing);
    let (link, port_name) = if args.no_device {
        info!("starting without a serial device");
        (DeviceLink::disconnected(timing), None)
    } else {
        connect_device(&config.device, timing).await
    };

    let port = PortInfo {
        name: port_name,
        baud_rate: config.device.baud_rate,
    };
    let toolbox = DeviceToolbox::new(link, port, backend_from_config(&config.ai))
        .with_retries(config.device.retries);
    let mut server = SessionServer::new(toolbox, config.session.protocol_version.clone());

    info!(protocol = %config.session.protocol_version, "serving device tools on stdio");
    server
        .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}

/// Open the configured or detected port; a missing device leaves the link
/// disconnected instead of failing
async fn connect_device(
    device: &DeviceConfig,
    timing: DeviceTiming,
) -> (DeviceLink<SerialPortLine>, Option<String>) {
    let Some(name) = device.port.clone().or_else(detect_port) else {
        warn!("no serial device found, device tools will report not connected");
        return (DeviceLink::disconnected(timing), None);
    };

    match open_port(&name, device).await {
        Ok(line) => (DeviceLink::new(line, timing), Some(name)),
        Err(e) => {
            warn!(port = %name, error = %e, "could not open serial device, continuing without it");
            (DeviceLink::disconnected(timing), Some(name))
        }
    }
}

/// Client role: launch a server, run the interactive shell, always shut the
/// server down afterwards
async fn execute_shell(
    args: ShellArgs,
    config_path: Option<PathBuf>,
    config: &BridgeConfig,
    writer: &ConsoleWriter,
) -> BridgeResult<()> {
    let spec = launch_spec(args, config_path, config)?;
    writer.write_message(&format!("Starting server: {spec}"))?;

    let supervisor = Supervisor::from_config(&config.supervisor);
    let mut process = supervisor.launch(&spec).await?;

    let session = run_session(&mut process, config).await;

    writer.write_message("Shutting down server...")?;
    match shutdown(&mut process, config.supervisor.grace()).await {
        Ok(outcome) => writer.write_message(describe_shutdown(&outcome))?,
        Err(e) => writer.write_error(&format!("Failed to stop server: {e}"))?,
    }

    session
}

async fn run_session(process: &mut ManagedProcess, config: &BridgeConfig) -> BridgeResult<()> {
    let (stdout, stdin) = process.pipes()?;
    let mut client =
        SessionClient::new(stdout, stdin).with_handshake_timeout(config.session.handshake_timeout());

    let server = client
        .initialize(&ProtocolInfo::new(
            config.session.protocol_version.clone(),
            config.session.client_name.clone(),
        ))
        .await?;
    info!(server = %server.server.name, version = %server.server.version, "connected to server");

    let mut shell = Shell::new(
        BufReader::new(tokio::io::stdin()),
        std::io::stdout(),
        config.session.call_timeout(),
    );
    let result = shell.run(&mut client).await;
    client.close();
    result
}

/// Server command line: flag, then config, then this binary running `serve`
fn launch_spec(
    args: ShellArgs,
    config_path: Option<PathBuf>,
    config: &BridgeConfig,
) -> BridgeResult<LaunchSpec> {
    let server_args = if args.server_args.is_empty() {
        config.supervisor.server_args.clone()
    } else {
        args.server_args
    };

    if let Some(program) = args.server.or_else(|| config.supervisor.server_command.clone()) {
        return Ok(LaunchSpec::new(program, server_args));
    }

    let program = std::env::current_exe()?.to_string_lossy().into_owned();
    let mut own_args = Vec::new();
    if let Some(path) = config_path {
        own_args.push("--config".to_string());
        own_args.push(path.to_string_lossy().into_owned());
    }
    own_args.extend(server_args);
    Ok(LaunchSpec::new(program, own_args))
}

fn describe_shutdown(outcome: &ShutdownOutcome) -> &'static str {
    match outcome {
        ShutdownOutcome::AlreadyExited { .. } => "Server process had already exited",
        ShutdownOutcome::Graceful { .. } => "Server shut down gracefully",
        ShutdownOutcome::Forced { .. } => "Server did not exit in time and was killed",
    }
}

fn execute_config_command(
    args: ConfigArgs,
    writer: &ConsoleWriter,
    config: &BridgeConfig,
    config_manager: &ConfigManager,
) -> BridgeResult<()> {
    match args.command {
        ConfigCommand::Init { dir } => {
            let dir = match dir {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };
            let path = config_manager.init_project_config(&dir)?;
            writer.write_message(&format!("Configuration written to {}", path.display()))?;
            Ok(())
        }
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
    }
}
