use serde_json::Value;
use std::path::Path;
use std::process::{Command, Output};
use std::str;

const BINARY: &str = env!("CARGO_BIN_EXE_serial-bridge");

/// CLI interface tests
#[cfg(test)]
mod cli_tests {
    use super::*;

    /// Run the binary in `dir` with no ambient configuration
    fn run(dir: &Path, args: &[&str]) -> Output {
        Command::new(BINARY)
            .args(args)
            .current_dir(dir)
            .env("HOME", dir)
            .env_remove("GEMINI_API_KEY")
            .env_remove("SERIAL_BRIDGE_PORT")
            .env_remove("RUST_LOG")
            .output()
            .expect("Failed to execute command")
    }

    fn stdout(output: &Output) -> &str {
        str::from_utf8(&output.stdout).expect("Invalid UTF-8")
    }

    #[test]
    fn test_cli_help() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(dir.path(), &["--help"]);

        let stdout = stdout(&output);
        assert!(output.status.success());
        assert!(stdout.contains("Usage:"));
        assert!(stdout.contains("Commands:"));
        for command in ["serve", "shell", "ports", "config", "version"] {
            assert!(stdout.contains(command), "help is missing {command}");
        }
    }

    #[test]
    fn test_cli_version() {
        let dir = tempfile::tempdir().unwrap();

        let output = run(dir.path(), &["version"]);
        assert!(output.status.success());
        assert_eq!(
            stdout(&output).trim(),
            format!("serial-bridge {}", env!("CARGO_PKG_VERSION"))
        );

        let output = run(dir.path(), &["-o", "json", "version"]);
        let message: Value = serde_json::from_str(stdout(&output)).unwrap();
        assert_eq!(message["level"], "info");
        assert!(message["message"].as_str().unwrap().starts_with("serial-bridge "));
    }

    #[test]
    fn test_config_init_then_show() {
        let dir = tempfile::tempdir().unwrap();

        let output = run(dir.path(), &["config", "init", "--dir", dir.path().to_str().unwrap()]);
        assert!(output.status.success());
        let config_file = dir.path().join(".serial-bridge").join("config.toml");
        assert!(config_file.exists());

        let again = run(dir.path(), &["config", "init", "--dir", dir.path().to_str().unwrap()]);
        assert!(!again.status.success());
        assert!(str::from_utf8(&again.stderr).unwrap().contains("already exists"));

        std::fs::write(
            &config_file,
            "[device]\nbaud_rate = 115200\n\n[ai]\napi_key = \"sk-local\"\n",
        )
        .unwrap();

        let output = run(dir.path(), &["-o", "json", "config", "show"]);
        assert!(output.status.success());
        let shown: Value = serde_json::from_str(stdout(&output)).unwrap();
        assert_eq!(shown["device"]["baud_rate"], 115200);
        assert_eq!(shown["ai"]["api_key"], "********");
        assert!(!stdout(&output).contains("sk-local"));
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(dir.path(), &["--config", "missing.toml", "config", "show"]);

        assert_eq!(output.status.code(), Some(1));
        let stderr = str::from_utf8(&output.stderr).unwrap();
        assert!(stderr.contains("Error: Configuration error"), "{stderr}");
    }

    #[test]
    fn test_ports_listing_runs() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(dir.path(), &["ports"]);

        assert!(output.status.success());
        assert!(!stdout(&output).trim().is_empty());
    }

    #[test]
    fn test_invalid_command() {
        let dir = tempfile::tempdir().unwrap();
        let output = run(dir.path(), &["invalid-command"]);

        assert!(!output.status.success());
        let stderr = str::from_utf8(&output.stderr).unwrap();
        assert!(stderr.contains("error:") || stderr.contains("unrecognized"));
    }
}
