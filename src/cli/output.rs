use crate::cli::args::OutputFormat;
use crate::core::tools::ToolDescriptor;
use crate::domain::config::BridgeConfig;
use crate::infrastructure::serial::PortSummary;
use std::io;
use tabled::{Table, Tabled};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError>;
    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("TOML serialization error: {0}")]
    TomlError(#[from] toml::ser::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::BridgeError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_ports(&self, ports: &[PortSummary]) -> Result<(), OutputError> {
        println!("{}", render_ports(ports, self.format)?);
        Ok(())
    }

    fn write_config(&self, config: &BridgeConfig) -> Result<(), OutputError> {
        println!("{}", render_config(config, self.format)?);
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Port listing in the requested format
pub fn render_ports(ports: &[PortSummary], format: OutputFormat) -> Result<String, OutputError> {
    if ports.is_empty() && format != OutputFormat::Json {
        return Ok("No serial ports found".to_string());
    }

    Ok(match format {
        OutputFormat::Text => ports
            .iter()
            .map(|port| {
                let marker = if port.looks_like_device() { " *" } else { "" };
                if port.description.is_empty() {
                    format!("{} ({}){}", port.name, port.kind, marker)
                } else {
                    format!("{} ({}: {}){}", port.name, port.kind, port.description, marker)
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = ports
                .iter()
                .map(|port| {
                    serde_json::json!({
                        "port": port.name,
                        "type": port.kind,
                        "description": port.description,
                        "candidate": port.looks_like_device(),
                    })
                })
                .collect();
            serde_json::to_string_pretty(&rows)?
        }
        OutputFormat::Table => Table::new(ports).to_string(),
    })
}

/// Effective configuration, with the API key redacted
pub fn render_config(config: &BridgeConfig, format: OutputFormat) -> Result<String, OutputError> {
    let config = BridgeConfig {
        ai: config.ai.redacted(),
        ..config.clone()
    };

    Ok(match format {
        OutputFormat::Text => toml::to_string_pretty(&config)?,
        OutputFormat::Json => serde_json::to_string_pretty(&config)?,
        OutputFormat::Table => {
            let mut rows = Vec::new();
            flatten_settings("", &serde_json::to_value(&config)?, &mut rows);
            Table::new(rows).to_string()
        }
    })
}

/// Numbered tool catalog as printed by the shell
pub fn render_tools(tools: &[ToolDescriptor]) -> String {
    let rows: Vec<ToolTableRow> = tools.iter().enumerate().map(ToolTableRow::from).collect();
    Table::new(rows).to_string()
}

/// Table row for one configuration value
#[derive(Tabled)]
struct SettingRow {
    setting: String,
    value: String,
}

fn flatten_settings(prefix: &str, value: &serde_json::Value, rows: &mut Vec<SettingRow>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_settings(&path, nested, rows);
            }
        }
        serde_json::Value::String(text) => rows.push(SettingRow {
            setting: prefix.to_string(),
            value: text.clone(),
        }),
        other => rows.push(SettingRow {
            setting: prefix.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Table row for the tool catalog
#[derive(Tabled)]
struct ToolTableRow {
    #[tabled(rename = "#")]
    index: usize,
    name: String,
    description: String,
    arguments: String,
}

impl From<(usize, &ToolDescriptor)> for ToolTableRow {
    fn from((index, tool): (usize, &ToolDescriptor)) -> Self {
        let arguments = tool.input_schema["properties"]
            .as_object()
            .map(|properties| properties.keys().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();

        Self {
            index: index + 1,
            name: tool.name.clone(),
            description: tool.description.clone(),
            arguments,
        }
    }
}
