use serialport::{SerialPortInfo, SerialPortType};
use tabled::Tabled;
use tracing::{debug, warn};

/// One row of the `ports` listing
#[derive(Debug, Clone, PartialEq, Eq, Tabled)]
pub struct PortSummary {
    #[tabled(rename = "Port")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub kind: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

impl From<&SerialPortInfo> for PortSummary {
    fn from(info: &SerialPortInfo) -> Self {
        let (kind, description) = match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let text = [usb.manufacturer.as_deref(), usb.product.as_deref()]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" ");
                let text = if text.is_empty() {
                    format!("{:04x}:{:04x}", usb.vid, usb.pid)
                } else {
                    text
                };
                ("USB", text)
            }
            SerialPortType::PciPort => ("PCI", String::new()),
            SerialPortType::BluetoothPort => ("Bluetooth", String::new()),
            _ => ("Unknown", String::new()),
        };

        Self {
            name: info.port_name.clone(),
            kind: kind.to_string(),
            description,
        }
    }
}

impl PortSummary {
    /// Whether this port is likely the bridged microcontroller
    pub fn looks_like_device(&self) -> bool {
        matches_device(&self.name, &self.description)
    }
}

/// Match on an "Arduino" description or a USB serial adapter device name
pub fn matches_device(name: &str, description: &str) -> bool {
    description.to_lowercase().contains("arduino") || name.contains("ttyUSB") || name.contains("ttyACM")
}

/// Serial ports currently present on the system
pub fn list_ports() -> Vec<PortSummary> {
    match serialport::available_ports() {
        Ok(ports) => ports.iter().map(PortSummary::from).collect(),
        Err(e) => {
            warn!(error = %e, "failed to enumerate serial ports");
            Vec::new()
        }
    }
}

/// First port that looks like the bridged device
pub fn detect_port() -> Option<String> {
    let found = pick_device(&list_ports());
    debug!(port = ?found, "serial auto-detection finished");
    found
}

fn pick_device(ports: &[PortSummary]) -> Option<String> {
    ports
        .iter()
        .find(|port| port.looks_like_device())
        .map(|port| port.name.clone())
}
