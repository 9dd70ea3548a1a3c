// Serial module - Serial port access and discovery
pub mod detect;
pub mod port;

pub use detect::{detect_port, list_ports, PortSummary};
pub use port::{open_port, SerialPortLine};
