// Tools module - Tool catalog and the device-backed registry
pub mod registry;
pub mod toolbox;

pub use registry::{ToolDescriptor, ToolRegistry};
pub use toolbox::{decide_led_state, DeviceToolbox, PortInfo};
