// Device module - Serial command/response protocol
pub mod clock;
pub mod link;
pub mod response;

pub use clock::{Clock, DeviceTiming, TokioClock};
pub use link::{DeviceLink, SerialCommand, SerialLine};
pub use response::parse_reading;
