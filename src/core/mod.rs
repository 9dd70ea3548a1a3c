// Core module - Device link, session protocol, tools and supervision
pub mod ai;
pub mod device;
pub mod protocol;
pub mod supervisor;
pub mod tools;
