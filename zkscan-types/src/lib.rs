//! Type definitions for zkscan

pub mod event;
pub mod properties;

pub use event::{Attendance, ScanEvent, ScanEventError};
pub use properties::DeviceProperties;
