//! # zkscan
//!
//! Async client for ZK-family time-and-attendance and access-control
//! devices speaking the binary protocol on port 4370, over TCP (framed) or
//! UDP (one frame per datagram).
//!
//! ## Quick start
//!
//! ```no_run
//! use zkscan::Device;
//!
//! #[tokio::main]
//! async fn main() -> zkscan::Result<()> {
//!     let mut device = Device::new("192.168.1.201").with_device_id("lobby");
//!     device.connect().await?;
//!
//!     let properties = device.get_properties().await?;
//!     println!("{properties}");
//!
//!     for attendance in device.get_all_scanned_events().await? {
//!         println!("{} at {}", attendance.user_id, attendance.attended_at);
//!     }
//!
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Live capture
//!
//! ```no_run
//! use zkscan::Device;
//!
//! #[tokio::main]
//! async fn main() -> zkscan::Result<()> {
//!     let mut device = Device::new("192.168.1.201");
//!     device.connect().await?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::channel(16);
//!     device.start_capturing(tx).await?;
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("{event}");
//!     }
//!
//!     device.stop_capturing().await;
//!     device.disconnect().await?;
//!     Ok(())
//! }
//! ```

mod capture;
mod device;
mod engine;
pub mod error;

pub use device::Device;
pub use error::{Error, Result};

// Re-export the types crossing the public surface
pub use zkscan_core::{Command, DEFAULT_PORT};
pub use zkscan_types::{Attendance, DeviceProperties, ScanEvent, ScanEventError};

#[cfg(test)]
mod testutil;
