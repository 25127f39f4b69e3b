//! Device property aggregate

use std::fmt;

use chrono::{DateTime, FixedOffset};

/// Snapshot of device identity, clock and storage counters.
///
/// Built from three exchanges: firmware version, device clock and the
/// free-sizes record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    /// Caller-assigned device identifier
    pub device_id: String,

    /// Whether the session runs over TCP (false: UDP)
    pub tcp: bool,

    /// Firmware version string as reported by the device
    pub firmware_version: String,

    /// Device clock at the time of the query, in the session timezone
    pub clock: DateTime<FixedOffset>,

    /// Users currently enrolled
    pub total_users: i32,

    /// Fingerprint templates currently stored
    pub total_fingers: i32,

    /// Attendance records currently stored
    pub total_records: i32,

    /// Fingerprint template capacity
    pub finger_cap: i32,

    /// User capacity
    pub user_cap: i32,

    /// Attendance record capacity
    pub record_cap: i32,
}

impl fmt::Display for DeviceProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = if self.tcp { "TCP" } else { "UDP" };
        write!(
            f,
            "Device[{} fw:{} clock:{} users:{}/{} fingers:{}/{} records:{}/{} proto:{}]",
            self.device_id,
            self.firmware_version,
            self.clock.to_rfc3339(),
            self.total_users,
            self.user_cap,
            self.total_fingers,
            self.finger_cap,
            self.total_records,
            self.record_cap,
            proto,
        )
    }
}
