//! Scan events and attendance records

use std::fmt;

use chrono::{DateTime, FixedOffset};

/// A single attendance record downloaded from the device log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendance {
    /// User identifier as enrolled on the device
    pub user_id: i64,

    /// Punch time in the session timezone
    pub attended_at: DateTime<FixedOffset>,
}

/// Error carried inside a [`ScanEvent`] when the capture loop could not
/// produce a normal record.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ScanEventError {
    /// A record arrived but could not be decoded; the loop keeps running.
    #[error("record decode failed: {0}")]
    Decode(String),

    /// The socket failed; this is the last event the loop emits.
    #[error("transport failed: {0}")]
    Transport(String),
}

impl ScanEventError {
    /// Whether the capture loop exits after emitting this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// A live event pushed by the capture loop.
///
/// Normal events carry a user id and timestamp. Events with `error` set
/// report a decode failure (non-terminal) or a transport failure (terminal).
#[derive(Debug, Clone)]
pub struct ScanEvent {
    /// Identifier of the originating device, as configured by the caller
    pub device_id: String,

    /// User identifier parsed from the event record
    pub user_id: i64,

    /// Scan time in the session timezone; absent on error events
    pub timestamp: Option<DateTime<FixedOffset>>,

    /// Set when the loop failed to produce a normal record
    pub error: Option<ScanEventError>,
}

impl ScanEvent {
    /// A successfully decoded scan.
    pub fn new(device_id: String, user_id: i64, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            device_id,
            user_id,
            timestamp: Some(timestamp),
            error: None,
        }
    }

    /// An event reporting a capture failure.
    pub fn failed(device_id: String, error: ScanEventError) -> Self {
        Self {
            device_id,
            user_id: 0,
            timestamp: None,
            error: Some(error),
        }
    }
}

impl fmt::Display for ScanEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.timestamp, &self.error) {
            (Some(at), _) => write!(
                f,
                "device_id:{} user_id:{} at:{}",
                self.device_id,
                self.user_id,
                at.to_rfc3339()
            ),
            (None, Some(err)) => write!(f, "device_id:{} error:{}", self.device_id, err),
            (None, None) => write!(f, "device_id:{} (empty)", self.device_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_scan() {
        let tz = FixedOffset::east_opt(7 * 3600).unwrap();
        let at = tz.with_ymd_and_hms(2024, 3, 9, 8, 15, 0).unwrap();
        let event = ScanEvent::new("gate-1".into(), 41, at);

        let line = event.to_string();
        assert!(line.contains("device_id:gate-1"));
        assert!(line.contains("user_id:41"));
    }

    #[test]
    fn test_terminal_classification() {
        assert!(ScanEventError::Transport("broken pipe".into()).is_terminal());
        assert!(!ScanEventError::Decode("bad user id".into()).is_terminal());
    }
}
