//! Error types for zkscan-core

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol-level errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Buffer ended before a fixed-width field
    #[error("short buffer: needed {needed} bytes, {remaining} remaining")]
    ShortBuffer { needed: usize, remaining: usize },

    /// TCP envelope missing or malformed
    #[error("invalid TCP packet")]
    InvalidEnvelope,

    /// Packet too small to carry the inner header
    #[error("packet too short: expected at least {expected} bytes, got {actual}")]
    ShortPacket { expected: usize, actual: usize },

    /// An on-wire time did not name a real calendar date
    #[error("invalid device time: {0}")]
    InvalidTime(String),

    /// User-id field did not hold a decimal string
    #[error("invalid user id {0:?}")]
    InvalidUserId(String),

    /// Live event record of a width the walker does not know
    #[error("unrecognized event record of {0} bytes")]
    UnknownEventLayout(usize),
}
