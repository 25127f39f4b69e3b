//! Error types for zkscan

use zkscan_core::Command;

/// Result type alias for device operations
pub type Result<T> = std::result::Result<T, Error>;

/// Client-facing errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("already disconnected")]
    AlreadyDisconnected,

    #[error("already capturing")]
    AlreadyCapturing,

    /// The capture loop owns the socket; no command may be issued until
    /// `stop_capturing` returns it.
    #[error("cannot send command when capturing")]
    CannotCommandWhileCapturing,

    /// CMD_AUTH was rejected after an ACK_UNAUTH handshake
    #[error("unauthorized")]
    Unauthorized,

    /// Device does not implement the buffered-read protocol
    #[error("RWB not supported")]
    BufferedReadUnsupported,

    /// Attendance records of 8 or 16 bytes belong to firmware families this
    /// client does not speak
    #[error("unsupported attendance record layout of {0} bytes")]
    UnsupportedRecordLayout(usize),

    /// A chunk offset kept returning empty payloads
    #[error("can't read chunk at offset {0}")]
    ChunkRead(usize),

    /// The device answered with a non-ok code
    #[error("device refused {command} with code {code}")]
    Rejected { command: Command, code: u16 },

    /// Reply did not follow the wire contract
    #[error("invalid response")]
    InvalidResponse,

    #[error(transparent)]
    Protocol(#[from] zkscan_core::Error),

    #[error(transparent)]
    Transport(#[from] zkscan_transport::Error),
}

impl Error {
    /// Whether this wraps an expired read deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_timeout())
    }
}
