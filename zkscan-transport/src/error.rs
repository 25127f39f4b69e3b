//! Transport errors

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("connection timeout")]
    ConnectionTimeout,

    /// A read deadline expired. The capture loop treats this as a prompt to
    /// probe the device, not as a failure.
    #[error("read timeout")]
    ReadTimeout,

    #[error("connection closed by remote")]
    ConnectionClosed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Whether this is an expired read deadline rather than a socket fault.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ReadTimeout)
    }
}
