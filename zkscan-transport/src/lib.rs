//! Socket transports for the ZK protocol
//!
//! One logical pipe per session: a connected TCP stream (enveloped frames)
//! or a connected UDP socket (one frame per datagram). Reads take an
//! explicit deadline; its expiry is a distinguished error so callers can
//! tell a quiet device from a dead one.

pub mod error;
pub mod tcp;
pub mod udp;

pub use error::{Error, Result};
pub use tcp::TcpTransport;
pub use udp::UdpTransport;

use async_trait::async_trait;
use bytes::BytesMut;
use std::time::Duration;

/// A connected socket to the device.
#[async_trait]
pub trait Transport: Send {
    /// Open the socket.
    async fn connect(&mut self) -> Result<()>;

    /// Close the socket. Safe to call twice.
    async fn disconnect(&mut self) -> Result<()>;

    /// Whether the socket is open.
    fn is_connected(&self) -> bool;

    /// Write the whole buffer.
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// One read of up to `max` bytes.
    ///
    /// Over TCP this is a single kernel read and may return any prefix of
    /// the in-flight frames; over UDP it returns exactly one datagram.
    async fn recv(&mut self, max: usize, deadline: Duration) -> Result<BytesMut>;

    /// Read until exactly `size` bytes have arrived.
    async fn recv_exact(&mut self, size: usize, deadline: Duration) -> Result<BytesMut>;

    /// Peer address for diagnostics.
    fn remote_addr(&self) -> String;
}
