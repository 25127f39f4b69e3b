//! TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{error::*, Transport};

/// Socket-level keep-alive period on the device link.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(60);

/// Framed TCP transport (port 4370).
pub struct TcpTransport {
    addr: String,
    port: u16,
    socket_addr: Option<SocketAddr>,
    stream: Option<TcpStream>,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket_addr: None,
            stream: None,
            connect_timeout: Duration::from_secs(3),
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.socket_addr {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{addr_str}: {e}")))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("no addresses found for {addr_str}")))?;

        self.socket_addr = Some(addr);
        Ok(addr)
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let addr = self.resolve_addr().await?;

        debug!("connecting to {addr}");

        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::Io)?;

        stream.set_nodelay(true)?;

        let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_PERIOD);
        SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;

        debug!("connected to {addr}");

        self.stream = Some(stream);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            debug!("disconnecting from {}", self.remote_addr());
            let _ = stream.shutdown().await;
        }

        self.socket_addr = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;

        trace!("tx {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        stream.write_all(data).await?;
        stream.flush().await?;

        Ok(())
    }

    async fn recv(&mut self, max: usize, deadline: Duration) -> Result<BytesMut> {
        let stream = self.stream_mut()?;

        let mut buf = BytesMut::zeroed(max);

        let n = timeout(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)?
            .map_err(Error::Io)?;

        if n == 0 {
            return Err(Error::ConnectionClosed);
        }

        buf.truncate(n);
        trace!("rx {} bytes: {:02X?}", n, &buf[..n.min(16)]);

        Ok(buf)
    }

    async fn recv_exact(&mut self, size: usize, deadline: Duration) -> Result<BytesMut> {
        let stream = self.stream_mut()?;

        let mut buf = BytesMut::zeroed(size);

        timeout(deadline, stream.read_exact(&mut buf))
            .await
            .map_err(|_| Error::ReadTimeout)?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Error::ConnectionClosed
                } else {
                    Error::Io(e)
                }
            })?;

        trace!("rx exact {} bytes", size);

        Ok(buf)
    }

    fn remote_addr(&self) -> String {
        self.socket_addr
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }
}
