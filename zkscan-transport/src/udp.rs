//! UDP transport
//!
//! Unframed variant of the protocol: each inner frame is exactly one
//! datagram in both directions.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{error::*, Transport};

/// Connected datagram transport (port 4370).
pub struct UdpTransport {
    addr: String,
    port: u16,
    socket: Option<UdpSocket>,
    remote: Option<SocketAddr>,
}

impl UdpTransport {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            socket: None,
            remote: None,
        }
    }

    async fn resolve_addr(&mut self) -> Result<SocketAddr> {
        if let Some(addr) = self.remote {
            return Ok(addr);
        }

        let addr_str = format!("{}:{}", self.addr, self.port);

        let addr = tokio::net::lookup_host(&addr_str)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{addr_str}: {e}")))?
            .next()
            .ok_or_else(|| Error::InvalidAddress(format!("no addresses found for {addr_str}")))?;

        self.remote = Some(addr);
        Ok(addr)
    }

    fn socket_ref(&self) -> Result<&UdpSocket> {
        self.socket.as_ref().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Err(Error::AlreadyConnected);
        }

        let remote = self.resolve_addr().await?;

        debug!("connecting to {remote} via UDP");

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Error::Io)?;
        socket.connect(remote).await.map_err(Error::Io)?;

        self.socket = Some(socket);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            debug!("disconnecting from {}", self.remote_addr());
        }

        self.remote = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let socket = self.socket_ref()?;

        trace!("tx {} bytes: {:02X?}", data.len(), &data[..data.len().min(16)]);

        socket.send(data).await.map_err(Error::Io)?;
        Ok(())
    }

    async fn recv(&mut self, max: usize, deadline: Duration) -> Result<BytesMut> {
        let socket = self.socket_ref()?;

        let mut buf = BytesMut::zeroed(max);

        let n = timeout(deadline, socket.recv(&mut buf))
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
        // Datagrams arrive whole; accumulate until the requested size is
        // covered, then hand back exactly that many bytes.
        let mut out = BytesMut::with_capacity(size);

        while out.len() < size {
            let chunk = self.recv(size - out.len(), deadline).await?;
            out.extend_from_slice(&chunk);
        }

        out.truncate(size);
        Ok(out)
    }

    fn remote_addr(&self) -> String {
        self.remote
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| format!("{}:{}", self.addr, self.port))
    }
}
