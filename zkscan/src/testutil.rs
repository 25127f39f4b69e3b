//! Scripted transport for protocol tests
//!
//! Plays back a fixed sequence of reads while recording every frame the
//! client sends, so the §-by-§ wire scenarios run without a device.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

use zkscan_core::codec::Writer;
use zkscan_core::command::reply;
use zkscan_transport::{Error, Result, Transport};

pub(crate) type SentLog = Arc<Mutex<Vec<Vec<u8>>>>;

/// One scripted read outcome.
pub(crate) enum Step {
    /// Bytes the kernel would deliver for one read call
    Recv(Vec<u8>),
    /// The read deadline expires
    Timeout,
    /// The read never completes (lets a stop signal win the race)
    Pending,
}

pub(crate) struct MockTransport {
    steps: VecDeque<Step>,
    sent: SentLog,
}

impl MockTransport {
    pub(crate) fn scripted(steps: Vec<Step>) -> (Self, SentLog) {
        let sent: SentLog = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                steps: steps.into(),
                sent: Arc::clone(&sent),
            },
            sent,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }

    async fn recv(&mut self, max: usize, _deadline: Duration) -> Result<BytesMut> {
        match self.steps.pop_front() {
            Some(Step::Recv(mut bytes)) => {
                // A kernel read never returns more than asked; hand back the
                // excess on the next call.
                if bytes.len() > max {
                    let rest = bytes.split_off(max);
                    self.steps.push_front(Step::Recv(rest));
                }
                Ok(BytesMut::from(&bytes[..]))
            }
            Some(Step::Timeout) => Err(Error::ReadTimeout),
            Some(Step::Pending) => std::future::pending().await,
            None => Err(Error::ConnectionClosed),
        }
    }

    async fn recv_exact(&mut self, size: usize, _deadline: Duration) -> Result<BytesMut> {
        let mut out = BytesMut::with_capacity(size);

        while out.len() < size {
            match self.steps.front_mut() {
                Some(Step::Recv(bytes)) => {
                    let take = bytes.len().min(size - out.len());
                    out.extend_from_slice(&bytes[..take]);
                    bytes.drain(..take);
                    if bytes.is_empty() {
                        self.steps.pop_front();
                    }
                }
                Some(Step::Timeout) => {
                    self.steps.pop_front();
                    return Err(Error::ReadTimeout);
                }
                Some(Step::Pending) => return std::future::pending().await,
                None => return Err(Error::ConnectionClosed),
            }
        }

        Ok(out)
    }

    fn remote_addr(&self) -> String {
        "mock".into()
    }
}

/// Inner device frame with the header fields written verbatim.
pub(crate) fn device_frame(code: u16, command_id: u16, reply_id: u16, body: &[u8]) -> Vec<u8> {
    let mut w = Writer::with_capacity(8 + body.len());
    w.u16(code).u16(0).u16(command_id).u16(reply_id).bytes(body);
    w.finish().to_vec()
}

/// CMD_ACK_OK reply frame.
pub(crate) fn ok_frame(command_id: u16, reply_id: u16) -> Vec<u8> {
    device_frame(reply::ACK_OK, command_id, reply_id, &[])
}

/// CMD_DATA reply frame carrying `body` inline.
pub(crate) fn data_frame(body: &[u8]) -> Vec<u8> {
    device_frame(reply::DATA, 0, 0, body)
}

/// CMD_PREPARE_DATA reply announcing a `size`-byte buffered download.
pub(crate) fn prepare_data_frame(size: u32) -> Vec<u8> {
    let mut body = Writer::with_capacity(5);
    body.u8(1).u32(size);
    device_frame(reply::PREPARE_DATA, 0, 0, &body.finish())
}
