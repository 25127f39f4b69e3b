//! Command engine and bulk reader
//!
//! One request in flight at a time over the session's single socket. The
//! engine owns the transport together with the session and reply ids, so
//! the capture loop can take the whole thing by value and hand it back when
//! it stops.

use std::time::Duration;

use bytes::BytesMut;
use tracing::{debug, trace, warn};

use zkscan_core::codec::{Reader, Writer};
use zkscan_core::command::{reply, Command};
use zkscan_core::constants::USHRT_MAX;
use zkscan_core::frame::{self, Response};
use zkscan_core::{HEADER_SIZE, TCP_TOP_SIZE};
use zkscan_transport::Transport;

use crate::error::{Error, Result};

/// Deadline for request/response reads.
pub(crate) const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Reply-id a session starts from; also used by event acknowledgements.
pub(crate) const INITIAL_REPLY_ID: u16 = (USHRT_MAX - 1) as u16;

pub(crate) struct Engine {
    transport: Box<dyn Transport>,
    tcp: bool,
    session_id: u16,
    reply_id: u16,
    max_chunk: usize,
}

impl Engine {
    pub(crate) fn new(transport: Box<dyn Transport>, tcp: bool, max_chunk: usize) -> Self {
        Self {
            transport,
            tcp,
            session_id: 0,
            reply_id: INITIAL_REPLY_ID,
            max_chunk,
        }
    }

    pub(crate) fn is_tcp(&self) -> bool {
        self.tcp
    }

    pub(crate) fn session_id(&self) -> u16 {
        self.session_id
    }

    pub(crate) fn set_session_id(&mut self, session_id: u16) {
        self.session_id = session_id;
    }

    pub(crate) async fn shutdown(&mut self) {
        let _ = self.transport.disconnect().await;
    }

    /// One command/response exchange.
    ///
    /// The frame carries the pre-incremented reply-id, but the stored
    /// counter is overwritten with whatever the device echoes, keeping both
    /// sides in step even when the device skips values.
    pub(crate) async fn send_command(
        &mut self,
        command: Command,
        body: &[u8],
        budget: usize,
    ) -> Result<Response> {
        let (inner, _) =
            frame::build_command_frame(command.into(), body, self.session_id, self.reply_id);

        if self.tcp {
            self.transport.send(&frame::wrap_tcp(&inner)).await?;
        } else {
            self.transport.send(&inner).await?;
        }

        let max = if self.tcp { budget + TCP_TOP_SIZE } else { budget };
        let packet = self.transport.recv(max, READ_TIMEOUT).await?;

        let res = if self.tcp {
            Response::from_tcp(&packet)?
        } else {
            Response::from_udp(&packet)?
        };
        self.reply_id = res.reply_id;

        trace!(%command, code = res.code, status = res.status, body_len = res.body.len(), "exchange");
        Ok(res)
    }

    /// Header-only CMD_ACK_OK, sent by the capture loop for every inbound
    /// event frame. Does not touch the reply counter.
    pub(crate) async fn ack_event(&mut self) -> Result<()> {
        let (inner, _) =
            frame::build_command_frame(Command::AckOk.into(), &[], self.session_id, INITIAL_REPLY_ID);

        if self.tcp {
            self.transport.send(&frame::wrap_tcp(&inner)).await?;
        } else {
            self.transport.send(&inner).await?;
        }
        Ok(())
    }

    /// One raw read, used by the capture loop with the keep-alive deadline.
    pub(crate) async fn recv_event(&mut self, max: usize, deadline: Duration) -> Result<BytesMut> {
        Ok(self.transport.recv(max, deadline).await?)
    }

    /// Download an arbitrarily large blob through the two-stage buffered
    /// read protocol.
    pub(crate) async fn read_with_buffer(
        &mut self,
        command: Command,
        fct: i32,
        ext: i32,
    ) -> Result<Vec<u8>> {
        let mut body = Writer::with_capacity(11);
        body.i8(1).i16(u16::from(command) as i16).i32(fct).i32(ext);
        let body = body.finish();

        let res = self.send_command(Command::PrepareBuffer, &body, 1024).await?;
        if !res.status {
            return Err(Error::BufferedReadUnsupported);
        }

        if res.code == reply::DATA {
            return self.finish_inline_data(&res).await;
        }

        // CMD_PREPARE_DATA: body opens with {u8 flag, u32 size}
        let mut r = Reader::new(&res.body);
        let _flag = r.u8()?;
        let size = r.u32()? as usize;

        debug!(size, max_chunk = self.max_chunk, "chunked download");

        let remain = size % self.max_chunk;
        let packets = (size - remain) / self.max_chunk;

        let mut data = Vec::with_capacity(size);
        let mut start = 0;
        for _ in 0..packets {
            data.extend_from_slice(&self.read_chunk(start, self.max_chunk).await?);
            start += self.max_chunk;
        }
        if remain > 0 {
            data.extend_from_slice(&self.read_chunk(start, remain).await?);
        }

        self.free_data().await?;
        Ok(data)
    }

    async fn free_data(&mut self) -> Result<()> {
        self.send_command(Command::FreeData, &[], 8).await?;
        Ok(())
    }

    /// Inline CMD_DATA payload; over TCP the kernel may have delivered only
    /// a prefix, in which case the rest is pulled raw.
    async fn finish_inline_data(&mut self, res: &Response) -> Result<Vec<u8>> {
        if self.tcp {
            let need = res.tcp_length as i64 - HEADER_SIZE as i64 - res.body.len() as i64;
            if need > 0 {
                let more = self.transport.recv_exact(need as usize, READ_TIMEOUT).await?;
                let mut out = res.body.to_vec();
                out.extend_from_slice(&more);
                return Ok(out);
            }
        }
        Ok(res.body.to_vec())
    }

    async fn read_chunk(&mut self, start: usize, size: usize) -> Result<Vec<u8>> {
        let mut body = Writer::with_capacity(8);
        body.i32(start as i32).i32(size as i32);
        let body = body.finish();

        let budget = if self.tcp {
            size + HEADER_SIZE
        } else {
            self.max_chunk + HEADER_SIZE
        };

        for attempt in 0..3 {
            if attempt > 0 {
                debug!(start, attempt, "retrying chunk");
            }

            let res = self.send_command(Command::ReadBuffer, &body, budget).await?;
            let data = self.receive_chunk(&res).await?;
            if !data.is_empty() {
                return Ok(data);
            }
        }

        Err(Error::ChunkRead(start))
    }

    async fn receive_chunk(&mut self, res: &Response) -> Result<Vec<u8>> {
        match res.code {
            reply::DATA => self.finish_inline_data(res).await,
            reply::PREPARE_DATA if self.tcp => self.receive_chunk_tcp(res).await,
            reply::PREPARE_DATA => self.receive_chunk_udp().await,
            _ => Err(Error::InvalidResponse),
        }
    }

    /// Chunk delivered as a separate CMD_DATA frame after the
    /// CMD_PREPARE_DATA reply, terminated by a CMD_ACK_OK frame.
    async fn receive_chunk_tcp(&mut self, res: &Response) -> Result<Vec<u8>> {
        let mut r = Reader::new(&res.body);
        let size = r.u32()? as usize;

        let inline = if res.body.len() >= 8 {
            res.body[8..].to_vec()
        } else {
            Vec::new()
        };

        let packet = if inline.len() >= size {
            inline
        } else {
            let mut p = inline;
            p.extend_from_slice(&self.recv_some(size + 32).await?);
            p
        };

        let (data, broken_header) = self.receive_tcp_data(packet, size).await?;

        // The CMD_ACK_OK terminator may already sit in broken_header; top it
        // up to a full envelope + header.
        let mut term = broken_header;
        if term.len() < 16 {
            let more = self.recv_some(16).await?;
            term.extend_from_slice(&more);
        }
        if term.len() < 16 {
            let more = self
                .transport
                .recv_exact(16 - term.len(), READ_TIMEOUT)
                .await?;
            term.extend_from_slice(&more);
        }

        let code = u16::from_le_bytes([term[8], term[9]]);
        if code == reply::ACK_OK {
            Ok(data)
        } else {
            warn!(code, "chunk stream ended without ACK_OK");
            Ok(Vec::new())
        }
    }

    /// Over UDP every CMD_DATA arrives whole in its own datagram and a bare
    /// CMD_ACK_OK ends the stream.
    async fn receive_chunk_udp(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();

        loop {
            let dgram = self
                .transport
                .recv(self.max_chunk + HEADER_SIZE, READ_TIMEOUT)
                .await?;
            if dgram.len() < HEADER_SIZE {
                return Err(zkscan_core::Error::ShortPacket {
                    expected: HEADER_SIZE,
                    actual: dgram.len(),
                }
                .into());
            }

            match u16::from_le_bytes([dgram[0], dgram[1]]) {
                reply::DATA => data.extend_from_slice(&dgram[HEADER_SIZE..]),
                _ => return Ok(data),
            }
        }
    }

    /// Reassemble `size` payload bytes from a TCP byte run that may split a
    /// logical frame anywhere, returning any bytes of the next frame that
    /// the kernel already delivered.
    async fn receive_tcp_data(
        &mut self,
        packet: Vec<u8>,
        size: usize,
    ) -> Result<(Vec<u8>, Vec<u8>)> {
        let tcp_length = frame::detect_tcp_envelope(&packet) as usize;
        if tcp_length == 0 {
            return Err(zkscan_core::Error::InvalidEnvelope.into());
        }

        let promised = tcp_length.saturating_sub(HEADER_SIZE);
        if promised < size {
            // This envelope covers only part of the request: drain it, then
            // pull the next envelope plus continuation and recurse.
            let (mut data, broken_header) = Box::pin(self.receive_tcp_data(packet, promised)).await?;
            let remaining = size - data.len();

            let mut next = broken_header;
            let more = self.transport.recv_exact(remaining + 16, READ_TIMEOUT).await?;
            next.extend_from_slice(&more);

            let (tail, broken_header) = Box::pin(self.receive_tcp_data(next, remaining)).await?;
            data.extend_from_slice(&tail);
            return Ok((data, broken_header));
        }

        let packet_size = packet.len();
        if packet_size < 16 {
            return Err(zkscan_core::Error::ShortPacket {
                expected: 16,
                actual: packet_size,
            }
            .into());
        }

        if packet_size >= size + 32 {
            // The next frame's header is already here; hand it back so the
            // caller can spot the terminator without another read.
            if u16::from_le_bytes([packet[8], packet[9]]) == reply::DATA {
                return Ok((packet[16..size + 16].to_vec(), packet[size + 16..].to_vec()));
            }
            return Err(Error::InvalidResponse);
        }

        if packet_size > size + 16 {
            return Ok((packet[16..size + 16].to_vec(), packet[size + 16..].to_vec()));
        }

        let mut data = packet[16..].to_vec();
        let need = size - (packet_size - 16);
        if need > 0 {
            let more = self.transport.recv_exact(need, READ_TIMEOUT).await?;
            data.extend_from_slice(&more);
        }

        Ok((data, Vec::new()))
    }

    async fn recv_some(&mut self, max: usize) -> Result<BytesMut> {
        Ok(self.transport.recv(max, READ_TIMEOUT).await?)
    }
}
