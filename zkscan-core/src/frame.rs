//! Frame building and response parsing
//!
//! An inner frame is `{u16 command, u16 checksum, u16 session_id,
//! u16 reply_id}` followed by the body. Over TCP every frame travels inside
//! the 8-byte envelope `{0x5050, 0x8282, u32 length}`; over UDP the inner
//! frame is the whole datagram.

use bytes::Bytes;

use crate::checksum;
use crate::codec::{Reader, Writer};
use crate::command::is_ok_code;
use crate::constants::{TCP_MAGIC_1, TCP_MAGIC_2, USHRT_MAX};
use crate::error::{Error, Result};
use crate::{HEADER_SIZE, TCP_TOP_SIZE};

/// Advance a reply-id by one, wrapping at USHRT_MAX.
pub fn next_reply_id(reply_id: u16) -> u16 {
    let mut next = reply_id as u32 + 1;
    if next >= USHRT_MAX {
        next -= USHRT_MAX;
    }
    next as u16
}

/// Build a command frame.
///
/// The checksum covers the zero-checksum header carrying the *current*
/// reply-id plus the body; the emitted header carries the pre-incremented
/// reply-id, which is also returned so the caller can store it.
pub fn build_command_frame(
    command: u16,
    body: &[u8],
    session_id: u16,
    reply_id: u16,
) -> (Bytes, u16) {
    let mut zeroed = Writer::with_capacity(HEADER_SIZE + body.len());
    zeroed.u16(command).u16(0).u16(session_id).u16(reply_id).bytes(body);
    let sum = checksum::compute(&zeroed.finish());

    let next = next_reply_id(reply_id);

    let mut frame = Writer::with_capacity(HEADER_SIZE + body.len());
    frame.u16(command).u16(sum).u16(session_id).u16(next).bytes(body);
    (frame.finish(), next)
}

/// Prepend the TCP envelope.
pub fn wrap_tcp(frame: &[u8]) -> Bytes {
    let mut top = Writer::with_capacity(TCP_TOP_SIZE + frame.len());
    top.u16(TCP_MAGIC_1)
        .u16(TCP_MAGIC_2)
        .u32(frame.len() as u32)
        .bytes(frame);
    top.finish()
}

/// Payload length promised by a leading TCP envelope; 0 when the packet is
/// too short or neither magic matches.
pub fn detect_tcp_envelope(packet: &[u8]) -> u32 {
    if packet.len() <= TCP_TOP_SIZE {
        return 0;
    }

    let magic_1 = u16::from_le_bytes([packet[0], packet[1]]);
    let magic_2 = u16::from_le_bytes([packet[2], packet[3]]);
    let length = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);

    if magic_1 == TCP_MAGIC_1 || magic_2 == TCP_MAGIC_2 {
        length
    } else {
        0
    }
}

/// A parsed reply.
///
/// `status` is true only for the three success codes; every other code is
/// carried through for the caller to inspect.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: bool,
    pub code: u16,
    pub tcp_length: u32,
    pub command_id: u16,
    pub reply_id: u16,
    pub body: Bytes,
}

impl Response {
    /// Parse a TCP read: envelope, inner header, body.
    pub fn from_tcp(packet: &[u8]) -> Result<Self> {
        let tcp_length = detect_tcp_envelope(packet);
        if tcp_length == 0 {
            return Err(Error::InvalidEnvelope);
        }
        if packet.len() < TCP_TOP_SIZE + HEADER_SIZE {
            return Err(Error::ShortPacket {
                expected: TCP_TOP_SIZE + HEADER_SIZE,
                actual: packet.len(),
            });
        }

        Self::parse_inner(&packet[TCP_TOP_SIZE..], tcp_length)
    }

    /// Parse a UDP datagram: inner frame only.
    pub fn from_udp(packet: &[u8]) -> Result<Self> {
        if packet.len() < HEADER_SIZE {
            return Err(Error::ShortPacket {
                expected: HEADER_SIZE,
                actual: packet.len(),
            });
        }

        Self::parse_inner(packet, 0)
    }

    fn parse_inner(frame: &[u8], tcp_length: u32) -> Result<Self> {
        let mut r = Reader::new(frame);
        let code = r.u16()?;
        let _checksum = r.u16()?;
        let command_id = r.u16()?;
        let reply_id = r.u16()?;

        Ok(Self {
            status: is_ok_code(code),
            code,
            tcp_length,
            command_id,
            reply_id,
            body: Bytes::copy_from_slice(&frame[HEADER_SIZE..]),
        })
    }
}
