//! On-wire record layouts
//!
//! Attendance log records are 40 bytes wide on the supported firmware
//! families. Live event frames carry one or more records of 12, 32, 36 or
//! 52-and-up bytes. The free-sizes reply is twenty little-endian i32s.

use chrono::{DateTime, FixedOffset};

use zkscan_types::Attendance;

use crate::codec::Reader;
use crate::error::{Error, Result};
use crate::time;

/// Width of a downloaded attendance record.
pub const ATTENDANCE_RECORD_SIZE: usize = 40;

/// Minimum free-sizes reply carrying all twenty counters.
pub const FREE_SIZES_SIZE: usize = 80;

/// Parse the 24-byte NUL-padded decimal user-id field.
pub fn parse_user_id(raw: &[u8]) -> Result<i64> {
    let cleaned: Vec<u8> = raw.iter().copied().filter(|&b| b != 0).collect();
    let text = std::str::from_utf8(&cleaned)
        .map_err(|_| Error::InvalidUserId(format!("{:02X?}", raw)))?;

    text.parse::<i64>()
        .map_err(|_| Error::InvalidUserId(text.to_string()))
}

/// Walk a downloaded attendance log.
///
/// `data` is the record area, after the 4-byte total-size prefix has been
/// consumed by the caller. Trailing bytes shorter than one record are
/// ignored, as the device pads the final chunk.
pub fn parse_attendance_log(
    data: &[u8],
    tz: &FixedOffset,
) -> Result<Vec<Attendance>> {
    let mut out = Vec::with_capacity(data.len() / ATTENDANCE_RECORD_SIZE);

    for record in data.chunks_exact(ATTENDANCE_RECORD_SIZE) {
        let mut r = Reader::new(record);
        let _ = r.u16()?;
        let user_raw = r.str_raw(24)?;
        let _ = r.u8()?;
        let time_raw = r.u32()?;

        out.push(Attendance {
            user_id: parse_user_id(user_raw)?,
            attended_at: time::decode_packed(time_raw, tz)?,
        });
    }

    Ok(out)
}

/// Storage counters from the free-sizes reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSizes {
    pub total_users: i32,
    pub total_fingers: i32,
    pub total_records: i32,
    pub finger_cap: i32,
    pub user_cap: i32,
    pub record_cap: i32,
}

/// Parse the twenty-i32 free-sizes reply.
pub fn parse_free_sizes(data: &[u8]) -> Result<FreeSizes> {
    if data.len() < FREE_SIZES_SIZE {
        return Err(Error::ShortBuffer {
            needed: FREE_SIZES_SIZE,
            remaining: data.len(),
        });
    }

    let mut r = Reader::new(&data[..FREE_SIZES_SIZE]);
    let mut fields = [0i32; 20];
    for field in &mut fields {
        *field = r.i32()?;
    }

    Ok(FreeSizes {
        total_users: fields[4],
        total_fingers: fields[6],
        total_records: fields[8],
        finger_cap: fields[14],
        user_cap: fields[15],
        record_cap: fields[16],
    })
}

/// One decoded live event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRecord {
    pub user_id: i64,
    pub timestamp: DateTime<FixedOffset>,
}

/// Walk the payload of a CMD_REG_EVENT frame.
///
/// Records shorter than 12 bytes end the walk; an unrecognized width yields
/// one error entry for the remainder and stops, so a malformed frame can
/// never wedge the capture loop.
pub fn parse_live_records(data: &[u8], tz: &FixedOffset) -> Vec<Result<LiveRecord>> {
    let mut out = Vec::new();
    let mut rest = data;

    while rest.len() >= 12 {
        let decoded = match rest.len() {
            12 => decode_short_record(&rest[..12], tz).map(|rec| (rec, 12)),
            32 => decode_long_record(&rest[..32], tz).map(|rec| (rec, 32)),
            36 => decode_long_record(&rest[..36], tz).map(|rec| (rec, 36)),
            n if n >= 52 => decode_long_record(&rest[..52], tz).map(|rec| (rec, 52)),
            n => {
                out.push(Err(Error::UnknownEventLayout(n)));
                return out;
            }
        };

        match decoded {
            Ok((record, consumed)) => {
                out.push(Ok(record));
                rest = &rest[consumed..];
            }
            Err(err) => {
                out.push(Err(err));
                return out;
            }
        }
    }

    out
}

// 12-byte layout: the user id is a bare u32, not a decimal string.
fn decode_short_record(record: &[u8], tz: &FixedOffset) -> Result<LiveRecord> {
    let mut r = Reader::new(record);
    let user_id = r.u32()? as i64;
    let _ = r.u8()?;
    let _ = r.u8()?;
    let timestamp = time::decode_hex6(r.str_raw(6)?, tz)?;

    Ok(LiveRecord { user_id, timestamp })
}

fn decode_long_record(record: &[u8], tz: &FixedOffset) -> Result<LiveRecord> {
    let mut r = Reader::new(record);
    let user_raw = r.str_raw(24)?;
    let _ = r.u8()?;
    let _ = r.u8()?;
    let timestamp = time::decode_hex6(r.str_raw(6)?, tz)?;

    Ok(LiveRecord {
        user_id: parse_user_id(user_raw)?,
        timestamp,
    })
}
