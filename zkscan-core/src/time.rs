//! On-wire time encodings
//!
//! Two encodings coexist. Command payloads and attendance records use a
//! packed u32 counting seconds inside a synthetic calendar where every month
//! has 31 days and years start at 2000. Live event records use six plain
//! bytes `{yy mm dd hh mi ss}` with the year offset by 2000. Decoded values
//! are interpreted in the session timezone.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, TimeZone, Timelike};

use crate::error::{Error, Result};

/// Encode a local time into the packed u32 representation.
pub fn encode_packed(t: &DateTime<FixedOffset>) -> u32 {
    let days =
        (t.year() as u32 % 100) * 12 * 31 + (t.month() - 1) * 31 + t.day() - 1;
    days * 24 * 60 * 60 + (t.hour() * 60 + t.minute()) * 60 + t.second()
}

/// Decode a packed u32 into a time in `tz`.
pub fn decode_packed(raw: u32, tz: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    let mut t = raw;

    let second = t % 60;
    t /= 60;
    let minute = t % 60;
    t /= 60;
    let hour = t % 24;
    t /= 24;
    let day = t % 31 + 1;
    t /= 31;
    let month = t % 12 + 1;
    t /= 12;
    let year = t + 2000;

    local_datetime(tz, year as i32, month, day, hour, minute, second)
}

/// Decode the six-byte form used by live event records.
pub fn decode_hex6(raw: &[u8], tz: &FixedOffset) -> Result<DateTime<FixedOffset>> {
    if raw.len() < 6 {
        return Err(Error::ShortBuffer {
            needed: 6,
            remaining: raw.len(),
        });
    }

    local_datetime(
        tz,
        raw[0] as i32 + 2000,
        raw[1] as u32,
        raw[2] as u32,
        raw[3] as u32,
        raw[4] as u32,
        raw[5] as u32,
    )
}

/// Encode a local time into the six-byte form.
pub fn encode_hex6(t: &DateTime<FixedOffset>) -> [u8; 6] {
    [
        (t.year() % 100) as u8,
        t.month() as u8,
        t.day() as u8,
        t.hour() as u8,
        t.minute() as u8,
        t.second() as u8,
    ]
}

fn local_datetime(
    tz: &FixedOffset,
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Result<DateTime<FixedOffset>> {
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(|| {
            Error::InvalidTime(format!(
                "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
            ))
        })?;

    tz.from_local_datetime(&date)
        .single()
        .ok_or_else(|| Error::InvalidTime(date.to_string()))
}
