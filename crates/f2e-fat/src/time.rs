use chrono::{NaiveDate, NaiveDateTime};

/// Decode a FAT date/time pair to seconds since the Unix epoch (UTC).
///
/// FAT dates count years from 1980 and times have 2-second resolution.
/// Nonsense field values (month 0, day 0) decode to the epoch. The result
/// is truncated to `[0, i32::MAX]` so it always fits an ext4 timestamp.
#[must_use]
pub fn fat_time_to_unix(date: u16, time: u16) -> u32 {
    let year = 1980 + i32::from(date >> 9);
    let month = u32::from((date >> 5) & 0x0F);
    let day = u32::from(date & 0x1F);
    let hour = u32::from(time >> 11);
    let minute = u32::from((time >> 5) & 0x3F);
    let second = u32::from(time & 0x1F) * 2;

    let timestamp = NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map_or(0, |dt: NaiveDateTime| dt.and_utc().timestamp());

    timestamp.clamp(0, i64::from(i32::MAX)) as u32
}
