//! Timestamp pattern engine.
//!
//! Log timestamps are recognised against a fixed table of known patterns.
//! Each pattern is a count of leading spaces plus a restricted
//! strftime-style format string using the specifiers
//! `%Y %y %B %b %m %d %e %a %p %H %k %I %l %M %S %3 %%` (`%3` is a
//! zero-padded millisecond field).
//!
//! All timestamps are treated as UTC wall-clock; parsing produces
//! milliseconds since the Unix epoch of that wall-clock and no timezone is
//! ever stored. Two-digit years pivot at 69 (69..=99 map to 19xx, the rest
//! to 20xx).
//!
//! Matching the table is first-match-wins in table order, so patterns with
//! more specific prefixes are listed first.

use std::sync::OnceLock;

use crate::error::{LogPackError, Result};

/// Milliseconds since the Unix epoch.
pub type EpochTimeMs = i64;

const MS_PER_DAY: i64 = 86_400_000;

static ABBREV_DAYS_OF_WEEK: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
static ABBREV_MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
static MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// A timestamp shape: a number of spaces preceding the timestamp and a
/// format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampPattern {
    num_spaces_before_ts: u8,
    format: String,
}

/// The table of observed timestamp patterns, in match-priority order.
static KNOWN_PATTERNS: OnceLock<Vec<TimestampPattern>> = OnceLock::new();

/// Returns the process-wide table of known timestamp patterns.
///
/// Initialised lazily and idempotently on first use.
pub fn known_patterns() -> &'static [TimestampPattern] {
    KNOWN_PATTERNS.get_or_init(|| {
        vec![
            // E.g. 2015-01-31T15:50:45.392
            TimestampPattern::new(0, "%Y-%m-%dT%H:%M:%S.%3"),
            // E.g. 2015-01-31T15:50:45,392
            TimestampPattern::new(0, "%Y-%m-%dT%H:%M:%S,%3"),
            // E.g. [2015-01-31T15:50:45
            TimestampPattern::new(0, "[%Y-%m-%dT%H:%M:%S"),
            // E.g. [20170106-16:56:41]
            TimestampPattern::new(0, "[%Y%m%d-%H:%M:%S]"),
            // E.g. 2015-01-31 15:50:45,392
            TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S,%3"),
            // E.g. 2015-01-31 15:50:45.392
            TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S.%3"),
            // E.g. [2015-01-31 15:50:45,085]
            TimestampPattern::new(0, "[%Y-%m-%d %H:%M:%S,%3]"),
            // E.g. 2015-01-31 15:50:45
            TimestampPattern::new(0, "%Y-%m-%d %H:%M:%S"),
            // E.g. Start-Date: 2015-01-31  15:50:45
            TimestampPattern::new(1, "%Y-%m-%d  %H:%M:%S"),
            // E.g. 2015/01/31 15:50:45
            TimestampPattern::new(0, "%Y/%m/%d %H:%M:%S"),
            // E.g. 15/01/31 15:50:45
            TimestampPattern::new(0, "%y/%m/%d %H:%M:%S"),
            // E.g. 150131  9:50:45
            TimestampPattern::new(0, "%y%m%d %k:%M:%S"),
            // E.g. 01 Jan 2016 15:50:17,085
            TimestampPattern::new(0, "%d %b %Y %H:%M:%S,%3"),
            // E.g. Jan 01, 2016 3:50:17 PM
            TimestampPattern::new(0, "%b %d, %Y %l:%M:%S %p"),
            // E.g. January 31, 2015 15:50
            TimestampPattern::new(0, "%B %d, %Y %H:%M"),
            // E.g. E [31/Jan/2015:15:50:45
            TimestampPattern::new(1, "[%d/%b/%Y:%H:%M:%S"),
            // E.g. localhost - - [01/Jan/2016:15:50:17
            // E.g. 192.168.4.5 - - [01/Jan/2016:15:50:17
            TimestampPattern::new(3, "[%d/%b/%Y:%H:%M:%S"),
            // E.g. 192.168.4.5 - - [01/01/2016:15:50:17
            TimestampPattern::new(3, "[%d/%m/%Y:%H:%M:%S"),
            // E.g. INFO [main] 2015-01-31 15:50:45,085
            TimestampPattern::new(2, "%Y-%m-%d %H:%M:%S,%3"),
            // E.g. Started POST "/api/v3/internal/allowed" for 127.0.0.1 at 2017-06-18 00:20:44
            TimestampPattern::new(6, "%Y-%m-%d %H:%M:%S"),
            // E.g. update-alternatives 2015-01-31 15:50:45
            TimestampPattern::new(1, "%Y-%m-%d %H:%M:%S"),
            // E.g. ERROR: apport (pid 4557) Sun Jan  1 15:50:45 2015
            TimestampPattern::new(4, "%a %b %e %H:%M:%S %Y"),
            // E.g. <<<2016-11-10 03:02:29:936
            TimestampPattern::new(0, "<<<%Y-%m-%d %H:%M:%S:%3"),
            // E.g. Jan 21 11:56:42
            TimestampPattern::new(0, "%b %d %H:%M:%S"),
        ]
    })
}

/// Tries each known pattern against `line`; the first that parses wins.
///
/// Returns the pattern together with the parsed timestamp and the byte
/// range `[begin, end)` the timestamp occupies in `line`.
pub fn search_known_patterns(
    line: &str,
) -> Option<(&'static TimestampPattern, EpochTimeMs, usize, usize)> {
    for pattern in known_patterns() {
        if let Some((timestamp, begin, end)) = pattern.parse_timestamp(line) {
            return Some((pattern, timestamp, begin, end));
        }
    }
    None
}

impl TimestampPattern {
    /// Creates a pattern from a leading-space count and a format string.
    pub fn new(num_spaces_before_ts: u8, format: impl Into<String>) -> Self {
        Self {
            num_spaces_before_ts,
            format: format.into(),
        }
    }

    /// The format string.
    pub fn format(&self) -> &str {
        &self.format
    }

    /// Number of spaces preceding the timestamp.
    pub fn num_spaces_before_ts(&self) -> u8 {
        self.num_spaces_before_ts
    }

    /// True for the empty pattern (a file position with no timestamp).
    pub fn is_empty(&self) -> bool {
        self.format.is_empty()
    }

    /// Parses this pattern against `line`.
    ///
    /// On success returns `(timestamp_ms, begin, end)` where `[begin, end)`
    /// is the byte range of the timestamp in `line`.
    pub fn parse_timestamp(&self, line: &str) -> Option<(EpochTimeMs, usize, usize)> {
        let bytes = line.as_bytes();
        let mut line_ix = 0;

        // Find the beginning of the timestamp.
        let mut num_spaces_found = 0;
        while num_spaces_found < self.num_spaces_before_ts && line_ix < bytes.len() {
            if bytes[line_ix] == b' ' {
                num_spaces_found += 1;
            }
            line_ix += 1;
        }
        if num_spaces_found < self.num_spaces_before_ts {
            return None;
        }
        let ts_begin_ix = line_ix;

        let mut date = 1u32;
        let mut month = 1u32;
        let mut year = 1970i64;
        let mut hour = 0i64;
        let mut uses_12_hour_clock = false;
        let mut minute = 0i64;
        let mut second = 0i64;
        let mut millisecond = 0i64;
        let mut is_pm = false;

        let format = self.format.as_bytes();
        let mut format_ix = 0;
        let mut is_specifier = false;
        while format_ix < format.len() && line_ix < bytes.len() {
            if !is_specifier {
                if format[format_ix] == b'%' {
                    is_specifier = true;
                } else {
                    if format[format_ix] != bytes[line_ix] {
                        return None;
                    }
                    line_ix += 1;
                }
            } else {
                match format[format_ix] {
                    b'%' => {
                        if bytes[line_ix] != b'%' {
                            return None;
                        }
                        line_ix += 1;
                    }
                    // Zero-padded year in century
                    b'y' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if value > 99 {
                            return None;
                        }
                        // Years >= 69 are 1900s, the rest 2000s.
                        year = if value >= 69 { value + 1900 } else { value + 2000 };
                        line_ix += 2;
                    }
                    // Zero-padded year with century
                    b'Y' => {
                        let value = convert_padded_number(bytes, line_ix, 4, b'0')?;
                        if value > 9999 {
                            return None;
                        }
                        year = value;
                        line_ix += 4;
                    }
                    // Month name
                    b'B' => {
                        let ix = match_name_table(line, line_ix, &MONTH_NAMES)?;
                        month = ix as u32 + 1;
                        line_ix += MONTH_NAMES[ix].len();
                    }
                    // Abbreviated month name
                    b'b' => {
                        let ix = match_name_table(line, line_ix, &ABBREV_MONTH_NAMES)?;
                        month = ix as u32 + 1;
                        line_ix += ABBREV_MONTH_NAMES[ix].len();
                    }
                    // Zero-padded month
                    b'm' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if !(1..=12).contains(&value) {
                            return None;
                        }
                        month = value as u32;
                        line_ix += 2;
                    }
                    // Zero-padded day in month
                    b'd' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if !(1..=31).contains(&value) {
                            return None;
                        }
                        date = value as u32;
                        line_ix += 2;
                    }
                    // Space-padded day in month
                    b'e' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b' ')?;
                        if !(1..=31).contains(&value) {
                            return None;
                        }
                        date = value as u32;
                        line_ix += 2;
                    }
                    // Abbreviated day of week; not useful for an absolute
                    // timestamp, so only validated.
                    b'a' => {
                        let ix = match_name_table(line, line_ix, &ABBREV_DAYS_OF_WEEK)?;
                        line_ix += ABBREV_DAYS_OF_WEEK[ix].len();
                    }
                    // Part of day
                    b'p' => {
                        if line[line_ix..].starts_with("AM") {
                            is_pm = false;
                        } else if line[line_ix..].starts_with("PM") {
                            is_pm = true;
                        } else {
                            return None;
                        }
                        line_ix += 2;
                    }
                    // Zero-padded hour on 24-hour clock
                    b'H' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if value > 23 {
                            return None;
                        }
                        hour = value;
                        line_ix += 2;
                    }
                    // Space-padded hour on 24-hour clock
                    b'k' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b' ')?;
                        if value > 23 {
                            return None;
                        }
                        hour = value;
                        line_ix += 2;
                    }
                    // Zero-padded hour on 12-hour clock
                    b'I' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if !(1..=12).contains(&value) {
                            return None;
                        }
                        hour = value;
                        uses_12_hour_clock = true;
                        line_ix += 2;
                    }
                    // Space-padded hour on 12-hour clock
                    b'l' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b' ')?;
                        if !(1..=12).contains(&value) {
                            return None;
                        }
                        hour = value;
                        uses_12_hour_clock = true;
                        line_ix += 2;
                    }
                    // Zero-padded minute
                    b'M' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if value > 59 {
                            return None;
                        }
                        minute = value;
                        line_ix += 2;
                    }
                    // Zero-padded second; 60 admits leap seconds.
                    b'S' => {
                        let value = convert_padded_number(bytes, line_ix, 2, b'0')?;
                        if value > 60 {
                            return None;
                        }
                        second = value;
                        line_ix += 2;
                    }
                    // Zero-padded millisecond
                    b'3' => {
                        let value = convert_padded_number(bytes, line_ix, 3, b'0')?;
                        if value > 999 {
                            return None;
                        }
                        millisecond = value;
                        line_ix += 3;
                    }
                    _ => return None,
                }
                is_specifier = false;
            }
            format_ix += 1;
        }
        if format_ix < format.len() {
            // Complete format string not present in the line.
            return None;
        }

        if uses_12_hour_clock {
            if hour == 12 {
                if !is_pm {
                    // 12 AM is 0 on the 24-hour clock.
                    hour = 0;
                }
            } else if is_pm {
                hour += 12;
            }
        }

        if date > days_in_month(year, month) {
            return None;
        }

        let days = days_from_civil(year, month, date);
        let timestamp = days * MS_PER_DAY
            + hour * 3_600_000
            + minute * 60_000
            + second * 1_000
            + millisecond;

        Some((timestamp, ts_begin_ix, line_ix))
    }

    /// Formats `timestamp` with this pattern and splices it into `msg` at
    /// the position following `num_spaces_before_ts` spaces.
    ///
    /// The inverse of [`TimestampPattern::parse_timestamp`] over a message
    /// whose timestamp bytes were removed.
    pub fn insert_formatted_timestamp(
        &self,
        timestamp: EpochTimeMs,
        msg: &str,
    ) -> Result<String> {
        let bytes = msg.as_bytes();
        let mut ts_begin_ix = 0;
        let mut num_spaces_found = 0;
        while num_spaces_found < self.num_spaces_before_ts && ts_begin_ix < bytes.len() {
            if bytes[ts_begin_ix] == b' ' {
                num_spaces_found += 1;
            }
            ts_begin_ix += 1;
        }
        if num_spaces_found < self.num_spaces_before_ts {
            return Err(LogPackError::corrupt(format!(
                "message has {} spaces but pattern expects {}",
                num_spaces_found, self.num_spaces_before_ts
            )));
        }

        let days = timestamp.div_euclid(MS_PER_DAY);
        let ms_of_day = timestamp.rem_euclid(MS_PER_DAY);
        let (year, month, date) = civil_from_days(days);
        let day_of_week_ix = (days + 4).rem_euclid(7) as usize;
        let hour = ms_of_day / 3_600_000;
        let minute = ms_of_day % 3_600_000 / 60_000;
        let second = ms_of_day % 60_000 / 1_000;
        let millisecond = ms_of_day % 1_000;

        // 50 is an estimate of the formatted timestamp's length.
        let mut new_msg = String::with_capacity(msg.len() + 50);
        new_msg.push_str(&msg[..ts_begin_ix]);

        let format = self.format.as_bytes();
        let mut is_specifier = false;
        for &format_byte in format {
            if !is_specifier {
                if format_byte == b'%' {
                    is_specifier = true;
                } else {
                    new_msg.push(format_byte as char);
                }
                continue;
            }
            match format_byte {
                b'%' => new_msg.push('%'),
                b'y' => {
                    let value = if year >= 2000 { year - 2000 } else { year - 1900 };
                    append_padded_value(value, '0', 2, &mut new_msg);
                }
                b'Y' => append_padded_value(year, '0', 4, &mut new_msg),
                b'B' => new_msg.push_str(MONTH_NAMES[month as usize - 1]),
                b'b' => new_msg.push_str(ABBREV_MONTH_NAMES[month as usize - 1]),
                b'm' => append_padded_value(month as i64, '0', 2, &mut new_msg),
                b'd' => append_padded_value(date as i64, '0', 2, &mut new_msg),
                b'e' => append_padded_value(date as i64, ' ', 2, &mut new_msg),
                b'a' => new_msg.push_str(ABBREV_DAYS_OF_WEEK[day_of_week_ix]),
                b'p' => new_msg.push_str(if hour > 11 { "PM" } else { "AM" }),
                b'H' => append_padded_value(hour, '0', 2, &mut new_msg),
                b'k' => append_padded_value(hour, ' ', 2, &mut new_msg),
                b'I' => {
                    let value = to_12_hour(hour);
                    append_padded_value(value, '0', 2, &mut new_msg);
                }
                b'l' => {
                    let value = to_12_hour(hour);
                    append_padded_value(value, ' ', 2, &mut new_msg);
                }
                b'M' => append_padded_value(minute, '0', 2, &mut new_msg),
                b'S' => append_padded_value(second, '0', 2, &mut new_msg),
                b'3' => append_padded_value(millisecond, '0', 3, &mut new_msg),
                other => {
                    return Err(LogPackError::unsupported(format!(
                        "unknown format specifier %{}",
                        other as char
                    )));
                }
            }
            is_specifier = false;
        }

        new_msg.push_str(&msg[ts_begin_ix..]);
        Ok(new_msg)
    }
}

fn to_12_hour(hour: i64) -> i64 {
    if hour == 0 {
        12
    } else if hour > 12 {
        hour - 12
    } else {
        hour
    }
}

/// Converts a padded decimal field of `length` bytes at `begin` to a
/// number. Padding characters may only appear as a prefix.
fn convert_padded_number(bytes: &[u8], begin: usize, length: usize, padding: u8) -> Option<i64> {
    let end = begin + length;
    if end > bytes.len() {
        return None;
    }
    let mut ix = begin;
    while ix < end && bytes[ix] == padding {
        ix += 1;
    }
    let mut value = 0i64;
    while ix < end {
        let c = bytes[ix];
        if !c.is_ascii_digit() {
            return None;
        }
        value = value * 10 + i64::from(c - b'0');
        ix += 1;
    }
    Some(value)
}

/// Finds the entry of `names` that prefixes `line` at `at`.
fn match_name_table(line: &str, at: usize, names: &[&str]) -> Option<usize> {
    let rest = line.get(at..)?;
    names.iter().position(|name| rest.starts_with(name))
}

fn append_padded_value(value: i64, padding: char, length: usize, out: &mut String) {
    let value_str = value.to_string();
    for _ in value_str.len()..length {
        out.push(padding);
    }
    out.push_str(&value_str);
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Days since 1970-01-01 for a civil date (proleptic Gregorian).
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = if month > 2 { month - 3 } else { month + 9 } as i64;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if month <= 2 { y + 1 } else { y }, month, day)
}
