//! SOA serial arithmetic.
//!
//! Zone transfers to slaves only occur when the SOA serial grows, so every
//! applied change must produce a serial arithmetically greater than the one
//! before it. Serials here are the human-auditable date form: an 8 digit
//! YYYYMMDD date followed by a 2 digit same-day revision counter.

use chrono::NaiveDate;

const DATE_FORMAT: &str = "%Y%m%d";
const MAX_REVISION: u32 = 99;

/// Computes the next serial for a zone given its current one.
///
/// Rules, in order:
/// - "0" is the autoserial sentinel and is never touched.
/// - A serial dated today increments its revision, rolling over to
///   tomorrow's date with revision 00 after 99 same-day revisions.
/// - A future-dated serial keeps its date as the anchor and applies the
///   same-day rules relative to it; it is never regressed to today.
/// - A past-dated serial is replaced with today's date, revision 00.
///
/// Anything that does not parse as 8 date digits plus 2 revision digits
/// falls back to today with revision 00. The result is always 10 numeric
/// characters (or "0").
pub fn next_serial(current: &str, today: NaiveDate) -> String {
    if current == "0" {
        return "0".to_string();
    }

    let (anchor, revision) = match split_serial(current) {
        Some(parts) => parts,
        None => return fresh_serial(today),
    };

    if anchor < today {
        return fresh_serial(today);
    }

    // Same-day or future-dated: bump the revision relative to the anchor.
    if revision < MAX_REVISION {
        format_serial(anchor, revision + 1)
    } else {
        match anchor.succ_opt() {
            Some(next_day) => format_serial(next_day, 0),
            None => fresh_serial(today),
        }
    }
}

/// next_serial anchored to the current UTC date.
pub fn next_serial_now(current: &str) -> String {
    next_serial(current, chrono::Utc::now().date_naive())
}

fn split_serial(serial: &str) -> Option<(NaiveDate, u32)> {
    if serial.len() != 10 || !serial.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = NaiveDate::parse_from_str(&serial[..8], DATE_FORMAT).ok()?;
    let revision = serial[8..].parse::<u32>().ok()?;
    Some((date, revision))
}

fn fresh_serial(today: NaiveDate) -> String {
    format_serial(today, 0)
}

fn format_serial(date: NaiveDate, revision: u32) -> String {
    format!("{}{:02}", date.format(DATE_FORMAT), revision)
}
