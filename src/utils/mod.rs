use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

pub fn format_decimal(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

/// Calendar date in the eight-digit form Tempo expects.
pub fn format_yyyymmdd(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub fn parse_yyyymmdd(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    if raw.len() != 8 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// ISO-8601 with microseconds and no offset, as Armado stores payment dates.
pub fn format_iso_micros(value: NaiveDateTime) -> String {
    value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Calendar date of an ISO-8601 timestamp, taken in the timestamp's own offset.
/// A trailing `Z` counts as UTC; naive timestamps and bare dates are accepted too.
pub fn timestamp_date(value: &str) -> Option<NaiveDate> {
    let raw = value.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.date_naive());
    }
    let naive_formats = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];
    for fmt in naive_formats.iter() {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(parsed.date());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

/// Human date for the ledger (`dd/mm/YYYY`); unreadable input is returned as is.
pub fn display_date(value: Option<&str>) -> String {
    let raw = match value {
        Some(raw) if !raw.trim().is_empty() => raw.trim(),
        _ => return String::new(),
    };
    match timestamp_date(raw) {
        Some(date) => date.format("%d/%m/%Y").to_string(),
        None => raw.to_string(),
    }
}
