use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use num_format::{Locale, ToFormattedString};
use xxhash_rust::xxh3::xxh3_64;

use crate::types::RawTimestamp;

#[derive(Clone)]
pub struct NumberFormatOptions {
    pub use_comma: bool,
    pub use_human: bool,
    pub locale: String,
    pub decimal_places: usize,
}

impl Default for NumberFormatOptions {
    fn default() -> Self {
        Self {
            use_comma: true,
            use_human: false,
            locale: "en".to_string(),
            decimal_places: 2,
        }
    }
}

/// Format a number for display. Accepts both u32 and u64.
pub fn format_number(n: impl Into<u64>, options: &NumberFormatOptions) -> String {
    let n: u64 = n.into();
    let locale = match options.locale.as_str() {
        "de" => Locale::de,
        "fr" => Locale::fr,
        "es" => Locale::es,
        "it" => Locale::it,
        "ja" => Locale::ja,
        "ko" => Locale::ko,
        "zh" => Locale::zh,
        _ => Locale::en,
    };

    if options.use_human {
        let prec = options.decimal_places;
        if n >= 1_000_000_000_000 {
            format!("{:.prec$}t", n as f64 / 1_000_000_000_000.0)
        } else if n >= 1_000_000_000 {
            format!("{:.prec$}b", n as f64 / 1_000_000_000.0)
        } else if n >= 1_000_000 {
            format!("{:.prec$}m", n as f64 / 1_000_000.0)
        } else if n >= 1_000 {
            format!("{:.prec$}k", n as f64 / 1_000.0)
        } else {
            n.to_string()
        }
    } else if options.use_comma {
        n.to_formatted_string(&locale)
    } else {
        n.to_string()
    }
}

/// Format a millisecond duration as `1h 02m 03s`.
pub fn format_duration_ms(ms: f64) -> String {
    if !ms.is_finite() || ms <= 0.0 {
        return "0s".to_string();
    }
    let secs = (ms / 1000.0).round() as u64;
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

/// Non-padded `M/D/YYYY`, or `-` when absent.
pub fn format_date_for_display(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(d) => format!("{}/{}/{}", d.month(), d.day(), d.year()),
        None => "-".to_string(),
    }
}

#[inline]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Milliseconds from `start` to `end` (negative if `end` is earlier).
#[inline]
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64
}

// Naive formats are interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d@%Hh%Mm%Ss",
    "%B %d, %Y %I:%M%p",
    "%B %d, %Y %I:%M %p",
    "%b %d, %Y %I:%M%p",
];

/// Parse one of the timestamp shapes found in chat logs.
pub fn parse_timestamp(raw: &RawTimestamp) -> Option<DateTime<Utc>> {
    match raw {
        RawTimestamp::Millis(ms) => DateTime::from_timestamp_millis(*ms),
        RawTimestamp::Text(text) => parse_timestamp_str(text),
    }
}

pub fn parse_timestamp_str(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if text.bytes().all(|b| b.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[inline]
pub fn parse_timestamp_opt(raw: Option<&RawTimestamp>) -> Option<DateTime<Utc>> {
    raw.and_then(parse_timestamp)
}

/// Count maximal runs of word characters (letters, digits, underscore).
pub fn count_words(text: &str) -> u32 {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .count() as u32
}

/// Content hash of a message body.
pub fn hash_text(text: &str) -> String {
    format!("{:016x}", xxh3_64(text.as_bytes()))
}

#[cfg(test)]
mod tests;
