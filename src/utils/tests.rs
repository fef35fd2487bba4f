use super::*;
use chrono::{TimeZone, Utc};

#[test]
fn test_format_number_comma() {
    let options = NumberFormatOptions {
        use_comma: true,
        use_human: false,
        locale: "en".to_string(),
        decimal_places: 2,
    };

    assert_eq!(format_number(1000u32, &options), "1,000");
    assert_eq!(format_number(1000000u32, &options), "1,000,000");
    assert_eq!(format_number(123u32, &options), "123");
}

#[test]
fn test_format_number_human() {
    let options = NumberFormatOptions {
        use_comma: false,
        use_human: true,
        locale: "en".to_string(),
        decimal_places: 1,
    };

    assert_eq!(format_number(100u32, &options), "100");
    assert_eq!(format_number(1500u32, &options), "1.5k");
    assert_eq!(format_number(1_500_000u32, &options), "1.5m");
    assert_eq!(format_number(1_500_000_000u64, &options), "1.5b");
    assert_eq!(format_number(1_500_000_000_000u64, &options), "1.5t");
}

#[test]
fn test_format_duration_ms() {
    assert_eq!(format_duration_ms(0.0), "0s");
    assert_eq!(format_duration_ms(3000.0), "3s");
    assert_eq!(format_duration_ms(125_000.0), "2m 05s");
    assert_eq!(format_duration_ms(3_723_000.0), "1h 02m 03s");
}

#[test]
fn test_format_date_for_display() {
    assert_eq!(format_date_for_display(None), "-");
    let date = Utc.with_ymd_and_hms(2023, 1, 15, 8, 0, 0).unwrap();
    assert_eq!(format_date_for_display(Some(date)), "1/15/2023");
}

#[test]
fn test_parse_timestamp_formats() {
    let expected = Utc.with_ymd_and_hms(2024, 1, 5, 16, 5, 0).unwrap();

    assert_eq!(parse_timestamp_str("2024-01-05T16:05:00Z"), Some(expected));
    assert_eq!(parse_timestamp_str("2024-01-05T16:05:00.000Z"), Some(expected));
    assert_eq!(parse_timestamp_str("2024-01-05 16:05:00"), Some(expected));
    assert_eq!(parse_timestamp_str("2024-01-05@16h05m00s"), Some(expected));
    assert_eq!(parse_timestamp_str("January 5, 2024 4:05pm"), Some(expected));
    assert_eq!(
        parse_timestamp_str(&expected.timestamp_millis().to_string()),
        Some(expected)
    );
    assert_eq!(
        parse_timestamp(&RawTimestamp::Millis(expected.timestamp_millis())),
        Some(expected)
    );
}

#[test]
fn test_parse_timestamp_rejects_garbage() {
    assert_eq!(parse_timestamp_str(""), None);
    assert_eq!(parse_timestamp_str("yesterday-ish"), None);
    assert_eq!(parse_timestamp_opt(None), None);
}

#[test]
fn test_duration_ms() {
    let a = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();
    let b = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 3).unwrap();
    assert_eq!(duration_ms(a, b), 3000.0);
    assert_eq!(duration_ms(b, a), -3000.0);
}

#[test]
fn test_count_words() {
    assert_eq!(count_words(""), 0);
    assert_eq!(count_words("Hello, world!"), 2);
    assert_eq!(count_words("  it's   a_b  c-d 42 "), 6);
    assert_eq!(count_words("*waves* hi... there"), 3);
}

#[test]
fn test_hashes_are_stable() {
    assert_eq!(hash_text("abc"), hash_text("abc"));
    assert_ne!(hash_text("abc"), hash_text("abd"));
    assert_eq!(hash_text("").len(), 16);
}
