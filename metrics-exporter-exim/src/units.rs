//! Conversions from the human-readable quantities eximstats prints into plain integers.

use crate::common::Error;

const KIBIBYTE: f64 = 1024.0;

const SIZE_UNITS: [(&str, f64); 3] =
    [("KB", KIBIBYTE), ("MB", KIBIBYTE * KIBIBYTE), ("GB", KIBIBYTE * KIBIBYTE * KIBIBYTE)];

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// Parses a size such as `12MB`, `37KB` or `1024` into bytes.
///
/// Units are binary multiples and matched case-insensitively; a bare number is already in bytes.
/// Fractional sizes are truncated to whole bytes.
///
/// # Errors
///
/// Returns [`Error::MalformedUnit`] when the text left after removing the unit is not a
/// non-negative number.
pub fn parse_size(text: &str) -> Result<u64, Error> {
    let malformed = || Error::MalformedUnit { text: text.to_owned() };

    let trimmed = text.trim();
    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = SIZE_UNITS
        .iter()
        .find_map(|(unit, multiplier)| {
            upper.strip_suffix(unit).map(|number| (number.trim_end(), *multiplier))
        })
        .unwrap_or((upper.as_str(), 1.0));

    let value: f64 = number.parse().map_err(|_| malformed())?;
    if !value.is_finite() || value < 0.0 {
        return Err(malformed());
    }

    Ok((value * multiplier) as u64)
}

/// Parses a relative time range such as `Under 1m`, `15m`, `2h` or `Over 1d` into seconds.
///
/// `Under 1m` and `Over 1d` are the open-ended buckets eximstats puts at either end of its
/// queue-time tables; they map to their bound. Otherwise one trailing `m`, `h` or `d` unit is
/// accepted, and a bare number is already in seconds.
///
/// # Errors
///
/// Returns [`Error::MalformedTimeRange`] when the remainder is not an integer.
pub fn parse_time_range(text: &str) -> Result<u64, Error> {
    let malformed = || Error::MalformedTimeRange { text: text.to_owned() };

    // eximstats pads "Over  1d" with an extra space, so compare on collapsed whitespace.
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase();
    match normalized.as_str() {
        "under 1m" => return Ok(MINUTE),
        "over 1d" => return Ok(DAY),
        _ => {}
    }

    let (number, multiplier) = match normalized.char_indices().last() {
        Some((idx, 'm')) => (&normalized[..idx], MINUTE),
        Some((idx, 'h')) => (&normalized[..idx], HOUR),
        Some((idx, 'd')) => (&normalized[..idx], DAY),
        _ => (normalized.as_str(), 1),
    };

    number.trim().parse::<u64>().ok().and_then(|n| n.checked_mul(multiplier)).ok_or_else(malformed)
}

/// Parses a message count cell.
///
/// # Errors
///
/// Returns [`Error::MalformedUnit`] when the cell is not a non-negative integer.
pub fn parse_count(text: &str) -> Result<u64, Error> {
    text.trim().parse().map_err(|_| Error::MalformedUnit { text: text.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::{parse_count, parse_size, parse_time_range};
    use crate::common::Error;
    use proptest::prelude::*;

    #[test]
    fn test_parse_size_known_cases() {
        let cases = &[
            ("12MB", 12_582_912),
            ("10MB", 10_485_760),
            ("37KB", 37_888),
            ("2GB", 2_147_483_648),
            ("1.5KB", 1536),
            (" 4 kb ", 4096),
            ("512", 512),
            ("0", 0),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_size(input), Ok(*expected), "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        for input in ["", "MB", "twelveMB", "-3KB", "12TB", "NaN"] {
            assert_eq!(
                parse_size(input),
                Err(Error::MalformedUnit { text: input.to_owned() }),
                "input: {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_time_range_known_cases() {
        let cases = &[
            ("Under 1m", 60),
            ("under 1m", 60),
            ("Over 1d", 86_400),
            ("over  1d", 86_400),
            ("15m", 900),
            ("2h", 7_200),
            ("1d", 86_400),
            ("45", 45),
        ];

        for (input, expected) in cases {
            assert_eq!(parse_time_range(input), Ok(*expected), "input: {input:?}");
        }
    }

    #[test]
    fn test_parse_time_range_rejects_garbage() {
        for input in ["", "m", "soon", "1.5h", "Under 5m", "3w"] {
            assert_eq!(
                parse_time_range(input),
                Err(Error::MalformedTimeRange { text: input.to_owned() }),
                "input: {input:?}"
            );
        }
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count(" 480 "), Ok(480));
        assert_eq!(parse_count(""), Err(Error::MalformedUnit { text: String::new() }));
        assert_eq!(parse_count("4.2"), Err(Error::MalformedUnit { text: "4.2".to_owned() }));
    }

    fn format_size(bytes: u64) -> String {
        const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
        UNITS
            .iter()
            .find(|(_, size)| bytes != 0 && bytes % size == 0)
            .map(|(unit, size)| format!("{}{}", bytes / size, unit))
            .unwrap_or_else(|| bytes.to_string())
    }

    proptest! {
        #[test]
        fn test_parse_size_round_trips(units in 0u64..(1 << 20), scale in 0u32..4) {
            let bytes = units << (10 * scale);
            assert_eq!(parse_size(&format_size(bytes)), Ok(bytes));
        }

        #[test]
        fn test_parse_time_range_minutes(minutes in 0u64..100_000) {
            assert_eq!(parse_time_range(&format!("{minutes}m")), Ok(minutes * 60));
        }
    }
}
