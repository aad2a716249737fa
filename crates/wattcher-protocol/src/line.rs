//! Encoding and parsing of the single-line query response.

use thiserror::Error;
use wattcher_core::Reading;

/// Upper bound on one encoded response line, newline included.
///
/// Two u64 fields and the separators fit in well under this; the bound
/// exists so the server never hands an unbounded write to a client.
pub const MAX_LINE_BYTES: usize = 64;

/// Marker prefixed to the watts field of a decelerating reading.
const DECEL_MARKER: char = '<';

/// Encodes a reading as one terminated response line.
///
/// Output never exceeds [`MAX_LINE_BYTES`]: an over-long line is cut and
/// re-terminated instead of being written past the bound. The encoded
/// line is pure ASCII.
pub fn encode_reading(reading: &Reading) -> String {
    let marker = if reading.decelerating { "<" } else { "" };
    let mut line = format!("{};{}{}\n", reading.pulses, marker, reading.watts);
    if line.len() > MAX_LINE_BYTES {
        line.truncate(MAX_LINE_BYTES - 1);
        line.push('\n');
    }
    line
}

/// Parses a response line back into a reading.
///
/// Accepts the line with or without its trailing newline.
pub fn parse_reading(line: &str) -> Result<Reading, ProtocolError> {
    let line = line.trim_end_matches(['\r', '\n']);

    let (pulses, rest) = line
        .split_once(';')
        .ok_or_else(|| ProtocolError::MissingSeparator(line.to_string()))?;

    let pulses = pulses.parse().map_err(|_| ProtocolError::BadField {
        field: "pulses",
        value: pulses.to_string(),
    })?;

    let (watts_str, decelerating) = match rest.strip_prefix(DECEL_MARKER) {
        Some(stripped) => (stripped, true),
        None => (rest, false),
    };

    let watts = watts_str.parse().map_err(|_| ProtocolError::BadField {
        field: "watts",
        value: watts_str.to_string(),
    })?;

    Ok(Reading {
        pulses,
        watts,
        decelerating,
    })
}

/// Errors that can occur while parsing a response line.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The line has no `;` between the pulse count and the watts field.
    #[error("response line has no ';' separator: {0:?}")]
    MissingSeparator(String),

    /// A numeric field failed to parse.
    #[error("bad {field} field: {value:?}")]
    BadField {
        field: &'static str,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_steady_reading() {
        let reading = Reading {
            pulses: 142,
            watts: 850,
            decelerating: false,
        };
        assert_eq!(encode_reading(&reading), "142;850\n");
    }

    #[test]
    fn test_encode_decelerating_reading() {
        let reading = Reading {
            pulses: 142,
            watts: 87,
            decelerating: true,
        };
        assert_eq!(encode_reading(&reading), "142;<87\n");
    }

    #[test]
    fn test_encode_zeroed_reading() {
        let reading = Reading {
            pulses: 0,
            watts: 0,
            decelerating: false,
        };
        assert_eq!(encode_reading(&reading), "0;0\n");
    }

    #[test]
    fn test_encode_stays_within_bound() {
        // Largest possible fields still fit and still end in a newline.
        let reading = Reading {
            pulses: u64::MAX,
            watts: u64::MAX,
            decelerating: true,
        };
        let line = encode_reading(&reading);
        assert!(line.len() <= MAX_LINE_BYTES);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn test_parse_steady_reading() {
        let reading = parse_reading("142;850\n").unwrap();
        assert_eq!(reading.pulses, 142);
        assert_eq!(reading.watts, 850);
        assert!(!reading.decelerating);
    }

    #[test]
    fn test_parse_decelerating_reading() {
        let reading = parse_reading("142;<87\n").unwrap();
        assert_eq!(reading.pulses, 142);
        assert_eq!(reading.watts, 87);
        assert!(reading.decelerating);
    }

    #[test]
    fn test_parse_without_newline() {
        let reading = parse_reading("7;1200").unwrap();
        assert_eq!(reading.pulses, 7);
        assert_eq!(reading.watts, 1200);
    }

    #[test]
    fn test_parse_missing_separator() {
        let err = parse_reading("142850\n").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingSeparator(_)));
        assert!(err.to_string().contains("';'"));
    }

    #[test]
    fn test_parse_bad_pulses() {
        let err = parse_reading("abc;850\n").unwrap_err();
        assert!(err.to_string().contains("pulses"));
    }

    #[test]
    fn test_parse_bad_watts() {
        let err = parse_reading("142;<x\n").unwrap_err();
        assert!(err.to_string().contains("watts"));
    }

    #[test]
    fn test_encode_parse_agree_on_marker() {
        let reading = Reading {
            pulses: 9,
            watts: 33,
            decelerating: true,
        };
        let parsed = parse_reading(&encode_reading(&reading)).unwrap();
        assert_eq!(parsed, reading);
    }
}
