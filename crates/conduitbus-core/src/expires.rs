//! The `Expires` message-payload helper (spec §6), explicitly carved back
//! into scope by SPEC_FULL.md even though spec.md §1 lists "other
//! message-payload helpers" as out of scope — this one wire format is named
//! directly in §6 and tested by P7, so it stays.
//!
//! Grammar: `"at " <ISO-8601 local datetime, seconds precision>` for an
//! absolute expiry, serialized in UTC with a `T` separator; `"in "
//! <non-negative integer seconds>` for a relative one.

use std::time::Duration;

use thiserror::Error;
use time::format_description::well_known::Iso8601;
use time::OffsetDateTime;

/// Errors parsing an `Expires` value (spec.md §6).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ExpiresParseError {
    /// The token after the prefix was not parseable as its expected shape
    /// (a datetime, or an integer).
    #[error("malformed expires value: {0}")]
    Format(String),
    /// The string was not exactly two whitespace-separated tokens, or the
    /// prefix was neither `at` nor `in`.
    #[error("unrecognized expires prefix: {0}")]
    Argument(String),
}

/// An absolute or relative expiry (spec.md §6, P7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expires {
    /// Expires at a fixed point in time, normalized to UTC.
    At(OffsetDateTime),
    /// Expires after a relative duration.
    In(Duration),
}

impl Expires {
    /// Parse the wire grammar: exactly two whitespace-separated tokens.
    pub fn parse(s: &str) -> Result<Self, ExpiresParseError> {
        let tokens: Vec<&str> = s.split_whitespace().collect();
        let [prefix, rest] = tokens[..] else {
            return Err(ExpiresParseError::Argument(s.to_string()));
        };

        match prefix {
            "at" => {
                let datetime = parse_seconds_precision_iso8601(rest)
                    .ok_or_else(|| ExpiresParseError::Format(rest.to_string()))?;
                Ok(Expires::At(datetime))
            }
            "in" => {
                if rest.is_empty() || rest.chars().any(|c| !c.is_ascii_digit()) {
                    return Err(ExpiresParseError::Format(rest.to_string()));
                }
                let seconds: u64 = rest
                    .parse()
                    .map_err(|_| ExpiresParseError::Format(rest.to_string()))?;
                Ok(Expires::In(Duration::from_secs(seconds)))
            }
            _ => Err(ExpiresParseError::Argument(s.to_string())),
        }
    }

    /// Render back to the wire grammar.
    pub fn to_wire_string(&self) -> String {
        match self {
            Expires::At(datetime) => {
                let utc = datetime.to_offset(time::UtcOffset::UTC);
                format!(
                    "at {:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                    utc.year(),
                    u8::from(utc.month()),
                    utc.day(),
                    utc.hour(),
                    utc.minute(),
                    utc.second(),
                )
            }
            Expires::In(duration) => format!("in {}", duration.as_secs()),
        }
    }
}

/// Accepts `YYYY-MM-DDTHH:MM:SS`. A space in place of `T` never reaches
/// here: the two-token whitespace split in `parse` turns `"at 2014-05-06
/// 03:08:09"` into three tokens and rejects it as `ArgumentError` first
/// (spec.md §8 scenario 5).
fn parse_seconds_precision_iso8601(s: &str) -> Option<OffsetDateTime> {
    let with_offset = format!("{s}Z");
    OffsetDateTime::parse(&with_offset, &Iso8601::DEFAULT)
        .ok()
        .map(|dt| dt.replace_millisecond(0).unwrap_or(dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_relative_seconds() {
        assert_eq!(
            Expires::parse("in 15").unwrap(),
            Expires::In(Duration::from_secs(15))
        );
    }

    #[test]
    fn parses_absolute_datetime_as_utc() {
        let parsed = Expires::parse("at 2014-05-06T03:08:09").unwrap();
        assert_eq!(parsed, Expires::At(datetime!(2014-05-06 03:08:09 UTC)));
    }

    #[test]
    fn space_instead_of_t_separator_is_argument_error() {
        let err = Expires::parse("at 2014-05-06 03:08:09").unwrap_err();
        assert!(matches!(err, ExpiresParseError::Argument(_)));
    }

    #[test]
    fn unknown_prefix_is_argument_error() {
        let err = Expires::parse("whenever 15").unwrap_err();
        assert!(matches!(err, ExpiresParseError::Argument(_)));
    }

    #[test]
    fn trailing_garbage_on_relative_is_format_error() {
        let err = Expires::parse("in 15s").unwrap_err();
        assert!(matches!(err, ExpiresParseError::Format(_)));
    }

    #[test]
    fn single_token_is_argument_error() {
        let err = Expires::parse("justoneword").unwrap_err();
        assert!(matches!(err, ExpiresParseError::Argument(_)));
    }

    #[test]
    fn round_trips_through_wire_string() {
        let original = Expires::parse("in 42").unwrap();
        assert_eq!(Expires::parse(&original.to_wire_string()).unwrap(), original);

        let absolute = Expires::parse("at 2020-01-02T03:04:05").unwrap();
        assert_eq!(Expires::parse(&absolute.to_wire_string()).unwrap(), absolute);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_holds_for_arbitrary_relative_seconds(seconds in 0u64..10_000_000) {
            let value = Expires::In(Duration::from_secs(seconds));
            let parsed = Expires::parse(&value.to_wire_string()).unwrap();
            proptest::prop_assert_eq!(parsed, value);
        }
    }
}
