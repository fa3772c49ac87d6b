/* DATES.rs
 *   by Lut99
 *
 * Created:
 *   11 Mar 2024, 10:02:34
 * Last edited:
 *   02 Dec 2024, 11:17:48
 * Auto updated?
 *   Yes
 *
 * Description:
 *   Defines date ranges and the `YYYY-MM-DD HH:MM:SS` timestamp format
 *   used by blueprints and runtime-settings files alike.
**/

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};


/***** CONSTANTS *****/
/// The timestamp format used everywhere a date crosses a file boundary.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// The date-only fallback accepted on input (midnight is implied).
pub const DATE_FORMAT: &str = "%Y-%m-%d";





/***** ERRORS *****/
/// Defines errors that relate to parsing and validating dates.
#[derive(Debug)]
pub enum DateError {
    /// The given string is not a recognized timestamp.
    ParseError{ raw: String, err: chrono::ParseError },
    /// A range was given whose start lies after its end.
    EmptyRange{ start: NaiveDateTime, end: NaiveDateTime },
}

impl Display for DateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use DateError::*;
        match self {
            ParseError{ raw, err }  => write!(f, "Cannot parse '{}' as a '{}' timestamp: {}", raw, DATETIME_FORMAT, err),
            EmptyRange{ start, end } => write!(f, "Date range start {} lies after its end {}", format_datetime(start), format_datetime(end)),
        }
    }
}

impl Error for DateError {}





/***** LIBRARY *****/
/// Parses the given string as a `YYYY-MM-DD HH:MM:SS` timestamp, falling
/// back to `YYYY-MM-DD` (at midnight) when no time-of-day is given.
///
/// # Arguments
/// - `raw`: The string to parse.
///
/// # Errors
/// This function errors if the string matches neither format.
pub fn parse_datetime(raw: impl AsRef<str>) -> Result<NaiveDateTime, DateError> {
    let raw: &str = raw.as_ref().trim();

    if let Ok(stamp) = NaiveDateTime::parse_from_str(raw, DATETIME_FORMAT) {
        return Ok(stamp);
    }
    match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        Ok(date) => Ok(NaiveDateTime::new(date, NaiveTime::MIN)),
        Err(err) => Err(DateError::ParseError{ raw: raw.into(), err }),
    }
}

/// Formats the given timestamp in the framework-wide `YYYY-MM-DD HH:MM:SS` format.
#[inline]
pub fn format_datetime(stamp: &NaiveDateTime) -> String {
    stamp.format(DATETIME_FORMAT).to_string()
}



/// An inclusive range of timestamps, as found in the `valid_date_range` of a
/// blueprint and on individual input datasets.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    /// The inclusive start of the range.
    #[serde(with = "serde_datetime")]
    pub start_date : NaiveDateTime,
    /// The inclusive end of the range.
    #[serde(with = "serde_datetime")]
    pub end_date   : NaiveDateTime,
}

impl DateRange {
    /// Constructor for the DateRange that asserts the start does not lie after the end.
    ///
    /// # Errors
    /// This function errors if the range would be empty.
    pub fn new(start_date: NaiveDateTime, end_date: NaiveDateTime) -> Result<Self, DateError> {
        if start_date > end_date { return Err(DateError::EmptyRange{ start: start_date, end: end_date }); }
        Ok(Self{ start_date, end_date })
    }

    /// Returns whether the given timestamp lies within this range (inclusive on both ends).
    #[inline]
    pub fn contains(&self, stamp: &NaiveDateTime) -> bool {
        *stamp >= self.start_date && *stamp <= self.end_date
    }

    /// Returns whether the given range lies entirely within this range.
    #[inline]
    pub fn encloses(&self, other: &DateRange) -> bool {
        self.contains(&other.start_date) && self.contains(&other.end_date)
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        write!(f, "[{}, {}]", format_datetime(&self.start_date), format_datetime(&self.end_date))
    }
}



/// Serde (de)serialization of a [`NaiveDateTime`] in the framework-wide format.
///
/// Use with `#[serde(with = "specifications::dates::serde_datetime")]`.
pub mod serde_datetime {
    use chrono::NaiveDateTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_datetime, parse_datetime};

    pub fn serialize<S: Serializer>(stamp: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_datetime(stamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw: String = String::deserialize(deserializer)?;
        parse_datetime(&raw).map_err(D::Error::custom)
    }
}

/// Serde (de)serialization of an optional [`NaiveDateTime`] in the framework-wide format.
///
/// Use with `#[serde(default, with = "specifications::dates::serde_datetime_opt")]`.
pub mod serde_datetime_opt {
    use chrono::NaiveDateTime;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{format_datetime, parse_datetime};

    pub fn serialize<S: Serializer>(stamp: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match stamp {
            Some(stamp) => serializer.serialize_some(&format_datetime(stamp)),
            None        => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            Some(raw) => parse_datetime(&raw).map(Some).map_err(D::Error::custom),
            None      => Ok(None),
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_timestamps() {
        let stamp = parse_datetime("2012-01-01 12:00:00").unwrap();
        assert_eq!(format_datetime(&stamp), "2012-01-01 12:00:00");
    }

    #[test]
    fn parses_date_only_as_midnight() {
        let stamp = parse_datetime("2012-03-04").unwrap();
        assert_eq!(format_datetime(&stamp), "2012-03-04 00:00:00");
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_datetime("twelve o'clock").is_err());
    }

    #[test]
    fn range_containment() {
        let range = DateRange::new(
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-12-31 12:00:00").unwrap(),
        )
        .unwrap();

        assert!(range.contains(&parse_datetime("2012-06-15 00:00:00").unwrap()));
        assert!(range.contains(&range.start_date));
        assert!(range.contains(&range.end_date));
        assert!(!range.contains(&parse_datetime("2011-12-31 12:00:00").unwrap()));

        let inner = DateRange::new(
            parse_datetime("2012-02-01 00:00:00").unwrap(),
            parse_datetime("2012-03-01 00:00:00").unwrap(),
        )
        .unwrap();
        assert!(range.encloses(&inner));
        assert!(!inner.encloses(&range));
    }

    #[test]
    fn empty_range_rejected() {
        let start = parse_datetime("2012-06-01 00:00:00").unwrap();
        let end = parse_datetime("2012-01-01 00:00:00").unwrap();
        assert!(matches!(DateRange::new(start, end), Err(DateError::EmptyRange{ .. })));
    }

    #[test]
    fn serde_uses_framework_format() {
        let range = DateRange::new(
            parse_datetime("2012-01-01 12:00:00").unwrap(),
            parse_datetime("2012-12-31 12:00:00").unwrap(),
        )
        .unwrap();

        let yaml = serde_yaml::to_string(&range).unwrap();
        assert!(yaml.contains("2012-01-01 12:00:00"), "unexpected serialization: {yaml}");
        let back: DateRange = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, range);
    }
}
