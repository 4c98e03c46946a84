//! Common types for the shared crate
//!
//! [`Timestamp`] is the single point-in-time type of the ledger. It is held as
//! Unix milliseconds (UTC) and always rendered in one text form:
//! ISO-8601 extended format with millisecond precision and a `Z` suffix.
//!
//! Deserialization accepts either representation a collaborator may send:
//! an integer number of epoch milliseconds, or an RFC 3339 string (any
//! offset). Both land on the same value, so two semantically equal inputs
//! encode identically.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Timestamp parse / render errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("Invalid timestamp text: {0}")]
    InvalidText(String),

    #[error("Timestamp out of range: {0} ms")]
    OutOfRange(i64),
}

/// Point in time, Unix milliseconds UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub const fn as_millis(&self) -> i64 {
        self.0
    }

    /// Parse RFC 3339 text or a decimal epoch-millisecond string
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let trimmed = text.trim();
        if let Ok(millis) = trimmed.parse::<i64>() {
            return Ok(Self(millis));
        }
        DateTime::parse_from_rfc3339(trimmed)
            .map(|dt| Self(dt.with_timezone(&Utc).timestamp_millis()))
            .map_err(|_| TimestampError::InvalidText(text.to_string()))
    }

    /// Canonical text form: `YYYY-MM-DDTHH:MM:SS.mmmZ`
    pub fn to_canonical_string(&self) -> Result<String, TimestampError> {
        DateTime::<Utc>::from_timestamp_millis(self.0)
            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            .ok_or(TimestampError::OutOfRange(self.0))
    }

    /// Milliseconds elapsed from `earlier` to `self` (negative if `earlier` is later)
    pub fn millis_since(&self, earlier: Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_canonical_string() {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = self
            .to_canonical_string()
            .map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&text)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("epoch milliseconds or an RFC 3339 timestamp")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Timestamp(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(Timestamp)
            .map_err(|_| E::custom(format!("timestamp {v} out of range")))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        // Some stores hand integers back as floats (5 -> 5.0)
        if v.fract() == 0.0 && v.abs() <= (1_i64 << 53) as f64 {
            Ok(Timestamp(v as i64))
        } else {
            Err(E::custom(format!("timestamp {v} is not a whole millisecond")))
        }
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        Timestamp::parse(v).map_err(E::custom)
    }
}
