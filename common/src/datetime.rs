//! Flexible date-time JSON codec
//!
//! API clients sometimes send only a calendar date. [`FlexDateTime`] accepts
//! either a date-only string (`2026-01-02`, interpreted as UTC midnight) or a
//! full RFC 3339 timestamp, and always emits RFC 3339 (with sub-second digits
//! when present). An empty value marshals as JSON `null`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

const DATE_ONLY_LAYOUT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FlexDateTime(Option<DateTime<Utc>>);

impl FlexDateTime {
    pub fn new(value: DateTime<Utc>) -> Self {
        Self(Some(value))
    }

    pub fn empty() -> Self {
        Self(None)
    }

    /// UTC midnight of the given calendar date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(Some(date.and_time(chrono::NaiveTime::MIN).and_utc()))
    }

    pub fn get(&self) -> Option<DateTime<Utc>> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn date_naive(&self) -> Option<NaiveDate> {
        self.0.map(|t| t.date_naive())
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::empty());
        }

        // "YYYY-MM-DD"
        if s.len() == 10 {
            if let Ok(date) = NaiveDate::parse_from_str(s, DATE_ONLY_LAYOUT) {
                return Ok(Self::from_date(date));
            }
        }

        if let Ok(t) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self(Some(t.with_timezone(&Utc))));
        }

        Err(format!(
            "invalid datetime {s:?} (expected YYYY-MM-DD or RFC3339)"
        ))
    }
}

impl From<DateTime<Utc>> for FlexDateTime {
    fn from(value: DateTime<Utc>) -> Self {
        Self::new(value)
    }
}

impl Serialize for FlexDateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            None => serializer.serialize_none(),
            Some(t) => {
                serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl<'de> Deserialize<'de> for FlexDateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(Self::empty()),
            Some(s) => Self::parse(&s).map_err(de::Error::custom),
        }
    }
}
