//! Daily step record types and key encoding

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Prefix of every persisted step record key.
pub const STEPS_KEY_PREFIX: &str = "steps";

/// The durable per-user, per-day step total.
///
/// Serialized as `{ "date": "YYYY-MM-DD", "steps": n, "timestamp": ... }`.
/// `timestamp` is assigned by the store on write and is only used for
/// ordering and debugging, never for conflict resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStepRecord {
    #[serde(with = "iso_date")]
    pub date: NaiveDate,
    pub steps: u64,
    pub timestamp: DateTime<Utc>,
}

/// One point of a history series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    #[serde(with = "iso_date")]
    pub date: NaiveDate,
    pub count: u64,
}

/// 8-digit date string with no separators, e.g. `20240305`.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Store key for a user's record on `date`: `steps/{user}/{YYYYMMDD}`.
pub fn record_key(user_id: &str, date: NaiveDate) -> String {
    format!("{STEPS_KEY_PREFIX}/{user_id}/{}", date_key(date))
}

mod iso_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
