use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, TimeZone, Utc};

pub type Timestamp = DateTime<Utc>;

/// Current time truncated to milliseconds, the precision the stored text format keeps.
pub fn now() -> Timestamp {
    Utc::now().trunc_subsecs(3)
}

pub fn format_iso(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Accepts RFC 3339 text (any offset) or a bare `YYYY-MM-DD` date, read as UTC midnight.
pub fn parse_iso(text: &str) -> Option<Timestamp> {
    let text = text.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    let midnight = date.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&midnight))
}

pub mod iso {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_iso, parse_iso, Timestamp};

    pub fn serialize<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_iso(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Timestamp, D::Error> {
        let text = String::deserialize(deserializer)?;
        parse_iso(&text).ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text}")))
    }
}

pub mod iso_option {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_iso, parse_iso, Timestamp};

    pub fn serialize<S: Serializer>(
        ts: &Option<Timestamp>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => serializer.serialize_some(&format_iso(ts)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Timestamp>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        match text.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(text) => parse_iso(text)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp: {text}"))),
        }
    }
}
