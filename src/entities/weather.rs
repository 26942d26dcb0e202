// ☁️ Weather Entity - current conditions at a country's capital

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub iso2: String,
    pub capital: String,

    /// Degrees Celsius
    pub temperature: f64,

    /// Relative humidity, percent
    pub humidity: f64,

    pub retrieved_at: DateTime<Utc>,
}

impl WeatherRecord {
    pub fn new(
        iso2: impl Into<String>,
        capital: impl Into<String>,
        temperature: f64,
        humidity: f64,
        retrieved_at: DateTime<Utc>,
    ) -> Self {
        WeatherRecord {
            iso2: iso2.into(),
            capital: capital.into(),
            temperature,
            humidity,
            retrieved_at,
        }
    }

    /// Fixed-width UTC timestamp; stored values compare correctly as text
    pub fn retrieved_at_key(&self) -> String {
        format_timestamp(&self.retrieved_at)
    }
}

/// RFC 3339, millisecond precision, always `Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Inverse of `format_timestamp`; accepts any RFC 3339 offset
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_key_orders_lexically() {
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let a = WeatherRecord::new("US", "Washington", 1.0, 50.0, jan);
        let b = WeatherRecord::new("US", "Washington", 25.0, 60.0, jun);

        assert!(a.retrieved_at_key() < b.retrieved_at_key());
        assert_eq!(a.retrieved_at_key(), "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_parse_timestamp_roundtrip() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
        assert_eq!(parse_timestamp("not a date"), None);
    }
}
