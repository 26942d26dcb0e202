// ☁️ Weather Fetcher - OpenWeather current conditions per capital

use super::WeatherSource;
use crate::entities::WeatherRecord;
use crate::error::{PipelineError, Result};
use chrono::{TimeZone, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const OPENWEATHER_BASE_URL: &str = "https://api.openweathermap.org/data/2.5/weather";

const SOURCE: &str = "weather";

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: f64,
}

#[derive(Debug, Deserialize)]
struct OwResponse {
    main: OwMain,

    /// Observation time, unix seconds UTC
    dt: i64,
}

/// Map a current-weather response body onto a WeatherRecord
pub fn parse_weather(iso2: &str, capital: &str, body: &str) -> Result<WeatherRecord> {
    let response: OwResponse = serde_json::from_str(body)?;
    let retrieved_at = Utc
        .timestamp_opt(response.dt, 0)
        .single()
        .ok_or_else(|| {
            PipelineError::source_error(SOURCE, format!("bad timestamp {} for {}", response.dt, iso2))
        })?;

    Ok(WeatherRecord::new(
        iso2.to_ascii_uppercase(),
        capital,
        response.main.temp,
        response.main.humidity,
        retrieved_at,
    ))
}

pub struct OpenWeatherClient {
    http: Client,
    api_key: String,
    base_url: String,
    units: String,
    request_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl OpenWeatherClient {
    /// Create a client from the OPENWEATHER_API_KEY environment variable
    pub fn from_env(timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("OPENWEATHER_API_KEY").map_err(|_| {
            PipelineError::Config("OPENWEATHER_API_KEY environment variable not set".to_string())
        })?;
        Self::new(api_key, timeout)
    }

    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            api_key,
            base_url: OPENWEATHER_BASE_URL.to_string(),
            units: "metric".to_string(),
            request_interval: Duration::ZERO,
            last_request: Mutex::new(None),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    /// Minimum spacing between requests (free-tier rate limit)
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    fn rate_limit(&self) {
        let mut last = match self.last_request.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.request_interval {
                std::thread::sleep(self.request_interval - elapsed);
            }
        }
        *last = Some(Instant::now());
    }
}

impl WeatherSource for OpenWeatherClient {
    fn fetch_weather(&self, iso2: &str, capital: &str) -> Result<Option<WeatherRecord>> {
        self.rate_limit();

        let q = format!("{},{}", capital, iso2);
        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", q.as_str()),
                ("units", self.units.as_str()),
                ("appid", self.api_key.as_str()),
            ])
            .send()?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(%iso2, %capital, "city not found, skipping weather");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::source_error(
                SOURCE,
                format!(
                    "OpenWeather API error {} for {}: {}",
                    status,
                    q,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        let body = response.text()?;
        let record = parse_weather(iso2, capital, &body)?;
        debug!(%iso2, temperature = record.temperature, "fetched weather");
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "coord": {"lon": -77.0366, "lat": 38.8951},
        "weather": [{"id": 800, "main": "Clear", "description": "clear sky"}],
        "main": {"temp": 27.4, "feels_like": 28.1, "pressure": 1015, "humidity": 61},
        "dt": 1717243200,
        "sys": {"country": "US"},
        "name": "Washington",
        "cod": 200
    }"#;

    #[test]
    fn test_parse_weather() {
        let record = parse_weather("us", "Washington", BODY).unwrap();

        assert_eq!(record.iso2, "US");
        assert_eq!(record.capital, "Washington");
        assert_eq!(record.temperature, 27.4);
        assert_eq!(record.humidity, 61.0);
        assert_eq!(record.retrieved_at_key(), "2024-06-01T12:00:00.000Z");
    }

    #[test]
    fn test_parse_weather_rejects_error_body() {
        let err = parse_weather("US", "Atlantis", r#"{"cod":"404","message":"city not found"}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[test]
    fn test_builder() {
        let client = OpenWeatherClient::new("key".to_string(), Duration::from_secs(5))
            .unwrap()
            .with_base_url("http://localhost:9/weather/")
            .with_units("imperial");

        assert_eq!(client.base_url, "http://localhost:9/weather");
        assert_eq!(client.units, "imperial");
    }
}
