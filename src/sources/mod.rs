// 📥 Source extractors
//
// Each external collaborator sits behind a trait so the pipeline can be run
// against stubs. Every fetch hands back the raw payload with its records, for
// the store's fetch log.

pub mod html;
pub mod web_table;
pub mod weather;
pub mod world_bank;

use crate::entities::{CountryCode, CountryCodeMap, CountryRecord, GdpRecord, WeatherRecord};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use web_table::WebTableExtractor;
pub use weather::OpenWeatherClient;
pub use world_bank::WorldBankClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    CountryTable,
    CountryCodes,
    Gdp,
    Weather,
}

impl SourceKind {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            SourceKind::CountryTable => "Country table",
            SourceKind::CountryCodes => "Country codes",
            SourceKind::Gdp => "World Bank GDP",
            SourceKind::Weather => "OpenWeather",
        }
    }

    /// Short code, used as the fetch log key
    pub fn code(&self) -> &str {
        match self {
            SourceKind::CountryTable => "countries",
            SourceKind::CountryCodes => "country_codes",
            SourceKind::Gdp => "gdp",
            SourceKind::Weather => "weather",
        }
    }
}

/// Records parsed from one payload, plus the payload itself
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub records: Vec<T>,
    pub raw: Vec<u8>,
}

impl<T> Fetched<T> {
    pub fn new(records: Vec<T>, raw: Vec<u8>) -> Self {
        Fetched { records, raw }
    }
}

/// Scraped country table
pub trait CountrySource {
    fn fetch_countries(&self) -> Result<Fetched<CountryRecord>>;
}

/// Reference iso3/iso2/name map
pub trait CodeSource {
    fn fetch_codes(&self) -> Result<Fetched<CountryCode>>;
}

/// GDP observations; rows whose iso3 is not in `codes` are dropped
pub trait GdpSource {
    fn fetch_gdp(&self, codes: &CountryCodeMap) -> Result<Fetched<GdpRecord>>;
}

/// Current weather at a capital; Ok(None) when the city is unknown upstream
pub trait WeatherSource {
    fn fetch_weather(&self, iso2: &str, capital: &str) -> Result<Option<WeatherRecord>>;
}

/// Country codes from a local `iso3,iso2,name` CSV
pub struct CsvCodeSource {
    path: std::path::PathBuf,
}

impl CsvCodeSource {
    pub fn new(path: &Path) -> Self {
        CsvCodeSource {
            path: path.to_path_buf(),
        }
    }
}

impl CodeSource for CsvCodeSource {
    fn fetch_codes(&self) -> Result<Fetched<CountryCode>> {
        let raw = std::fs::read(&self.path)?;
        let map = CountryCodeMap::from_csv(&self.path)?;
        Ok(Fetched::new(map.to_vec(), raw))
    }
}

/// Read a local path, or GET an http(s) URL
pub fn read_location(location: &str, client: &reqwest::blocking::Client) -> Result<Vec<u8>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let response = client.get(location).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(crate::error::PipelineError::source_error(
                location,
                format!("HTTP {}", status),
            ));
        }
        Ok(response.bytes()?.to_vec())
    } else {
        Ok(std::fs::read(location)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_csv_code_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "iso3,iso2,name").unwrap();
        writeln!(file, "USA,US,United States").unwrap();
        writeln!(file, "WLD,1W,World").unwrap();

        let fetched = CsvCodeSource::new(file.path()).fetch_codes().unwrap();

        assert_eq!(fetched.records.len(), 1);
        assert!(!fetched.raw.is_empty());
    }

    #[test]
    fn test_read_local_location() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "<table></table>").unwrap();

        let client = reqwest::blocking::Client::new();
        let bytes = read_location(file.path().to_str().unwrap(), &client).unwrap();

        assert_eq!(bytes, b"<table></table>");
    }
}
