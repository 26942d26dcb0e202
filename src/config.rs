// ⚙️ Pipeline configuration
//
// JSON file, every field optional. Environment variables override the file;
// CLI flags override both (see main.rs).

use crate::error::{PipelineError, Result};
use crate::sources::weather::OPENWEATHER_BASE_URL;
use crate::sources::world_bank::{GDP_INDICATOR, WORLD_BANK_BASE_URL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub base_url: String,
    pub units: String,

    /// Minimum spacing between requests
    pub request_interval_ms: u64,

    /// Read from OPENWEATHER_API_KEY when absent
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        WeatherConfig {
            base_url: OPENWEATHER_BASE_URL.to_string(),
            units: "metric".to_string(),
            request_interval_ms: 1000,
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldBankConfig {
    pub base_url: String,
    pub indicator: String,
    pub per_page: u32,
}

impl Default for WorldBankConfig {
    fn default() -> Self {
        WorldBankConfig {
            base_url: WORLD_BANK_BASE_URL.to_string(),
            indicator: GDP_INDICATOR.to_string(),
            per_page: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub db_path: PathBuf,

    /// Local path or http(s) URL of the page holding the country table
    pub countries_source: String,

    /// Pick the first table carrying this class
    pub table_class: Option<String>,

    /// Local `iso3,iso2,name` CSV used instead of the World Bank metadata
    pub country_codes_csv: Option<PathBuf>,

    /// Extra scraped-name → reference-name aliases
    pub aliases: BTreeMap<String, String>,

    pub export_path: PathBuf,
    pub http_timeout_secs: u64,
    pub weather: WeatherConfig,
    pub world_bank: WorldBankConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            db_path: PathBuf::from("data/countries.db"),
            countries_source: "data/countries.html".to_string(),
            table_class: None,
            country_codes_csv: None,
            aliases: BTreeMap::new(),
            export_path: PathBuf::from("data/integrated.csv"),
            http_timeout_secs: 30,
            weather: WeatherConfig::default(),
            world_bank: WorldBankConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            PipelineError::Config(format!("failed to read {:?}: {}", path.as_ref(), e))
        })?;

        let config: PipelineConfig = serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// File (if given) then environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// OPENWEATHER_API_KEY and COUNTRY_DB_PATH win over file values
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENWEATHER_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.weather.api_key = Some(key);
        }
        if let Some(path) = lookup("COUNTRY_DB_PATH").filter(|p| !p.trim().is_empty()) {
            self.db_path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.countries_source.trim().is_empty() {
            return Err(PipelineError::Config("countries_source is empty".to_string()));
        }
        if self.http_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "http_timeout_secs must be positive".to_string(),
            ));
        }
        if self.world_bank.per_page == 0 {
            return Err(PipelineError::Config(
                "world_bank.per_page must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn weather_api_key(&self) -> Result<&str> {
        self.weather.api_key.as_deref().ok_or_else(|| {
            PipelineError::Config(
                "OPENWEATHER_API_KEY is not set (needed for the weather stage)".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.db_path, PathBuf::from("data/countries.db"));
        assert_eq!(config.weather.units, "metric");
        assert_eq!(config.world_bank.indicator, "NY.GDP.MKTP.CD");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"table_class": "wikitable", "aliases": {{"Burma": "Myanmar"}}, "weather": {{"units": "imperial"}}}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();

        assert_eq!(config.table_class.as_deref(), Some("wikitable"));
        assert_eq!(config.aliases.get("Burma").map(String::as_str), Some("Myanmar"));
        assert_eq!(config.weather.units, "imperial");
        assert_eq!(config.weather.base_url, OPENWEATHER_BASE_URL);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"http_timeout_secs": 0}}"#).unwrap();

        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = PipelineConfig::default();
        config.apply_overrides(|key| match key {
            "OPENWEATHER_API_KEY" => Some("secret".to_string()),
            "COUNTRY_DB_PATH" => Some("/tmp/other.db".to_string()),
            _ => None,
        });

        assert_eq!(config.weather_api_key().unwrap(), "secret");
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn test_missing_api_key() {
        let config = PipelineConfig::default();
        assert!(config.weather_api_key().is_err());
    }
}
