// 🏦 World Bank v2 API - country metadata (the code map) and GDP indicator
//
// Responses are `[meta, rows]`. A one-element array carries an API error
// message instead of data.

use super::{CodeSource, Fetched, GdpSource};
use crate::entities::gdp::{GDP_MAX_YEAR, GDP_MIN_YEAR};
use crate::entities::{CountryCode, CountryCodeMap, GdpRecord};
use crate::error::{PipelineError, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

pub const WORLD_BANK_BASE_URL: &str = "https://api.worldbank.org/v2";
pub const GDP_INDICATOR: &str = "NY.GDP.MKTP.CD";

const SOURCE: &str = "world_bank";

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageMeta {
    pub page: u32,
    pub pages: u32,
}

#[derive(Debug, Deserialize)]
struct WbValue {
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct WbCountry {
    id: String,
    #[serde(rename = "iso2Code")]
    iso2_code: String,
    name: String,
    region: Option<WbValue>,
}

#[derive(Debug, Deserialize)]
struct WbObservation {
    #[serde(rename = "countryiso3code", default)]
    country_iso3: String,
    date: String,
    value: Option<f64>,
}

/// Split a response body into its page meta and row array
fn split_page(body: &str) -> Result<(PageMeta, Value)> {
    let json: Value = serde_json::from_str(body)?;
    let mut parts = match json {
        Value::Array(parts) => parts,
        other => {
            return Err(PipelineError::source_error(
                SOURCE,
                format!("expected a JSON array, got {}", other),
            ))
        }
    };

    if parts.len() < 2 {
        let message = parts
            .first()
            .and_then(|m| m.get("message"))
            .map(|m| m.to_string())
            .unwrap_or_else(|| "empty response".to_string());
        return Err(PipelineError::source_error(SOURCE, message));
    }

    let rows = parts.remove(1);
    let meta: PageMeta = serde_json::from_value(parts.remove(0))?;
    Ok((meta, rows))
}

/// Country metadata page → codes, regional aggregates excluded
pub fn parse_country_page(body: &str) -> Result<(PageMeta, Vec<CountryCode>)> {
    let (meta, rows) = split_page(body)?;
    let countries: Vec<WbCountry> = match rows {
        Value::Null => Vec::new(),
        rows => serde_json::from_value(rows)?,
    };

    let codes = countries
        .into_iter()
        .filter(|c| {
            c.region
                .as_ref()
                .map(|r| r.value.trim() != "Aggregates")
                .unwrap_or(true)
        })
        .map(|c| CountryCode::new(&c.id, &c.iso2_code, &c.name))
        .filter(CountryCode::is_well_formed)
        .collect();

    Ok((meta, codes))
}

/// Indicator page → GDP rows whose iso3 is a known country
pub fn parse_indicator_page(
    body: &str,
    codes: &CountryCodeMap,
) -> Result<(PageMeta, Vec<GdpRecord>)> {
    let (meta, rows) = split_page(body)?;
    let observations: Vec<WbObservation> = match rows {
        Value::Null => Vec::new(),
        rows => serde_json::from_value(rows)?,
    };

    let mut records = Vec::with_capacity(observations.len());
    for obs in observations {
        let iso3 = obs.country_iso3.trim().to_ascii_uppercase();
        if iso3.is_empty() || !codes.contains_iso3(&iso3) {
            continue;
        }
        let year: i32 = obs.date.trim().parse().map_err(|_| {
            PipelineError::source_error(SOURCE, format!("bad year '{}' for {}", obs.date, iso3))
        })?;
        records.push(GdpRecord::new(iso3, year, obs.value));
    }

    Ok((meta, records))
}

pub struct WorldBankClient {
    http: Client,
    base_url: String,
    indicator: String,
    per_page: u32,
}

impl WorldBankClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: WORLD_BANK_BASE_URL.to_string(),
            indicator: GDP_INDICATOR.to_string(),
            per_page: 1000,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_indicator(mut self, indicator: &str) -> Self {
        self.indicator = indicator.to_string();
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.max(1);
        self
    }

    fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        let response = self.http.get(url).query(query).send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::source_error(
                SOURCE,
                format!(
                    "World Bank API error {}: {}",
                    status,
                    body.chars().take(200).collect::<String>()
                ),
            ));
        }

        Ok(response.text()?)
    }

    /// Fetch every page; `parse` maps one body to (meta, rows)
    fn fetch_pages<T, F>(&self, url: &str, extra: &[(&str, String)], parse: F) -> Result<Fetched<T>>
    where
        F: Fn(&str) -> Result<(PageMeta, Vec<T>)>,
    {
        let mut records = Vec::new();
        let mut raw = Vec::new();
        let mut page = 1;

        loop {
            let mut query = vec![
                ("format", "json".to_string()),
                ("per_page", self.per_page.to_string()),
                ("page", page.to_string()),
            ];
            query.extend(extra.iter().cloned());

            let body = self.get(url, &query)?;
            let (meta, rows) = parse(&body)?;
            debug!(url, page = meta.page, pages = meta.pages, rows = rows.len(), "fetched page");

            raw.extend_from_slice(body.as_bytes());
            records.extend(rows);

            if meta.page >= meta.pages {
                break;
            }
            page = meta.page + 1;
        }

        Ok(Fetched::new(records, raw))
    }
}

impl CodeSource for WorldBankClient {
    fn fetch_codes(&self) -> Result<Fetched<CountryCode>> {
        let url = format!("{}/country", self.base_url);
        let fetched = self.fetch_pages(&url, &[], parse_country_page)?;
        info!(codes = fetched.records.len(), "fetched World Bank country codes");
        Ok(fetched)
    }
}

impl GdpSource for WorldBankClient {
    fn fetch_gdp(&self, codes: &CountryCodeMap) -> Result<Fetched<GdpRecord>> {
        let url = format!("{}/country/all/indicator/{}", self.base_url, self.indicator);
        let date = format!("{}:{}", GDP_MIN_YEAR, GDP_MAX_YEAR);
        let fetched = self.fetch_pages(&url, &[("date", date)], |body| {
            parse_indicator_page(body, codes)
        })?;
        info!(rows = fetched.records.len(), indicator = %self.indicator, "fetched GDP");
        Ok(fetched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNTRIES: &str = r#"[
        {"page": 1, "pages": 1, "per_page": "400", "total": 4},
        [
            {"id": "ABW", "iso2Code": "AW", "name": "Aruba",
             "region": {"id": "LCN", "iso2code": "ZJ", "value": "Latin America & Caribbean "}},
            {"id": "AFE", "iso2Code": "ZH", "name": "Africa Eastern and Southern",
             "region": {"id": "NA", "iso2code": "NA", "value": "Aggregates"}},
            {"id": "USA", "iso2Code": "US", "name": "United States",
             "region": {"id": "NAC", "iso2code": "XU", "value": "North America"}},
            {"id": "WLD", "iso2Code": "1W", "name": "World",
             "region": {"id": "NA", "iso2code": "NA", "value": "Aggregates"}}
        ]
    ]"#;

    const GDP_PAGE: &str = r#"[
        {"page": 2, "pages": 2, "per_page": 1000, "total": 5, "lastupdated": "2024-07-01"},
        [
            {"indicator": {"id": "NY.GDP.MKTP.CD", "value": "GDP (current US$)"},
             "country": {"id": "US", "value": "United States"},
             "countryiso3code": "USA", "date": "2023", "value": 27360935000000,
             "unit": "", "obs_status": "", "decimal": 0},
            {"indicator": {"id": "NY.GDP.MKTP.CD", "value": "GDP (current US$)"},
             "country": {"id": "US", "value": "United States"},
             "countryiso3code": "USA", "date": "1960", "value": null,
             "unit": "", "obs_status": "", "decimal": 0},
            {"indicator": {"id": "NY.GDP.MKTP.CD", "value": "GDP (current US$)"},
             "country": {"id": "1W", "value": "World"},
             "countryiso3code": "WLD", "date": "2023", "value": 105000000000000,
             "unit": "", "obs_status": "", "decimal": 0},
            {"indicator": {"id": "NY.GDP.MKTP.CD", "value": "GDP (current US$)"},
             "country": {"id": "XK", "value": "Kosovo"},
             "countryiso3code": "", "date": "2023", "value": 10000000000,
             "unit": "", "obs_status": "", "decimal": 0}
        ]
    ]"#;

    #[test]
    fn test_country_page_excludes_aggregates() {
        let (meta, codes) = parse_country_page(COUNTRIES).unwrap();

        assert_eq!(meta.pages, 1);
        let iso3s: Vec<&str> = codes.iter().map(|c| c.iso3.as_str()).collect();
        assert_eq!(iso3s, vec!["ABW", "USA"]);
    }

    #[test]
    fn test_indicator_page_keeps_known_countries() {
        let (_, codes) = parse_country_page(COUNTRIES).unwrap();
        let map = CountryCodeMap::from_codes(codes);

        let (meta, rows) = parse_indicator_page(GDP_PAGE, &map).unwrap();

        assert_eq!(meta.page, 2);
        assert_eq!(
            rows,
            vec![
                GdpRecord::new("USA", 2023, Some(27_360_935_000_000.0)),
                GdpRecord::new("USA", 1960, None),
            ]
        );
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"[{"message": [{"id": "120", "key": "Invalid value", "value": "The provided parameter value is not valid"}]}]"#;

        let err = parse_country_page(body).unwrap_err();
        assert!(err.to_string().contains("Invalid value"));
    }

    #[test]
    fn test_empty_page() {
        let body = r#"[{"page": 1, "pages": 0, "per_page": 50, "total": 0}, null]"#;
        let map = CountryCodeMap::default();

        let (meta, rows) = parse_indicator_page(body, &map).unwrap();
        assert_eq!(meta.pages, 0);
        assert!(rows.is_empty());
    }
}
