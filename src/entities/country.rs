// 🌍 Country Entity - one row of the scraped country table
//
// raw_name is whatever the page printed; iso2 stays None until the
// harmonizer resolves the name (or the iso3 column) against the code map.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRecord {
    /// Name as scraped (never empty)
    pub raw_name: String,

    /// Canonical ISO 3166-1 alpha-2, assigned by harmonization only
    pub iso2: Option<String>,

    /// ISO 3166-1 alpha-3 when the page carries one
    pub iso3: Option<String>,

    pub capital: Option<String>,
    pub population: Option<i64>,

    /// Area in km²
    pub area: Option<f64>,
}

impl CountryRecord {
    /// Create a record with only the scraped name
    pub fn new(raw_name: impl Into<String>) -> Self {
        CountryRecord {
            raw_name: raw_name.into(),
            iso2: None,
            iso3: None,
            capital: None,
            population: None,
            area: None,
        }
    }

    /// Builder pattern: add ISO-3 code
    pub fn with_iso3(mut self, iso3: impl Into<String>) -> Self {
        self.iso3 = Some(iso3.into());
        self
    }

    /// Builder pattern: add capital city
    pub fn with_capital(mut self, capital: impl Into<String>) -> Self {
        self.capital = Some(capital.into());
        self
    }

    /// Builder pattern: add population
    pub fn with_population(mut self, population: i64) -> Self {
        self.population = Some(population);
        self
    }

    /// Builder pattern: add area
    pub fn with_area(mut self, area: f64) -> Self {
        self.area = Some(area);
        self
    }

    /// Has harmonization assigned a code?
    pub fn is_resolved(&self) -> bool {
        self.iso2.is_some()
    }

    /// Capital with surrounding whitespace removed, None when blank
    pub fn capital_name(&self) -> Option<&str> {
        self.capital
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_country_builder() {
        let record = CountryRecord::new("France")
            .with_iso3("FRA")
            .with_capital("Paris")
            .with_population(67_000_000)
            .with_area(551_695.0);

        assert_eq!(record.raw_name, "France");
        assert_eq!(record.iso3.as_deref(), Some("FRA"));
        assert_eq!(record.capital_name(), Some("Paris"));
        assert_eq!(record.population, Some(67_000_000));
        assert!(!record.is_resolved());
    }

    #[test]
    fn test_blank_capital_is_none() {
        let record = CountryRecord::new("Antarctica").with_capital("   ");
        assert_eq!(record.capital_name(), None);
    }
}
