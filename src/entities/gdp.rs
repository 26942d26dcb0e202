// 💵 GDP Entity - one (country, year) observation of GDP in current US$

use serde::{Deserialize, Serialize};

/// First year of the supported GDP range (inclusive)
pub const GDP_MIN_YEAR: i32 = 1960;

/// Last year of the supported GDP range (inclusive)
pub const GDP_MAX_YEAR: i32 = 2024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdpRecord {
    pub iso3: String,
    pub year: i32,

    /// None when the indicator has no value for that year
    pub gdp_current_usd: Option<f64>,
}

impl GdpRecord {
    pub fn new(iso3: impl Into<String>, year: i32, gdp_current_usd: Option<f64>) -> Self {
        GdpRecord {
            iso3: iso3.into(),
            year,
            gdp_current_usd,
        }
    }

    pub fn in_range(&self) -> bool {
        (GDP_MIN_YEAR..=GDP_MAX_YEAR).contains(&self.year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_bounds() {
        assert!(GdpRecord::new("USA", 1960, None).in_range());
        assert!(GdpRecord::new("USA", 2024, Some(1.0)).in_range());
        assert!(!GdpRecord::new("USA", 1959, Some(1.0)).in_range());
        assert!(!GdpRecord::new("USA", 2025, Some(1.0)).in_range());
    }
}
