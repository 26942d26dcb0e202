// 🗺️ Country Code Map - the canonical iso3 ↔ iso2 ↔ name reference
//
// Immutable once built: a run resolves every identifier against the same
// snapshot. Built from the World Bank country metadata or a local CSV.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryCode {
    pub iso3: String,
    pub iso2: String,
    pub name: String,
}

impl CountryCode {
    pub fn new(iso3: &str, iso2: &str, name: &str) -> Self {
        CountryCode {
            iso3: iso3.trim().to_ascii_uppercase(),
            iso2: iso2.trim().to_ascii_uppercase(),
            name: name.trim().to_string(),
        }
    }

    /// Two/three ASCII letters (rejects aggregate codes like "1W" or "Z4")
    pub fn is_well_formed(&self) -> bool {
        is_alpha_code(&self.iso2, 2) && is_alpha_code(&self.iso3, 3) && !self.name.is_empty()
    }
}

fn is_alpha_code(code: &str, len: usize) -> bool {
    code.len() == len && code.chars().all(|c| c.is_ascii_uppercase())
}

#[derive(Debug, Clone, Default)]
pub struct CountryCodeMap {
    by_iso3: BTreeMap<String, CountryCode>,
    iso2_to_iso3: BTreeMap<String, String>,
}

impl CountryCodeMap {
    /// Build the map, dropping malformed entries
    ///
    /// If two entries share an iso3 or an iso2 the later one wins.
    pub fn from_codes<I>(codes: I) -> Self
    where
        I: IntoIterator<Item = CountryCode>,
    {
        let mut map = CountryCodeMap::default();

        for code in codes {
            let code = CountryCode::new(&code.iso3, &code.iso2, &code.name);
            if !code.is_well_formed() {
                warn!(iso3 = %code.iso3, iso2 = %code.iso2, "dropping malformed country code");
                continue;
            }

            if let Some(previous) = map.iso2_to_iso3.get(&code.iso2).cloned() {
                if previous != code.iso3 {
                    warn!(iso2 = %code.iso2, %previous, replacement = %code.iso3, "iso2 assigned twice");
                    map.by_iso3.remove(&previous);
                }
            }
            if let Some(previous) = map.by_iso3.get(&code.iso3) {
                map.iso2_to_iso3.remove(&previous.iso2);
            }

            map.iso2_to_iso3.insert(code.iso2.clone(), code.iso3.clone());
            map.by_iso3.insert(code.iso3.clone(), code);
        }

        map
    }

    /// Load from a CSV file with header `iso3,iso2,name`
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path)?;
        let mut codes = Vec::new();

        for result in rdr.deserialize() {
            let code: CountryCode = result?;
            codes.push(code);
        }

        Ok(Self::from_codes(codes))
    }

    pub fn get_by_iso3(&self, iso3: &str) -> Option<&CountryCode> {
        self.by_iso3.get(&iso3.trim().to_ascii_uppercase())
    }

    pub fn get_by_iso2(&self, iso2: &str) -> Option<&CountryCode> {
        self.iso2_to_iso3
            .get(&iso2.trim().to_ascii_uppercase())
            .and_then(|iso3| self.by_iso3.get(iso3))
    }

    pub fn contains_iso2(&self, iso2: &str) -> bool {
        self.get_by_iso2(iso2).is_some()
    }

    pub fn contains_iso3(&self, iso3: &str) -> bool {
        self.get_by_iso3(iso3).is_some()
    }

    /// Entries in iso3 order
    pub fn iter(&self) -> impl Iterator<Item = &CountryCode> {
        self.by_iso3.values()
    }

    pub fn to_vec(&self) -> Vec<CountryCode> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_iso3.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_iso3.is_empty()
    }
}
