// 🧭 Identity Harmonizer - every dataset meets on iso2
//
// Matching order:
//   1. iso3 present on the record → exact lookup in the code map (no fallback)
//   2. iso3 absent               → normalized name lookup, aliases collapsed
//
// A record that matches nothing keeps iso2 = None and yields an
// UnresolvedIdentity warning; harmonization never drops a record.

use crate::entities::{CountryCode, CountryCodeMap, CountryRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize a country name for matching
///
/// - NFKD decomposition, combining marks removed ("Côte" → "cote")
/// - Lowercase
/// - Punctuation replaced with a space
/// - Whitespace trimmed and collapsed
pub fn normalize_country_name(s: &str) -> String {
    let stripped: String = s.nfkd().filter(|c| !is_combining_mark(*c)).collect();

    let cleaned: String = stripped
        .chars()
        .flat_map(|c| {
            let c = if c.is_alphanumeric() { c } else { ' ' };
            c.to_lowercase()
        })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Built-in aliases: (variant, canonical). Both sides are normalized on load.
const DEFAULT_ALIASES: &[(&str, &str)] = &[
    ("United States of America", "United States"),
    ("USA", "United States"),
    ("Russia", "Russian Federation"),
    ("South Korea", "Korea, Rep."),
    ("Republic of Korea", "Korea, Rep."),
    ("Korea, Republic of", "Korea, Rep."),
    ("North Korea", "Korea, Dem. People's Rep."),
    ("Democratic People's Republic of Korea", "Korea, Dem. People's Rep."),
    ("Iran", "Iran, Islamic Rep."),
    ("Egypt", "Egypt, Arab Rep."),
    ("Venezuela", "Venezuela, RB"),
    ("Syria", "Syrian Arab Republic"),
    ("Vietnam", "Viet Nam"),
    ("Laos", "Lao PDR"),
    ("Turkey", "Turkiye"),
    ("Czech Republic", "Czechia"),
    ("Slovakia", "Slovak Republic"),
    ("Kyrgyzstan", "Kyrgyz Republic"),
    ("Yemen", "Yemen, Rep."),
    ("Gambia", "Gambia, The"),
    ("The Gambia", "Gambia, The"),
    ("Bahamas", "Bahamas, The"),
    ("The Bahamas", "Bahamas, The"),
    ("Democratic Republic of the Congo", "Congo, Dem. Rep."),
    ("DR Congo", "Congo, Dem. Rep."),
    ("Republic of the Congo", "Congo, Rep."),
    ("Congo", "Congo, Rep."),
    ("Brunei", "Brunei Darussalam"),
    ("Micronesia", "Micronesia, Fed. Sts."),
    ("Federated States of Micronesia", "Micronesia, Fed. Sts."),
    ("Saint Kitts and Nevis", "St. Kitts and Nevis"),
    ("Saint Lucia", "St. Lucia"),
    ("Saint Vincent and the Grenadines", "St. Vincent and the Grenadines"),
    ("East Timor", "Timor-Leste"),
    ("Ivory Coast", "Cote d'Ivoire"),
    ("Cape Verde", "Cabo Verde"),
    ("Swaziland", "Eswatini"),
    ("Macedonia", "North Macedonia"),
    ("Burma", "Myanmar"),
    ("Hong Kong", "Hong Kong SAR, China"),
    ("Macau", "Macao SAR, China"),
    ("Macao", "Macao SAR, China"),
    ("Palestine", "West Bank and Gaza"),
];

// ============================================================================
// ALIAS TABLE
// ============================================================================

/// Maps normalized variants onto one normalized canonical key
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        AliasTable::default()
    }

    pub fn with_defaults() -> Self {
        let mut table = AliasTable::new();
        for (variant, canonical) in DEFAULT_ALIASES {
            table.add(variant, canonical);
        }
        table
    }

    /// Register an alias; identical normalized forms are ignored
    pub fn add(&mut self, variant: &str, canonical: &str) {
        let variant = normalize_country_name(variant);
        let canonical = normalize_country_name(canonical);
        if variant.is_empty() || variant == canonical {
            return;
        }
        self.aliases.insert(variant, canonical);
    }

    pub fn extend<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (variant, canonical) in pairs {
            self.add(variant, canonical);
        }
    }

    /// Collapse an already-normalized name onto its canonical key
    pub fn collapse<'a>(&'a self, normalized: &'a str) -> &'a str {
        self.aliases
            .get(normalized)
            .map(String::as_str)
            .unwrap_or(normalized)
    }

    /// normalize + collapse
    pub fn canonical_key(&self, name: &str) -> String {
        let normalized = normalize_country_name(name);
        self.collapse(&normalized).to_string()
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

// ============================================================================
// RESOLUTION RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    Iso3,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnresolvedReason {
    /// Record carries an iso3 the code map does not know
    UnknownIso3,
    /// No reference name matches after normalization
    NoNameMatch,
    /// Several reference names normalize to the same key
    AmbiguousName,
}

impl UnresolvedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnresolvedReason::UnknownIso3 => "unknown_iso3",
            UnresolvedReason::NoNameMatch => "no_name_match",
            UnresolvedReason::AmbiguousName => "ambiguous_name",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unknown_iso3" => Some(UnresolvedReason::UnknownIso3),
            "no_name_match" => Some(UnresolvedReason::NoNameMatch),
            "ambiguous_name" => Some(UnresolvedReason::AmbiguousName),
            _ => None,
        }
    }
}

/// Warning payload for a record harmonization could not resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedIdentity {
    pub raw_name: String,
    pub iso3: Option<String>,
    pub reason: UnresolvedReason,
}

impl fmt::Display for UnresolvedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.iso3 {
            Some(iso3) => write!(
                f,
                "unresolved identity '{}' (iso3 {}): {}",
                self.raw_name,
                iso3,
                self.reason.as_str()
            ),
            None => write!(
                f,
                "unresolved identity '{}': {}",
                self.raw_name,
                self.reason.as_str()
            ),
        }
    }
}

/// Output of a batch harmonization
#[derive(Debug, Clone, Default)]
pub struct HarmonizeReport {
    /// Every input record, in input order, iso2 filled where resolved
    pub records: Vec<CountryRecord>,
    pub unresolved: Vec<UnresolvedIdentity>,
    pub matched_by_iso3: usize,
    pub matched_by_name: usize,
}

impl HarmonizeReport {
    pub fn resolved(&self) -> impl Iterator<Item = &CountryRecord> {
        self.records.iter().filter(|r| r.is_resolved())
    }

    pub fn resolved_count(&self) -> usize {
        self.matched_by_iso3 + self.matched_by_name
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} by iso3, {} by name, {} unresolved",
            self.records.len(),
            self.matched_by_iso3,
            self.matched_by_name,
            self.unresolved.len()
        )
    }
}

// ============================================================================
// HARMONIZER
// ============================================================================

enum NameEntry {
    Unique(String),
    Ambiguous,
}

pub struct Harmonizer<'a> {
    codes: &'a CountryCodeMap,
    aliases: AliasTable,
    /// canonical name key → iso3
    name_index: HashMap<String, NameEntry>,
}

impl<'a> Harmonizer<'a> {
    pub fn new(codes: &'a CountryCodeMap, aliases: AliasTable) -> Self {
        let mut name_index: HashMap<String, NameEntry> = HashMap::new();

        for code in codes.iter() {
            let key = aliases.canonical_key(&code.name);
            if key.is_empty() {
                continue;
            }
            match name_index.get(&key) {
                Some(NameEntry::Unique(existing)) if existing != &code.iso3 => {
                    debug!(%key, first = %existing, second = %code.iso3, "ambiguous reference name");
                    name_index.insert(key, NameEntry::Ambiguous);
                }
                Some(_) => {}
                None => {
                    name_index.insert(key, NameEntry::Unique(code.iso3.clone()));
                }
            }
        }

        Harmonizer {
            codes,
            aliases,
            name_index,
        }
    }

    /// Harmonizer with the built-in alias table
    pub fn with_default_aliases(codes: &'a CountryCodeMap) -> Self {
        Harmonizer::new(codes, AliasTable::with_defaults())
    }

    /// Look up the reference entry for a record without modifying it
    pub fn resolve(
        &self,
        record: &CountryRecord,
    ) -> Result<(&'a CountryCode, MatchMethod), UnresolvedIdentity> {
        let codes: &'a CountryCodeMap = self.codes;
        let iso3 = record
            .iso3
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(iso3) = iso3 {
            return codes
                .get_by_iso3(iso3)
                .map(|code| (code, MatchMethod::Iso3))
                .ok_or_else(|| UnresolvedIdentity {
                    raw_name: record.raw_name.clone(),
                    iso3: Some(iso3.to_ascii_uppercase()),
                    reason: UnresolvedReason::UnknownIso3,
                });
        }

        let key = self.aliases.canonical_key(&record.raw_name);
        match self.name_index.get(&key) {
            Some(NameEntry::Unique(iso3)) => codes
                .get_by_iso3(iso3)
                .map(|code| (code, MatchMethod::Name))
                .ok_or_else(|| self.unresolved(record, UnresolvedReason::NoNameMatch)),
            Some(NameEntry::Ambiguous) => {
                Err(self.unresolved(record, UnresolvedReason::AmbiguousName))
            }
            None => Err(self.unresolved(record, UnresolvedReason::NoNameMatch)),
        }
    }

    fn unresolved(&self, record: &CountryRecord, reason: UnresolvedReason) -> UnresolvedIdentity {
        UnresolvedIdentity {
            raw_name: record.raw_name.clone(),
            iso3: None,
            reason,
        }
    }

    /// Assign iso2 (and iso3, when matched by name)
    ///
    /// An unresolved record comes back with iso2 = None alongside its warning.
    pub fn harmonize(
        &self,
        mut record: CountryRecord,
    ) -> (CountryRecord, Result<MatchMethod, UnresolvedIdentity>) {
        match self.resolve(&record) {
            Ok((code, method)) => {
                record.iso2 = Some(code.iso2.clone());
                record.iso3 = Some(code.iso3.clone());
                (record, Ok(method))
            }
            Err(warning) => {
                record.iso2 = None;
                (record, Err(warning))
            }
        }
    }

    pub fn harmonize_all(&self, records: Vec<CountryRecord>) -> HarmonizeReport {
        let mut report = HarmonizeReport::default();

        for record in records {
            let (record, outcome) = self.harmonize(record);
            match outcome {
                Ok(MatchMethod::Iso3) => report.matched_by_iso3 += 1,
                Ok(MatchMethod::Name) => report.matched_by_name += 1,
                Err(warning) => {
                    warn!("{}", warning);
                    report.unresolved.push(warning);
                }
            }
            report.records.push(record);
        }

        report
    }

    /// iso3 → iso2 through the reference map
    pub fn iso2_for_iso3(&self, iso3: &str) -> Option<&'a str> {
        let codes: &'a CountryCodeMap = self.codes;
        codes.get_by_iso3(iso3).map(|code| code.iso2.as_str())
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_map() -> CountryCodeMap {
        CountryCodeMap::from_codes(vec![
            CountryCode::new("USA", "US", "United States"),
            CountryCode::new("CIV", "CI", "Cote d'Ivoire"),
            CountryCode::new("RUS", "RU", "Russian Federation"),
            CountryCode::new("KOR", "KR", "Korea, Rep."),
            CountryCode::new("FRA", "FR", "France"),
        ])
    }

    #[test]
    fn test_normalize_strips_diacritics_and_punctuation() {
        assert_eq!(normalize_country_name("Côte d’Ivoire"), "cote d ivoire");
        assert_eq!(normalize_country_name("  São   Tomé and Príncipe "), "sao tome and principe");
        assert_eq!(normalize_country_name("Korea, Rep."), "korea rep");
        assert_eq!(normalize_country_name("Türkiye"), "turkiye");
    }

    #[test]
    fn test_alias_collapse() {
        let aliases = AliasTable::with_defaults();
        assert_eq!(aliases.canonical_key("United States of America"), "united states");
        assert_eq!(aliases.canonical_key("South Korea"), "korea rep");
        assert_eq!(aliases.canonical_key("France"), "france");
    }

    #[test]
    fn test_name_fallback_when_iso3_absent() {
        let map = CountryCodeMap::from_codes(vec![CountryCode::new("USA", "US", "United States")]);
        let harmonizer = Harmonizer::with_default_aliases(&map);

        let (record, outcome) = harmonizer.harmonize(CountryRecord::new("United States"));

        assert_eq!(outcome, Ok(MatchMethod::Name));
        assert_eq!(record.iso2.as_deref(), Some("US"));
        assert_eq!(record.iso3.as_deref(), Some("USA"));
    }

    #[test]
    fn test_iso3_takes_precedence_over_name() {
        let map = reference_map();
        let harmonizer = Harmonizer::with_default_aliases(&map);

        // Name says France, iso3 says USA: iso3 wins
        let record = CountryRecord::new("France").with_iso3("usa");
        let (record, outcome) = harmonizer.harmonize(record);

        assert_eq!(outcome, Ok(MatchMethod::Iso3));
        assert_eq!(record.iso2.as_deref(), Some("US"));
    }

    #[test]
    fn test_every_known_iso3_maps_to_reference_iso2() {
        let map = reference_map();
        let harmonizer = Harmonizer::with_default_aliases(&map);

        for code in map.iter() {
            let record = CountryRecord::new("whatever the page said").with_iso3(code.iso3.clone());
            let (record, _) = harmonizer.harmonize(record);
            assert_eq!(record.iso2.as_deref(), Some(code.iso2.as_str()));
        }
    }

    #[test]
    fn test_unknown_iso3_does_not_fall_back() {
        let map = reference_map();
        let harmonizer = Harmonizer::with_default_aliases(&map);

        let (record, outcome) = harmonizer.harmonize(CountryRecord::new("France").with_iso3("XXX"));

        assert!(record.iso2.is_none());
        let warning = outcome.unwrap_err();
        assert_eq!(warning.reason, UnresolvedReason::UnknownIso3);
        assert_eq!(warning.iso3.as_deref(), Some("XXX"));
    }

    #[test]
    fn test_aliases_and_diacritics_resolve() {
        let map = reference_map();
        let harmonizer = Harmonizer::with_default_aliases(&map);

        let report = harmonizer.harmonize_all(vec![
            CountryRecord::new("Côte d’Ivoire"),
            CountryRecord::new("Russia"),
            CountryRecord::new("South Korea"),
            CountryRecord::new("United States of America"),
        ]);

        let codes: Vec<_> = report.records.iter().map(|r| r.iso2.clone()).collect();
        assert_eq!(
            codes,
            vec![
                Some("CI".to_string()),
                Some("RU".to_string()),
                Some("KR".to_string()),
                Some("US".to_string()),
            ]
        );
        assert!(report.unresolved.is_empty());
    }

    #[test]
    fn test_unresolved_records_are_retained() {
        let map = reference_map();
        let harmonizer = Harmonizer::with_default_aliases(&map);

        let report = harmonizer.harmonize_all(vec![
            CountryRecord::new("France"),
            CountryRecord::new("Atlantis"),
        ]);

        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[1].raw_name, "Atlantis");
        assert!(report.records[1].iso2.is_none());
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].reason, UnresolvedReason::NoNameMatch);
        assert_eq!(report.resolved_count(), 1);
    }

    #[test]
    fn test_ambiguous_reference_names_stay_unresolved() {
        let map = CountryCodeMap::from_codes(vec![
            CountryCode::new("COG", "CG", "Congo"),
            CountryCode::new("COD", "CD", "Congo!"),
        ]);
        let harmonizer = Harmonizer::new(&map, AliasTable::new());

        let (record, outcome) = harmonizer.harmonize(CountryRecord::new("Congo"));

        assert!(record.iso2.is_none());
        assert_eq!(outcome.unwrap_err().reason, UnresolvedReason::AmbiguousName);
    }

    #[test]
    fn test_configured_aliases_extend_defaults() {
        let map = reference_map();
        let mut aliases = AliasTable::with_defaults();
        let extra: HashMap<String, String> =
            [("République française".to_string(), "France".to_string())].into();
        aliases.extend(&extra);

        let harmonizer = Harmonizer::new(&map, aliases);
        let (record, _) = harmonizer.harmonize(CountryRecord::new("Republique Francaise"));

        assert_eq!(record.iso2.as_deref(), Some("FR"));
    }
}
