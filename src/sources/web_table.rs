// 🌐 Web Table Extractor - country rows from a static HTML table
//
// Columns are found by header text, so column order on the page does not
// matter. Recognised headers: country/name, capital, population, area and
// an optional ISO-3 code column.

use super::html::{
    cell_text, has_class, inner_after_open_tag, parse_integer, parse_number, TagScanner,
};
use super::{read_location, CountrySource, Fetched};
use crate::entities::CountryRecord;
use crate::error::{PipelineError, Result};
use std::time::Duration;
use tracing::{debug, info};

const SOURCE: &str = "countries";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Name,
    Capital,
    Population,
    Area,
    Iso3,
}

fn classify_header(text: &str) -> Option<Field> {
    let h = text.to_lowercase();
    let h = h.trim();

    if h.contains("alpha-3")
        || h.contains("alpha 3")
        || h.contains("iso3")
        || h == "code"
        || h == "iso"
    {
        Some(Field::Iso3)
    } else if h.contains("capital") {
        Some(Field::Capital)
    } else if h.contains("population") {
        Some(Field::Population)
    } else if h.contains("area") {
        Some(Field::Area)
    } else if h.contains("country") || h == "name" || h.starts_with("name ") {
        Some(Field::Name)
    } else {
        None
    }
}

#[derive(Debug, Default)]
struct ColumnMap {
    columns: Vec<Option<Field>>,
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Self {
        let mut seen = Vec::new();
        let columns = headers
            .iter()
            .map(|h| {
                // First matching header wins for each field
                classify_header(h).filter(|f| {
                    if seen.contains(f) {
                        false
                    } else {
                        seen.push(*f);
                        true
                    }
                })
            })
            .collect();
        ColumnMap { columns }
    }

    fn has(&self, field: Field) -> bool {
        self.columns.contains(&Some(field))
    }

    fn cell<'c>(&self, cells: &'c [String], field: Field) -> Option<&'c str> {
        let idx = self.columns.iter().position(|c| *c == Some(field))?;
        cells
            .get(idx)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

struct RowCells {
    header: bool,
    cells: Vec<String>,
}

fn row_cells(row: &str) -> RowCells {
    let scanner = TagScanner::new(row);
    let mut cells = Vec::new();
    let mut all_th = true;
    let mut pos = 0;

    loop {
        let td = scanner.find_open("td", pos);
        let th = scanner.find_open("th", pos);
        let (tag, start) = match (td, th) {
            (Some(d), Some(h)) if h < d => ("th", h),
            (Some(d), _) => ("td", d),
            (None, Some(h)) => ("th", h),
            (None, None) => break,
        };

        let Some((s, e)) = scanner.next_block(tag, start, &["td", "th"]) else {
            break;
        };
        if tag == "td" {
            all_th = false;
        }
        cells.push(cell_text(inner_after_open_tag(&row[s..e])));
        pos = e;
    }

    RowCells {
        header: all_th && !cells.is_empty(),
        cells,
    }
}

/// The first `<table>` (first with `class` when one is given), inner HTML
fn select_table<'a>(scanner: &TagScanner<'a>, class: Option<&str>) -> Option<&'a str> {
    let html = scanner.source();
    let mut pos = 0;

    while let Some((start, end)) = scanner.next_block("table", pos, &[]) {
        let matches = match class {
            Some(class) => scanner
                .open_tag(start)
                .map(|tag| has_class(tag, class))
                .unwrap_or(false),
            None => true,
        };
        if matches {
            return Some(inner_after_open_tag(&html[start..end]));
        }
        pos = end;
    }
    None
}

/// Parse the country table out of an HTML document
pub fn parse_country_table(html: &str, class: Option<&str>) -> Result<Vec<CountryRecord>> {
    let scanner = TagScanner::new(html);
    let table = select_table(&scanner, class).ok_or_else(|| {
        PipelineError::source_error(
            SOURCE,
            match class {
                Some(c) => format!("no <table> with class '{}'", c),
                None => "no <table> in document".to_string(),
            },
        )
    })?;

    let rows = TagScanner::new(table);
    let mut pos = 0;
    let mut columns: Option<ColumnMap> = None;
    let mut records = Vec::new();
    let mut skipped = 0;

    while let Some((start, end)) = rows.next_block("tr", pos, &["tr"]) {
        pos = end;
        let row = row_cells(&table[start..end]);
        if row.cells.is_empty() {
            continue;
        }

        if columns.is_none() {
            let map = ColumnMap::from_headers(&row.cells);
            if !map.has(Field::Name) {
                return Err(PipelineError::source_error(
                    SOURCE,
                    format!("header row has no country/name column: {:?}", row.cells),
                ));
            }
            columns = Some(map);
            continue;
        }
        let Some(map) = columns.as_ref() else {
            continue;
        };

        // Repeated header rows (sortable tables, page breaks)
        if row.header {
            continue;
        }

        let Some(name) = map.cell(&row.cells, Field::Name) else {
            skipped += 1;
            continue;
        };

        let mut record = CountryRecord::new(name);
        if let Some(capital) = map.cell(&row.cells, Field::Capital) {
            record = record.with_capital(capital);
        }
        if let Some(population) = map.cell(&row.cells, Field::Population).and_then(parse_integer) {
            record = record.with_population(population);
        }
        if let Some(area) = map.cell(&row.cells, Field::Area).and_then(parse_number) {
            record = record.with_area(area);
        }
        if let Some(iso3) = map.cell(&row.cells, Field::Iso3) {
            let iso3 = iso3.trim().to_ascii_uppercase();
            if iso3.len() == 3 {
                record = record.with_iso3(iso3);
            }
        }

        records.push(record);
    }

    if columns.is_none() {
        return Err(PipelineError::source_error(SOURCE, "table has no rows"));
    }

    debug!(rows = records.len(), skipped, "parsed country table");
    Ok(records)
}

/// Reads a local file or URL and parses its country table
pub struct WebTableExtractor {
    location: String,
    table_class: Option<String>,
    client: reqwest::blocking::Client,
}

impl WebTableExtractor {
    pub fn new(location: &str, table_class: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("country-integration/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(WebTableExtractor {
            location: location.to_string(),
            table_class,
            client,
        })
    }
}

impl CountrySource for WebTableExtractor {
    fn fetch_countries(&self) -> Result<Fetched<CountryRecord>> {
        let raw = read_location(&self.location, &self.client)?;
        let html = String::from_utf8_lossy(&raw);
        let records = parse_country_table(&html, self.table_class.as_deref())?;

        info!(location = %self.location, rows = records.len(), "extracted country table");
        Ok(Fetched::new(records, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
<html><body>
<table class="infobox"><tr><td>Not this one</td></tr></table>
<table class="wikitable sortable">
  <thead>
    <tr><th>Country</th><th>Capital</th><th>Population</th><th>Area (km<sup>2</sup>)</th><th>ISO 3166-1 alpha-3</th></tr>
  </thead>
  <tbody>
    <tr><td><a href="/wiki/US">United States</a><sup>[1]</sup></td><td>Washington, D.C.</td><td>331,449,281</td><td>9,833,520</td><td>USA</td></tr>
    <tr><td>C&ocirc;te d&#8217;Ivoire</td><td>Yamoussoukro</td><td>26,378,274</td><td>322,463</td><td></td></tr>
    <tr><td></td><td>Nowhere</td><td>0</td><td>0</td><td></td></tr>
    <tr><th>Country</th><th>Capital</th><th>Population</th><th>Area</th><th>Code</th></tr>
    <tr><td>Monaco<td>Monaco<td>39,050<td>2.02<td>MCO</tr>
  </tbody>
</table>
</body></html>
"#;

    #[test]
    fn test_parses_classed_table() {
        let records = parse_country_table(PAGE, Some("wikitable")).unwrap();

        assert_eq!(records.len(), 3);

        let us = &records[0];
        assert_eq!(us.raw_name, "United States");
        assert_eq!(us.capital.as_deref(), Some("Washington, D.C."));
        assert_eq!(us.population, Some(331_449_281));
        assert_eq!(us.area, Some(9_833_520.0));
        assert_eq!(us.iso3.as_deref(), Some("USA"));
        assert_eq!(us.iso2, None);

        let ci = &records[1];
        assert_eq!(ci.raw_name, "C\u{f4}te d\u{2019}Ivoire");
        assert_eq!(ci.iso3, None);

        let mc = &records[2];
        assert_eq!(mc.raw_name, "Monaco");
        assert_eq!(mc.area, Some(2.02));
        assert_eq!(mc.iso3.as_deref(), Some("MCO"));
    }

    #[test]
    fn test_entity_spelled_names_resolve() {
        use crate::entities::{CountryCode, CountryCodeMap};
        use crate::harmonize::Harmonizer;

        let html = "<table><tr><th>Country</th></tr>\
            <tr><td>C&ocirc;te d&#39;Ivoire</td></tr>\
            <tr><td>S&atilde;o Tom&eacute; and Pr&iacute;ncipe</td></tr></table>";
        let records = parse_country_table(html, None).unwrap();
        assert_eq!(records[0].raw_name, "C\u{f4}te d'Ivoire");
        assert_eq!(records[1].raw_name, "S\u{e3}o Tom\u{e9} and Pr\u{ed}ncipe");

        let codes = CountryCodeMap::from_codes(vec![
            CountryCode::new("CIV", "CI", "Cote d'Ivoire"),
            CountryCode::new("STP", "ST", "Sao Tome and Principe"),
        ]);
        let report = Harmonizer::with_default_aliases(&codes).harmonize_all(records);

        assert!(report.unresolved.is_empty());
        let iso2: Vec<_> = report.records.iter().map(|r| r.iso2.as_deref()).collect();
        assert_eq!(iso2, vec![Some("CI"), Some("ST")]);
    }

    #[test]
    fn test_first_table_without_class() {
        let err = parse_country_table(PAGE, None).unwrap_err();
        // The infobox has no header row naming a country column
        assert!(matches!(err, PipelineError::Source { .. }));
    }

    #[test]
    fn test_missing_table() {
        let err = parse_country_table("<p>nothing</p>", Some("wikitable")).unwrap_err();
        assert!(err.to_string().contains("wikitable"));
    }

    #[test]
    fn test_header_classification() {
        assert_eq!(classify_header("Country or territory"), Some(Field::Name));
        assert_eq!(classify_header("Capital city"), Some(Field::Capital));
        assert_eq!(classify_header("Land area (km2)"), Some(Field::Area));
        assert_eq!(classify_header("ISO3"), Some(Field::Iso3));
        assert_eq!(classify_header("Country code (alpha-3)"), Some(Field::Iso3));
        assert_eq!(classify_header("Rank"), None);
    }

    #[test]
    fn test_extractor_reads_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("countries.html");
        std::fs::write(&path, PAGE).unwrap();

        let extractor = WebTableExtractor::new(
            path.to_str().unwrap(),
            Some("wikitable".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        let fetched = extractor.fetch_countries().unwrap();

        assert_eq!(fetched.records.len(), 3);
        assert_eq!(fetched.raw.len(), PAGE.len());
    }
}
