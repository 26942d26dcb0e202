// 🔗 Join & Aggregation Engine
//
// countries LEFT JOIN weather (iso2)
//           LEFT JOIN country_codes (iso2) -> mean GDP (iso3)
//
// Pre-checks run before the join: the store must not hold GDP years outside
// the supported range or weather/GDP keys unknown to the code map.

use crate::db::{IntegrationStore, Table};
use crate::entities::gdp::{GDP_MAX_YEAR, GDP_MIN_YEAR};
use crate::entities::weather::parse_timestamp;
use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Output columns of the `integrated` view, in order
pub const INTEGRATED_COLUMNS: [&str; 12] = [
    "country_iso2",
    "code_iso3",
    "code_name",
    "country_raw_name",
    "country_capital",
    "country_population",
    "country_area",
    "weather_temperature",
    "weather_humidity",
    "weather_retrieved_at",
    "gdp_mean_usd",
    "gdp_years",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedRow {
    pub iso2: String,
    pub iso3: Option<String>,

    /// Reference name from the code map
    pub country_name: Option<String>,

    /// Name as scraped
    pub raw_name: String,

    pub capital: Option<String>,
    pub population: Option<i64>,
    pub area: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub weather_retrieved_at: Option<DateTime<Utc>>,

    /// Mean over the non-null years; None when there are none
    pub gdp_mean_usd: Option<f64>,

    /// Number of non-null GDP years behind the mean
    pub gdp_years: i64,
}

impl IntegratedRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let retrieved_at: Option<String> = row.get("weather_retrieved_at")?;

        Ok(IntegratedRow {
            iso2: row.get("country_iso2")?,
            iso3: row.get("code_iso3")?,
            country_name: row.get("code_name")?,
            raw_name: row.get("country_raw_name")?,
            capital: row.get("country_capital")?,
            population: row.get("country_population")?,
            area: row.get("country_area")?,
            temperature: row.get("weather_temperature")?,
            humidity: row.get("weather_humidity")?,
            weather_retrieved_at: retrieved_at.as_deref().and_then(parse_timestamp),
            gdp_mean_usd: row.get("gdp_mean_usd")?,
            gdp_years: row.get("gdp_years")?,
        })
    }

    pub fn has_weather(&self) -> bool {
        self.temperature.is_some()
    }

    pub fn has_gdp(&self) -> bool {
        self.gdp_mean_usd.is_some()
    }

    /// Preferred display name: reference name, else scraped name
    pub fn display_name(&self) -> &str {
        self.country_name.as_deref().unwrap_or(&self.raw_name)
    }
}

/// Mean GDP for one iso3 over the supported years
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GdpMean {
    pub iso3: String,
    pub mean_usd: Option<f64>,
    pub years: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrationSummary {
    pub rows: usize,
    pub with_weather: usize,
    pub with_gdp: usize,
    pub orphan_weather: usize,
}

impl IntegrationSummary {
    pub fn from_rows(rows: &[IntegratedRow], orphan_weather: usize) -> Self {
        IntegrationSummary {
            rows: rows.len(),
            with_weather: rows.iter().filter(|r| r.has_weather()).count(),
            with_gdp: rows.iter().filter(|r| r.has_gdp()).count(),
            orphan_weather,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    pub rows: Vec<IntegratedRow>,
    pub summary: IntegrationSummary,
}

pub struct JoinEngine<'a> {
    store: &'a IntegrationStore,
}

impl<'a> JoinEngine<'a> {
    pub fn new(store: &'a IntegrationStore) -> Self {
        JoinEngine { store }
    }

    /// Fail on the first GDP year outside the supported range
    pub fn check_gdp_range(&self) -> Result<()> {
        let offending = self
            .store
            .connection()
            .query_row(
                "SELECT iso3, year FROM gdp
                 WHERE year < ?1 OR year > ?2
                 ORDER BY iso3, year
                 LIMIT 1",
                params![GDP_MIN_YEAR, GDP_MAX_YEAR],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i32>(1)?)),
            )
            .optional()?;

        match offending {
            Some((iso3, year)) => Err(PipelineError::Range {
                iso3,
                year,
                min: GDP_MIN_YEAR,
                max: GDP_MAX_YEAR,
            }),
            None => Ok(()),
        }
    }

    /// Every weather iso2 and every GDP iso3 must be known to country_codes
    pub fn check_join_keys(&self) -> Result<()> {
        let conn = self.store.connection();

        let weather_key = conn
            .query_row(
                "SELECT w.iso2 FROM weather AS w
                 WHERE NOT EXISTS (SELECT 1 FROM country_codes AS cc WHERE cc.iso2 = w.iso2)
                 ORDER BY w.iso2
                 LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        if let Some(key) = weather_key {
            return Err(PipelineError::JoinKey {
                table: Table::Weather.name().to_string(),
                column: "iso2".to_string(),
                key,
            });
        }

        let gdp_key = conn
            .query_row(
                "SELECT g.iso3 FROM gdp AS g
                 WHERE NOT EXISTS (SELECT 1 FROM country_codes AS cc WHERE cc.iso3 = g.iso3)
                 ORDER BY g.iso3
                 LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        if let Some(key) = gdp_key {
            return Err(PipelineError::JoinKey {
                table: Table::Gdp.name().to_string(),
                column: "iso3".to_string(),
                key,
            });
        }

        Ok(())
    }

    /// Weather rows whose iso2 has no scraped country; excluded by the join
    pub fn orphan_weather(&self) -> Result<Vec<String>> {
        let mut stmt = self.store.connection().prepare(
            "SELECT w.iso2 FROM weather AS w
             WHERE NOT EXISTS (SELECT 1 FROM countries AS c WHERE c.iso2 = w.iso2)
             ORDER BY w.iso2",
        )?;

        let orphans = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(orphans)
    }

    /// Step 1 on its own: mean GDP per iso3
    pub fn gdp_means(&self) -> Result<Vec<GdpMean>> {
        self.check_gdp_range()?;

        let mut stmt = self.store.connection().prepare(
            "SELECT iso3, AVG(gdp_current_usd), COUNT(gdp_current_usd)
             FROM gdp
             WHERE year BETWEEN ?1 AND ?2
             GROUP BY iso3
             ORDER BY iso3",
        )?;

        let means = stmt
            .query_map(params![GDP_MIN_YEAR, GDP_MAX_YEAR], |row| {
                Ok(GdpMean {
                    iso3: row.get(0)?,
                    mean_usd: row.get(1)?,
                    years: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(means)
    }

    /// Run the checks and the join; one row per stored country, by iso2
    pub fn integrate(&self) -> Result<Integration> {
        self.check_gdp_range()?;
        self.check_join_keys()?;

        let orphans = self.orphan_weather()?;
        for iso2 in &orphans {
            warn!(%iso2, "weather row has no matching country, excluded from join");
        }

        let mut stmt = self
            .store
            .connection()
            .prepare("SELECT * FROM integrated ORDER BY country_iso2 ASC")?;

        validate_columns(&stmt.column_names())?;

        let rows = stmt
            .query_map([], IntegratedRow::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let summary = IntegrationSummary::from_rows(&rows, orphans.len());
        info!(
            rows = summary.rows,
            with_weather = summary.with_weather,
            with_gdp = summary.with_gdp,
            orphans = summary.orphan_weather,
            "integration complete"
        );

        Ok(Integration { rows, summary })
    }

    /// Single integrated row by iso2; the same checks as `integrate` apply
    pub fn integrated_row(&self, iso2: &str) -> Result<Option<IntegratedRow>> {
        self.check_gdp_range()?;
        self.check_join_keys()?;

        let row = self
            .store
            .connection()
            .query_row(
                "SELECT * FROM integrated WHERE country_iso2 = ?1",
                [iso2.trim().to_ascii_uppercase()],
                IntegratedRow::from_row,
            )
            .optional()?;

        Ok(row)
    }
}

/// Result-set column names must be unique
pub fn validate_columns(columns: &[&str]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(*column) {
            return Err(PipelineError::ColumnCollision(column.to_string()));
        }
    }
    Ok(())
}

/// Write rows as CSV (header from the IntegratedRow field names)
pub fn export_csv(rows: &[IntegratedRow], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!(path = %path.display(), rows = rows.len(), "exported integrated rows");
    Ok(())
}
