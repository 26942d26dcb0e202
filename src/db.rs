// 🗄️ Integration Store - SQLite persistence for the harmonized datasets
//
// Layout:
//   countries             PK iso2
//   weather               PK iso2 (last-write-wins by retrieved_at)
//   gdp                   PK (iso3, year)
//   country_codes         PK iso3, iso2 UNIQUE
//   unresolved_countries  PK raw_name
//   events                audit trail, one row per stage outcome
//   fetch_log             PK source, sha256 of the last raw payload
//   integrated            VIEW, see join.rs

use crate::entities::gdp::{GDP_MAX_YEAR, GDP_MIN_YEAR};
use crate::entities::weather::{format_timestamp, parse_timestamp};
use crate::entities::{CountryCode, CountryCodeMap, CountryRecord, GdpRecord, WeatherRecord};
use crate::error::{PipelineError, Result};
use crate::harmonize::{UnresolvedIdentity, UnresolvedReason};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row, Statement};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::debug;

// ============================================================================
// TABLES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Countries,
    Weather,
    Gdp,
    CountryCodes,
    Unresolved,
    Events,
    FetchLog,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Countries => "countries",
            Table::Weather => "weather",
            Table::Gdp => "gdp",
            Table::CountryCodes => "country_codes",
            Table::Unresolved => "unresolved_countries",
            Table::Events => "events",
            Table::FetchLog => "fetch_log",
        }
    }

    /// Primary key columns, leading column first
    pub fn key_columns(&self) -> &'static [&'static str] {
        match self {
            Table::Countries | Table::Weather => &["iso2"],
            Table::Gdp => &["iso3", "year"],
            Table::CountryCodes => &["iso3"],
            Table::Unresolved => &["raw_name"],
            Table::Events => &["event_id"],
            Table::FetchLog => &["source"],
        }
    }

    pub fn all() -> [Table; 7] {
        [
            Table::Countries,
            Table::Weather,
            Table::Gdp,
            Table::CountryCodes,
            Table::Unresolved,
            Table::Events,
            Table::FetchLog,
        ]
    }
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS country_codes (
    iso3 TEXT PRIMARY KEY NOT NULL,
    iso2 TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS countries (
    iso2 TEXT PRIMARY KEY NOT NULL,
    iso3 TEXT,
    raw_name TEXT NOT NULL,
    capital TEXT,
    population INTEGER,
    area REAL
);

CREATE TABLE IF NOT EXISTS weather (
    iso2 TEXT PRIMARY KEY NOT NULL,
    capital TEXT NOT NULL,
    temperature REAL NOT NULL,
    humidity REAL NOT NULL,
    retrieved_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS gdp (
    iso3 TEXT NOT NULL,
    year INTEGER NOT NULL,
    gdp_current_usd REAL,
    PRIMARY KEY (iso3, year)
);

CREATE TABLE IF NOT EXISTS unresolved_countries (
    raw_name TEXT PRIMARY KEY NOT NULL,
    iso3 TEXT,
    reason TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS events (
    event_id TEXT PRIMARY KEY NOT NULL,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    data TEXT NOT NULL,
    actor TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fetch_log (
    source TEXT PRIMARY KEY NOT NULL,
    content_sha256 TEXT NOT NULL,
    byte_len INTEGER NOT NULL,
    fetched_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
";

/// Every output column carries an explicit, unique alias
fn integrated_view_sql() -> String {
    format!(
        "DROP VIEW IF EXISTS integrated;
CREATE VIEW integrated AS
WITH gdp_mean AS (
    SELECT g.iso3 AS gdp_iso3,
           AVG(g.gdp_current_usd) AS gdp_mean_usd,
           COUNT(g.gdp_current_usd) AS gdp_years
    FROM gdp AS g
    WHERE g.year BETWEEN {min} AND {max}
    GROUP BY g.iso3
)
SELECT c.iso2 AS country_iso2,
       cc.iso3 AS code_iso3,
       cc.name AS code_name,
       c.raw_name AS country_raw_name,
       c.capital AS country_capital,
       c.population AS country_population,
       c.area AS country_area,
       w.temperature AS weather_temperature,
       w.humidity AS weather_humidity,
       w.retrieved_at AS weather_retrieved_at,
       gm.gdp_mean_usd AS gdp_mean_usd,
       COALESCE(gm.gdp_years, 0) AS gdp_years
FROM countries AS c
LEFT JOIN weather AS w ON w.iso2 = c.iso2
LEFT JOIN country_codes AS cc ON cc.iso2 = c.iso2
LEFT JOIN gdp_mean AS gm ON gm.gdp_iso3 = cc.iso3;",
        min = GDP_MIN_YEAR,
        max = GDP_MAX_YEAR
    )
}

// ============================================================================
// TYPED MAPPING LAYER
// ============================================================================

/// A record with a home table and a declared primary key
pub trait StoreRecord {
    const TABLE: Table;

    /// Plain insert; a duplicate key is a constraint violation
    const INSERT_SQL: &'static str;

    /// Insert-or-replace on the primary key
    const UPSERT_SQL: &'static str;

    /// Human-readable primary key (for error messages)
    fn key(&self) -> String;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Value of a UNIQUE column outside the primary key
    fn unique_value(&self, _column: &str) -> Option<String> {
        None
    }

    /// Execute the prepared statement with this record's values
    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize>;
}

fn invalid(table: Table, message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidRecord {
        table: table.name().to_string(),
        message: message.into(),
    }
}

impl StoreRecord for CountryRecord {
    const TABLE: Table = Table::Countries;
    const INSERT_SQL: &'static str = "INSERT INTO countries (iso2, iso3, raw_name, capital, population, area)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
    const UPSERT_SQL: &'static str = "INSERT INTO countries (iso2, iso3, raw_name, capital, population, area)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(iso2) DO UPDATE SET
             iso3 = excluded.iso3,
             raw_name = excluded.raw_name,
             capital = excluded.capital,
             population = excluded.population,
             area = excluded.area";

    fn key(&self) -> String {
        self.iso2.clone().unwrap_or_else(|| self.raw_name.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.raw_name.trim().is_empty() {
            return Err(invalid(Self::TABLE, "raw_name is empty"));
        }
        if self.iso2.is_none() {
            return Err(invalid(
                Self::TABLE,
                format!("'{}' has no iso2, harmonize before storing", self.raw_name),
            ));
        }
        Ok(())
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.iso2,
            self.iso3,
            self.raw_name,
            self.capital,
            self.population,
            self.area,
        ])
    }
}

impl StoreRecord for WeatherRecord {
    const TABLE: Table = Table::Weather;
    const INSERT_SQL: &'static str = "INSERT INTO weather (iso2, capital, temperature, humidity, retrieved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)";
    // Stale rows lose: the stored row is replaced only by one at least as recent
    const UPSERT_SQL: &'static str = "INSERT INTO weather (iso2, capital, temperature, humidity, retrieved_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(iso2) DO UPDATE SET
             capital = excluded.capital,
             temperature = excluded.temperature,
             humidity = excluded.humidity,
             retrieved_at = excluded.retrieved_at
         WHERE excluded.retrieved_at >= weather.retrieved_at";

    fn key(&self) -> String {
        self.iso2.clone()
    }

    fn validate(&self) -> Result<()> {
        if self.iso2.trim().len() != 2 {
            return Err(invalid(Self::TABLE, format!("bad iso2 '{}'", self.iso2)));
        }
        if !self.temperature.is_finite() || !self.humidity.is_finite() {
            return Err(invalid(
                Self::TABLE,
                format!("non-finite reading for {}", self.iso2),
            ));
        }
        Ok(())
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.iso2,
            self.capital,
            self.temperature,
            self.humidity,
            self.retrieved_at_key(),
        ])
    }
}

impl StoreRecord for GdpRecord {
    const TABLE: Table = Table::Gdp;
    const INSERT_SQL: &'static str =
        "INSERT INTO gdp (iso3, year, gdp_current_usd) VALUES (?1, ?2, ?3)";
    const UPSERT_SQL: &'static str = "INSERT INTO gdp (iso3, year, gdp_current_usd) VALUES (?1, ?2, ?3)
         ON CONFLICT(iso3, year) DO UPDATE SET gdp_current_usd = excluded.gdp_current_usd";

    fn key(&self) -> String {
        format!("({}, {})", self.iso3, self.year)
    }

    fn validate(&self) -> Result<()> {
        if self.iso3.trim().is_empty() {
            return Err(invalid(Self::TABLE, "iso3 is empty"));
        }
        Ok(())
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.iso3, self.year, self.gdp_current_usd])
    }
}

impl StoreRecord for CountryCode {
    const TABLE: Table = Table::CountryCodes;
    const INSERT_SQL: &'static str =
        "INSERT INTO country_codes (iso3, iso2, name) VALUES (?1, ?2, ?3)";
    const UPSERT_SQL: &'static str = "INSERT INTO country_codes (iso3, iso2, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(iso3) DO UPDATE SET iso2 = excluded.iso2, name = excluded.name";

    fn key(&self) -> String {
        self.iso3.clone()
    }

    fn unique_value(&self, column: &str) -> Option<String> {
        match column {
            "iso2" => Some(self.iso2.clone()),
            _ => None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.is_well_formed() {
            return Err(invalid(
                Self::TABLE,
                format!("malformed code {}/{}", self.iso3, self.iso2),
            ));
        }
        Ok(())
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![self.iso3, self.iso2, self.name])
    }
}

impl StoreRecord for UnresolvedIdentity {
    const TABLE: Table = Table::Unresolved;
    const INSERT_SQL: &'static str = "INSERT INTO unresolved_countries (raw_name, iso3, reason, recorded_at)
         VALUES (?1, ?2, ?3, ?4)";
    const UPSERT_SQL: &'static str = "INSERT INTO unresolved_countries (raw_name, iso3, reason, recorded_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(raw_name) DO UPDATE SET
             iso3 = excluded.iso3,
             reason = excluded.reason,
             recorded_at = excluded.recorded_at";

    fn key(&self) -> String {
        self.raw_name.clone()
    }

    fn bind(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.raw_name,
            self.iso3,
            self.reason.as_str(),
            format_timestamp(&Utc::now()),
        ])
    }
}

/// Columns named by "UNIQUE constraint failed: gdp.iso3, gdp.year"
fn failed_columns(message: &str) -> Vec<&str> {
    message
        .split_once("failed: ")
        .map(|(_, cols)| {
            cols.split(", ")
                .map(|col| col.rsplit_once('.').map_or(col, |(_, name)| name).trim())
                .collect()
        })
        .unwrap_or_default()
}

/// Classify a failed statement for `row`: key clashes are integrity errors,
/// other constraint failures (NOT NULL, CHECK) reject the record
fn bind_error<R: StoreRecord>(row: &R, err: rusqlite::Error) -> PipelineError {
    let constraint = match &err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Some((
                failure.extended_code,
                message.clone().unwrap_or_else(|| failure.to_string()),
            ))
        }
        _ => None,
    };
    let Some((extended_code, message)) = constraint else {
        return err.into();
    };

    match extended_code {
        ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE => {
            let mut columns = failed_columns(&message);
            if columns.is_empty() {
                columns = R::TABLE.key_columns().to_vec();
            }
            let column = columns.join(", ");
            let key = if columns.as_slice() == R::TABLE.key_columns() {
                row.key()
            } else {
                row.unique_value(&column).unwrap_or_else(|| row.key())
            };
            PipelineError::Integrity {
                table: R::TABLE.name().to_string(),
                column,
                key,
            }
        }
        _ => invalid(R::TABLE, format!("{}: {}", row.key(), message)),
    }
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for audit trail ("every stage outcome is an event")
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

/// Content hash of the last payload fetched from a source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub source: String,
    pub content_sha256: String,
    pub byte_len: i64,
    pub fetched_at: DateTime<Utc>,
}

impl FetchRecord {
    pub fn for_content(source: &str, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        FetchRecord {
            source: source.to_string(),
            content_sha256: format!("{:x}", hasher.finalize()),
            byte_len: content.len() as i64,
            fetched_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertSummary {
    pub table: Table,
    pub received: usize,
    /// Rows inserted or replaced (stale weather rows are not written)
    pub written: usize,
}

// ============================================================================
// STORE
// ============================================================================

/// Handle to the integration database
///
/// Open one per stage; the connection closes when the handle is dropped
/// or `close()` is called.
pub struct IntegrationStore {
    conn: Connection,
}

impl IntegrationStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Enable WAL mode for crash recovery
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&integrated_view_sql())?;
        Ok(IntegrationStore { conn })
    }

    /// Close explicitly, surfacing any error sqlite reports on close
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| PipelineError::from(e))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Insert new rows, replace rows whose primary key already exists
    pub fn upsert<R: StoreRecord>(&self, rows: &[R]) -> Result<UpsertSummary> {
        for row in rows {
            row.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(R::UPSERT_SQL)?;
            for row in rows {
                written += row.bind(&mut stmt).map_err(|e| bind_error(row, e))?;
            }
        }
        tx.commit()?;

        debug!(
            table = R::TABLE.name(),
            received = rows.len(),
            written,
            "upsert"
        );

        Ok(UpsertSummary {
            table: R::TABLE,
            received: rows.len(),
            written,
        })
    }

    /// Plain insert; the whole batch is rolled back on a duplicate key
    pub fn insert<R: StoreRecord>(&self, rows: &[R]) -> Result<usize> {
        for row in rows {
            row.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(R::INSERT_SQL)?;
            for row in rows {
                inserted += row.bind(&mut stmt).map_err(|e| bind_error(row, e))?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    /// Make `rows` the whole content of the record's table, in one transaction.
    /// A key repeated within `rows` keeps its last occurrence.
    pub fn replace_all<R: StoreRecord>(&self, rows: &[R]) -> Result<usize> {
        for row in rows {
            row.validate()?;
        }

        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(&format!("DELETE FROM {}", R::TABLE.name()), [])?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(R::UPSERT_SQL)?;
            for row in rows {
                written += row.bind(&mut stmt).map_err(|e| bind_error(row, e))?;
            }
        }
        tx.commit()?;

        debug!(table = R::TABLE.name(), removed, written, "replace");
        Ok(written)
    }

    /// Does the table hold any data?
    pub fn exists(&self, table: Table) -> Result<bool> {
        let sql = format!("SELECT EXISTS(SELECT 1 FROM {} LIMIT 1)", table.name());
        let present: bool = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(present)
    }

    /// Is there a row whose leading key column equals `key`?
    pub fn exists_key(&self, table: Table, key: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1)",
            table.name(),
            table.key_columns()[0]
        );
        let present: bool = self.conn.query_row(&sql, [key], |row| row.get(0))?;
        Ok(present)
    }

    pub fn count(&self, table: Table) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn table_counts(&self) -> Result<Vec<(Table, i64)>> {
        Table::all()
            .into_iter()
            .map(|table| Ok((table, self.count(table)?)))
            .collect()
    }

    // ------------------------------------------------------------------------
    // Typed reads
    // ------------------------------------------------------------------------

    pub fn load_country_codes(&self) -> Result<CountryCodeMap> {
        let mut stmt = self
            .conn
            .prepare("SELECT iso3, iso2, name FROM country_codes ORDER BY iso3")?;

        let codes = stmt
            .query_map([], |row| {
                Ok(CountryCode {
                    iso3: row.get(0)?,
                    iso2: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(CountryCodeMap::from_codes(codes))
    }

    pub fn countries(&self) -> Result<Vec<CountryRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_name, iso2, iso3, capital, population, area
             FROM countries
             ORDER BY iso2",
        )?;

        let countries = stmt
            .query_map([], |row| {
                Ok(CountryRecord {
                    raw_name: row.get(0)?,
                    iso2: row.get(1)?,
                    iso3: row.get(2)?,
                    capital: row.get(3)?,
                    population: row.get(4)?,
                    area: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(countries)
    }

    pub fn weather(&self) -> Result<Vec<WeatherRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT iso2, capital, temperature, humidity, retrieved_at
             FROM weather
             ORDER BY iso2",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(WeatherRecord {
                    iso2: row.get(0)?,
                    capital: row.get(1)?,
                    temperature: row.get(2)?,
                    humidity: row.get(3)?,
                    retrieved_at: timestamp_column(row, 4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn gdp_for(&self, iso3: &str) -> Result<Vec<GdpRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT iso3, year, gdp_current_usd FROM gdp WHERE iso3 = ?1 ORDER BY year",
        )?;

        let rows = stmt
            .query_map([iso3], |row| {
                Ok(GdpRecord {
                    iso3: row.get(0)?,
                    year: row.get(1)?,
                    gdp_current_usd: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn unresolved(&self) -> Result<Vec<UnresolvedIdentity>> {
        let mut stmt = self.conn.prepare(
            "SELECT raw_name, iso3, reason FROM unresolved_countries ORDER BY raw_name",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(raw_name, iso3, reason)| {
                let reason = UnresolvedReason::parse(&reason).ok_or_else(|| {
                    invalid(
                        Table::Unresolved,
                        format!("unknown reason '{}' for '{}'", reason, raw_name),
                    )
                })?;
                Ok(UnresolvedIdentity {
                    raw_name,
                    iso3,
                    reason,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------------
    // Audit trail and fetch log
    // ------------------------------------------------------------------------

    /// Replace the stored warnings with those of the latest harmonization
    pub fn record_unresolved(&self, warnings: &[UnresolvedIdentity]) -> Result<usize> {
        self.replace_all(warnings)
    }

    pub fn insert_event(&self, event: &Event) -> Result<()> {
        let data_json = serde_json::to_string(&event.data)?;

        self.conn.execute(
            "INSERT INTO events (
                event_id, timestamp, event_type, entity_type, entity_id, data, actor
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.event_id,
                format_timestamp(&event.timestamp),
                event.event_type,
                event.entity_type,
                event.entity_id,
                data_json,
                event.actor,
            ],
        )?;

        Ok(())
    }

    /// Events for one entity, newest first
    pub fn events_for_entity(&self, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
             FROM events
             WHERE entity_type = ?1 AND entity_id = ?2
             ORDER BY timestamp DESC",
        )?;

        let rows = stmt
            .query_map(params![entity_type, entity_id], |row| {
                let data_json: String = row.get(5)?;
                Ok((
                    row.get::<_, String>(0)?,
                    timestamp_column(row, 1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    data_json,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| {
                    Ok(Event {
                        event_id,
                        timestamp,
                        event_type,
                        entity_type,
                        entity_id,
                        data: serde_json::from_str(&data)?,
                        actor,
                    })
                },
            )
            .collect()
    }

    /// Hash and log a raw payload; returns true when it differs from the last one
    pub fn record_fetch(&self, source: &str, content: &[u8]) -> Result<bool> {
        let record = FetchRecord::for_content(source, content);
        let changed = self
            .last_fetch(source)?
            .map(|previous| previous.content_sha256 != record.content_sha256)
            .unwrap_or(true);

        self.conn.execute(
            "INSERT INTO fetch_log (source, content_sha256, byte_len, fetched_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source) DO UPDATE SET
                 content_sha256 = excluded.content_sha256,
                 byte_len = excluded.byte_len,
                 fetched_at = excluded.fetched_at",
            params![
                record.source,
                record.content_sha256,
                record.byte_len,
                format_timestamp(&record.fetched_at),
            ],
        )?;

        Ok(changed)
    }

    pub fn last_fetch(&self, source: &str) -> Result<Option<FetchRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT source, content_sha256, byte_len, fetched_at FROM fetch_log WHERE source = ?1",
                [source],
                |row| {
                    let fetched_at: String = row.get(3)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        fetched_at,
                    ))
                },
            )
            .optional()?;

        Ok(row.and_then(|(source, content_sha256, byte_len, fetched_at)| {
            parse_timestamp(&fetched_at).map(|fetched_at| FetchRecord {
                source,
                content_sha256,
                byte_len,
                fetched_at,
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> IntegrationStore {
        IntegrationStore::open_in_memory().unwrap()
    }

    fn country(iso2: &str, name: &str) -> CountryRecord {
        let mut record = CountryRecord::new(name).with_capital("Capital");
        record.iso2 = Some(iso2.to_string());
        record
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let store = store();
        let countries = vec![country("US", "United States"), country("FR", "France")];
        let gdp = vec![
            GdpRecord::new("USA", 2020, Some(2.0e13)),
            GdpRecord::new("USA", 2021, Some(2.3e13)),
        ];

        store.upsert(&countries).unwrap();
        store.upsert(&gdp).unwrap();
        let first = store.table_counts().unwrap();

        store.upsert(&countries).unwrap();
        store.upsert(&gdp).unwrap();
        let second = store.table_counts().unwrap();

        assert_eq!(first, second);
        assert_eq!(store.count(Table::Countries).unwrap(), 2);
        assert_eq!(store.count(Table::Gdp).unwrap(), 2);
    }

    #[test]
    fn test_upsert_replaces_matching_key() {
        let store = store();
        store.upsert(&[country("US", "USA")]).unwrap();
        store.upsert(&[country("US", "United States")]).unwrap();

        let rows = store.countries().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].raw_name, "United States");
    }

    #[test]
    fn test_plain_insert_duplicate_is_integrity_error() {
        let store = store();
        store.insert(&[country("US", "United States")]).unwrap();

        let err = store.insert(&[country("US", "USA")]).unwrap_err();

        match err {
            PipelineError::Integrity { table, column, key } => {
                assert_eq!(table, "countries");
                assert_eq!(column, "iso2");
                assert_eq!(key, "US");
            }
            other => panic!("expected IntegrityError, got {other:?}"),
        }
        assert_eq!(store.count(Table::Countries).unwrap(), 1);
    }

    #[test]
    fn test_failed_insert_rolls_back_batch() {
        let store = store();
        let batch = vec![
            GdpRecord::new("USA", 2000, Some(1.0)),
            GdpRecord::new("USA", 2000, Some(2.0)),
        ];

        assert!(store.insert(&batch).is_err());
        assert_eq!(store.count(Table::Gdp).unwrap(), 0);
    }

    #[test]
    fn test_unharmonized_country_is_rejected() {
        let store = store();
        let err = store.upsert(&[CountryRecord::new("Atlantis")]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord { .. }));
    }

    #[test]
    fn test_weather_last_write_wins_by_timestamp() {
        let store = store();
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let jun = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let january = WeatherRecord::new("US", "Washington", 2.0, 40.0, jan);
        let june = WeatherRecord::new("US", "Washington", 28.0, 65.0, jun);

        // Newer row arrives first, the stale one must not overwrite it
        store.upsert(&[june.clone()]).unwrap();
        let summary = store.upsert(&[january]).unwrap();

        assert_eq!(summary.written, 0);
        let rows = store.weather().unwrap();
        assert_eq!(rows, vec![june]);
    }

    #[test]
    fn test_exists_and_exists_key() {
        let store = store();
        assert!(!store.exists(Table::Weather).unwrap());

        let now = Utc::now();
        store
            .upsert(&[WeatherRecord::new("FR", "Paris", 18.0, 70.0, now)])
            .unwrap();

        assert!(store.exists(Table::Weather).unwrap());
        assert!(store.exists_key(Table::Weather, "FR").unwrap());
        assert!(!store.exists_key(Table::Weather, "US").unwrap());
    }

    #[test]
    fn test_replace_all_country_codes() {
        let store = store();
        store
            .replace_all(&[CountryCode::new("USA", "US", "United States")])
            .unwrap();
        store
            .replace_all(&[
                CountryCode::new("FRA", "FR", "France"),
                CountryCode::new("DEU", "DE", "Germany"),
            ])
            .unwrap();

        let map = store.load_country_codes().unwrap();
        assert_eq!(map.len(), 2);
        assert!(!map.contains_iso3("USA"));
    }

    #[test]
    fn test_secondary_unique_clash_is_integrity_error() {
        let store = store();
        store
            .upsert(&[CountryCode::new("USA", "US", "United States")])
            .unwrap();

        let clash = CountryCode::new("XUS", "US", "Other States");
        for err in [
            store.upsert(&[clash.clone()]).unwrap_err(),
            store.insert(&[clash.clone()]).unwrap_err(),
        ] {
            match err {
                PipelineError::Integrity { table, column, key } => {
                    assert_eq!(table, "country_codes");
                    assert_eq!(column, "iso2");
                    assert_eq!(key, "US");
                }
                other => panic!("expected IntegrityError, got {other:?}"),
            }
        }
        assert_eq!(store.count(Table::CountryCodes).unwrap(), 1);
    }

    #[test]
    fn test_composite_key_clash_names_both_columns() {
        let store = store();
        let err = store
            .insert(&[
                GdpRecord::new("USA", 2000, Some(1.0)),
                GdpRecord::new("USA", 2000, Some(2.0)),
            ])
            .unwrap_err();

        match err {
            PipelineError::Integrity { column, key, .. } => {
                assert_eq!(column, "iso3, year");
                assert_eq!(key, "(USA, 2000)");
            }
            other => panic!("expected IntegrityError, got {other:?}"),
        }
    }

    #[test]
    fn test_not_null_failure_is_not_a_duplicate() {
        let store = store();
        let err = store
            .connection()
            .execute(
                "INSERT INTO countries (iso2, raw_name) VALUES ('US', NULL)",
                [],
            )
            .unwrap_err();

        let mapped = bind_error(&country("US", "United States"), err);
        assert!(matches!(mapped, PipelineError::InvalidRecord { ref table, .. } if table == "countries"));
    }

    #[test]
    fn test_replace_all_drops_missing_rows() {
        let store = store();
        store
            .replace_all(&[country("US", "United States"), country("FR", "France")])
            .unwrap();
        let written = store
            .replace_all(&[country("US", "USA"), country("US", "United States")])
            .unwrap();

        assert_eq!(written, 2);
        let rows = store.countries().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].raw_name, "United States");
    }

    #[test]
    fn test_unknown_reason_is_invalid_record() {
        let store = store();
        store
            .connection()
            .execute(
                "INSERT INTO unresolved_countries (raw_name, iso3, reason, recorded_at)
                 VALUES ('Atlantis', NULL, 'mystery', '2024-01-01T00:00:00.000Z')",
                [],
            )
            .unwrap();

        let err = store.unresolved().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidRecord { ref message, .. } if message.contains("mystery")));
    }

    #[test]
    fn test_unresolved_roundtrip() {
        let store = store();
        let warning = UnresolvedIdentity {
            raw_name: "Atlantis".to_string(),
            iso3: None,
            reason: UnresolvedReason::NoNameMatch,
        };

        store.record_unresolved(&[warning.clone()]).unwrap();
        store.record_unresolved(&[warning.clone()]).unwrap();

        assert_eq!(store.unresolved().unwrap(), vec![warning]);
    }

    #[test]
    fn test_event_log() {
        let store = store();

        let event = Event::new(
            "stage_completed",
            "stage",
            "countries",
            serde_json::json!({"rows": 3}),
            "pipeline",
        );
        store.insert_event(&event).unwrap();

        let events = store.events_for_entity("stage", "countries").unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "stage_completed");
        assert_eq!(events[0].data["rows"], 3);
    }

    #[test]
    fn test_record_fetch_detects_changes() {
        let store = store();

        assert!(store.record_fetch("countries", b"<table></table>").unwrap());
        assert!(!store.record_fetch("countries", b"<table></table>").unwrap());
        assert!(store.record_fetch("countries", b"<table><tr></tr></table>").unwrap());

        let last = store.last_fetch("countries").unwrap().unwrap();
        assert_eq!(last.content_sha256.len(), 64);
        assert_eq!(last.byte_len, 24);
    }

    #[test]
    fn test_close() {
        let store = store();
        store.upsert(&[country("US", "United States")]).unwrap();
        store.close().unwrap();
    }
}
