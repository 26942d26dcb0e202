// 🚦 Pipeline Runner - codes → countries → gdp → weather → integrate
//
// Stages run sequentially. Each one opens its own store handle, checks the
// store before fetching, writes its records and an audit event, then closes
// the handle. A failing stage halts the run.

use crate::db::{Event, IntegrationStore, Table};
use crate::error::{PipelineError, Result};
use crate::harmonize::{AliasTable, Harmonizer};
use crate::join::{export_csv, Integration, IntegrationSummary, JoinEngine};
use crate::sources::{CodeSource, CountrySource, GdpSource, SourceKind, WeatherSource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ACTOR: &str = "pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    CountryCodes,
    Countries,
    Gdp,
    Weather,
    Integrate,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::CountryCodes => "country_codes",
            Stage::Countries => "countries",
            Stage::Gdp => "gdp",
            Stage::Weather => "weather",
            Stage::Integrate => "integrate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StageStatus {
    Completed,
    /// Store already held the data
    Skipped,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: StageStatus,

    /// Rows written by this stage
    pub rows: usize,

    /// Did the raw payload differ from the last fetch? None when nothing was fetched
    pub changed: Option<bool>,
}

impl StageOutcome {
    fn skipped(stage: Stage) -> Self {
        StageOutcome {
            stage,
            status: StageStatus::Skipped,
            rows: 0,
            changed: None,
        }
    }

    fn completed(stage: Stage, rows: usize, changed: Option<bool>) -> Self {
        StageOutcome {
            stage,
            status: StageStatus::Completed,
            rows,
            changed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Fetch even when the store already holds the data
    pub refresh: bool,
    pub skip_weather: bool,
    pub export_path: Option<PathBuf>,
}

/// The external collaborators one run talks to
pub struct Sources<'s> {
    pub codes: &'s dyn CodeSource,
    pub countries: &'s dyn CountrySource,
    pub gdp: &'s dyn GdpSource,
    pub weather: Option<&'s dyn WeatherSource>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: String,
    pub stages: Vec<StageOutcome>,
    pub summary: IntegrationSummary,
}

impl RunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

pub struct PipelineRunner {
    db_path: PathBuf,
    aliases: AliasTable,
    run_id: String,
}

impl PipelineRunner {
    pub fn new(db_path: &Path, aliases: AliasTable) -> Self {
        PipelineRunner {
            db_path: db_path.to_path_buf(),
            aliases,
            run_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn open_store(&self) -> Result<IntegrationStore> {
        IntegrationStore::open(&self.db_path)
    }

    fn record_event(
        &self,
        store: &IntegrationStore,
        stage: Stage,
        event_type: &str,
        mut data: serde_json::Value,
    ) -> Result<()> {
        data["run_id"] = json!(self.run_id);
        let event = Event::new(event_type, "stage", stage.name(), data, ACTOR);
        store.insert_event(&event)
    }

    fn finish(&self, store: IntegrationStore, outcome: &StageOutcome) -> Result<()> {
        let event_type = match outcome.status {
            StageStatus::Completed => "stage_completed",
            StageStatus::Skipped => "stage_skipped",
            StageStatus::Disabled => "stage_disabled",
        };
        self.record_event(
            &store,
            outcome.stage,
            event_type,
            json!({ "rows": outcome.rows, "changed": outcome.changed }),
        )?;
        store.close()
    }

    /// Best effort: the stage error is what the caller sees
    fn record_failure(&self, stage: Stage, err: &PipelineError) {
        let logged = self.open_store().and_then(|store| {
            self.record_event(
                &store,
                stage,
                "stage_failed",
                json!({ "error": err.to_string() }),
            )
        });
        if let Err(e) = logged {
            warn!(stage = stage.name(), error = %e, "could not record stage failure");
        }
    }

    fn guarded<F>(&self, stage: Stage, f: F) -> Result<StageOutcome>
    where
        F: FnOnce() -> Result<StageOutcome>,
    {
        info!(stage = stage.name(), "stage start");
        match f() {
            Ok(outcome) => {
                info!(
                    stage = stage.name(),
                    status = ?outcome.status,
                    rows = outcome.rows,
                    "stage done"
                );
                Ok(outcome)
            }
            Err(err) => {
                warn!(stage = stage.name(), error = %err, "stage failed");
                self.record_failure(stage, &err);
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Stages
    // ------------------------------------------------------------------------

    pub fn load_country_codes(&self, source: &dyn CodeSource, refresh: bool) -> Result<StageOutcome> {
        self.guarded(Stage::CountryCodes, || {
            let store = self.open_store()?;
            if !refresh && store.exists(Table::CountryCodes)? {
                let outcome = StageOutcome::skipped(Stage::CountryCodes);
                self.finish(store, &outcome)?;
                return Ok(outcome);
            }

            let fetched = source.fetch_codes()?;
            if fetched.records.is_empty() {
                return Err(PipelineError::source_error(
                    SourceKind::CountryCodes.code(),
                    "no country codes",
                ));
            }
            let changed = store.record_fetch(SourceKind::CountryCodes.code(), &fetched.raw)?;
            let rows = store.replace_all(&fetched.records)?;

            let outcome = StageOutcome::completed(Stage::CountryCodes, rows, Some(changed));
            self.finish(store, &outcome)?;
            Ok(outcome)
        })
    }

    pub fn load_countries(&self, source: &dyn CountrySource, refresh: bool) -> Result<StageOutcome> {
        self.guarded(Stage::Countries, || {
            let store = self.open_store()?;
            if !refresh && store.exists(Table::Countries)? {
                let outcome = StageOutcome::skipped(Stage::Countries);
                self.finish(store, &outcome)?;
                return Ok(outcome);
            }

            let codes = store.load_country_codes()?;
            let fetched = source.fetch_countries()?;
            let changed = store.record_fetch(SourceKind::CountryTable.code(), &fetched.raw)?;

            let harmonizer = Harmonizer::new(&codes, self.aliases.clone());
            let report = harmonizer.harmonize_all(fetched.records);
            info!("{}", report.summary());

            // The page is the whole truth: countries it no longer lists are dropped
            let resolved: Vec<_> = report.resolved().cloned().collect();
            let rows = store.replace_all(&resolved)?;
            store.record_unresolved(&report.unresolved)?;

            let outcome = StageOutcome::completed(Stage::Countries, rows, Some(changed));
            self.record_event(
                &store,
                Stage::Countries,
                "harmonized",
                json!({
                    "matched_by_iso3": report.matched_by_iso3,
                    "matched_by_name": report.matched_by_name,
                    "unresolved": report.unresolved.iter().map(|u| u.raw_name.as_str()).collect::<Vec<_>>(),
                }),
            )?;
            self.finish(store, &outcome)?;
            Ok(outcome)
        })
    }

    pub fn load_gdp(&self, source: &dyn GdpSource, refresh: bool) -> Result<StageOutcome> {
        self.guarded(Stage::Gdp, || {
            let store = self.open_store()?;
            if !refresh && store.exists(Table::Gdp)? {
                let outcome = StageOutcome::skipped(Stage::Gdp);
                self.finish(store, &outcome)?;
                return Ok(outcome);
            }

            let codes = store.load_country_codes()?;
            let fetched = source.fetch_gdp(&codes)?;
            let changed = store.record_fetch(SourceKind::Gdp.code(), &fetched.raw)?;
            let rows = store.replace_all(&fetched.records)?;

            let outcome = StageOutcome::completed(Stage::Gdp, rows, Some(changed));
            self.finish(store, &outcome)?;
            Ok(outcome)
        })
    }

    /// One request per stored country lacking weather (every country on refresh)
    pub fn load_weather(&self, source: Option<&dyn WeatherSource>, refresh: bool) -> Result<StageOutcome> {
        self.guarded(Stage::Weather, || {
            let store = self.open_store()?;
            let Some(source) = source else {
                let outcome = StageOutcome {
                    status: StageStatus::Disabled,
                    ..StageOutcome::skipped(Stage::Weather)
                };
                self.finish(store, &outcome)?;
                return Ok(outcome);
            };

            let mut fetched = 0;
            let mut present = 0;
            let mut no_capital = 0;
            let mut not_found = 0;

            for country in store.countries()? {
                let Some(iso2) = country.iso2.as_deref() else {
                    continue;
                };
                if !refresh && store.exists_key(Table::Weather, iso2)? {
                    present += 1;
                    continue;
                }
                let Some(capital) = country.capital_name() else {
                    warn!(%iso2, name = %country.raw_name, "no capital, skipping weather");
                    no_capital += 1;
                    continue;
                };

                match source.fetch_weather(iso2, capital)? {
                    Some(record) => {
                        fetched += store.upsert(&[record])?.written;
                    }
                    None => not_found += 1,
                }
            }

            let outcome = if fetched == 0 && not_found == 0 && no_capital == 0 && present > 0 {
                StageOutcome::skipped(Stage::Weather)
            } else {
                StageOutcome::completed(Stage::Weather, fetched, None)
            };
            self.record_event(
                &store,
                Stage::Weather,
                "weather_scan",
                json!({
                    "fetched": fetched,
                    "already_present": present,
                    "no_capital": no_capital,
                    "not_found": not_found,
                }),
            )?;
            self.finish(store, &outcome)?;
            Ok(outcome)
        })
    }

    /// Join, then export when a path is given
    pub fn integrate(&self, export_path: Option<&Path>) -> Result<Integration> {
        let mut integration = None;
        self.guarded(Stage::Integrate, || {
            let store = self.open_store()?;
            let result = JoinEngine::new(&store).integrate()?;
            if let Some(path) = export_path {
                export_csv(&result.rows, path)?;
            }

            let outcome = StageOutcome::completed(Stage::Integrate, result.rows.len(), None);
            self.record_event(
                &store,
                Stage::Integrate,
                "integrated",
                serde_json::to_value(&result.summary)?,
            )?;
            self.finish(store, &outcome)?;
            integration = Some(result);
            Ok(outcome)
        })?;

        integration.ok_or_else(|| {
            PipelineError::source_error(Stage::Integrate.name(), "integration produced no result")
        })
    }

    /// All stages in order; stops at the first failure
    pub fn run(&self, sources: &Sources<'_>, options: &RunOptions) -> Result<RunReport> {
        info!(run_id = %self.run_id, db = %self.db_path.display(), "pipeline run");

        let weather = if options.skip_weather { None } else { sources.weather };

        let stages = vec![
            self.load_country_codes(sources.codes, options.refresh)?,
            self.load_countries(sources.countries, options.refresh)?,
            self.load_gdp(sources.gdp, options.refresh)?,
            self.load_weather(weather, options.refresh)?,
        ];

        let integration = self.integrate(options.export_path.as_deref())?;

        Ok(RunReport {
            run_id: self.run_id.clone(),
            stages,
            summary: integration.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{CountryCode, CountryCodeMap, CountryRecord, GdpRecord};
    use crate::sources::Fetched;

    struct Codes;
    impl CodeSource for Codes {
        fn fetch_codes(&self) -> Result<Fetched<CountryCode>> {
            Ok(Fetched::new(
                vec![
                    CountryCode::new("USA", "US", "United States"),
                    CountryCode::new("FRA", "FR", "France"),
                ],
                b"codes".to_vec(),
            ))
        }
    }

    struct Countries;
    impl CountrySource for Countries {
        fn fetch_countries(&self) -> Result<Fetched<CountryRecord>> {
            Ok(Fetched::new(
                vec![
                    CountryRecord::new("United States of America").with_capital("Washington"),
                    CountryRecord::new("France").with_capital("Paris"),
                    CountryRecord::new("Atlantis"),
                ],
                b"<table/>".to_vec(),
            ))
        }
    }

    struct Gdp;
    impl GdpSource for Gdp {
        fn fetch_gdp(&self, codes: &CountryCodeMap) -> Result<Fetched<GdpRecord>> {
            assert!(codes.contains_iso3("USA"));
            Ok(Fetched::new(
                vec![GdpRecord::new("USA", 2020, Some(2.0e13))],
                b"gdp".to_vec(),
            ))
        }
    }

    #[test]
    fn test_run_without_weather() {
        let dir = tempfile::tempdir().unwrap();
        let runner = PipelineRunner::new(&dir.path().join("t.db"), AliasTable::with_defaults());
        let sources = Sources {
            codes: &Codes,
            countries: &Countries,
            gdp: &Gdp,
            weather: None,
        };

        let report = runner.run(&sources, &RunOptions::default()).unwrap();

        assert_eq!(report.stage(Stage::Countries).unwrap().rows, 2);
        assert_eq!(report.stage(Stage::Weather).unwrap().status, StageStatus::Disabled);
        assert_eq!(report.summary.rows, 2);
        assert_eq!(report.summary.with_gdp, 1);

        let store = IntegrationStore::open(&dir.path().join("t.db")).unwrap();
        assert_eq!(store.unresolved().unwrap().len(), 1);
        assert!(!store.events_for_entity("stage", "countries").unwrap().is_empty());
    }

    #[test]
    fn test_failed_stage_is_recorded() {
        struct Broken;
        impl GdpSource for Broken {
            fn fetch_gdp(&self, _codes: &CountryCodeMap) -> Result<Fetched<GdpRecord>> {
                Err(PipelineError::source_error("gdp", "upstream down"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("t.db");
        let runner = PipelineRunner::new(&db, AliasTable::with_defaults());
        let sources = Sources {
            codes: &Codes,
            countries: &Countries,
            gdp: &Broken,
            weather: None,
        };

        assert!(runner.run(&sources, &RunOptions::default()).is_err());

        let store = IntegrationStore::open(&db).unwrap();
        let events = store.events_for_entity("stage", "gdp").unwrap();
        assert_eq!(events[0].event_type, "stage_failed");
        assert!(!store.exists(Table::Gdp).unwrap());
    }
}
