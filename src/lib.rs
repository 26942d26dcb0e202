// Country Integration Pipeline - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod harmonize;
pub mod join;
pub mod pipeline;
pub mod sources;

// Re-export commonly used types
pub use config::{PipelineConfig, WeatherConfig, WorldBankConfig};
pub use db::{Event, FetchRecord, IntegrationStore, StoreRecord, Table, UpsertSummary};
pub use entities::{
    CountryCode, CountryCodeMap, CountryRecord, GdpRecord, WeatherRecord, GDP_MAX_YEAR,
    GDP_MIN_YEAR,
};
pub use error::{PipelineError, Result};
pub use harmonize::{
    normalize_country_name, AliasTable, HarmonizeReport, Harmonizer, MatchMethod,
    UnresolvedIdentity, UnresolvedReason,
};
pub use join::{export_csv, GdpMean, IntegratedRow, Integration, IntegrationSummary, JoinEngine};
pub use pipeline::{PipelineRunner, RunOptions, RunReport, Sources, Stage, StageOutcome, StageStatus};
pub use sources::{
    CodeSource, CountrySource, CsvCodeSource, Fetched, GdpSource, OpenWeatherClient, SourceKind,
    WeatherSource, WebTableExtractor, WorldBankClient,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
