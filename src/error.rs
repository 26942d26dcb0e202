use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Integrity error in table '{table}': duplicate {column} {key}")]
    Integrity {
        table: String,
        column: String,
        key: String,
    },

    #[error("Join key error: {table}.{column} = '{key}' is absent from country_codes")]
    JoinKey {
        table: String,
        column: String,
        key: String,
    },

    #[error("Range error: GDP year {year} for {iso3} is outside [{min}, {max}]")]
    Range {
        iso3: String,
        year: i32,
        min: i32,
        max: i32,
    },

    #[error("Column collision: output column '{0}' appears more than once")]
    ColumnCollision(String),

    #[error("Invalid record for table '{table}': {message}")]
    InvalidRecord { table: String, message: String },

    #[error("Source error ({source_name}): {message}")]
    Source {
        source_name: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn source_error(source_name: &str, message: impl Into<String>) -> Self {
        PipelineError::Source {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }

    /// True for the data-integrity failures that must halt a run
    pub fn is_integrity_violation(&self) -> bool {
        matches!(
            self,
            PipelineError::Integrity { .. }
                | PipelineError::JoinKey { .. }
                | PipelineError::Range { .. }
                | PipelineError::ColumnCollision(_)
        )
    }
}
