// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use country_integration::{
    AliasTable, CodeSource, CsvCodeSource, IntegrationStore, OpenWeatherClient, PipelineConfig,
    PipelineRunner, RunOptions, SourceKind, Sources, StageStatus, WeatherSource,
    WebTableExtractor, WorldBankClient,
};

#[derive(Parser)]
#[command(name = "country-integration")]
#[command(about = "Scrape, enrich and join country data into one SQLite store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Pipeline config (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "SQLite database path (overrides config)")]
    db: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every stage, skipping data the store already holds
    Run {
        #[arg(long, help = "Fetch again even when the store has data")]
        refresh: bool,

        #[arg(long, help = "Do not call the weather API")]
        skip_weather: bool,

        #[arg(short, long, help = "CSV export path (overrides config)")]
        output: Option<PathBuf>,
    },

    /// Join the stored tables and export CSV
    Integrate {
        #[arg(short, long, help = "CSV export path (overrides config)")]
        output: Option<PathBuf>,
    },

    /// Row counts and last fetch per source
    Status,

    /// Browse the integrated table and GDP chart
    View,
}

fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("country_integration={}", default_level)));

    match log_file {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create log file {:?}", path))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    match cli.command {
        Commands::Run {
            refresh,
            skip_weather,
            output,
        } => run_pipeline(&config, refresh, skip_weather, output),
        Commands::Integrate { output } => run_integrate(&config, output),
        Commands::Status => run_status(&config),
        Commands::View => run_ui_mode(&config),
    }
}

fn aliases(config: &PipelineConfig) -> AliasTable {
    let mut aliases = AliasTable::with_defaults();
    aliases.extend(config.aliases.iter());
    aliases
}

fn run_pipeline(
    config: &PipelineConfig,
    refresh: bool,
    skip_weather: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    println!("🌍 Country Integration Pipeline");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let timeout = config.http_timeout();

    let world_bank = WorldBankClient::new(timeout)?
        .with_base_url(&config.world_bank.base_url)
        .with_indicator(&config.world_bank.indicator)
        .with_per_page(config.world_bank.per_page);

    let csv_codes = config.country_codes_csv.as_deref().map(CsvCodeSource::new);
    let codes: &dyn CodeSource = match &csv_codes {
        Some(csv) => csv as &dyn CodeSource,
        None => &world_bank,
    };

    let countries =
        WebTableExtractor::new(&config.countries_source, config.table_class.clone(), timeout)?;

    let weather = if skip_weather {
        None
    } else {
        let api_key = config
            .weather_api_key()
            .context("Set OPENWEATHER_API_KEY or pass --skip-weather")?;
        Some(
            OpenWeatherClient::new(api_key.to_string(), timeout)?
                .with_base_url(&config.weather.base_url)
                .with_units(&config.weather.units)
                .with_request_interval(Duration::from_millis(config.weather.request_interval_ms)),
        )
    };

    let sources = Sources {
        codes,
        countries: &countries,
        gdp: &world_bank,
        weather: weather.as_ref().map(|w| w as &dyn WeatherSource),
    };

    let options = RunOptions {
        refresh,
        skip_weather,
        export_path: Some(output.unwrap_or_else(|| config.export_path.clone())),
    };

    let runner = PipelineRunner::new(&config.db_path, aliases(config));
    let report = runner
        .run(&sources, &options)
        .with_context(|| format!("Pipeline run {} failed", runner.run_id()))?;

    println!();
    for stage in &report.stages {
        let marker = match stage.status {
            StageStatus::Completed => "✓",
            StageStatus::Skipped => "↷",
            StageStatus::Disabled => "·",
        };
        println!(
            "{} {:<14} {:?} ({} rows)",
            marker,
            stage.stage.name(),
            stage.status,
            stage.rows
        );
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {} integrated rows", report.summary.rows);
    println!("   with weather: {}", report.summary.with_weather);
    println!("   with GDP:     {}", report.summary.with_gdp);
    if report.summary.orphan_weather > 0 {
        println!("   ⚠️  orphan weather rows: {}", report.summary.orphan_weather);
    }
    if let Some(path) = &options.export_path {
        println!("📄 Exported to {}", path.display());
    }

    Ok(())
}

fn run_integrate(config: &PipelineConfig, output: Option<PathBuf>) -> Result<()> {
    let path = output.unwrap_or_else(|| config.export_path.clone());
    let runner = PipelineRunner::new(&config.db_path, aliases(config));

    let integration = runner
        .integrate(Some(&path))
        .context("Integration failed")?;

    println!(
        "✅ {} rows ({} with weather, {} with GDP) → {}",
        integration.summary.rows,
        integration.summary.with_weather,
        integration.summary.with_gdp,
        path.display()
    );
    Ok(())
}

fn run_status(config: &PipelineConfig) -> Result<()> {
    if !config.db_path.exists() {
        eprintln!("❌ Database not found: {}", config.db_path.display());
        eprintln!("   Run: country-integration run");
        std::process::exit(1);
    }

    let store = IntegrationStore::open(&config.db_path)
        .with_context(|| format!("Failed to open {}", config.db_path.display()))?;

    println!("🗄️  {}", config.db_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for (table, count) in store.table_counts()? {
        println!("{:<22} {:>8}", table.name(), count);
    }

    println!("\n📥 Last fetch");
    for kind in [SourceKind::CountryCodes, SourceKind::CountryTable, SourceKind::Gdp] {
        match store.last_fetch(kind.code())? {
            Some(fetch) => println!(
                "{:<16} {}  {} bytes  sha256 {}",
                kind.name(),
                fetch.fetched_at.format("%Y-%m-%d %H:%M:%S"),
                fetch.byte_len,
                &fetch.content_sha256[..12]
            ),
            None => println!("{:<16} never", kind.name()),
        }
    }

    store.close()?;
    Ok(())
}

#[cfg(feature = "tui")]
fn run_ui_mode(config: &PipelineConfig) -> Result<()> {
    use country_integration::JoinEngine;

    if !config.db_path.exists() {
        eprintln!("❌ Database not found!");
        eprintln!("   Run: country-integration run");
        eprintln!("   to build the store first.");
        std::process::exit(1);
    }

    let store = IntegrationStore::open(&config.db_path)?;
    let integration = JoinEngine::new(&store)
        .integrate()
        .context("Integration failed")?;
    let unresolved = store.unresolved()?;
    store.close()?;

    let mut app = ui::App::new(integration.rows, unresolved, integration.summary);
    ui::run_ui(&mut app)?;

    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_config: &PipelineConfig) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the JSON API: cargo run --bin integration-server --features server");
    std::process::exit(1);
}
