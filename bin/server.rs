// Country Integration - read-only JSON API over the integration store

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use country_integration::{
    IntegratedRow, IntegrationStore, IntegrationSummary, JoinEngine, PipelineConfig,
    PipelineError, Table,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "integration-server")]
#[command(about = "Serve the integrated country table as JSON")]
struct Args {
    #[arg(short, long, help = "Pipeline config (JSON)")]
    config: Option<PathBuf>,

    #[arg(long, help = "SQLite database path (overrides config)")]
    db: Option<PathBuf>,

    #[arg(long, default_value = "0.0.0.0:3000")]
    addr: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<Mutex<IntegrationStore>>,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        let body = Self {
            success: true,
            data: Some(data),
            error: None,
        };
        (StatusCode::OK, Json(body)).into_response()
    }

    fn err(status: StatusCode, message: String) -> Response {
        let body = Self {
            success: false,
            data: None,
            error: Some(message),
        };
        (status, Json(body)).into_response()
    }
}

/// Integrity failures are the store's fault, not the client's
fn failure<T: Serialize>(e: PipelineError) -> Response {
    error!(error = %e, "request failed");
    let status = if e.is_integrity_violation() {
        StatusCode::CONFLICT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    ApiResponse::<T>::err(status, e.to_string())
}

#[derive(Serialize)]
struct StatsResponse {
    summary: IntegrationSummary,
    tables: Vec<TableCount>,
    unresolved: usize,
}

#[derive(Serialize)]
struct TableCount {
    table: &'static str,
    rows: i64,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> Response {
    ApiResponse::ok("OK")
}

/// GET /api/integrated - Every integrated row, by iso2
async fn get_integrated(State(state): State<AppState>) -> Response {
    let store = match state.store.lock() {
        Ok(store) => store,
        Err(poisoned) => poisoned.into_inner(),
    };

    match JoinEngine::new(&store).integrate() {
        Ok(integration) => ApiResponse::ok(integration.rows),
        Err(e) => failure::<Vec<IntegratedRow>>(e),
    }
}

/// GET /api/integrated/:iso2 - One country
async fn get_integrated_row(State(state): State<AppState>, Path(iso2): Path<String>) -> Response {
    let store = match state.store.lock() {
        Ok(store) => store,
        Err(poisoned) => poisoned.into_inner(),
    };

    match JoinEngine::new(&store).integrated_row(&iso2) {
        Ok(Some(row)) => ApiResponse::ok(row),
        Ok(None) => ApiResponse::<IntegratedRow>::err(
            StatusCode::NOT_FOUND,
            format!("no country with iso2 '{}'", iso2),
        ),
        Err(e) => failure::<IntegratedRow>(e),
    }
}

/// GET /api/stats - Coverage and table sizes
async fn get_stats(State(state): State<AppState>) -> Response {
    let store = match state.store.lock() {
        Ok(store) => store,
        Err(poisoned) => poisoned.into_inner(),
    };

    let stats = (|| -> country_integration::Result<StatsResponse> {
        let integration = JoinEngine::new(&store).integrate()?;
        let tables = store
            .table_counts()?
            .into_iter()
            .map(|(table, rows)| TableCount {
                table: table.name(),
                rows,
            })
            .collect();

        Ok(StatsResponse {
            summary: integration.summary,
            tables,
            unresolved: store.count(Table::Unresolved)? as usize,
        })
    })();

    match stats {
        Ok(stats) => ApiResponse::ok(stats),
        Err(e) => failure::<StatsResponse>(e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "integration_server=info,country_integration=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config = PipelineConfig::load(args.config.as_deref())?;
    if let Some(db) = args.db {
        config.db_path = db;
    }

    println!("🌐 Country Integration - API Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !config.db_path.exists() {
        eprintln!("❌ Database not found at {:?}", config.db_path);
        eprintln!("   Run: country-integration run");
        eprintln!("   to build the store first.");
        std::process::exit(1);
    }

    let store = IntegrationStore::open(&config.db_path)?;
    info!(db = %config.db_path.display(), "database opened");

    let state = AppState {
        store: Arc::new(Mutex::new(store)),
    };

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/integrated", get(get_integrated))
        .route("/integrated/:iso2", get(get_integrated_row))
        .route("/stats", get(get_stats))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&args.addr).await?;

    println!("\n🚀 Server running on http://{}", args.addr);
    println!("   API: http://{}/api/integrated", args.addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
