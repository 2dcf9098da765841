// ANS Consolidator - API Server
// Read-only query service over the latest published run

use ans_consolidator::{AggregatedExpense, ExpenseStats, PipelineConfig};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use rusqlite::Connection;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::CorsLayer;

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

/// Pagination envelope around every list endpoint
#[derive(Serialize)]
struct Page<T> {
    data: Vec<T>,
    meta: PageMeta,
}

#[derive(Serialize)]
struct PageMeta {
    total: u32,
    page: u32,
    limit: u32,
    pages_total: u32,
}

impl<T> Page<T> {
    fn empty() -> Self {
        Self {
            data: vec![],
            meta: PageMeta {
                total: 0,
                page: 1,
                limit: 0,
                pages_total: 0,
            },
        }
    }
}

/// Query string for /api/operadoras
#[derive(Deserialize)]
struct ListParams {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
}

impl ListParams {
    /// 1-based page and limit clamped to 1..=100. The offset is computed
    /// in u64; a junk page number times the limit overflows 32 bits.
    fn window(&self) -> (u32, u32, u64) {
        let page = self.page.unwrap_or(1).max(1);
        let limit = self.limit.unwrap_or(10).clamp(1, 100);
        let offset = (page as u64 - 1) * limit as u64;
        (page, limit, offset)
    }
}

/// One aggregated operator row, keyed like the published CSV columns
#[derive(Serialize)]
struct OperatorRow {
    #[serde(rename = "RegistroANS")]
    registro_ans: String,
    #[serde(rename = "Razao_Social")]
    razao_social: String,
    #[serde(rename = "UF")]
    uf: String,
    #[serde(rename = "Total_Despesas")]
    total_despesas: f64,
    #[serde(rename = "Media_Trimestral")]
    media_trimestral: f64,
    #[serde(rename = "Desvio_Padrao")]
    desvio_padrao: f64,
}

impl From<AggregatedExpense> for OperatorRow {
    fn from(row: AggregatedExpense) -> Self {
        Self {
            registro_ans: row.registro_ans,
            razao_social: row.razao_social,
            uf: row.uf,
            total_despesas: row.total_despesas.to_f64().unwrap_or(0.0),
            media_trimestral: row.media_trimestral.to_f64().unwrap_or(0.0),
            desvio_padrao: row.desvio_padrao.to_f64().unwrap_or(0.0),
        }
    }
}

/// Stats response
#[derive(Serialize)]
struct StatsResponse {
    total_geral: f64,
    distribuicao_uf: BTreeMap<String, f64>,
}

impl From<ExpenseStats> for StatsResponse {
    fn from(stats: ExpenseStats) -> Self {
        let distribuicao_uf = stats
            .distribuicao_uf
            .into_iter()
            .map(|(uf, total)| (uf, total.to_f64().unwrap_or(0.0)))
            .collect();

        Self {
            total_geral: stats.total_geral.to_f64().unwrap_or(0.0),
            distribuicao_uf,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        service: "ans-consolidator",
        version: ans_consolidator::VERSION,
    })
}

/// GET /api/operadoras - Aggregated operators from the latest run
async fn list_operadoras(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let (page, limit, offset) = params.window();
    let search = params.search.as_deref().filter(|s| !s.trim().is_empty());

    let run_id = match ans_consolidator::latest_run_id(&conn) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(Page::<OperatorRow>::empty())).into_response();
        }
        Err(e) => {
            eprintln!("Error resolving latest run: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Page::<OperatorRow>::empty()),
            )
                .into_response();
        }
    };

    match ans_consolidator::query_aggregates(&conn, &run_id, search, limit, offset) {
        Ok((rows, total)) => {
            let data: Vec<OperatorRow> = rows.into_iter().map(|row| row.into()).collect();
            let pages_total = if total == 0 { 0 } else { (total + limit - 1) / limit };

            (
                StatusCode::OK,
                Json(Page {
                    data,
                    meta: PageMeta {
                        total,
                        page,
                        limit,
                        pages_total,
                    },
                }),
            )
                .into_response()
        }
        Err(e) => {
            eprintln!("Error querying aggregates: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(Page::<OperatorRow>::empty()),
            )
                .into_response()
        }
    }
}

/// GET /api/estatisticas - Totals and the per-state distribution
async fn estatisticas(State(state): State<AppState>) -> impl IntoResponse {
    let conn = state.db.lock().unwrap();

    let run_id = match ans_consolidator::latest_run_id(&conn) {
        Ok(Some(id)) => id,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(StatsResponse {
                    total_geral: 0.0,
                    distribuicao_uf: BTreeMap::new(),
                }),
            )
                .into_response();
        }
        Err(e) => {
            eprintln!("Error resolving latest run: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatsResponse {
                    total_geral: 0.0,
                    distribuicao_uf: BTreeMap::new(),
                }),
            )
                .into_response();
        }
    };

    match ans_consolidator::expense_stats(&conn, &run_id) {
        Ok(stats) => (StatusCode::OK, Json(StatsResponse::from(stats))).into_response(),
        Err(e) => {
            eprintln!("Error computing stats: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StatsResponse {
                    total_geral: 0.0,
                    distribuicao_uf: BTreeMap::new(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    env_logger::init();

    println!("🌐 ANS Consolidator - API Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    // Open database
    let args: Vec<String> = std::env::args().collect();
    let db_path = match args.iter().position(|a| a == "--db") {
        Some(i) => PathBuf::from(
            args.get(i + 1)
                .map(String::as_str)
                .expect("--db needs a file path"),
        ),
        None => PipelineConfig::default().db_path,
    };

    if !db_path.exists() {
        eprintln!("❌ Database not found at {:?}", db_path);
        eprintln!("   Run: cargo run -- run");
        eprintln!("   to publish a consolidation first.");
        std::process::exit(1);
    }

    let conn = Connection::open(&db_path).expect("Failed to open database");
    println!("✓ Database opened: {:?}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/operadoras", get(list_operadoras))
        .route("/estatisticas", get(estatisticas))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    // Start server
    let addr = "0.0.0.0:8000";
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    println!("\n🚀 Server running on http://localhost:8000");
    println!("   Operators: http://localhost:8000/api/operadoras");
    println!("   Stats:     http://localhost:8000/api/estatisticas");
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

// ============================================================================
// Tests
// ============================================================================
