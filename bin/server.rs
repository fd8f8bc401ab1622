// Company Registry - Web Server
// JSON API over the listing and history views, with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use company_registry::views::{self, History, Listing};
use company_registry::{Config, LatestMode, SnapshotStore, DEFAULT_DATABASE_PATH};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Shared application state
#[derive(Clone)]
struct AppState {
    store: Arc<SnapshotStore>,
    default_mode: LatestMode,
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Response {
        (
            StatusCode::OK,
            Json(Self {
                success: true,
                data: Some(data),
                error: None,
            }),
        )
            .into_response()
    }
}

fn internal_error(context: &str, err: company_registry::Error) -> Response {
    error!("{context}: {err}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(format!("{context}: {err}")),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct ListingParams {
    mode: Option<LatestMode>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse {
        success: true,
        data: Some("OK"),
        error: None,
    })
}

/// GET /api/companies - Current listing
async fn get_companies(
    State(state): State<AppState>,
    Query(params): Query<ListingParams>,
) -> Response {
    let mode = params.mode.unwrap_or(state.default_mode);

    match views::listing(&state.store, mode) {
        Ok(listing) => ApiResponse::<Listing>::ok(listing),
        Err(e) => internal_error("Error getting companies", e),
    }
}

/// GET /api/companies/:cnpj/history - Every stored version of one company
///
/// The identifier may be formatted (`11.222.333%2F0001-44`) or canonical.
async fn get_company_history(
    State(state): State<AppState>,
    Path(cnpj): Path<String>,
) -> Response {
    match views::history(&state.store, &cnpj) {
        Ok(history) => ApiResponse::<History>::ok(history),
        Err(e) => internal_error("Error getting history", e),
    }
}

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/companies", get(get_companies))
        .route("/companies/:cnpj/history", get(get_company_history))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive()),
    )
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config {
        database_path: dotenv::var("REGISTRY_DATABASE")
            .unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string())
            .into(),
        latest_mode: match dotenv::var("REGISTRY_LATEST_MODE") {
            Ok(mode) => mode.parse().map_err(anyhow::Error::msg)?,
            Err(_) => LatestMode::default(),
        },
        ..Config::default()
    };

    if !config.database_path.exists() {
        anyhow::bail!(
            "database not found at {}; run `company-registry import` first",
            config.database_path.display()
        );
    }

    let store = SnapshotStore::open(&config.database_path)?;
    info!(path = %config.database_path.display(), "database opened");

    let app = router(AppState {
        store: Arc::new(store),
        default_mode: config.latest_mode,
    });

    let addr = dotenv::var("REGISTRY_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("server running on http://{addr}");
    info!("  API: http://{addr}/api/companies");

    axum::serve(listener, app).await?;

    Ok(())
}
