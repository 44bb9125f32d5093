use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use kabuscan_core::analysis::error::AnalysisErrorKind;
use kabuscan_core::analysis::http::HttpAnalysisClient;
use kabuscan_core::domain::stock::code_from_symbol;
use kabuscan_core::storage::companies::{self, Company};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = kabuscan_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let pool: Option<SqlitePool> = match settings.require_database_url() {
        Ok(db_url) => match kabuscan_core::storage::connect(db_url).await {
            Ok(pool) => match kabuscan_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                sentry_anyhow::capture_anyhow(&e);
                tracing::error!(error = %e, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "DATABASE_URL missing; catalog routes disabled");
            None
        }
    };

    let analysis = match HttpAnalysisClient::from_settings(&settings) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::warn!(error = %e, "analysis backend not configured; proxy route disabled");
            None
        }
    };

    let app = router(AppState { pool, analysis });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/companies", get(list_companies))
        .route("/companies/:symbol", get(get_company))
        .route("/analysis/:symbol", get(proxy_analysis))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Clone)]
struct AppState {
    pool: Option<SqlitePool>,
    analysis: Option<Arc<HttpAnalysisClient>>,
}

#[derive(Debug, Deserialize)]
struct CompaniesQuery {
    market: Option<String>,
}

async fn list_companies(
    State(state): State<AppState>,
    Query(q): Query<CompaniesQuery>,
) -> Result<Json<Vec<Company>>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let market = q.market.as_deref().map(str::trim).filter(|m| !m.is_empty());
    let rows = companies::list_companies(pool, market).await.map_err(|e| {
        sentry_anyhow::capture_anyhow(&e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok(Json(rows))
}

async fn get_company(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Company>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let code = code_from_symbol(symbol.trim());
    if code.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let company = companies::get_company(pool, code)
        .await
        .map_err(|e| {
            sentry_anyhow::capture_anyhow(&e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(company))
}

/// Forwards the backend envelope untouched, including `success=false` bodies.
async fn proxy_analysis(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let Some(client) = &state.analysis else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    client.fetch_envelope(symbol).await.map(Json).map_err(|e| {
        tracing::warn!(%symbol, kind = e.kind.as_str(), error = %e, "analysis proxy failed");
        match e.kind {
            AnalysisErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &kabuscan_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
