use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::{DEFAULT_CONCURRENCY, DEFAULT_HTTP_PORT},
    error::ScanError,
    scanner::Scanner,
    types::{ControlResponse, ScanMode},
};

#[derive(Clone)]
pub struct AppState {
    scanner: Scanner,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub start_ip: String,
    pub end_ip: String,
    #[serde(default)]
    pub scan_type: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub concurrent_limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PingRequest {
    pub ip: Ipv4Addr,
}

#[derive(Debug, Deserialize)]
pub struct PingBatchRequest {
    pub ips: Vec<Ipv4Addr>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

/// Control surface for the scan controller plus ad hoc ping checks.
pub fn router(scanner: Scanner) -> Router {
    let state = AppState { scanner };

    let api = Router::new()
        .route("/scan/start", post(post_start))
        .route("/scan/stop", post(post_stop))
        .route("/scan/status", get(get_status))
        .route("/ping", post(post_ping))
        .route("/ping/batch", post(post_ping_batch))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, scanner: Scanner) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("control API listening on http://{}", bind);
    axum::serve(listener, router(scanner)).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(app.scanner.status().await))
}

async fn post_start(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let mode = match req.scan_type.as_deref().map(str::parse::<ScanMode>) {
        None => ScanMode::All,
        Some(Ok(m)) => m,
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, Json(ControlResponse::rejected(e))).into_response()
        }
    };
    let port = req.port.unwrap_or(DEFAULT_HTTP_PORT);
    let concurrency = req.concurrent_limit.unwrap_or(DEFAULT_CONCURRENCY);

    match app
        .scanner
        .try_start(&req.start_ip, &req.end_ip, mode, port, concurrency)
        .await
    {
        Ok(_) => (StatusCode::ACCEPTED, Json(ControlResponse::accepted("Scan started"))).into_response(),
        Err(e) => (rejection_status(&e), Json(ControlResponse::rejected(e.to_string()))).into_response(),
    }
}

async fn post_stop(State(app): State<AppState>) -> impl IntoResponse {
    match app.scanner.try_stop().await {
        Ok(()) => (StatusCode::ACCEPTED, Json(ControlResponse::accepted("Stopping scan"))),
        Err(e) => (rejection_status(&e), Json(ControlResponse::rejected(e.to_string()))),
    }
}

async fn post_ping(State(app): State<AppState>, Json(req): Json<PingRequest>) -> impl IntoResponse {
    Json(app.scanner.ping_probe().probe(req.ip).await)
}

async fn post_ping_batch(
    State(app): State<AppState>,
    Json(req): Json<PingBatchRequest>,
) -> impl IntoResponse {
    let max = req.max_concurrent.unwrap_or(10);
    Json(app.scanner.ping_probe().probe_many(&req.ips, max).await)
}

fn rejection_status(e: &ScanError) -> StatusCode {
    match e {
        ScanError::InvalidRange(_) => StatusCode::BAD_REQUEST,
        ScanError::AlreadyRunning | ScanError::NoActiveJob => StatusCode::CONFLICT,
        ScanError::ProbeFailure { .. } | ScanError::HttpClient(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
