use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    error::ScanError,
    ports::{self, DEFAULT_PORT_SPEC},
    report::{open_results, round_secs},
    scanner::{self, Prober, TcpProber},
    types::ScanResult,
};

#[derive(Debug, Deserialize)]
pub struct ScanPayload {
    #[serde(default)]
    pub target: String,
    #[serde(default = "default_ports")]
    pub ports: String,
    #[serde(default = "default_timeout", deserialize_with = "lenient_f64")]
    pub timeout: f64,
    #[serde(default = "default_workers", deserialize_with = "lenient_i64")]
    pub workers: i64,
}

/// Numeric fields may arrive as JSON numbers or as numeric strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

fn lenient_f64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<f64, D::Error> {
    match Numeric::deserialize(d)? {
        Numeric::Number(n) => Ok(n),
        Numeric::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected a number, got {s:?}"))),
    }
}

/// Fractional numbers are truncated toward zero.
fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<i64, D::Error> {
    match Numeric::deserialize(d)? {
        Numeric::Number(n) if n.is_finite() => Ok(n.trunc() as i64),
        Numeric::Number(n) => Err(de::Error::custom(format!("expected an integer, got {n}"))),
        Numeric::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an integer, got {s:?}"))),
    }
}

fn default_ports() -> String {
    DEFAULT_PORT_SPEC.to_string()
}

fn default_timeout() -> f64 {
    0.5
}

fn default_workers() -> i64 {
    100
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub success: bool,
    pub target: String,
    pub ports_scanned: String,
    pub results: Vec<ScanResult>,
    pub total_ports: usize,
    pub open_ports: usize,
    pub scan_time_seconds: f64,
}

/// Failure modes of `/api/scan`, each rendered as `{success: false, error}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<ScanError> for ApiError {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::InvalidPortSpec { token, reason } => {
                ApiError::BadRequest(format!("Invalid port specification '{token}': {reason}"))
            }
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(e) => {
                error!(error = %e, "scan request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(json!({ "success": false, "error": message }))).into_response()
    }
}

/// Routes without a listener, scanning with plain TCP connects.
pub fn router() -> Router {
    router_with(TcpProber)
}

/// Routes backed by a caller-supplied transport.
pub fn router_with<P: Prober>(prober: P) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/scan", post(post_scan::<P>))
        .with_state(Arc::new(prober));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "serving scan API");
    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn post_scan<P: Prober>(
    State(prober): State<Arc<P>>,
    payload: std::result::Result<Json<ScanPayload>, JsonRejection>,
) -> std::result::Result<Json<ScanResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let target = req.target.trim().to_string();
    if target.is_empty() {
        return Err(ApiError::BadRequest(
            "Target hostname or IP is required".into(),
        ));
    }
    let port_spec = req.ports.trim().to_string();
    let ports = ports::parse_port_spec(&port_spec)?;
    if ports.is_empty() {
        return Err(ApiError::BadRequest("No valid ports to scan".into()));
    }
    let timeout = scanner::timeout_from_secs(req.timeout)?;
    let workers = usize::try_from(req.workers)
        .ok()
        .filter(|&w| w >= 1)
        .ok_or_else(|| ApiError::BadRequest("Workers must be at least 1".into()))?;

    let total_ports = ports.len();
    let started = Instant::now();
    // Run in its own task so a panic turns into a 500 instead of a dropped connection.
    let host = target.clone();
    let results = tokio::spawn(async move {
        scanner::scan_with(prober, &host, &ports, timeout, workers).await
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))??;
    let elapsed = started.elapsed();

    let open = open_results(&results);
    Ok(Json(ScanResponse {
        success: true,
        target,
        ports_scanned: port_spec,
        total_ports,
        open_ports: open.len(),
        results: open,
        scan_time_seconds: round_secs(elapsed),
    }))
}
