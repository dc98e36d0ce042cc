use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::app::SpectrumSource;
use crate::error::UsiError;

#[derive(Clone)]
pub struct AppState {
    source: Arc<dyn SpectrumSource>,
    workers: Arc<Semaphore>,
}

impl AppState {
    pub fn new(source: Arc<dyn SpectrumSource>, workers: usize) -> Self {
        Self {
            source,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/spectrum", get(get_spectrum))
        .route("/spectrum/", get(get_spectrum))
        .route("/", get(service_description))
        .route("/docs", get(service_description))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn serve(state: AppState, port: u16) -> Result<(), UsiError> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|err| UsiError::Server(format!("bind port {port}: {err}")))?;
    tracing::info!("usi-service listening on http://0.0.0.0:{port}");
    tracing::info!("Health check: http://0.0.0.0:{port}/health");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| UsiError::Server(err.to_string()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[derive(Debug, Deserialize)]
pub struct SpectrumQuery {
    pub usi: String,
}

/// GET /spectrum?usi=...
pub async fn get_spectrum(
    State(state): State<AppState>,
    query: Result<Query<SpectrumQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(SpectrumQuery { usi }) =
        query.map_err(|rejection| ApiError::new(StatusCode::BAD_REQUEST, rejection.body_text()))?;

    let permit = state
        .workers
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "worker pool closed"))?;

    let cancel = CancellationToken::new();
    // Fires when axum drops this future on client disconnect.
    let _guard = cancel.clone().drop_guard();
    let source = state.source.clone();
    let request_usi = usi.clone();
    let result = tokio::task::spawn_blocking(move || {
        let _permit = permit;
        source.lookup(&request_usi, &cancel)
    })
    .await;

    match result {
        Ok(Ok(outcome)) => {
            tracing::info!(usi = %usi, canonical = %outcome.canonical_usi, origin = ?outcome.origin, "spectrum served");
            Ok(Json(outcome.spectrum))
        }
        Ok(Err(err)) => Err(ApiError::from(err)),
        Err(err) => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("worker failed: {err}"),
        )),
    }
}

pub async fn health() -> &'static str {
    "alive"
}

pub async fn service_description() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "description": env!("CARGO_PKG_DESCRIPTION"),
        "routes": [
            {
                "method": "GET",
                "path": "/spectrum",
                "query": { "usi": "Universal Spectrum Identifier, e.g. mzspec:PXD000966:run.raw:scan:12298" },
                "responses": {
                    "200": "spectrum JSON as produced by ThermoRawFileParser",
                    "400": "malformed USI",
                    "404": "USI without scan, or file/project not found in the catalog",
                    "500": "download, extraction or catalog failure"
                }
            },
            { "method": "GET", "path": "/health", "responses": { "200": "liveness string" } },
            { "method": "GET", "path": "/docs", "responses": { "200": "this document" } }
        ]
    }))
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl From<UsiError> for ApiError {
    fn from(err: UsiError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match &err {
            UsiError::Cancelled => tracing::debug!("request cancelled by client"),
            _ if err.is_client_error() => tracing::info!(error = %err, "request rejected"),
            _ => tracing::error!(error = %err, "request failed"),
        }
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}
