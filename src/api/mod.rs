//! HTTP surface.
//!
//! - `POST /upload`: multipart report upload (`file` field), runs ingestion
//! - `GET /decisions`: recent decisions, `?status=pending&limit=20`
//! - `GET /decisions/:id`: one decision
//! - `GET /health`: liveness plus outstanding dispatch tasks

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::core::pipeline::{IngestError, IngestPipeline};
use crate::domain::DecisionStatus;
use crate::ingest::ExtractionError;

/// Upload size cap (multipart overhead included)
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

const DEFAULT_LIST_LIMIT: usize = 20;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: IngestPipeline,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/upload", post(upload))
        .route("/decisions", get(list_decisions))
        .route("/decisions/:id", get(get_decision))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

/// Bind and serve until the process is stopped
pub async fn serve(address: SocketAddr, state: ApiState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!(%address, "HTTP server listening");

    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn upload(State(state): State<ApiState>, mut multipart: Multipart) -> Response {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Malformed upload: {}", e)),
        };

        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().map(str::to_string);
        match field.bytes().await {
            Ok(bytes) => file = Some((filename, bytes.to_vec())),
            Err(e) => {
                warn!(error = %e, "Failed to read upload bytes");
                return error_response(StatusCode::BAD_REQUEST, "Failed to read file data");
            }
        }
    }

    let Some((filename, bytes)) = file else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'file' field");
    };

    let is_pdf = filename
        .as_deref()
        .map(|name| name.to_lowercase().ends_with(".pdf"))
        .unwrap_or(false);
    if !is_pdf {
        return error_response(StatusCode::BAD_REQUEST, "Only PDF files are supported");
    }

    info!(filename = ?filename, size = bytes.len(), "Report uploaded");

    match state.pipeline.ingest_document(filename, bytes).await {
        Ok(response) => Json(response).into_response(),
        Err(IngestError::Extraction(e @ ExtractionError::UnsupportedFormat(_))) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(IngestError::Extraction(e)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_decisions(State(state): State<ApiState>, Query(query): Query<ListQuery>) -> Response {
    let status = match query.status.as_deref().map(str::parse::<DecisionStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    match state.pipeline.store().list(status, limit).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn get_decision(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.pipeline.store().get(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Decision {} not found", id)),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "outstanding_tasks": state.pipeline.queue().outstanding(),
    }))
}
