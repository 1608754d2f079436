//! HTTP service: `GET /` health check and `POST /extract-bill-data`.
//!
//! The provider is resolved once at start-up and shared through [`AppState`];
//! each request only borrows it. The service accepts remote documents only,
//! so a caller can never make it read the server's own file system.

use crate::config::ExtractionConfig;
use crate::error::BillExtractError;
use crate::extract::extract_with_provider;
use crate::output::ExtractResponse;
use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use edgequake_llm::LLMProvider;
use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared state: one provider handle and the immutable extraction config.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn LLMProvider>,
    pub config: Arc<ExtractionConfig>,
}

impl AppState {
    pub fn new(provider: Arc<dyn LLMProvider>, config: ExtractionConfig) -> Self {
        Self {
            provider,
            config: Arc::new(config),
        }
    }
}

/// Request body of `POST /extract-bill-data`.
#[derive(Debug, Deserialize)]
pub struct ExtractRequest {
    pub document: String,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/extract-bill-data", post(extract_bill_data))
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Server listening on {}", listener.local_addr()?);
    info!("  GET  /                  - health");
    info!("  POST /extract-bill-data - line-item extraction");
    axum::serve(listener, router(state)).await
}

/// Health check.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "running" }))
}

/// Extract line items from the document at `document`.
pub async fn extract_bill_data(
    State(state): State<AppState>,
    body: Result<Json<ExtractRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(rejection) => {
            warn!("Rejected request body: {}", rejection.body_text());
            return failure(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", rejection.body_text()),
            );
        }
    };

    let url = match validate_document_url(&req.document) {
        Ok(url) => url,
        Err(e) => return failure(status_for(&e), e.to_string()),
    };

    match extract_with_provider(url.as_str(), &state.provider, &state.config).await {
        Ok(output) => (StatusCode::OK, Json(output.into_response())).into_response(),
        Err(e) => {
            warn!("Extraction failed for '{}': {}", req.document, e);
            failure(status_for(&e), e.to_string())
        }
    }
}

/// Accept only absolute `http`/`https` URLs.
pub fn validate_document_url(document: &str) -> Result<Url, BillExtractError> {
    let invalid = || BillExtractError::InvalidInput {
        input: document.to_string(),
    };
    let url = Url::parse(document.trim()).map_err(|_| invalid())?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(invalid()),
    }
}

/// HTTP status for a fatal extraction error.
pub fn status_for(err: &BillExtractError) -> StatusCode {
    if err.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if err.is_upstream_error() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

fn failure(status: StatusCode, message: String) -> Response {
    (status, Json(ExtractResponse::failure(message))).into_response()
}
