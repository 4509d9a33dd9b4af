//! HTTP surface: the three engine-facing endpoints plus a health probe.
//!
//! `POST /run` starts a workflow (planning runs before the response, so a
//! 200 means a plan is durably awaiting approval). `GET /status/{id}`
//! polls progress. `POST /approve/{id}` delivers the human decision;
//! approval hands execution to a background task and returns immediately.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use conductor_core::engine::{Engine, EngineError, ResumeDirective};
use conductor_store::store::StoreError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let status = match &err {
            EngineError::EmptyRequest | EngineError::MissingFeedback => StatusCode::BAD_REQUEST,
            EngineError::RequestTooLong { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
            EngineError::Conflict { .. } => StatusCode::CONFLICT,
            EngineError::Store(StoreError::Unavailable(_))
            | EngineError::Store(StoreError::Corrupt { .. })
            | EngineError::Invariant { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub user_request: String,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub thread_id: String,
    pub status: &'static str,
    pub message: &'static str,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct ApprovalRequest {
    pub approved: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    pub thread_id: String,
    pub status: &'static str,
    pub message: &'static str,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/run", post(run_workflow))
        .route("/status/{thread_id}", get(workflow_status))
        .route("/approve/{thread_id}", post(approve_workflow))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(engine)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(engine: Arc<Engine>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(engine);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("conductor listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("conductor shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Thread ids are engine-minted UUIDs; `test-` prefixed ids are let
/// through for test tooling. Anything else is rejected before it reaches
/// the store.
fn validate_thread_id(thread_id: &str) -> Result<(), AppError> {
    if Uuid::parse_str(thread_id).is_ok() || thread_id.starts_with("test-") {
        Ok(())
    } else {
        Err(AppError::bad_request(format!(
            "invalid thread id {thread_id:?}: must be a UUID or a test id"
        )))
    }
}

async fn run_workflow(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<RunRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let started = engine.start(&body.user_request).await?;
    Ok(Json(RunResponse {
        thread_id: started.thread_id,
        status: "initiated",
        message: "Workflow started. Plan is awaiting approval.",
        created_at: started.created_at,
    }))
}

async fn workflow_status(
    State(engine): State<Arc<Engine>>,
    Path(thread_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    validate_thread_id(&thread_id)?;
    let view = engine.status(&thread_id).await?;
    Ok(Json(view).into_response())
}

async fn approve_workflow(
    State(engine): State<Arc<Engine>>,
    Path(thread_id): Path<String>,
    Json(body): Json<ApprovalRequest>,
) -> Result<Json<ApprovalResponse>, AppError> {
    validate_thread_id(&thread_id)?;

    let directive = if body.approved {
        ResumeDirective::Approved
    } else {
        let feedback = body
            .feedback
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .ok_or_else(|| AppError::bad_request("feedback is required when rejecting a plan"))?;
        ResumeDirective::Rejected {
            feedback: feedback.to_owned(),
        }
    };

    let receipt = engine.resume(&thread_id, directive).await?;
    let (status, message) = if receipt.approved {
        ("approved", "Plan approved. Workflow execution resumed.")
    } else {
        (
            "plan_rejected",
            "Plan rejected. A revised plan is awaiting approval.",
        )
    };

    Ok(Json(ApprovalResponse {
        thread_id: receipt.thread_id,
        status,
        message,
        updated_at: receipt.updated_at,
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "conductor",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
