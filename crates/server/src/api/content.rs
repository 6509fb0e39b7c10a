//! Content generation API handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use contentflow_core::{Persona, PipelineError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for starting a batch
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// One task is created per persona, in order
    pub personas: Vec<Persona>,
    /// Block until every task is terminal and return the report
    #[serde(default)]
    pub wait: bool,
}

/// Returned when the batch runs in the background
#[derive(Debug, Serialize)]
pub struct BatchAccepted {
    pub batch_id: String,
    pub task_ids: Vec<String>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Map orchestrator errors to HTTP responses.
pub(crate) fn pipeline_error_response(err: PipelineError) -> Response {
    let status = match &err {
        PipelineError::EmptyBatch => StatusCode::BAD_REQUEST,
        PipelineError::BatchNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::BatchRunning(_) => StatusCode::CONFLICT,
        PipelineError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// Submit a batch of personas.
///
/// With `wait` the response carries the finished batch report. Otherwise the
/// batch keeps running after the response and can be followed through
/// `/batches/{id}`.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateRequest>,
) -> Response {
    let persona_count = body.personas.len();
    let handle = match state.orchestrator().submit_batch(body.personas).await {
        Ok(handle) => handle,
        Err(e) => {
            warn!("Rejected batch of {} personas: {}", persona_count, e);
            return pipeline_error_response(e);
        }
    };

    info!(
        "Accepted batch {} with {} tasks (wait: {})",
        handle.id(),
        persona_count,
        body.wait
    );

    if body.wait {
        return match handle.wait().await {
            Ok(report) => (StatusCode::OK, Json(report)).into_response(),
            Err(e) => pipeline_error_response(e),
        };
    }

    (
        StatusCode::ACCEPTED,
        Json(BatchAccepted {
            batch_id: handle.id().to_string(),
            task_ids: handle.task_ids().to_vec(),
        }),
    )
        .into_response()
}
