use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use contentflow_core::pipeline::{BatchReport, BatchStatus};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::content::pipeline_error_response;
use crate::state::AppState;

/// Batch status, plus the report once every task settled.
#[derive(Debug, Serialize)]
pub struct BatchResponse {
    #[serde(flatten)]
    pub status: BatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub batch_id: String,
    /// Tasks that were signalled. Already finished tasks are not counted.
    pub cancelled: usize,
}

/// List retained batches, newest first.
pub async fn list_batches(State(state): State<Arc<AppState>>) -> Json<Vec<BatchStatus>> {
    Json(state.orchestrator().list_batches().await)
}

pub async fn get_batch(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.orchestrator().batch(&id).await {
        Ok(handle) => Json(BatchResponse {
            status: handle.status(),
            report: handle.report(),
        })
        .into_response(),
        Err(e) => pipeline_error_response(e),
    }
}

/// Cancel every unfinished task of a batch.
pub async fn cancel_batch(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match state.orchestrator().batch(&id).await {
        Ok(handle) => {
            let cancelled = if handle.is_finished() {
                0
            } else {
                handle.cancel_all()
            };
            info!("Cancel requested for batch {} ({} tasks)", id, cancelled);
            Json(CancelResponse {
                batch_id: id,
                cancelled,
            })
            .into_response()
        }
        Err(e) => pipeline_error_response(e),
    }
}
