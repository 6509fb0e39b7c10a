//! Dead-lettered callback deliveries and their replay.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use contentflow_core::audit::{DeadLetter, DeadLetterQuery};
use contentflow_core::callback::DeliveryOutcome;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use super::audit::{audit_error_response, page_limit};
use super::content::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    pub batch_id: Option<String>,
    /// Also list letters that were already replayed
    #[serde(default)]
    pub include_replayed: bool,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterList {
    pub dead_letters: Vec<DeadLetter>,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub dead_letter_id: i64,
    pub task_id: String,
    pub delivery: DeliveryOutcome,
}

fn not_found(id: i64) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("Dead letter {} not found", id),
        }),
    )
        .into_response()
}

/// Failed deliveries, oldest first. Pending ones only unless asked.
pub async fn list_failed(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLetterParams>,
) -> Response {
    let query = DeadLetterQuery {
        batch_id: params.batch_id,
        include_replayed: params.include_replayed,
        limit: page_limit(params.limit),
    };
    match state.audit_store().dead_letters(&query) {
        Ok(dead_letters) => Json(DeadLetterList { dead_letters }).into_response(),
        Err(e) => audit_error_response("Failed to list dead letters", e),
    }
}

pub async fn get_failed(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    match state.audit_store().dead_letter(id) {
        Ok(Some(letter)) => Json(letter).into_response(),
        Ok(None) => not_found(id),
        Err(e) => audit_error_response("Failed to read dead letter", e),
    }
}

/// Post a dead letter's envelope to the callback URL again.
///
/// 409 once the letter has been replayed successfully or when no callback
/// URL is configured. 502 when the receiver still refuses it.
pub async fn replay(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> Response {
    let letter = match state.audit_store().dead_letter(id) {
        Ok(Some(letter)) => letter,
        Ok(None) => return not_found(id),
        Err(e) => return audit_error_response("Failed to read dead letter", e),
    };
    if !letter.is_pending() {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("Dead letter {} was already replayed", id),
            }),
        )
            .into_response();
    }

    let delivery = state.orchestrator().replay_delivery(&letter).await;
    info!("Replay of dead letter {}: {}", id, delivery.as_str());
    let status = match delivery {
        DeliveryOutcome::Delivered { .. } => StatusCode::OK,
        DeliveryOutcome::Failed { .. } => StatusCode::BAD_GATEWAY,
        DeliveryOutcome::Skipped | DeliveryOutcome::Duplicate => StatusCode::CONFLICT,
    };
    (
        status,
        Json(ReplayResponse {
            dead_letter_id: letter.id,
            task_id: letter.task_id,
            delivery,
        }),
    )
        .into_response()
}
