//! Audit trail queries.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use contentflow_core::audit::{AuditError, AuditFilter, AuditRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

use super::content::ErrorResponse;
use crate::state::AppState;

const MAX_LIMIT: i64 = 1000;
const DEFAULT_LIMIT: i64 = 100;

/// Clamp a requested page size into `1..=MAX_LIMIT`.
pub(crate) fn page_limit(requested: Option<i64>) -> i64 {
    requested.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
}

/// Store failures are logged and surfaced as 500s.
pub(crate) fn audit_error_response(context: &str, err: AuditError) -> Response {
    error!("{}: {}", context, err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{}: {}", context, err),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct AuditQueryParams {
    pub task_id: Option<String>,
    pub batch_id: Option<String>,
    /// Comma-separated; matches any listed type
    pub event_type: Option<String>,
    /// ISO 8601, inclusive
    pub from: Option<DateTime<Utc>>,
    /// ISO 8601, inclusive
    pub to: Option<DateTime<Utc>>,
    /// Default 100, max 1000
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter {
            task_id: self.task_id.clone(),
            batch_id: self.batch_id.clone(),
            ..AuditFilter::default()
        }
        .with_time_range(self.from, self.to)
        .page(page_limit(self.limit), self.offset.unwrap_or(0).max(0));

        for event_type in self.event_type.iter().flat_map(|types| types.split(',')) {
            let event_type = event_type.trim();
            if !event_type.is_empty() {
                filter = filter.with_event_type(event_type);
            }
        }
        filter
    }
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events, ignoring paging
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
    pub task_id: String,
    pub events: Vec<AuditRecord>,
}

/// Query audit events, newest first.
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> Response {
    let filter = params.filter();
    let store = state.audit_store();

    let events = match store.query(&filter) {
        Ok(events) => events,
        Err(e) => return audit_error_response("Failed to query audit events", e),
    };
    let total = match store.count(&filter) {
        Ok(total) => total,
        Err(e) => return audit_error_response("Failed to count audit events", e),
    };

    Json(AuditQueryResponse {
        events,
        total,
        limit: filter.limit,
        offset: filter.offset,
    })
    .into_response()
}

/// Everything recorded for one task, in the order it happened.
pub async fn task_timeline(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> Response {
    match state.audit_store().task_timeline(&task_id) {
        Ok(events) if events.is_empty() => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("No audit events for task {}", task_id),
            }),
        )
            .into_response(),
        Ok(events) => Json(TimelineResponse { task_id, events }).into_response(),
        Err(e) => audit_error_response("Failed to read task timeline", e),
    }
}
