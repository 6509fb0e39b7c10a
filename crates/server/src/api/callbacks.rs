//! Inbound callbacks from the keyword service.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::state::AppState;

/// The keyword service posts either a single tag or a list.
#[derive(Debug, Default, Deserialize)]
pub struct KeywordCallback {
    pub tag: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl KeywordCallback {
    /// All non-empty tags, duplicates removed, in arrival order.
    fn into_tags(self) -> Vec<String> {
        let mut tags: Vec<String> = Vec::new();
        for tag in self.tag.into_iter().chain(self.tags.into_iter().flatten()) {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        tags
    }
}

#[derive(Debug, Serialize)]
pub struct KeywordCallbackData {
    pub received: Vec<String>,
    /// Tags that had a task waiting on them.
    pub woke: Vec<String>,
}

/// Envelope the keyword service expects back.
#[derive(Debug, Serialize)]
pub struct CallbackAck<T> {
    pub code: i32,
    pub msg: String,
    pub data: Option<T>,
}

pub async fn keywords_ready(
    State(state): State<Arc<AppState>>,
    Json(body): Json<KeywordCallback>,
) -> impl IntoResponse {
    let tags = body.into_tags();
    if tags.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(CallbackAck {
                code: 400,
                msg: "tag or tags is required".to_string(),
                data: None,
            }),
        );
    }

    let woke = state.orchestrator().notify_keywords(&tags).await;
    (
        StatusCode::OK,
        Json(CallbackAck {
            code: 0,
            msg: "ok".to_string(),
            data: Some(KeywordCallbackData {
                received: tags,
                woke,
            }),
        }),
    )
}
