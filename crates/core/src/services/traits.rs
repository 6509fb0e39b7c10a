//! Service traits used by the stage executors.

use async_trait::async_trait;

use super::types::{
    AnalysisReport, AnalysisRequest, ContentRoute, Draft, DraftRequest, ImageRequest,
    MaterialItem, ScoreReport, ScoreRequest,
};
use crate::gateway::CallError;

/// Material library and keyword generation service.
#[async_trait]
pub trait MaterialService: Send + Sync {
    /// Keywords currently stored for a tag. Empty when none exist yet.
    async fn fetch_keywords(&self, tag: &str) -> Result<Vec<String>, CallError>;

    /// Ask the keyword service to generate keywords for `tags` in the
    /// background. Results show up later through `fetch_keywords`.
    async fn request_keywords(&self, tags: &[String]) -> Result<(), CallError>;

    /// Search stored material by keyword.
    async fn search_materials(&self, keyword: &str) -> Result<Vec<MaterialItem>, CallError>;

    /// Start an external crawl for `keyword`, tagged with our task id.
    async fn create_search_task(&self, keyword: &str, task_id: &str) -> Result<(), CallError>;
}

/// Dify-style AI workflows.
#[async_trait]
pub trait WorkflowService: Send + Sync {
    /// Classify two reference covers and pick the writing route.
    async fn detect_route(
        &self,
        first_image: &str,
        second_image: &str,
    ) -> Result<ContentRoute, CallError>;

    async fn write_draft(
        &self,
        route: ContentRoute,
        request: &DraftRequest,
    ) -> Result<Draft, CallError>;

    /// Generate one image. `None` when the workflow produced nothing usable.
    async fn generate_image(&self, request: &ImageRequest) -> Result<Option<String>, CallError>;

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, CallError>;

    /// Extract tags and a structural breakdown from a note.
    ///
    /// `None` when no analysis workflow is configured.
    async fn analyze(&self, request: &AnalysisRequest)
        -> Result<Option<AnalysisReport>, CallError>;
}
