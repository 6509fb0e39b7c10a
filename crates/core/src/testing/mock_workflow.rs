//! Mock generation and scoring workflows for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::RwLock;

use super::call_log::CallLog;
use crate::gateway::CallError;
use crate::services::{
    AnalysisReport, AnalysisRequest, ContentAnalysis, ContentRoute, Draft, DraftRequest,
    ImageRequest, ScoreReport, ScoreRequest, TokenUsage, WorkflowService,
};

/// Mock implementation of the WorkflowService trait.
///
/// By default every pair of references blends, drafts are derived from the
/// keyword, each image call returns a new URL and every note scores 85.
/// Analysis is off until [`set_analysis`](Self::set_analysis) is called.
#[derive(Debug, Clone)]
pub struct MockWorkflowService {
    route: Arc<RwLock<ContentRoute>>,
    /// Scores keyed by the keyword sent to the scorer.
    scores: Arc<RwLock<HashMap<String, Option<f64>>>>,
    default_score: Arc<RwLock<Option<f64>>>,
    consistent: Arc<RwLock<bool>>,
    images_missing: Arc<RwLock<bool>>,
    analysis: Arc<RwLock<Option<ContentAnalysis>>>,
    image_counter: Arc<AtomicUsize>,
    log: CallLog,
    next_error: Arc<RwLock<Option<CallError>>>,
    failures: Arc<RwLock<HashMap<&'static str, CallError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
    drafts: Arc<RwLock<Vec<(ContentRoute, DraftRequest)>>>,
}

impl Default for MockWorkflowService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockWorkflowService {
    pub fn new() -> Self {
        Self {
            route: Arc::new(RwLock::new(ContentRoute::Combination)),
            scores: Arc::new(RwLock::new(HashMap::new())),
            default_score: Arc::new(RwLock::new(Some(85.0))),
            consistent: Arc::new(RwLock::new(true)),
            images_missing: Arc::new(RwLock::new(false)),
            analysis: Arc::new(RwLock::new(None)),
            image_counter: Arc::new(AtomicUsize::new(0)),
            log: CallLog::default(),
            next_error: Arc::new(RwLock::new(None)),
            failures: Arc::new(RwLock::new(HashMap::new())),
            delay: Arc::new(RwLock::new(None)),
            drafts: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub async fn set_route(&self, route: ContentRoute) {
        *self.route.write().await = route;
    }

    /// Score returned for notes written about `keyword`.
    pub async fn set_score(&self, keyword: &str, score: Option<f64>) {
        self.scores.write().await.insert(keyword.to_string(), score);
    }

    pub async fn set_default_score(&self, score: Option<f64>) {
        *self.default_score.write().await = score;
    }

    pub async fn set_consistent(&self, consistent: bool) {
        *self.consistent.write().await = consistent;
    }

    /// Make the image workflow return no image.
    pub async fn set_images_missing(&self, missing: bool) {
        *self.images_missing.write().await = missing;
    }

    /// Analysis returned for every analyzed note; `None` disables analysis.
    pub async fn set_analysis(&self, analysis: Option<ContentAnalysis>) {
        *self.analysis.write().await = analysis;
    }

    pub async fn set_next_error(&self, error: CallError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every call of `method` fail with the given error.
    pub async fn fail_method(&self, method: &'static str, error: CallError) {
        self.failures.write().await.insert(method, error);
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Draft requests received, in order.
    pub async fn draft_requests(&self) -> Vec<(ContentRoute, DraftRequest)> {
        self.drafts.read().await.clone()
    }

    async fn prepare(&self, method: &'static str) -> Result<(), CallError> {
        if let Some(delay) = *self.delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if let Some(err) = self.failures.read().await.get(method) {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl WorkflowService for MockWorkflowService {
    async fn detect_route(
        &self,
        first_image: &str,
        _second_image: &str,
    ) -> Result<ContentRoute, CallError> {
        let call = self.log.start("detect_route", first_image);
        let result = match self.prepare("detect_route").await {
            Ok(()) => Ok(*self.route.read().await),
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn write_draft(
        &self,
        route: ContentRoute,
        request: &DraftRequest,
    ) -> Result<Draft, CallError> {
        let call = self.log.start("write_draft", request.keyword.clone());
        let result = match self.prepare("write_draft").await {
            Ok(()) => {
                self.drafts.write().await.push((route, request.clone()));
                Ok(Draft {
                    title: format!("All about {}", request.keyword),
                    content: format!("A {} note on {}.", route, request.keyword),
                })
            }
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Option<String>, CallError> {
        let call = self.log.start("generate_image", request.source_url.clone());
        let result = match self.prepare("generate_image").await {
            Ok(()) if *self.images_missing.read().await => Ok(None),
            Ok(()) => {
                let n = self.image_counter.fetch_add(1, Ordering::SeqCst);
                Ok(Some(format!("https://oss.mock/generated-{}.png", n)))
            }
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, CallError> {
        let call = self.log.start("score", request.keywords.clone());
        let result = match self.prepare("score").await {
            Ok(()) => {
                let score = match self.scores.read().await.get(&request.keywords) {
                    Some(score) => *score,
                    None => *self.default_score.read().await,
                };
                let consistent = *self.consistent.read().await;
                Ok(ScoreReport {
                    score,
                    consistent,
                    content_score: json!({ "score": score }),
                    consistency_checker: json!({ "result": consistent }),
                    usage: TokenUsage {
                        input_tokens: 120,
                        output_tokens: 30,
                        total_tokens: 150,
                    },
                })
            }
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<AnalysisReport>, CallError> {
        // Unconfigured analysis makes no call, like the HTTP client.
        let Some(analysis) = self.analysis.read().await.clone() else {
            return Ok(None);
        };
        let title = request.content_info["title"].as_str().unwrap_or_default();
        let call = self.log.start("analyze", title);
        let result = match self.prepare("analyze").await {
            Ok(()) => Ok(Some(AnalysisReport {
                analysis,
                usage: TokenUsage {
                    input_tokens: 80,
                    output_tokens: 20,
                    total_tokens: 100,
                },
            })),
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }
}
