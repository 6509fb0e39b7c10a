//! Dify workflow client.
//!
//! Every workflow is run with `POST {base}{path}` and
//! `{"inputs": {...}, "response_mode": "blocking", "user": ...}`; outputs come
//! back under `data.outputs`.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::parse::{normalize_tags, parse_json_from_mixed, value_as_bool, value_as_f64};
use super::traits::WorkflowService;
use super::types::{
    AnalysisReport, AnalysisRequest, ContentAnalysis, ContentRoute, Draft, DraftRequest,
    ImageRequest, ScoreReport, ScoreRequest, TokenUsage,
};
use crate::config::{AnalysisConfig, GenerationConfig, ScoringConfig};
use crate::gateway::{CallError, CallPolicy, Endpoint, HttpGateway};

pub struct DifyClient {
    gateway: HttpGateway,
    generation: GenerationConfig,
    scoring: ScoringConfig,
    analysis: Option<AnalysisConfig>,
    policy: CallPolicy,
    user: String,
}

impl DifyClient {
    pub fn new(
        gateway: HttpGateway,
        generation: GenerationConfig,
        scoring: ScoringConfig,
        policy: CallPolicy,
        user: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            generation,
            scoring,
            analysis: None,
            policy,
            user: user.into(),
        }
    }

    /// Also run the content analysis workflow for notes that pass scoring.
    pub fn with_analysis(mut self, analysis: Option<AnalysisConfig>) -> Self {
        self.analysis = analysis;
        self
    }

    fn generation_url(&self) -> String {
        join_url(&self.generation.base_url, &self.generation.path)
    }

    /// Run a generation workflow and return its `data.outputs` object.
    async fn run_generation(&self, token: &str, inputs: Value) -> Result<Value, CallError> {
        let payload = json!({
            "inputs": inputs,
            "response_mode": "blocking",
            "user": self.user,
        });
        let endpoint = Endpoint::post(self.generation_url()).with_bearer(token);
        let response = self
            .gateway
            .call(&endpoint, Some(&payload), &self.policy)
            .await?;
        outputs_of(&response.body).cloned().ok_or_else(|| {
            CallError::MalformedResponse("workflow response has no data.outputs".to_string())
        })
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}{}", base.trim_end_matches('/'), path)
}

/// `data.outputs`, or a top-level `outputs` from older workflow versions.
fn outputs_of(body: &Value) -> Option<&Value> {
    body.get("data")
        .and_then(|d| d.get("outputs"))
        .or_else(|| body.get("outputs"))
        .filter(|o| o.is_object())
}

fn usage_of(body: &Value) -> TokenUsage {
    let read = |field: &str| -> u64 {
        body.get("data")
            .and_then(|d| d.get(field))
            .or_else(|| body.get(field))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };
    TokenUsage {
        input_tokens: read("input_tokens"),
        output_tokens: read("output_tokens"),
        total_tokens: read("total_tokens"),
    }
}

fn remote_image(url: &str) -> Value {
    json!({"transfer_method": "remote_url", "url": url, "type": "image"})
}

fn output_str<'a>(outputs: &'a Value, field: &str) -> Option<&'a str> {
    outputs
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl WorkflowService for DifyClient {
    async fn detect_route(
        &self,
        first_image: &str,
        second_image: &str,
    ) -> Result<ContentRoute, CallError> {
        let inputs = json!({
            "img": remote_image(first_image),
            "img2": remote_image(second_image),
        });
        let outputs = self
            .run_generation(&self.generation.type_detect_token, inputs)
            .await?;
        let first = output_str(&outputs, "type_one");
        let second = output_str(&outputs, "type_two");
        debug!("Type detection returned {:?} / {:?}", first, second);
        Ok(ContentRoute::from_types(first, second))
    }

    async fn write_draft(
        &self,
        route: ContentRoute,
        request: &DraftRequest,
    ) -> Result<Draft, CallError> {
        let token = match route {
            ContentRoute::Single => &self.generation.single_write_token,
            ContentRoute::Combination => &self.generation.combo_write_token,
        };
        let inputs = serde_json::to_value(request).map_err(|e| {
            CallError::MalformedResponse(format!("unserializable draft input: {}", e))
        })?;
        let outputs = self.run_generation(token, inputs).await?;

        let content = output_str(&outputs, "content").ok_or_else(|| {
            CallError::MalformedResponse("writing workflow returned no content".to_string())
        })?;
        Ok(Draft {
            title: output_str(&outputs, "title").unwrap_or_default().to_string(),
            content: content.to_string(),
        })
    }

    async fn generate_image(&self, request: &ImageRequest) -> Result<Option<String>, CallError> {
        let inputs = json!({
            "img_url": request.source_url,
            "img": remote_image(&request.source_url),
            "title": request.title,
        });
        let outputs = self
            .run_generation(&self.generation.single_image_token, inputs)
            .await?;
        let url = output_str(&outputs, "oss_img_url").map(String::from);
        if url.is_none() {
            warn!("Image workflow returned no image for {}", request.source_url);
        }
        Ok(url)
    }

    async fn score(&self, request: &ScoreRequest) -> Result<ScoreReport, CallError> {
        let content_info = serde_json::to_string(&request.content_info)
            .map_err(|e| CallError::MalformedResponse(format!("unserializable note: {}", e)))?;
        let payload = json!({
            "inputs": {
                "content_info": content_info,
                "keywords": request.keywords,
            },
            "response_mode": self.scoring.response_mode,
            "user": self.user,
        });
        let endpoint = Endpoint::post(join_url(&self.scoring.base_url, &self.scoring.path))
            .with_bearer(&self.scoring.token);
        let response = self
            .gateway
            .call(&endpoint, Some(&payload), &self.policy)
            .await?;

        let outputs = outputs_of(&response.body).ok_or_else(|| {
            CallError::MalformedResponse("scoring response has no outputs".to_string())
        })?;
        let content_score = outputs
            .get("content_score")
            .and_then(parse_json_from_mixed)
            .unwrap_or_else(|| json!({}));
        let consistency_checker = outputs
            .get("consistency_checker")
            .and_then(parse_json_from_mixed)
            .unwrap_or_else(|| json!({}));

        Ok(ScoreReport {
            score: content_score.get("score").and_then(value_as_f64),
            consistent: consistency_checker
                .get("result")
                .map(value_as_bool)
                .unwrap_or(false),
            content_score,
            consistency_checker,
            usage: usage_of(&response.body),
        })
    }

    async fn analyze(
        &self,
        request: &AnalysisRequest,
    ) -> Result<Option<AnalysisReport>, CallError> {
        let Some(ref analysis) = self.analysis else {
            return Ok(None);
        };
        let content_info = serde_json::to_string(&request.content_info)
            .map_err(|e| CallError::MalformedResponse(format!("unserializable note: {}", e)))?;
        let payload = json!({
            "inputs": { "content_info": content_info },
            "response_mode": analysis.response_mode,
            "user": self.user,
        });
        let endpoint = Endpoint::post(join_url(&analysis.base_url, &analysis.path))
            .with_bearer(&analysis.token);
        let response = self
            .gateway
            .call(&endpoint, Some(&payload), &self.policy)
            .await?;

        let outputs = outputs_of(&response.body).ok_or_else(|| {
            CallError::MalformedResponse("analysis response has no outputs".to_string())
        })?;
        let tags = outputs.get("tags").map(normalize_tags).unwrap_or_default();
        let content_disassembly = outputs
            .get("content_disassembly")
            .and_then(parse_json_from_mixed)
            .unwrap_or_else(|| json!({}));
        debug!("Analysis returned tags {:?}", tags);

        Ok(Some(AnalysisReport {
            analysis: ContentAnalysis {
                tags,
                content_disassembly,
            },
            usage: usage_of(&response.body),
        }))
    }
}
