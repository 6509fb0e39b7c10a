//! Callback payload for a finished task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::pipeline::{FailureSummary, Stage, Task};
use crate::services::{ContentAnalysis, ContentRoute, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeStatus {
    Succeeded,
    Failed,
}

/// The generated note and its evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBundle {
    pub title: String,
    pub content: String,
    pub img_list: Vec<String>,
    pub tag: String,
    pub keyword: String,
    pub route: ContentRoute,
    pub score: Option<f64>,
    pub passed: bool,
    /// 1-based position among the batch's succeeded tasks.
    pub rank: Option<usize>,
    /// Tags and structure of a passing note, when analysis ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<ContentAnalysis>,
    /// Scoring plus analysis token usage.
    pub usage: TokenUsage,
}

/// Everything the caller learns about one task. Built once per terminal task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    pub task_id: String,
    pub batch_id: String,
    pub persona_id: String,
    pub status: EnvelopeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ContentBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureSummary>,
    pub completed_at: DateTime<Utc>,
}

impl CallbackEnvelope {
    /// Envelope for a terminal task. `None` while the task is still running
    /// or when a finished task lacks the outputs of its completed stages.
    pub fn from_task(task: &Task, rank: Option<usize>) -> Option<Self> {
        let (status, result, error) = match task.stage {
            Stage::Done => {
                let outputs = &task.outputs;
                let keywords = outputs.keywords.as_ref()?;
                let draft = outputs.draft.as_ref()?;
                let score = outputs.score.as_ref()?;
                let bundle = ContentBundle {
                    title: draft.title.clone(),
                    content: draft.content.clone(),
                    img_list: outputs
                        .images
                        .as_ref()
                        .map(|i| i.images.clone())
                        .unwrap_or_default(),
                    tag: keywords.tag.clone(),
                    keyword: keywords.chosen.clone(),
                    route: draft.route,
                    score: score.score,
                    passed: score.passed,
                    rank,
                    analysis: score.analysis.clone(),
                    usage: score.usage,
                };
                (EnvelopeStatus::Succeeded, Some(bundle), None)
            }
            Stage::Failed => (EnvelopeStatus::Failed, None, task.failure.clone()),
            _ => return None,
        };

        Some(Self {
            task_id: task.id.clone(),
            batch_id: task.batch_id.clone(),
            persona_id: task.persona.persona_id.clone(),
            status,
            result,
            error,
            completed_at: task.updated_at,
        })
    }

    /// Receivers deduplicate on this key.
    pub fn idempotency_key(&self) -> &str {
        &self.task_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::pipeline::{
        DraftOutput, ErrorKind, ImageSet, KeywordSet, KeywordSource, ScoreOutput,
    };
    use crate::testing::fixtures;

    fn done_task() -> Task {
        let mut task = Task::new("batch-1", 0, fixtures::persona("p-1", &["travel"]));
        task.stage = Stage::Done;
        task.outputs.keywords = Some(KeywordSet {
            tag: "travel".into(),
            keywords: vec!["beach".into()],
            chosen: "beach".into(),
            source: KeywordSource::Immediate,
        });
        task.outputs.draft = Some(DraftOutput {
            route: ContentRoute::Single,
            title: "Sunny days".into(),
            content: "Sand and sea.".into(),
        });
        task.outputs.images = Some(ImageSet {
            images: vec!["https://oss.mock/1.png".into()],
            requested: 1,
        });
        task.outputs.score = Some(ScoreOutput {
            score: Some(91.0),
            passed: true,
            consistent: true,
            details: json!({}),
            analysis: None,
            usage: TokenUsage::default(),
        });
        task
    }

    #[test]
    fn test_succeeded_envelope() {
        let task = done_task();
        let envelope = CallbackEnvelope::from_task(&task, Some(2)).unwrap();

        assert_eq!(envelope.status, EnvelopeStatus::Succeeded);
        assert_eq!(envelope.idempotency_key(), task.id);
        assert_eq!(envelope.persona_id, "p-1");
        let result = envelope.result.as_ref().unwrap();
        assert_eq!(result.rank, Some(2));
        assert_eq!(result.img_list, vec!["https://oss.mock/1.png"]);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["result"]["route"], "single");
        assert!(json["result"].get("analysis").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_succeeded_envelope_carries_analysis() {
        let mut task = done_task();
        if let Some(score) = task.outputs.score.as_mut() {
            score.analysis = Some(ContentAnalysis {
                tags: "beach，sun".into(),
                content_disassembly: json!({"hook": "list"}),
            });
            score.usage = TokenUsage {
                input_tokens: 200,
                output_tokens: 50,
                total_tokens: 250,
            };
        }

        let envelope = CallbackEnvelope::from_task(&task, Some(1)).unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["result"]["analysis"]["tags"], "beach，sun");
        assert_eq!(json["result"]["analysis"]["content_disassembly"]["hook"], "list");
        assert_eq!(json["result"]["usage"]["total_tokens"], 250);
    }

    #[test]
    fn test_failed_envelope_carries_summary() {
        let mut task = Task::new("batch-1", 1, fixtures::persona("p-2", &["food"]));
        task.stage = Stage::Failed;
        task.failure = Some(FailureSummary {
            kind: ErrorKind::DataInsufficiency,
            stage: Stage::References,
            message: "need 2 reference articles".into(),
        });

        let envelope = CallbackEnvelope::from_task(&task, None).unwrap();
        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert!(envelope.result.is_none());

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["kind"], "data_insufficiency");
        assert_eq!(json["error"]["stage"], "REFERENCES");
    }

    #[test]
    fn test_running_task_has_no_envelope() {
        let mut task = done_task();
        task.stage = Stage::Image;
        assert!(CallbackEnvelope::from_task(&task, None).is_none());
    }
}
