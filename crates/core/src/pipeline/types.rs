//! Types for the content pipeline.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::gateway::CallError;
use crate::services::{ContentAnalysis, ContentRoute, MaterialItem, MaterialTask, TokenUsage};

/// Errors returned by the orchestrator API.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A batch must contain at least one persona.
    #[error("batch contains no personas")]
    EmptyBatch,

    /// The orchestrator no longer accepts work.
    #[error("orchestrator is shutting down")]
    ShuttingDown,

    /// Batch not found.
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    /// Resuming into a batch that is still running.
    #[error("batch {0} is still running")]
    BatchRunning(String),

    /// The batch coordinator stopped before producing a report.
    #[error("batch {0} ended without a report")]
    BatchAborted(String),

    /// Building the HTTP gateway failed.
    #[error("gateway error: {0}")]
    Gateway(#[from] CallError),
}

/// Classification of a failed task or delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeouts, connection failures and 5xx responses, after retries ran out.
    TransientNetwork,
    /// 4xx responses and unusable response bodies.
    Client,
    /// Not enough keywords or materials to continue.
    DataInsufficiency,
    /// The callback could not be delivered.
    Delivery,
    /// Broken pipeline invariant.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::TransientNetwork => "transient_network",
            ErrorKind::Client => "client",
            ErrorKind::DataInsufficiency => "data_insufficiency",
            ErrorKind::Delivery => "delivery",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{}", label)
    }
}

/// Failure of a single stage execution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("insufficient data: {0}")]
    DataInsufficiency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Call(e) if e.is_retryable() => ErrorKind::TransientNetwork,
            StageError::Call(_) => ErrorKind::Client,
            StageError::DataInsufficiency(_) => ErrorKind::DataInsufficiency,
            StageError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Persona input for one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Caller's id for this persona, echoed back in the callback.
    pub persona_id: String,
    /// Candidate topic tags. One is picked per task.
    #[serde(default, alias = "tag")]
    pub tags: Vec<String>,
    /// Free-form persona description handed to the writer.
    #[serde(default)]
    pub persona_info: Value,
    #[serde(default)]
    pub language_style: String,
    #[serde(default)]
    pub title_requirement: String,
    #[serde(default)]
    pub content_requirement: String,
    #[serde(default)]
    pub creative_elements: Vec<Value>,
}

/// Pipeline position of a task.
///
/// Non-terminal stages run in declaration order; a task only moves forward,
/// or to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    TagKeywords,
    Material,
    References,
    Draft,
    Image,
    Score,
    Done,
    Failed,
}

impl Stage {
    /// Stages that have an executor, in execution order.
    pub const EXECUTED: [Stage; 6] = [
        Stage::TagKeywords,
        Stage::Material,
        Stage::References,
        Stage::Draft,
        Stage::Image,
        Stage::Score,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The stage that follows a successful run of this one.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::TagKeywords),
            Stage::TagKeywords => Some(Stage::Material),
            Stage::Material => Some(Stage::References),
            Stage::References => Some(Stage::Draft),
            Stage::Draft => Some(Stage::Image),
            Stage::Image => Some(Stage::Score),
            Stage::Score => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::TagKeywords => "tag_keywords",
            Stage::Material => "material",
            Stage::References => "references",
            Stage::Draft => "draft",
            Stage::Image => "image",
            Stage::Score => "score",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse status derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl From<Stage> for TaskStatus {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Pending => TaskStatus::Pending,
            Stage::Done => TaskStatus::Succeeded,
            Stage::Failed => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }
}

/// How deferred keywords became available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordSource {
    /// Already stored when first looked up.
    Immediate,
    /// Found by a periodic re-check.
    Poll,
    /// Found right after a readiness notification.
    Notification,
}

impl KeywordSource {
    pub fn as_str(self) -> &'static str {
        match self {
            KeywordSource::Immediate => "immediate",
            KeywordSource::Poll => "poll",
            KeywordSource::Notification => "notification",
        }
    }
}

/// Output of the TAG_KEYWORDS stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSet {
    pub tag: String,
    pub keywords: Vec<String>,
    /// Keyword the rest of the pipeline works with.
    pub chosen: String,
    pub source: KeywordSource,
}

/// Output of the MATERIAL stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialSet {
    pub keyword: String,
    pub items: Vec<MaterialItem>,
    /// Crawl job, when the library had nothing stored for the keyword.
    #[serde(default)]
    pub crawl: Option<MaterialTask>,
}

/// Output of the REFERENCES stage: exactly two reference articles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePair {
    pub first: MaterialItem,
    pub second: MaterialItem,
}

/// Output of the DRAFT stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftOutput {
    pub route: ContentRoute,
    pub title: String,
    pub content: String,
}

/// Output of the IMAGE stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub images: Vec<String>,
    /// Number of source images sent to the image workflow.
    pub requested: usize,
}

/// Output of the SCORE stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreOutput {
    pub score: Option<f64>,
    pub passed: bool,
    pub consistent: bool,
    pub details: Value,
    /// Present when the note passed and an analysis workflow is configured.
    #[serde(default)]
    pub analysis: Option<ContentAnalysis>,
    /// Scoring usage, plus analysis usage when the note was analyzed.
    pub usage: TokenUsage,
}

/// Successful result of one stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Keywords(KeywordSet),
    Materials(MaterialSet),
    References(ReferencePair),
    Draft(DraftOutput),
    Images(ImageSet),
    Score(ScoreOutput),
}

impl StageOutput {
    /// The stage that produces this output.
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Keywords(_) => Stage::TagKeywords,
            StageOutput::Materials(_) => Stage::Material,
            StageOutput::References(_) => Stage::References,
            StageOutput::Draft(_) => Stage::Draft,
            StageOutput::Images(_) => Stage::Image,
            StageOutput::Score(_) => Stage::Score,
        }
    }
}

pub type StageResult = Result<StageOutput, StageError>;

/// Accumulated outputs of completed stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageOutputs {
    #[serde(default)]
    pub keywords: Option<KeywordSet>,
    #[serde(default)]
    pub materials: Option<MaterialSet>,
    #[serde(default)]
    pub references: Option<ReferencePair>,
    #[serde(default)]
    pub draft: Option<DraftOutput>,
    #[serde(default)]
    pub images: Option<ImageSet>,
    #[serde(default)]
    pub score: Option<ScoreOutput>,
}

fn missing(what: &str) -> StageError {
    StageError::Internal(format!("{} output missing", what))
}

impl StageOutputs {
    pub(crate) fn record(&mut self, output: StageOutput) {
        match output {
            StageOutput::Keywords(v) => self.keywords = Some(v),
            StageOutput::Materials(v) => self.materials = Some(v),
            StageOutput::References(v) => self.references = Some(v),
            StageOutput::Draft(v) => self.draft = Some(v),
            StageOutput::Images(v) => self.images = Some(v),
            StageOutput::Score(v) => self.score = Some(v),
        }
    }

    pub fn require_keywords(&self) -> Result<&KeywordSet, StageError> {
        self.keywords.as_ref().ok_or_else(|| missing("keyword"))
    }

    pub fn require_materials(&self) -> Result<&MaterialSet, StageError> {
        self.materials.as_ref().ok_or_else(|| missing("material"))
    }

    pub fn require_references(&self) -> Result<&ReferencePair, StageError> {
        self.references.as_ref().ok_or_else(|| missing("reference"))
    }

    pub fn require_draft(&self) -> Result<&DraftOutput, StageError> {
        self.draft.as_ref().ok_or_else(|| missing("draft"))
    }

    pub fn require_images(&self) -> Result<&ImageSet, StageError> {
        self.images.as_ref().ok_or_else(|| missing("image"))
    }
}

/// One executed stage in a task's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSummary {
    pub kind: ErrorKind,
    /// Stage that was executing when the task failed.
    pub stage: Stage,
    pub message: String,
}

/// One persona's trip through the pipeline.
///
/// Serializable so a snapshot can be handed back to the orchestrator to
/// resume at the recorded stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub batch_id: String,
    /// Position within the submitted batch.
    pub index: usize,
    pub persona: Persona,
    pub stage: Stage,
    #[serde(default)]
    pub outputs: StageOutputs,
    /// Executions per stage.
    #[serde(default)]
    pub attempts: BTreeMap<Stage, u32>,
    #[serde(default)]
    pub history: Vec<StageRecord>,
    #[serde(default)]
    pub failure: Option<FailureSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(batch_id: impl Into<String>, index: usize, persona: Persona) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            batch_id: batch_id.into(),
            index,
            persona,
            stage: Stage::Pending,
            outputs: StageOutputs::default(),
            attempts: BTreeMap::new(),
            history: Vec::new(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.stage.into()
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }
}

/// Stage transition broadcast to batch subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: String,
    pub batch_id: String,
    pub index: usize,
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}
