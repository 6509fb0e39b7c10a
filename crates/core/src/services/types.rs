//! Wire and domain types shared by the service clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::parse::parse_image_list;

/// One stored article from the material library.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialItem {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default, rename = "note_raw_data")]
    pub note: Option<MaterialNote>,
    #[serde(default, rename = "analysis_data")]
    pub analysis: Option<MaterialAnalysisData>,
}

/// Raw note fields the pipeline uses. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialNote {
    #[serde(default)]
    pub note_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    /// Comma-separated image URLs.
    #[serde(default)]
    pub image_list: Option<String>,
    #[serde(default)]
    pub note_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialAnalysisData {
    #[serde(default)]
    pub note_id: Option<String>,
    #[serde(default)]
    pub analysis: Option<MaterialAnalysis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialAnalysis {
    #[serde(default)]
    pub tags: Option<Value>,
    #[serde(default)]
    pub content_disassembly: Option<Value>,
}

impl MaterialItem {
    /// Image URLs of the note, in order.
    pub fn images(&self) -> Vec<String> {
        self.note
            .as_ref()
            .and_then(|n| n.image_list.as_deref())
            .map(parse_image_list)
            .unwrap_or_default()
    }

    /// First image, used as the cover for type detection.
    pub fn cover_image(&self) -> Option<String> {
        self.images().into_iter().next()
    }

    /// Title to feed the writer. Falls back to the note id, then the keyword.
    pub fn reference_title(&self) -> String {
        if let Some(title) = self.note.as_ref().and_then(|n| n.title.as_deref()) {
            let title = title.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
        if let Some(note_id) = self.analysis.as_ref().and_then(|a| a.note_id.as_deref()) {
            return format!("Reference {}", note_id);
        }
        self.keyword
            .clone()
            .unwrap_or_else(|| "Reference title".to_string())
    }

    /// Structural breakdown from the material analysis, or `{}`.
    pub fn content_structure(&self) -> Value {
        self.analysis
            .as_ref()
            .and_then(|a| a.analysis.as_ref())
            .and_then(|a| a.content_disassembly.clone())
            .unwrap_or_else(|| json!({}))
    }
}

/// Answer to a keyword lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum KeywordLookup {
    /// Keywords were already available.
    Ready(Vec<String>),
    /// Generation was requested; resolve through polling or notification.
    Deferred(DeferredKeywords),
}

/// Handle to keywords being generated by the keyword service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeferredKeywords {
    pub tag: String,
    pub requested_at: DateTime<Utc>,
}

/// Lifecycle of an external material crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MaterialTaskState {
    Pending,
    Ready { found: usize },
    TimedOut,
}

/// Externally tracked "find or create material" job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialTask {
    pub keyword: String,
    /// Id the crawler reports back with (our task id).
    pub job_id: String,
    pub created_at: DateTime<Utc>,
    pub state: MaterialTaskState,
    pub polls: u32,
}

impl MaterialTask {
    pub fn new(keyword: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            job_id: job_id.into(),
            created_at: Utc::now(),
            state: MaterialTaskState::Pending,
            polls: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, MaterialTaskState::Pending)
    }
}

/// Writing route chosen by type detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentRoute {
    /// Both references share a type: rewrite one of them.
    Single,
    /// Mixed types: blend both references.
    Combination,
}

impl ContentRoute {
    /// Route for the two detected types. Missing or differing types blend.
    pub fn from_types(first: Option<&str>, second: Option<&str>) -> Self {
        match (first, second) {
            (Some(a), Some(b)) if !a.is_empty() && a == b && a == "single" => Self::Single,
            _ => Self::Combination,
        }
    }
}

impl std::fmt::Display for ContentRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single => write!(f, "single"),
            Self::Combination => write!(f, "combination"),
        }
    }
}

/// Inputs for the writing workflows. JSON-valued fields are sent as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DraftRequest {
    pub tag: String,
    pub keyword: String,
    pub character: String,
    pub content_structure: String,
    pub title_list: String,
    pub language_style: String,
    pub title_requirement: String,
    pub content_requirement: String,
    pub creative_elements: Vec<Value>,
}

/// Generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRequest {
    pub source_url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRequest {
    /// Serialized note (title, content, images, tag).
    pub content_info: Value,
    pub keywords: String,
}

/// Token accounting reported by a workflow run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Sum of two runs' usage.
    pub fn merged(self, other: TokenUsage) -> TokenUsage {
        TokenUsage {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
            total_tokens: self.total_tokens.saturating_add(other.total_tokens),
        }
    }
}

/// Parsed scoring workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    pub score: Option<f64>,
    /// Result of the consistency checker.
    pub consistent: bool,
    pub content_score: Value,
    pub consistency_checker: Value,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRequest {
    /// Serialized note (title, content, images, tag).
    pub content_info: Value,
}

/// Tags and structural breakdown of a note that passed scoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentAnalysis {
    /// Tags joined into one string.
    pub tags: String,
    pub content_disassembly: Value,
}

/// Parsed content analysis workflow output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub analysis: ContentAnalysis,
    pub usage: TokenUsage,
}
