use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::gateway::{Backoff, CallPolicy};
use crate::pipeline::PipelineConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Default policy for every outbound stage call.
    #[serde(default)]
    pub gateway: CallPolicy,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub material: MaterialConfig,
    pub generation: GenerationConfig,
    pub scoring: ScoringConfig,
    /// Content analysis of notes that pass scoring. Skipped when unset.
    #[serde(default)]
    pub analysis: Option<AnalysisConfig>,
    #[serde(default)]
    pub callback: CallbackConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8801
}

/// Audit database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("contentflow.db")
}

/// Material library and keyword service endpoints
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaterialConfig {
    /// Material library base URL (e.g., "http://10.0.0.5:8010")
    pub base_url: String,
    /// Keyword generation service base URL
    pub keyword_service_url: String,
}

/// Dify generation workflows (type detection, writing, images).
///
/// All workflows share one base URL; each is selected by its app token.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    pub base_url: String,
    #[serde(default = "default_workflow_path")]
    pub path: String,
    pub type_detect_token: String,
    pub single_write_token: String,
    pub combo_write_token: String,
    pub single_image_token: String,
}

/// Dify scoring workflow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScoringConfig {
    pub base_url: String,
    #[serde(default = "default_workflow_path")]
    pub path: String,
    pub token: String,
    #[serde(default = "default_response_mode")]
    pub response_mode: String,
}

/// Dify content analysis workflow (tags and structural breakdown)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalysisConfig {
    pub base_url: String,
    #[serde(default = "default_workflow_path")]
    pub path: String,
    pub token: String,
    #[serde(default = "default_response_mode")]
    pub response_mode: String,
}

fn default_workflow_path() -> String {
    "/v1/workflows/run".to_string()
}

fn default_response_mode() -> String {
    "blocking".to_string()
}

/// Callback consumer configuration.
///
/// Delivery uses its own timeout and retry budget, independent of `gateway`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CallbackConfig {
    /// Callback URL. When unset, envelopes are built but not delivered.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_callback_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_callback_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub backoff: Backoff,
    #[serde(default = "default_callback_delay")]
    pub base_delay_ms: u64,
}

impl CallbackConfig {
    /// Call policy used for every delivery attempt.
    pub fn policy(&self) -> CallPolicy {
        CallPolicy::default()
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.max_retries)
            .with_backoff(self.backoff, Duration::from_millis(self.base_delay_ms))
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: default_callback_timeout(),
            max_retries: default_callback_retries(),
            backoff: Backoff::default(),
            base_delay_ms: default_callback_delay(),
        }
    }
}

fn default_callback_timeout() -> u64 {
    10_000
}

fn default_callback_retries() -> u32 {
    2
}

fn default_callback_delay() -> u64 {
    500
}

/// Sanitized config for API responses (tokens redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub gateway: CallPolicy,
    pub pipeline: PipelineConfig,
    pub material: MaterialConfig,
    pub generation: SanitizedGenerationConfig,
    pub scoring: SanitizedWorkflowConfig,
    pub analysis: Option<SanitizedWorkflowConfig>,
    pub callback: CallbackConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGenerationConfig {
    pub base_url: String,
    pub path: String,
    pub type_detect_token_configured: bool,
    pub single_write_token_configured: bool,
    pub combo_write_token_configured: bool,
    pub single_image_token_configured: bool,
}

/// A single-token workflow with its token redacted.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedWorkflowConfig {
    pub base_url: String,
    pub path: String,
    pub token_configured: bool,
    pub response_mode: String,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let generation = &config.generation;
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            gateway: config.gateway.clone(),
            pipeline: config.pipeline.clone(),
            material: config.material.clone(),
            generation: SanitizedGenerationConfig {
                base_url: generation.base_url.clone(),
                path: generation.path.clone(),
                type_detect_token_configured: !generation.type_detect_token.is_empty(),
                single_write_token_configured: !generation.single_write_token.is_empty(),
                combo_write_token_configured: !generation.combo_write_token.is_empty(),
                single_image_token_configured: !generation.single_image_token.is_empty(),
            },
            scoring: SanitizedWorkflowConfig {
                base_url: config.scoring.base_url.clone(),
                path: config.scoring.path.clone(),
                token_configured: !config.scoring.token.is_empty(),
                response_mode: config.scoring.response_mode.clone(),
            },
            analysis: config.analysis.as_ref().map(|a| SanitizedWorkflowConfig {
                base_url: a.base_url.clone(),
                path: a.path.clone(),
                token_configured: !a.token.is_empty(),
                response_mode: a.response_mode.clone(),
            }),
            callback: config.callback.clone(),
        }
    }
}
