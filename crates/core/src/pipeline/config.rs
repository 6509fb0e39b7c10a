//! Pipeline configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of tasks executing stages at once, process-wide.
    /// Further tasks wait for a free slot in submission order.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// How often to re-check keywords while generation is pending (milliseconds).
    #[serde(default = "default_keyword_poll_interval")]
    pub keyword_poll_interval_ms: u64,

    /// Give up on pending keywords after this long (milliseconds).
    #[serde(default = "default_keyword_poll_max")]
    pub keyword_poll_max_ms: u64,

    /// How often to re-search while a material crawl is running (milliseconds).
    #[serde(default = "default_material_poll_interval")]
    pub material_poll_interval_ms: u64,

    /// Give up on a material crawl after this long (milliseconds).
    #[serde(default = "default_material_poll_max")]
    pub material_poll_max_ms: u64,

    /// A scored draft passes when its score is above this value and the
    /// consistency check holds.
    #[serde(default = "default_pass_threshold")]
    pub score_pass_threshold: f64,

    /// `user` field sent with every workflow run.
    #[serde(default = "default_workflow_user")]
    pub workflow_user: String,
}

fn default_max_concurrency() -> usize {
    8
}

fn default_keyword_poll_interval() -> u64 {
    3000 // 3 seconds
}

fn default_keyword_poll_max() -> u64 {
    120_000 // 2 minutes
}

fn default_material_poll_interval() -> u64 {
    5000 // 5 seconds
}

fn default_material_poll_max() -> u64 {
    120_000 // 2 minutes
}

fn default_pass_threshold() -> f64 {
    80.0
}

fn default_workflow_user() -> String {
    "workflows".to_string()
}

impl PipelineConfig {
    pub fn keyword_poll_interval(&self) -> Duration {
        Duration::from_millis(self.keyword_poll_interval_ms)
    }

    pub fn keyword_poll_max(&self) -> Duration {
        Duration::from_millis(self.keyword_poll_max_ms)
    }

    pub fn material_poll_interval(&self) -> Duration {
        Duration::from_millis(self.material_poll_interval_ms)
    }

    pub fn material_poll_max(&self) -> Duration {
        Duration::from_millis(self.material_poll_max_ms)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            keyword_poll_interval_ms: default_keyword_poll_interval(),
            keyword_poll_max_ms: default_keyword_poll_max(),
            material_poll_interval_ms: default_material_poll_interval(),
            material_poll_max_ms: default_material_poll_max(),
            score_pass_threshold: default_pass_threshold(),
            workflow_user: default_workflow_user(),
        }
    }
}
