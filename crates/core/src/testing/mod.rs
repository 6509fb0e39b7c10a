//! Testing utilities and mock implementations of the external services.
//!
//! The mocks let the whole pipeline run without the material library or the
//! workflow platform.
//!
//! # Example
//!
//! ```rust,ignore
//! use contentflow_core::testing::{fixtures, MockMaterialService, MockWorkflowService};
//!
//! let material = MockMaterialService::new();
//! let workflow = MockWorkflowService::new();
//!
//! material.set_keywords("travel", vec!["beach".into()]).await;
//! material.set_materials("beach", fixtures::materials("beach", 3)).await;
//!
//! // Build a StageContext from them...
//! ```

mod call_log;
mod mock_material;
mod mock_workflow;

pub use call_log::{CallLog, RecordedCall};
pub use mock_material::MockMaterialService;
pub use mock_workflow::MockWorkflowService;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::json;

    use crate::pipeline::{Persona, PipelineConfig};
    use crate::services::{
        MaterialAnalysis, MaterialAnalysisData, MaterialItem, MaterialNote,
    };

    /// A persona with the given id and candidate tags.
    pub fn persona(persona_id: &str, tags: &[&str]) -> Persona {
        Persona {
            persona_id: persona_id.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            persona_info: json!({"name": persona_id, "age": 28}),
            language_style: "casual".to_string(),
            title_requirement: "under 20 characters".to_string(),
            content_requirement: "three short paragraphs".to_string(),
            creative_elements: vec![json!("emoji")],
        }
    }

    /// A stored article for `keyword` with two images.
    pub fn material_item(id: i64, keyword: &str) -> MaterialItem {
        let note_id = format!("note-{}", id);
        MaterialItem {
            id,
            keyword: Some(keyword.to_string()),
            note: Some(MaterialNote {
                note_id: Some(note_id.clone()),
                title: Some(format!("{} story #{}", keyword, id)),
                desc: Some(format!("Everything about {}.", keyword)),
                image_list: Some(format!(
                    "http://img.test/{id}/cover.jpg,http://img.test/{id}/detail.jpg"
                )),
                note_url: Some(format!("http://notes.test/{}", note_id)),
            }),
            analysis: Some(MaterialAnalysisData {
                note_id: Some(note_id),
                analysis: Some(MaterialAnalysis {
                    tags: Some(json!([keyword])),
                    content_disassembly: Some(json!({"opening": "question", "id": id})),
                }),
            }),
        }
    }

    /// `count` stored articles for `keyword`.
    pub fn materials(keyword: &str, count: usize) -> Vec<MaterialItem> {
        (1..=count as i64).map(|id| material_item(id, keyword)).collect()
    }

    /// Pipeline settings with millisecond polling for fast tests.
    pub fn fast_pipeline_config() -> PipelineConfig {
        PipelineConfig {
            max_concurrency: 4,
            keyword_poll_interval_ms: 20,
            keyword_poll_max_ms: 400,
            material_poll_interval_ms: 20,
            material_poll_max_ms: 400,
            ..PipelineConfig::default()
        }
    }
}
