//! IMAGE: regenerate note images from the reference pictures.

use tracing::{debug, warn};

use super::StageContext;
use crate::pipeline::{ImageSet, StageError, Task};
use crate::services::{ContentRoute, ImageRequest};

pub(super) async fn generate(ctx: &StageContext, task: &Task) -> Result<ImageSet, StageError> {
    let refs = task.outputs.require_references()?;
    let draft = task.outputs.require_draft()?;

    // Single route reuses every picture of the rewritten reference; the
    // combination route takes one cover from each.
    let sources: Vec<String> = match draft.route {
        ContentRoute::Single => refs.first.images(),
        ContentRoute::Combination => [refs.first.cover_image(), refs.second.cover_image()]
            .into_iter()
            .flatten()
            .collect(),
    };
    if sources.is_empty() {
        warn!("Task {}: references carry no images", task.id);
    }

    let mut images = Vec::with_capacity(sources.len());
    for source_url in &sources {
        let request = ImageRequest {
            source_url: source_url.clone(),
            title: draft.title.clone(),
        };
        if let Some(url) = ctx.workflow.generate_image(&request).await? {
            images.push(url);
        }
    }
    debug!(
        "Task {}: generated {}/{} image(s)",
        task.id,
        images.len(),
        sources.len()
    );

    Ok(ImageSet {
        images,
        requested: sources.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::gateway::CallError;
    use crate::notifier::KeywordNotifier;
    use crate::pipeline::{DraftOutput, ErrorKind, ReferencePair, Stage};
    use crate::testing::{fixtures, MockMaterialService, MockWorkflowService};

    fn context(workflow: &MockWorkflowService) -> StageContext {
        StageContext::new(
            Arc::new(MockMaterialService::new()),
            Arc::new(workflow.clone()),
            KeywordNotifier::new(),
            fixtures::fast_pipeline_config(),
        )
    }

    fn task_at_image(route: ContentRoute) -> Task {
        let mut task = Task::new("batch", 0, fixtures::persona("p-1", &["travel"]));
        task.stage = Stage::Image;
        task.outputs.references = Some(ReferencePair {
            first: fixtures::material_item(1, "beach"),
            second: fixtures::material_item(2, "beach"),
        });
        task.outputs.draft = Some(DraftOutput {
            route,
            title: "Sunny days".into(),
            content: "...".into(),
        });
        task
    }

    #[tokio::test]
    async fn test_single_route_uses_all_first_reference_images() {
        let workflow = MockWorkflowService::new();
        let set = generate(&context(&workflow), &task_at_image(ContentRoute::Single))
            .await
            .unwrap();

        assert_eq!(set.requested, 2);
        assert_eq!(set.images.len(), 2);
        let sources: Vec<String> = workflow
            .log()
            .calls_to("generate_image")
            .await
            .into_iter()
            .map(|c| c.argument)
            .collect();
        assert_eq!(
            sources,
            vec!["http://img.test/1/cover.jpg", "http://img.test/1/detail.jpg"]
        );
    }

    #[tokio::test]
    async fn test_combination_route_uses_each_cover() {
        let workflow = MockWorkflowService::new();
        generate(&context(&workflow), &task_at_image(ContentRoute::Combination))
            .await
            .unwrap();

        let sources: Vec<String> = workflow
            .log()
            .calls_to("generate_image")
            .await
            .into_iter()
            .map(|c| c.argument)
            .collect();
        assert_eq!(
            sources,
            vec!["http://img.test/1/cover.jpg", "http://img.test/2/cover.jpg"]
        );
    }

    #[tokio::test]
    async fn test_missing_outputs_are_skipped() {
        let workflow = MockWorkflowService::new();
        workflow.set_images_missing(true).await;

        let set = generate(&context(&workflow), &task_at_image(ContentRoute::Single))
            .await
            .unwrap();
        assert!(set.images.is_empty());
        assert_eq!(set.requested, 2);
    }

    #[tokio::test]
    async fn test_image_failure_fails_stage() {
        let workflow = MockWorkflowService::new();
        let timeout = CallError::Timeout(std::time::Duration::from_secs(60));
        workflow.fail_method("generate_image", timeout).await;

        let err = generate(&context(&workflow), &task_at_image(ContentRoute::Single))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }
}
