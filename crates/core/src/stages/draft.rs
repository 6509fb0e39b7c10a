//! DRAFT: pick a writing route and generate the note text.

use serde_json::{json, Value};
use tracing::debug;

use super::StageContext;
use crate::pipeline::{DraftOutput, Persona, ReferencePair, StageError, Task};
use crate::services::{ContentRoute, DraftRequest};

pub(super) async fn write(ctx: &StageContext, task: &Task) -> Result<DraftOutput, StageError> {
    let keywords = task.outputs.require_keywords()?;
    let refs = task.outputs.require_references()?;

    let route = match (refs.first.cover_image(), refs.second.cover_image()) {
        (Some(first), Some(second)) => ctx.workflow.detect_route(&first, &second).await?,
        _ => {
            debug!(
                "Task {}: a reference has no cover image, blending both",
                task.id
            );
            ContentRoute::Combination
        }
    };

    let request = build_request(
        &task.persona,
        &keywords.tag,
        &keywords.chosen,
        route,
        refs,
    );
    let draft = ctx.workflow.write_draft(route, &request).await?;

    let title = if draft.title.trim().is_empty() {
        refs.first.reference_title()
    } else {
        draft.title
    };
    debug!("Task {}: {} draft {:?}", task.id, route, title);

    Ok(DraftOutput {
        route,
        title,
        content: draft.content,
    })
}

/// Writer inputs. The single route rewrites the first reference; the
/// combination route blends both.
fn build_request(
    persona: &Persona,
    tag: &str,
    keyword: &str,
    route: ContentRoute,
    refs: &ReferencePair,
) -> DraftRequest {
    let (structure, titles) = match route {
        ContentRoute::Single => (
            refs.first.content_structure(),
            Value::String(refs.first.reference_title()),
        ),
        ContentRoute::Combination => (
            json!([refs.first.content_structure(), refs.second.content_structure()]),
            json!([refs.first.reference_title(), refs.second.reference_title()]),
        ),
    };
    let character = json!({
        "tag": persona.tags,
        "persona_info": persona.persona_info,
    });

    DraftRequest {
        tag: tag.to_string(),
        keyword: keyword.to_string(),
        character: character.to_string(),
        content_structure: structure.to_string(),
        title_list: titles.to_string(),
        language_style: persona.language_style.clone(),
        title_requirement: persona.title_requirement.clone(),
        content_requirement: persona.content_requirement.clone(),
        creative_elements: persona.creative_elements.clone(),
    }
}
