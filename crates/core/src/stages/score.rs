//! SCORE: grade the finished note, analyze it when it passes, and rank
//! notes within a batch.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::json;
use tracing::debug;

use super::StageContext;
use crate::pipeline::{ScoreOutput, StageError, Task};
use crate::services::{AnalysisRequest, ScoreRequest};

pub(super) async fn evaluate(ctx: &StageContext, task: &Task) -> Result<ScoreOutput, StageError> {
    let keywords = task.outputs.require_keywords()?;
    let draft = task.outputs.require_draft()?;
    let images = task.outputs.require_images()?;

    let request = ScoreRequest {
        content_info: json!({
            "title": draft.title,
            "content": draft.content,
            "img_list": images.images,
            "tag": keywords.tag,
        }),
        keywords: keywords.chosen.clone(),
    };
    let report = ctx.workflow.score(&request).await?;

    let passed = report.consistent
        && report
            .score
            .is_some_and(|score| score > ctx.config.score_pass_threshold);
    debug!(
        "Task {}: score {:?}, consistent {}, passed {}",
        task.id, report.score, report.consistent, passed
    );

    // Only passing notes are analyzed; their usage covers both workflows.
    let mut usage = report.usage;
    let mut analysis = None;
    if passed {
        let request = AnalysisRequest {
            content_info: request.content_info,
        };
        if let Some(analyzed) = ctx.workflow.analyze(&request).await? {
            debug!("Task {}: analysis tags {:?}", task.id, analyzed.analysis.tags);
            usage = usage.merged(analyzed.usage);
            analysis = Some(analyzed.analysis);
        }
    }

    Ok(ScoreOutput {
        score: report.score,
        passed,
        consistent: report.consistent,
        details: json!({
            "content_score": report.content_score,
            "consistency_checker": report.consistency_checker,
        }),
        analysis,
        usage,
    })
}

/// Rank scored entries, given as `(submission index, score)`.
///
/// Higher scores rank first, entries without a finite score last, and ties
/// keep submission order. Returns submission index to 1-based rank.
pub fn rank_by_score(entries: &[(usize, Option<f64>)]) -> HashMap<usize, usize> {
    let mut ordered: Vec<(usize, Option<f64>)> = entries
        .iter()
        .map(|&(index, score)| (index, score.filter(|s| s.is_finite())))
        .collect();
    ordered.sort_by(|a, b| {
        let by_score = match (a.1, b.1) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_score.then(a.0.cmp(&b.0))
    });
    ordered
        .into_iter()
        .enumerate()
        .map(|(position, (index, _))| (index, position + 1))
        .collect()
}
