//! TAG_KEYWORDS: pick a tag and resolve its keywords.
//!
//! Stored keywords are used directly. Otherwise generation is requested and
//! the stage waits, re-checking on a fixed interval and immediately whenever
//! the keyword service reports the tag ready, until the deadline passes.

use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StageContext;
use crate::metrics;
use crate::notifier::KeywordSubscription;
use crate::pipeline::{KeywordSet, KeywordSource, StageError, Task};
use crate::services::parse::dedup_preserve_order;

pub(super) async fn resolve(ctx: &StageContext, task: &Task) -> Result<KeywordSet, StageError> {
    let tags = dedup_preserve_order(&task.persona.tags);
    let tag = {
        let mut rng = rand::thread_rng();
        tags.choose(&mut rng).cloned()
    }
    .ok_or_else(|| StageError::DataInsufficiency("persona has no tags".to_string()))?;

    // Subscribe before the first lookup so a fast callback is not missed.
    let subscription = ctx.notifier.subscribe(&tag);
    let stored = ctx.material.fetch_keywords(&tag).await?;
    let (keywords, source) = if stored.is_empty() {
        if ctx.notifier.begin_request(&subscription) {
            info!(
                "Task {}: no keywords stored for tag {:?}, requesting generation",
                task.id, tag
            );
            if let Err(e) = ctx.material.request_keywords(&[tag.clone()]).await {
                ctx.notifier.release_request(&tag);
                return Err(e.into());
            }
        } else {
            debug!(
                "Task {}: generation for tag {:?} already requested, waiting",
                task.id, tag
            );
        }
        wait_for_keywords(ctx, &tag, subscription).await?
    } else {
        (stored, KeywordSource::Immediate)
    };

    let keywords = dedup_preserve_order(&keywords);
    let chosen = {
        let mut rng = rand::thread_rng();
        keywords.choose(&mut rng).cloned()
    }
    .ok_or_else(|| StageError::DataInsufficiency(format!("tag {:?} has no keywords", tag)))?;

    debug!(
        "Task {}: tag {:?} resolved {} keyword(s) via {}, using {:?}",
        task.id,
        tag,
        keywords.len(),
        source.as_str(),
        chosen
    );

    Ok(KeywordSet {
        tag,
        keywords,
        chosen,
        source,
    })
}

async fn wait_for_keywords(
    ctx: &StageContext,
    tag: &str,
    mut subscription: KeywordSubscription,
) -> Result<(Vec<String>, KeywordSource), StageError> {
    let interval = ctx.config.keyword_poll_interval();
    let max_wait = ctx.config.keyword_poll_max();
    let deadline = Instant::now() + max_wait;
    let mut listening = true;

    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        let sleep_for = interval.min(deadline - now);

        let woke_by = tokio::select! {
            _ = tokio::time::sleep(sleep_for) => Some(KeywordSource::Poll),
            notified = subscription.notified(), if listening => {
                if notified {
                    Some(KeywordSource::Notification)
                } else {
                    listening = false;
                    None
                }
            }
        };
        let Some(source) = woke_by else {
            continue;
        };

        let keywords = ctx.material.fetch_keywords(tag).await?;
        if !keywords.is_empty() {
            metrics::KEYWORD_WAITS
                .with_label_values(&[source.as_str()])
                .inc();
            return Ok((keywords, source));
        }
        if source == KeywordSource::Notification {
            debug!("Tag {:?} notified but still has no keywords", tag);
        }
    }

    metrics::KEYWORD_WAITS.with_label_values(&["timeout"]).inc();
    warn!("Keywords for tag {:?} not ready after {:?}", tag, max_wait);
    Err(StageError::DataInsufficiency(format!(
        "no keywords for tag {:?} after {}s",
        tag,
        max_wait.as_secs()
    )))
}
