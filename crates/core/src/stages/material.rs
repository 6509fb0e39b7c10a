//! MATERIAL: gather stored articles for the chosen keyword.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::StageContext;
use crate::pipeline::{MaterialSet, StageError, Task};
use crate::services::{MaterialTask, MaterialTaskState};

pub(super) async fn gather(ctx: &StageContext, task: &Task) -> Result<MaterialSet, StageError> {
    let keyword = task.outputs.require_keywords()?.chosen.clone();

    let items = ctx.material.search_materials(&keyword).await?;
    if !items.is_empty() {
        debug!(
            "Task {}: {} stored material(s) for {:?}",
            task.id,
            items.len(),
            keyword
        );
        return Ok(MaterialSet {
            keyword,
            items,
            crawl: None,
        });
    }

    // Nothing stored yet: start a crawl and wait for it to fill the library.
    ctx.material.create_search_task(&keyword, &task.id).await?;
    let mut crawl = MaterialTask::new(keyword.as_str(), task.id.as_str());
    info!("Task {}: started material crawl for {:?}", task.id, keyword);

    let interval = ctx.config.material_poll_interval();
    let max_wait = ctx.config.material_poll_max();
    let deadline = Instant::now() + max_wait;
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;

        crawl.polls += 1;
        let items = ctx.material.search_materials(&keyword).await?;
        if !items.is_empty() {
            crawl.state = MaterialTaskState::Ready { found: items.len() };
            info!(
                "Task {}: crawl for {:?} produced {} material(s) after {} poll(s)",
                task.id,
                keyword,
                items.len(),
                crawl.polls
            );
            return Ok(MaterialSet {
                keyword,
                items,
                crawl: Some(crawl),
            });
        }
    }

    crawl.state = MaterialTaskState::TimedOut;
    warn!(
        "Task {}: no material for {:?} after {} poll(s)",
        task.id, keyword, crawl.polls
    );
    Err(StageError::DataInsufficiency(format!(
        "no material for keyword {:?} after {}s",
        keyword,
        max_wait.as_secs()
    )))
}
