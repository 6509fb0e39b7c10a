//! Mock material library for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::call_log::CallLog;
use crate::gateway::CallError;
use crate::services::{MaterialItem, MaterialService};

/// Answers scripted per key. The front answer is consumed on each lookup
/// except the last one, which keeps being returned.
type Script<T> = Arc<RwLock<HashMap<String, VecDeque<Vec<T>>>>>;

async fn next_answer<T: Clone>(script: &Script<T>, key: &str) -> Vec<T> {
    let mut script = script.write().await;
    match script.get_mut(key) {
        Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
        Some(queue) => queue.front().cloned().unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Mock implementation of the MaterialService trait.
///
/// Unknown tags have no keywords and unknown keywords have no materials.
///
/// # Example
///
/// ```rust,ignore
/// let material = MockMaterialService::new();
/// // Empty on the first two lookups, then generated.
/// material
///     .script_keywords("travel", vec![vec![], vec![], vec!["beach".into()]])
///     .await;
/// material.set_materials("beach", fixtures::materials("beach", 3)).await;
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockMaterialService {
    keywords: Script<String>,
    materials: Script<MaterialItem>,
    log: CallLog,
    /// If set, the next call of any method fails with this error.
    next_error: Arc<RwLock<Option<CallError>>>,
    /// Methods that always fail.
    failures: Arc<RwLock<HashMap<&'static str, CallError>>>,
    delay: Arc<RwLock<Option<Duration>>>,
}

impl MockMaterialService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keywords stored for `tag` from now on.
    pub async fn set_keywords(&self, tag: &str, keywords: Vec<String>) {
        self.script_keywords(tag, vec![keywords]).await;
    }

    /// Successive answers for `tag`.
    pub async fn script_keywords(&self, tag: &str, answers: Vec<Vec<String>>) {
        self.keywords
            .write()
            .await
            .insert(tag.to_string(), answers.into());
    }

    /// Materials stored for `keyword` from now on.
    pub async fn set_materials(&self, keyword: &str, items: Vec<MaterialItem>) {
        self.script_materials(keyword, vec![items]).await;
    }

    /// Successive search answers for `keyword`.
    pub async fn script_materials(&self, keyword: &str, answers: Vec<Vec<MaterialItem>>) {
        self.materials
            .write()
            .await
            .insert(keyword.to_string(), answers.into());
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: CallError) {
        *self.next_error.write().await = Some(error);
    }

    /// Make every call of `method` fail with the given error.
    pub async fn fail_method(&self, method: &'static str, error: CallError) {
        self.failures.write().await.insert(method, error);
    }

    /// Delay every call by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = Some(delay);
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    async fn prepare(&self, method: &'static str) -> Result<(), CallError> {
        if let Some(delay) = *self.delay.read().await {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if let Some(err) = self.failures.read().await.get(method) {
            return Err(err.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl MaterialService for MockMaterialService {
    async fn fetch_keywords(&self, tag: &str) -> Result<Vec<String>, CallError> {
        let call = self.log.start("fetch_keywords", tag);
        let result = match self.prepare("fetch_keywords").await {
            Ok(()) => Ok(next_answer(&self.keywords, tag).await),
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn request_keywords(&self, tags: &[String]) -> Result<(), CallError> {
        let call = self.log.start("request_keywords", tags.join(","));
        let result = self.prepare("request_keywords").await;
        call.finish().await;
        result
    }

    async fn search_materials(&self, keyword: &str) -> Result<Vec<MaterialItem>, CallError> {
        let call = self.log.start("search_materials", keyword);
        let result = match self.prepare("search_materials").await {
            Ok(()) => Ok(next_answer(&self.materials, keyword).await),
            Err(e) => Err(e),
        };
        call.finish().await;
        result
    }

    async fn create_search_task(&self, keyword: &str, _task_id: &str) -> Result<(), CallError> {
        let call = self.log.start("create_search_task", keyword);
        let result = self.prepare("create_search_task").await;
        call.finish().await;
        result
    }
}
