//! Material library and keyword service client.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::traits::MaterialService;
use super::types::MaterialItem;
use crate::config::MaterialConfig;
use crate::gateway::{CallError, CallPolicy, Endpoint, HttpGateway};

/// HTTP client for the material library (`/material_library/*`) and the
/// keyword generation service (`/keywords_generate`).
pub struct MaterialClient {
    gateway: HttpGateway,
    config: MaterialConfig,
    policy: CallPolicy,
}

impl MaterialClient {
    pub fn new(gateway: HttpGateway, config: MaterialConfig, policy: CallPolicy) -> Self {
        Self {
            gateway,
            config,
            policy,
        }
    }

    fn material_url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn keyword_url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.config.keyword_service_url.trim_end_matches('/'),
            path
        )
    }
}

/// The library wraps payloads as `{"code": 0, "msg": "...", "data": [...]}`.
fn data_array(body: &Value) -> &[Value] {
    body.get("data")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

#[async_trait]
impl MaterialService for MaterialClient {
    async fn fetch_keywords(&self, tag: &str) -> Result<Vec<String>, CallError> {
        let url = self.material_url(&format!(
            "/material_library/keywords/{}",
            urlencoding::encode(tag)
        ));
        let response = self
            .gateway
            .call(&Endpoint::get(url), None, &self.policy)
            .await?;

        let keywords: Vec<String> = data_array(&response.body)
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect();

        debug!("Tag {} has {} stored keyword(s)", tag, keywords.len());
        Ok(keywords)
    }

    async fn request_keywords(&self, tags: &[String]) -> Result<(), CallError> {
        let url = self.keyword_url("/keywords_generate");
        let payload = json!({ "tags": tags });
        self.gateway
            .call(&Endpoint::post(url).accept_any_body(), Some(&payload), &self.policy)
            .await?;
        info!("Requested keyword generation for {:?}", tags);
        Ok(())
    }

    async fn search_materials(&self, keyword: &str) -> Result<Vec<MaterialItem>, CallError> {
        let url = self.material_url("/material_library/search/tags");
        let payload = json!({ "key_word": keyword });
        let response = self
            .gateway
            .call(&Endpoint::post(url), Some(&payload), &self.policy)
            .await?;

        let mut items = Vec::new();
        for raw in data_array(&response.body) {
            match serde_json::from_value::<MaterialItem>(raw.clone()) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping unreadable material for {:?}: {}", keyword, e),
            }
        }
        debug!("Keyword {:?} matched {} material(s)", keyword, items.len());
        Ok(items)
    }

    async fn create_search_task(&self, keyword: &str, task_id: &str) -> Result<(), CallError> {
        let url = self.material_url("/material_library/create_search_task");
        let payload = json!({ "keyword": keyword, "kox_task_id": task_id });
        self.gateway
            .call(&Endpoint::post(url).accept_any_body(), Some(&payload), &self.policy)
            .await?;
        info!(
            "Created material search task for {:?} (task {})",
            keyword, task_id
        );
        Ok(())
    }
}
