//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process router
//! backed by an orchestrator wired to mock material and workflow services,
//! so batches run end to end without external infrastructure.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use contentflow_core::audit::SqliteAuditStore;
use contentflow_core::gateway::{Backoff, CallPolicy};
use contentflow_core::pipeline::PipelineConfig;
use contentflow_core::stages::StageContext;
use contentflow_core::testing::{MockMaterialService, MockWorkflowService};
use contentflow_core::{
    create_audit_system, load_config_from_str, AuditStore, CallbackDispatcher, HttpGateway,
    KeywordNotifier, Orchestrator,
};
use contentflow_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use contentflow_core::testing::fixtures;

/// Service sections every config needs.
pub const BASE_CONFIG: &str = r#"
[material]
base_url = "http://materials.local"
keyword_service_url = "http://keywords.local"

[generation]
base_url = "http://dify.local"
type_detect_token = "app-type-detect"
single_write_token = "app-single-write"
combo_write_token = "app-combo-write"
single_image_token = "app-single-image"

[scoring]
base_url = "http://scoring.local"
token = "app-scoring"
"#;

/// Test fixture for API testing with mock dependencies.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_generate() {
///     let fixture = TestFixture::new().await;
///     fixture.seed("travel", "beach").await;
///
///     let response = fixture.post("/api/v1/content/generate", json!({
///         "personas": [{"persona_id": "p-1", "tags": ["travel"]}],
///         "wait": true
///     })).await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub orchestrator: Arc<Orchestrator>,
    /// Mock material library - configure keywords and materials
    pub material: MockMaterialService,
    /// Mock workflow platform - configure routes and scores
    pub workflow: MockWorkflowService,
    pub audit_store: Arc<dyn AuditStore>,
    /// Temporary directory for the audit database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    /// Raw body, for non-JSON responses
    pub text: String,
}

impl TestFixture {
    /// Create a new test fixture with fast polling.
    pub async fn new() -> Self {
        Self::with_pipeline(fixtures::fast_pipeline_config()).await
    }

    /// Create a test fixture with custom pipeline settings.
    pub async fn with_pipeline(pipeline: PipelineConfig) -> Self {
        Self::build(pipeline, None).await
    }

    /// Create a test fixture that delivers callbacks to `url`.
    pub async fn with_callback(url: &str) -> Self {
        Self::build(fixtures::fast_pipeline_config(), Some(url.to_string())).await
    }

    async fn build(pipeline: PipelineConfig, callback_url: Option<String>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = load_config_from_str(BASE_CONFIG).expect("Failed to parse config");
        config.database.path = db_path.clone();
        config.pipeline = pipeline.clone();

        // Create audit store and system
        let audit_store: Arc<dyn AuditStore> = Arc::new(
            SqliteAuditStore::new(&db_path).expect("Failed to create audit store"),
        );
        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        // Mocks behind the stages
        let material = MockMaterialService::new();
        let workflow = MockWorkflowService::new();
        let ctx = StageContext::new(
            Arc::new(material.clone()),
            Arc::new(workflow.clone()),
            KeywordNotifier::new(),
            pipeline,
        );
        let policy = CallPolicy::default()
            .with_max_retries(1)
            .with_backoff(Backoff::Fixed, Duration::from_millis(5));
        let dispatcher = CallbackDispatcher::new(
            HttpGateway::new().expect("Failed to create gateway"),
            callback_url,
            policy,
        )
        .with_audit(audit_handle.clone());
        let orchestrator = Arc::new(Orchestrator::new(ctx, dispatcher, Some(audit_handle)));

        let state = Arc::new(AppState::new(
            config,
            Arc::clone(&orchestrator),
            Arc::clone(&audit_store),
        ));
        let router = create_router(state);

        Self {
            router,
            orchestrator,
            material,
            workflow,
            audit_store,
            temp_dir,
        }
    }

    /// Keywords and three articles for `tag`, using `keyword`.
    pub async fn seed(&self, tag: &str, keyword: &str) {
        self.material.set_keywords(tag, vec![keyword.to_string()]).await;
        self.material
            .set_materials(keyword, fixtures::materials(keyword, 3))
            .await;
    }

    /// Send a GET request to the test router.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Poll `path` until `done` accepts the response.
    pub async fn get_until(
        &self,
        path: &str,
        done: impl Fn(&TestResponse) -> bool,
    ) -> TestResponse {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let response = self.get(path).await;
            if done(&response) {
                return response;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out polling {}, last body: {}",
                path,
                response.body
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }
}

/// Callback receiver answering every POST with a status the test can change.
#[derive(Clone)]
pub struct Consumer {
    pub url: String,
    status: Arc<AtomicU16>,
    hits: Arc<AtomicUsize>,
}

impl Consumer {
    pub async fn start(status: u16) -> Self {
        let status = Arc::new(AtomicU16::new(status));
        let hits = Arc::new(AtomicUsize::new(0));
        let (reply, counter) = (Arc::clone(&status), Arc::clone(&hits));
        let app = Router::new().route(
            "/callback",
            post(move || {
                let (reply, counter) = (Arc::clone(&reply), Arc::clone(&counter));
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StatusCode::from_u16(reply.load(Ordering::SeqCst))
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            url: format!("http://{}/callback", addr),
            status,
            hits,
        }
    }

    pub fn respond_with(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
