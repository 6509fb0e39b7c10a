//! Stub HTTP upstream for integration tests.
//!
//! Serves scripted responses on an ephemeral local port and records every
//! request it receives.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::Router;
use tokio::net::TcpListener;

/// A request as seen by the stub.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: Method,
    /// Path as sent, still percent-encoded.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: String,
}

impl SeenRequest {
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(String::from)
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or(serde_json::Value::Null)
    }
}

/// Front is served next; the last entry keeps being served.
type Script = VecDeque<(u16, String)>;

fn script(responses: Vec<(u16, &str)>) -> Script {
    responses
        .into_iter()
        .map(|(status, body)| (status, body.to_string()))
        .collect()
}

fn next_reply(responses: &mut Script) -> (u16, String) {
    if responses.len() > 1 {
        responses.pop_front().unwrap_or((200, String::new()))
    } else {
        responses.front().cloned().unwrap_or((200, String::new()))
    }
}

#[derive(Default)]
struct StubInner {
    responses: Script,
    /// Scripts for exact paths, checked before `responses`.
    routes: Vec<(String, Script)>,
    delay: Option<Duration>,
    seen: Vec<SeenRequest>,
}

#[derive(Clone, Default)]
struct StubState {
    inner: Arc<Mutex<StubInner>>,
}

pub struct StubUpstream {
    pub url: String,
    state: StubState,
}

impl StubUpstream {
    /// Start a stub answering with `responses` in order.
    pub async fn start(responses: Vec<(u16, &str)>) -> Self {
        let state = StubState::default();
        state.inner.lock().unwrap().responses = script(responses);

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    /// Stub that always answers `status` with `body`.
    pub async fn always(status: u16, body: &str) -> Self {
        Self::start(vec![(status, body)]).await
    }

    /// Answer requests for exactly `path` with their own script.
    pub fn route(&self, path: &str, responses: Vec<(u16, &str)>) {
        self.state
            .inner
            .lock()
            .unwrap()
            .routes
            .push((path.to_string(), script(responses)));
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }

    /// Delay every response.
    pub fn set_delay(&self, delay: Duration) {
        self.state.inner.lock().unwrap().delay = Some(delay);
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.state.inner.lock().unwrap().seen.clone()
    }

    pub fn hits(&self) -> usize {
        self.state.inner.lock().unwrap().seen.len()
    }

    pub fn hits_on(&self, path: &str) -> usize {
        self.requests().iter().filter(|r| r.path == path).count()
    }
}

async fn handle(
    State(state): State<StubState>,
    method: Method,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let (delay, (status, reply)) = {
        let mut guard = state.inner.lock().unwrap();
        let inner = &mut *guard;
        let path = uri.path().to_string();
        let reply = match inner.routes.iter_mut().find(|(p, _)| *p == path) {
            Some((_, responses)) => next_reply(responses),
            None => next_reply(&mut inner.responses),
        };
        inner.seen.push(SeenRequest {
            method,
            path,
            query: uri.query().map(String::from),
            headers,
            body,
        });
        (inner.delay, reply)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        reply,
    )
}

/// An address nothing listens on.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
