//! Scriptable mock of the flag service.
//!
//! One axum router on an ephemeral port exposes the three endpoints the
//! SDK talks to:
//! - `/msdk/evalx/users/{user}` and `/msdk/evalx/user` (polling, any method)
//! - `/meval/{user}` and `/meval` (streaming SSE, any method)
//! - `/mobile` (events POST)
//!
//! Poll and stream responses are configured up front; every poll request
//! and event post is recorded for assertions.

use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use futures_util::StreamExt;
use futures_util::stream;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One recorded request against the polling endpoint.
#[derive(Debug, Clone)]
pub struct RecordedPoll {
    pub method: String,
    pub body: String,
}

/// One recorded POST against the events endpoint.
#[derive(Debug, Clone)]
pub struct RecordedEventPost {
    pub authorization: String,
    pub schema: String,
    pub payload_id: String,
    pub body: Value,
}

struct ServiceState {
    poll_status: StatusCode,
    poll_body: Value,
    stream_status: StatusCode,
    stream_warmup: Duration,
    stream_events: Vec<(String, String)>,
    events_fail_first: usize,
    polls: Mutex<Vec<RecordedPoll>>,
    event_posts: Mutex<Vec<RecordedEventPost>>,
}

pub struct MockFlagServiceBuilder {
    poll_status: StatusCode,
    poll_body: Value,
    stream_status: StatusCode,
    stream_warmup: Duration,
    stream_events: Vec<(String, String)>,
    events_fail_first: usize,
}

impl MockFlagServiceBuilder {
    /// Body served by the polling endpoint (a `{key: flag-json}` bundle).
    pub fn poll_flags(mut self, body: Value) -> Self {
        self.poll_body = body;
        self
    }

    pub fn poll_status(mut self, status: StatusCode) -> Self {
        self.poll_status = status;
        self
    }

    pub fn stream_status(mut self, status: StatusCode) -> Self {
        self.stream_status = status;
        self
    }

    /// Delay before the first scripted stream event; a comment keeps the
    /// connection warm in the meantime.
    pub fn stream_warmup(mut self, warmup: Duration) -> Self {
        self.stream_warmup = warmup;
        self
    }

    /// Append one scripted SSE event.  After the script runs dry the
    /// stream stays open with periodic keep-alive comments.
    pub fn stream_event(mut self, name: impl Into<String>, data: impl Into<String>) -> Self {
        self.stream_events.push((name.into(), data.into()));
        self
    }

    /// Respond 503 to this many leading event posts.
    pub fn fail_first_event_posts(mut self, count: usize) -> Self {
        self.events_fail_first = count;
        self
    }

    pub async fn start(self) -> MockFlagService {
        let state = Arc::new(ServiceState {
            poll_status: self.poll_status,
            poll_body: self.poll_body,
            stream_status: self.stream_status,
            stream_warmup: self.stream_warmup,
            stream_events: self.stream_events,
            events_fail_first: self.events_fail_first,
            polls: Mutex::new(Vec::new()),
            event_posts: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/msdk/evalx/users/{user}", any(poll_handler))
            .route("/msdk/evalx/user", any(poll_handler))
            .route("/meval/{user}", any(stream_handler))
            .route("/meval", any(stream_handler))
            .route("/mobile", post(events_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock service");
        let addr = listener.local_addr().expect("mock service addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock service");
        });

        MockFlagService {
            state,
            base_url: format!("http://{addr}"),
        }
    }
}

pub struct MockFlagService {
    state: Arc<ServiceState>,
    base_url: String,
}

impl MockFlagService {
    pub fn builder() -> MockFlagServiceBuilder {
        MockFlagServiceBuilder {
            poll_status: StatusCode::OK,
            poll_body: Value::Object(serde_json::Map::new()),
            stream_status: StatusCode::OK,
            stream_warmup: Duration::ZERO,
            stream_events: Vec::new(),
            events_fail_first: 0,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every request the polling endpoint has seen so far.
    pub fn polls(&self) -> Vec<RecordedPoll> {
        self.state.polls.lock().unwrap().clone()
    }

    /// Every POST the events endpoint has seen so far.
    pub fn event_posts(&self) -> Vec<RecordedEventPost> {
        self.state.event_posts.lock().unwrap().clone()
    }
}

async fn poll_handler(
    State(state): State<Arc<ServiceState>>,
    method: Method,
    body: String,
) -> Response {
    state.polls.lock().unwrap().push(RecordedPoll {
        method: method.to_string(),
        body,
    });
    if state.poll_status != StatusCode::OK {
        return (state.poll_status, "poll rejected").into_response();
    }
    Json(state.poll_body.clone()).into_response()
}

async fn stream_handler(State(state): State<Arc<ServiceState>>) -> Response {
    if state.stream_status != StatusCode::OK {
        return (state.stream_status, "stream rejected").into_response();
    }

    let warmup_delay = state.stream_warmup;
    let warmup = stream::once(async move {
        tokio::time::sleep(warmup_delay).await;
        Ok::<_, Infallible>(Event::default().comment("warmup"))
    });
    let scripted = stream::iter(
        state
            .stream_events
            .clone()
            .into_iter()
            .map(|(name, data)| Ok(Event::default().event(name).data(data)))
            .collect::<Vec<_>>(),
    );
    let events = warmup.chain(scripted).chain(stream::pending());

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(10))
                .text("keepalive"),
        )
        .into_response()
}

async fn events_handler(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned()
    };
    let post = RecordedEventPost {
        authorization: header("authorization"),
        schema: header("x-togglekit-event-schema"),
        payload_id: header("x-togglekit-payload-id"),
        body: serde_json::from_str(&body).unwrap_or(Value::Null),
    };

    let count = {
        let mut posts = state.event_posts.lock().unwrap();
        posts.push(post);
        posts.len()
    };
    if count <= state.events_fail_first {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::ACCEPTED
    }
}
