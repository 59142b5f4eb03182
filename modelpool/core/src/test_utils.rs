//! Strategy Test Utilities
//!
//! A scripted [`Dispatcher`] for exercising strategies without network I/O.
//! Every endpoint gets a [`MockBehavior`] (succeed, fail, hang until cancelled,
//! or a scripted chunk stream); every call is recorded for verification.
//!
//! # Usage
//!
//! ```ignore
//! let dispatcher = ScriptedDispatcher::new()
//!     .with_behavior("primary", MockBehavior::fail(500, "boom"))
//!     .with_behavior("backup", MockBehavior::succeed("hello"));
//! let ctx = context(vec![endpoint("primary", 1), endpoint("backup", 2)], &dispatcher);
//!
//! // After the call, verify which endpoints were hit
//! assert_eq!(dispatcher.calls(), vec!["primary", "backup"]);
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchChunk, DispatchRequest, DispatchResult, Dispatcher};
use crate::endpoint::Endpoint;
use crate::health::HealthTracker;
use crate::strategy::DispatchContext;

// ============================================================================
// Behaviors
// ============================================================================

/// What a mock endpoint does when called
#[derive(Clone, Debug)]
pub enum MockBehavior {
    /// Answer with `body` after `delay`, reporting `latency_ms`
    Succeed {
        body: String,
        delay: Duration,
        latency_ms: u64,
    },
    /// Fail with `status` after `delay`
    Fail {
        status: u16,
        message: String,
        delay: Duration,
    },
    /// Block until the call is cancelled
    Hang,
    /// Emit `chunks`, waiting `delay` before each
    Stream {
        chunks: Vec<DispatchChunk>,
        delay: Duration,
    },
}

impl MockBehavior {
    pub fn succeed(body: impl Into<String>) -> Self {
        Self::Succeed {
            body: body.into(),
            delay: Duration::ZERO,
            latency_ms: 1,
        }
    }

    pub fn succeed_after(body: impl Into<String>, delay: Duration) -> Self {
        Self::Succeed {
            body: body.into(),
            delay,
            latency_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Immediate success reporting an arbitrary latency
    pub fn succeed_reporting(body: impl Into<String>, latency_ms: u64) -> Self {
        Self::Succeed {
            body: body.into(),
            delay: Duration::ZERO,
            latency_ms,
        }
    }

    pub fn fail(status: u16, message: impl Into<String>) -> Self {
        Self::Fail {
            status,
            message: message.into(),
            delay: Duration::ZERO,
        }
    }

    pub fn fail_after(status: u16, message: impl Into<String>, delay: Duration) -> Self {
        Self::Fail {
            status,
            message: message.into(),
            delay,
        }
    }

    pub fn stream(chunks: Vec<DispatchChunk>) -> Self {
        Self::Stream {
            chunks,
            delay: Duration::ZERO,
        }
    }

    pub fn stream_after(chunks: Vec<DispatchChunk>, delay: Duration) -> Self {
        Self::Stream { chunks, delay }
    }
}

/// `Done` chunk with a stop reason
pub fn done() -> DispatchChunk {
    DispatchChunk::Done {
        finish_reason: Some("stop".to_string()),
        usage: None,
    }
}

/// `Text` chunk
pub fn text(content: &str) -> DispatchChunk {
    DispatchChunk::Text(content.to_string())
}

// ============================================================================
// Scripted Dispatcher
// ============================================================================

/// Mock dispatcher driven by per-endpoint behaviors
///
/// Endpoints without a behavior succeed immediately with `"ok from <id>"`.
pub struct ScriptedDispatcher {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    calls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<(String, CancellationToken)>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
        })
    }

    pub fn with_behavior(self: Arc<Self>, endpoint_id: &str, behavior: MockBehavior) -> Arc<Self> {
        self.set_behavior(endpoint_id, behavior);
        self
    }

    pub fn set_behavior(&self, endpoint_id: &str, behavior: MockBehavior) {
        self.behaviors.lock().insert(endpoint_id.to_string(), behavior);
    }

    fn behavior_for(&self, endpoint_id: &str) -> MockBehavior {
        self.behaviors
            .lock()
            .get(endpoint_id)
            .cloned()
            .unwrap_or_else(|| MockBehavior::succeed(format!("ok from {endpoint_id}")))
    }

    /// Endpoint ids in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, endpoint_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == endpoint_id).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls whose cancellation token has fired, whether or not the call
    /// was still being polled
    pub fn cancelled_count(&self) -> usize {
        self.tokens.lock().iter().filter(|(_, t)| t.is_cancelled()).count()
    }

    /// Whether any call to `endpoint_id` had its token fired
    pub fn was_cancelled(&self, endpoint_id: &str) -> bool {
        self.tokens
            .lock()
            .iter()
            .any(|(id, t)| id == endpoint_id && t.is_cancelled())
    }

    pub fn assert_not_called(&self, endpoint_id: &str) {
        assert_eq!(
            self.call_count(endpoint_id),
            0,
            "Expected '{endpoint_id}' not to be called, calls: {:?}",
            self.calls()
        );
    }

    fn track(&self, endpoint: &Endpoint, cancel: &CancellationToken) {
        self.calls.lock().push(endpoint.endpoint_id.clone());
        self.tokens
            .lock()
            .push((endpoint.endpoint_id.clone(), cancel.clone()));
    }
}

/// Wait for `delay`; false if `cancel` fired first
async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        self.track(endpoint, cancel);
        let cancelled = DispatchResult::failure(0, "cancelled", 0);

        match self.behavior_for(&endpoint.endpoint_id) {
            MockBehavior::Succeed {
                body,
                delay,
                latency_ms,
            } => {
                if !wait(delay, cancel).await {
                    return cancelled;
                }
                DispatchResult::success(200, body, latency_ms)
            }
            MockBehavior::Fail {
                status,
                message,
                delay,
            } => {
                if !wait(delay, cancel).await {
                    return cancelled;
                }
                DispatchResult::failure(status, message, 1)
            }
            MockBehavior::Hang => {
                cancel.cancelled().await;
                cancelled
            }
            MockBehavior::Stream { chunks, delay } => {
                let mut body = String::new();
                for chunk in chunks {
                    if !wait(delay, cancel).await {
                        return cancelled;
                    }
                    match chunk {
                        DispatchChunk::Text(content) => body.push_str(&content),
                        DispatchChunk::Done { .. } => return DispatchResult::success(200, body, 1),
                        DispatchChunk::Error(message) => return DispatchResult::failure(500, message, 1),
                    }
                }
                DispatchResult::failure(0, "stream closed before completion", 1)
            }
        }
    }

    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<DispatchChunk> {
        self.track(endpoint, cancel);
        let (tx, rx) = mpsc::channel(16);

        let (chunks, delay) = match self.behavior_for(&endpoint.endpoint_id) {
            MockBehavior::Succeed { body, delay, .. } => (vec![DispatchChunk::Text(body), done()], delay),
            MockBehavior::Fail { message, delay, .. } => (vec![DispatchChunk::Error(message)], delay),
            MockBehavior::Hang => (Vec::new(), Duration::MAX),
            MockBehavior::Stream { chunks, delay } => (chunks, delay),
        };

        let cancel = cancel.clone();
        tokio::spawn(async move {
            if delay == Duration::MAX {
                cancel.cancelled().await;
                return;
            }
            for chunk in chunks {
                if !wait(delay, &cancel).await {
                    return;
                }
                if tx.send(chunk).await.is_err() {
                    return;
                }
            }
        });

        rx
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Endpoint with a derived model id
pub fn endpoint(id: &str, priority: i32) -> Endpoint {
    Endpoint::new(id, format!("model-{id}"), "mock", "http://mock.invalid")
        .with_platform_name("Mock")
        .with_priority(priority)
}

/// Context over a fresh health tracker
pub fn context(endpoints: Vec<Endpoint>, dispatcher: &Arc<ScriptedDispatcher>) -> DispatchContext {
    context_with_health(endpoints, dispatcher, Arc::new(HealthTracker::new()))
}

pub fn context_with_health(
    endpoints: Vec<Endpoint>,
    dispatcher: &Arc<ScriptedDispatcher>,
    health: Arc<HealthTracker>,
) -> DispatchContext {
    let dispatcher: Arc<dyn Dispatcher> = dispatcher.clone();
    DispatchContext::new(endpoints, health, dispatcher)
}

/// Minimal request
pub fn request() -> DispatchRequest {
    DispatchRequest::new(serde_json::json!({"messages": [{"role": "user", "content": "hi"}]}))
}

/// Drain a strategy stream into its chunks
pub async fn collect(
    mut rx: crate::strategy::ChunkReceiver,
) -> Vec<Result<crate::response::StreamChunk, crate::response::DispatchError>> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}
