//! Shared fixtures for modelpool integration tests
//!
//! [`FakePlatform`] stands in for a set of model platforms: each endpoint id
//! maps to an [`Outcome`], and every dispatched call is logged so tests can
//! assert exactly which endpoints were contacted.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelpool_core::{DispatchChunk, DispatchRequest, DispatchResult, Dispatcher, Endpoint};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// How a fake endpoint answers
#[derive(Clone, Debug)]
pub enum Outcome {
    /// Answer `content` after `delay`
    Answer { content: String, delay: Duration },
    /// Fail with an HTTP status and message
    Reject { status: u16, message: String },
}

impl Outcome {
    pub fn answer(content: &str) -> Self {
        Self::Answer {
            content: content.to_string(),
            delay: Duration::ZERO,
        }
    }

    pub fn answer_after(content: &str, millis: u64) -> Self {
        Self::Answer {
            content: content.to_string(),
            delay: Duration::from_millis(millis),
        }
    }

    pub fn reject(status: u16, message: &str) -> Self {
        Self::Reject {
            status,
            message: message.to_string(),
        }
    }
}

/// In-process dispatcher with per-endpoint outcomes
#[derive(Default)]
pub struct FakePlatform {
    outcomes: Mutex<HashMap<String, Outcome>>,
    log: Mutex<Vec<String>>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(self: Arc<Self>, endpoint_id: &str, outcome: Outcome) -> Arc<Self> {
        self.set(endpoint_id, outcome);
        self
    }

    pub fn set(&self, endpoint_id: &str, outcome: Outcome) {
        self.outcomes.lock().insert(endpoint_id.to_string(), outcome);
    }

    /// Endpoint ids in dispatch order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn calls_to(&self, endpoint_id: &str) -> usize {
        self.log.lock().iter().filter(|id| *id == endpoint_id).count()
    }

    fn outcome(&self, endpoint: &Endpoint) -> Outcome {
        self.log.lock().push(endpoint.endpoint_id.clone());
        self.outcomes
            .lock()
            .get(&endpoint.endpoint_id)
            .cloned()
            .unwrap_or_else(|| Outcome::answer(&format!("answer from {}", endpoint.endpoint_id)))
    }
}

/// Wait out `delay` unless `cancel` fires first; true when the delay elapsed
async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    if delay.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}

#[async_trait]
impl Dispatcher for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        match self.outcome(endpoint) {
            Outcome::Answer { content, delay } => {
                if !wait(delay, cancel).await {
                    return DispatchResult::failure(0, "cancelled", 0);
                }
                let latency = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX).max(1);
                DispatchResult::success(200, content, latency)
            }
            Outcome::Reject { status, message } => DispatchResult::failure(status, message, 1),
        }
    }

    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        _request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<DispatchChunk> {
        let (tx, rx) = mpsc::channel(16);
        let outcome = self.outcome(endpoint);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match outcome {
                Outcome::Answer { content, delay } => {
                    if !wait(delay, &cancel).await {
                        return;
                    }
                    for word in content.split_inclusive(' ') {
                        if tx.send(DispatchChunk::Text(word.to_string())).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx
                        .send(DispatchChunk::Done {
                            finish_reason: Some("stop".to_string()),
                            usage: None,
                        })
                        .await;
                }
                Outcome::Reject { status, message } => {
                    let _ = tx
                        .send(DispatchChunk::Error(format!("HTTP {status}: {message}")))
                        .await;
                }
            }
        });
        rx
    }
}

/// Endpoint whose model id is `model-<id>`
pub fn endpoint(id: &str, priority: i32) -> Endpoint {
    Endpoint::new(id, format!("model-{id}"), "fake", format!("http://{id}.invalid"))
        .with_priority(priority)
}

pub fn chat_request(prompt: &str) -> DispatchRequest {
    DispatchRequest::new(serde_json::json!({
        "messages": [{ "role": "user", "content": prompt }]
    }))
}
