//! Dispatcher Contract
//!
//! The boundary between strategies and the network. A [`Dispatcher`] performs
//! one request against one endpoint and reports the outcome in a uniform shape,
//! either as a single [`DispatchResult`] or as a channel of [`DispatchChunk`]s.
//!
//! Strategies never talk to the network directly. Vendor wire formats, auth
//! and retries below the endpoint level are the dispatcher's business.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::endpoint::Endpoint;

// ============================================================================
// Request
// ============================================================================

/// One logical model call, passed unchanged to the dispatcher
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchRequest {
    /// Correlation id for logs
    pub request_id: Uuid,

    /// Opaque payload (usually a chat-completions body)
    pub payload: serde_json::Value,

    /// Routing hints for the dispatcher (headers, tags, ...)
    pub hints: HashMap<String, String>,
}

impl DispatchRequest {
    /// Create a request around an opaque payload
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            payload,
            hints: HashMap::new(),
        }
    }

    /// Attach a routing hint
    #[must_use]
    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }

    /// Override the request id
    #[must_use]
    pub fn with_request_id(mut self, request_id: Uuid) -> Self {
        self.request_id = request_id;
        self
    }
}

// ============================================================================
// Results
// ============================================================================

/// Outcome of one single-shot dispatch
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchResult {
    /// Whether the endpoint produced a usable answer
    pub is_success: bool,

    /// HTTP-like status code (0 = no status, e.g. connection failure)
    pub status_code: u16,

    /// Extracted content on success
    pub body: Option<String>,

    /// Failure description
    pub error_message: Option<String>,

    /// Time spent on the call
    pub latency_ms: u64,
}

impl DispatchResult {
    /// Successful result
    pub fn success(status_code: u16, body: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            is_success: true,
            status_code,
            body: Some(body.into()),
            error_message: None,
            latency_ms,
        }
    }

    /// Failed result
    pub fn failure(status_code: u16, message: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            is_success: false,
            status_code,
            body: None,
            error_message: Some(message.into()),
            latency_ms,
        }
    }

    /// Failure message, or a generic one built from the status code
    #[must_use]
    pub fn error_text(&self) -> String {
        match &self.error_message {
            Some(message) => message.clone(),
            None if self.status_code == 0 => "request failed".to_string(),
            None => format!("request failed with status {}", self.status_code),
        }
    }
}

/// Token accounting reported by the platform
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
    /// Sum of both
    #[serde(default)]
    pub total_tokens: u32,
}

/// Chunk produced by a streaming dispatch
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchChunk {
    /// Content delta
    Text(String),

    /// Stream completed successfully
    Done {
        /// Why generation stopped
        finish_reason: Option<String>,
        /// Token usage, if reported
        usage: Option<TokenUsage>,
    },

    /// Stream failed; nothing follows
    Error(String),
}

impl DispatchChunk {
    /// Whether this chunk ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error(_))
    }
}

// ============================================================================
// Dispatcher Trait
// ============================================================================

/// Performs requests against single endpoints
///
/// Implementations must observe `cancel`: once it fires, `send` should return
/// promptly and `send_stream` should stop producing chunks. A stream that
/// closes without a terminal chunk is treated as a failure by callers.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Dispatcher name for logs
    fn name(&self) -> &str;

    /// Send a request and wait for the complete result
    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult;

    /// Send a request and receive chunks as they arrive
    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<DispatchChunk>;
}
