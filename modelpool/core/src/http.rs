//! HTTP Dispatcher
//!
//! Reference [`Dispatcher`] for OpenAI-compatible chat-completions APIs.
//!
//! # Wire Format
//!
//! - `POST {api_url}/chat/completions` with the request payload, `model` set to
//!   the endpoint's model id and `stream` set per call
//! - Single-shot: `choices[0].message.content` (raw body if absent)
//! - Streaming: server-sent events, one JSON object per `data:` line with
//!   `choices[0].delta.content`, `choices[0].finish_reason` and `usage`,
//!   terminated by `data: [DONE]`
//!
//! Routing hints are forwarded as request headers. Vendor-specific formats are
//! not translated here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::dispatch::{DispatchChunk, DispatchRequest, DispatchResult, Dispatcher, TokenUsage};
use crate::endpoint::Endpoint;

/// Errors inside the HTTP adapter, mapped to dispatch results at the boundary
#[derive(Debug, thiserror::Error)]
pub enum HttpDispatchError {
    /// Transport failure (connect, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("endpoint returned {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },
}

impl HttpDispatchError {
    fn status_code(&self) -> u16 {
        match self {
            Self::Transport(e) => e.status().map_or(0, |s| s.as_u16()),
            Self::Status { status, .. } => *status,
        }
    }
}

/// Dispatcher for OpenAI-compatible endpoints
#[derive(Clone)]
pub struct HttpDispatcher {
    http_client: reqwest::Client,
}

impl HttpDispatcher {
    /// Create with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn new(request_timeout: Duration) -> Result<Self, HttpDispatchError> {
        let http_client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { http_client })
    }

    /// Create from pool configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialised.
    pub fn from_config(config: &PoolConfig) -> Result<Self, HttpDispatchError> {
        Self::new(config.request_timeout)
    }

    async fn post(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        stream: bool,
    ) -> Result<reqwest::Response, HttpDispatchError> {
        let builder = self
            .http_client
            .post(chat_url(endpoint))
            .json(&build_body(endpoint, request, stream))
            .headers(hint_headers(&request.hints));

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(HttpDispatchError::Status { status, body });
        }
        Ok(response)
    }

    async fn send_single(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
    ) -> Result<(u16, String), HttpDispatchError> {
        let response = self.post(endpoint, request, false).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, extract_content(&body)))
    }
}

impl std::fmt::Debug for HttpDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDispatcher").finish_non_exhaustive()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> DispatchResult {
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return DispatchResult::failure(0, "cancelled", elapsed_ms(started));
            }
            outcome = self.send_single(endpoint, request) => outcome,
        };

        match outcome {
            Ok((status, content)) => DispatchResult::success(status, content, elapsed_ms(started)),
            Err(e) => DispatchResult::failure(e.status_code(), e.to_string(), elapsed_ms(started)),
        }
    }

    async fn send_stream(
        &self,
        endpoint: &Endpoint,
        request: &DispatchRequest,
        cancel: &CancellationToken,
    ) -> mpsc::Receiver<DispatchChunk> {
        let (tx, rx) = mpsc::channel(100);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return rx,
            response = self.post(endpoint, request, true) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.try_send(DispatchChunk::Error(e.to_string()));
                return rx;
            }
        };

        let mut stream = response.bytes_stream();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut parser = SseParser::default();
            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return,
                    next = stream.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => {
                        for chunk in parser.push(&bytes) {
                            let terminal = chunk.is_terminal();
                            if tx.send(chunk).await.is_err() || terminal {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(DispatchChunk::Error(e.to_string())).await;
                        return;
                    }
                    None => {
                        if let Some(chunk) = parser.finish() {
                            let _ = tx.send(chunk).await;
                        }
                        return;
                    }
                }
            }
        });

        rx
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Chat-completions URL of an endpoint
fn chat_url(endpoint: &Endpoint) -> String {
    format!("{}/chat/completions", endpoint.api_url.trim_end_matches('/'))
}

/// Request body: the opaque payload with `model` and `stream` filled in
fn build_body(endpoint: &Endpoint, request: &DispatchRequest, stream: bool) -> serde_json::Value {
    let mut body = request.payload.clone();
    if let Some(object) = body.as_object_mut() {
        object.insert(
            "model".to_string(),
            serde_json::Value::String(endpoint.model_id.clone()),
        );
        object.insert("stream".to_string(), serde_json::Value::Bool(stream));
    }
    body
}

/// Routing hints as request headers
///
/// Hints that are not valid header names or values are dropped: a malformed
/// hint is a caller mistake and must not surface as an endpoint failure.
fn hint_headers(hints: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(hints.len());
    for (name, value) in hints {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(hint = %name, "Dropping hint that is not a valid HTTP header"),
        }
    }
    headers
}

/// `choices[0].message.content`, or the raw body
fn extract_content(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|data| {
            data.pointer("/choices/0/message/content")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

// ============================================================================
// SSE Parsing
// ============================================================================

/// Incremental parser for chat-completions event streams
#[derive(Debug, Default)]
struct SseParser {
    buffer: Vec<u8>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
    done: bool,
}

impl SseParser {
    /// Feed raw bytes; returns the chunks completed by them
    fn push(&mut self, bytes: &[u8]) -> Vec<DispatchChunk> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.done {
                continue;
            }
            if let Some(chunk) = self.parse_line(String::from_utf8_lossy(&line).trim()) {
                self.done = chunk.is_terminal();
                chunks.push(chunk);
            }
        }
        chunks
    }

    fn parse_line(&mut self, line: &str) -> Option<DispatchChunk> {
        let data = line.strip_prefix("data:")?.trim();
        if data == "[DONE]" {
            return Some(self.done_chunk());
        }

        let event: serde_json::Value = serde_json::from_str(data).ok()?;
        if let Some(message) = event.pointer("/error/message").and_then(serde_json::Value::as_str) {
            return Some(DispatchChunk::Error(message.to_string()));
        }
        if let Some(reason) = event
            .pointer("/choices/0/finish_reason")
            .and_then(serde_json::Value::as_str)
        {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(usage) = event
            .get("usage")
            .filter(|u| !u.is_null())
            .and_then(|u| serde_json::from_value::<TokenUsage>(u.clone()).ok())
        {
            self.usage = Some(usage);
        }

        event
            .pointer("/choices/0/delta/content")
            .and_then(serde_json::Value::as_str)
            .filter(|content| !content.is_empty())
            .map(|content| DispatchChunk::Text(content.to_string()))
    }

    fn done_chunk(&self) -> DispatchChunk {
        DispatchChunk::Done {
            finish_reason: self.finish_reason.clone(),
            usage: self.usage,
        }
    }

    /// Chunk owed when the body ends; a stream with a finish reason but no
    /// `[DONE]` marker still counts as complete
    fn finish(mut self) -> Option<DispatchChunk> {
        if self.done {
            return None;
        }
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            if let Some(chunk) = self.parse_line(String::from_utf8_lossy(&rest).trim()) {
                if chunk.is_terminal() {
                    return Some(chunk);
                }
            }
        }
        self.finish_reason.is_some().then(|| self.done_chunk())
    }
}
