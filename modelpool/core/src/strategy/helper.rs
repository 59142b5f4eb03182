//! Strategy Helper
//!
//! Stateless building blocks shared by every strategy:
//! - Availability filtering with health-then-priority ordering
//! - Directory contract validation
//! - Uniform mapping from dispatcher results to responses
//! - Cancellable dispatch, stream forwarding and stream buffering

use std::collections::HashSet;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ChunkReceiver, ChunkSender, DispatchContext, StrategyKind};
use crate::dispatch::{DispatchChunk, DispatchRequest, DispatchResult, Dispatcher, TokenUsage};
use crate::endpoint::Endpoint;
use crate::health::HealthTracker;
use crate::response::{
    DispatchError, DispatchResponse, ErrorCode, StreamChunk, STATUS_BAD_GATEWAY,
    STATUS_NO_AVAILABLE_ENDPOINTS,
};

/// Buffer size of strategy output channels
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Message used when a dispatcher stream ends without a terminal chunk
const STREAM_CLOSED_EARLY: &str = "stream closed before completion";

// ============================================================================
// Selection
// ============================================================================

/// Selectable endpoints, healthy first, then by ascending priority
///
/// Unavailable endpoints are dropped. Equal keys keep directory order.
pub fn available_endpoints(endpoints: &[Endpoint], health: &HealthTracker) -> Vec<Endpoint> {
    // Status is read once per endpoint so the sort sees a consistent view
    let mut keyed: Vec<((u8, i32), &Endpoint)> = endpoints
        .iter()
        .filter_map(|endpoint| {
            let status = health.status(&endpoint.endpoint_id);
            status
                .is_selectable()
                .then_some(((status.sort_bucket(), endpoint.priority), endpoint))
        })
        .collect();

    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, endpoint)| endpoint.clone()).collect()
}

/// Reject directories with empty or duplicate endpoint ids
pub fn validate_directory(endpoints: &[Endpoint]) -> Result<(), DispatchError> {
    let mut seen = HashSet::with_capacity(endpoints.len());
    for (index, endpoint) in endpoints.iter().enumerate() {
        if endpoint.endpoint_id.trim().is_empty() {
            return Err(DispatchError::InvalidDirectory(format!(
                "endpoint at position {index} has an empty id"
            )));
        }
        if !seen.insert(endpoint.endpoint_id.as_str()) {
            return Err(DispatchError::InvalidDirectory(format!(
                "duplicate endpoint id: {}",
                endpoint.endpoint_id
            )));
        }
    }
    Ok(())
}

/// Fail with `Cancelled` if the token already fired
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), DispatchError> {
    if cancel.is_cancelled() {
        Err(DispatchError::Cancelled)
    } else {
        Ok(())
    }
}

/// Validate the directory and return the ordered selectable endpoints
pub fn prepare(ctx: &DispatchContext) -> Result<Vec<Endpoint>, DispatchError> {
    ensure_not_cancelled(&ctx.cancel)?;
    validate_directory(&ctx.endpoints)?;
    Ok(available_endpoints(&ctx.endpoints, &ctx.health))
}

// ============================================================================
// Response Shapes
// ============================================================================

/// Milliseconds since `started`
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Per-endpoint failure line used in aggregated messages
pub fn failure_reason(endpoint: &Endpoint, message: &str) -> String {
    format!("{}: {message}", endpoint.label())
}

/// Response for a pool with nothing selectable
pub fn no_available_endpoints(strategy: StrategyKind, started: Instant) -> DispatchResponse {
    DispatchResponse {
        success: false,
        status_code: STATUS_NO_AVAILABLE_ENDPOINTS,
        content: None,
        error_code: Some(ErrorCode::NoAvailableEndpoints),
        error_message: Some("No available endpoints in pool".to_string()),
        dispatched_endpoint: None,
        duration_ms: elapsed_ms(started),
        strategy_used: strategy,
        endpoints_attempted: 0,
    }
}

/// Response for a successful dispatch
pub fn success_response(
    strategy: StrategyKind,
    endpoint: &Endpoint,
    result: DispatchResult,
    started: Instant,
    attempted: usize,
) -> DispatchResponse {
    DispatchResponse {
        success: true,
        status_code: result.status_code,
        content: result.body,
        error_code: None,
        error_message: None,
        dispatched_endpoint: Some(endpoint.dispatched()),
        duration_ms: elapsed_ms(started),
        strategy_used: strategy,
        endpoints_attempted: attempted,
    }
}

/// Response for a single failed attempt, keeping the endpoint's own status
pub fn endpoint_error(
    strategy: StrategyKind,
    endpoint: &Endpoint,
    result: &DispatchResult,
    started: Instant,
) -> DispatchResponse {
    let status_code = if result.status_code == 0 {
        STATUS_BAD_GATEWAY
    } else {
        result.status_code
    };

    DispatchResponse {
        success: false,
        status_code,
        content: None,
        error_code: Some(ErrorCode::EndpointError),
        error_message: Some(result.error_text()),
        dispatched_endpoint: Some(endpoint.dispatched()),
        duration_ms: elapsed_ms(started),
        strategy_used: strategy,
        endpoints_attempted: 1,
    }
}

/// Response when every attempted endpoint failed
pub fn all_endpoints_failed(
    strategy: StrategyKind,
    errors: &[String],
    attempted: usize,
    started: Instant,
) -> DispatchResponse {
    DispatchResponse {
        success: false,
        status_code: STATUS_BAD_GATEWAY,
        content: None,
        error_code: Some(ErrorCode::AllEndpointsFailed),
        error_message: Some(format!(
            "All {attempted} endpoints failed: {}",
            errors.join("; ")
        )),
        dispatched_endpoint: None,
        duration_ms: elapsed_ms(started),
        strategy_used: strategy,
        endpoints_attempted: attempted,
    }
}

/// Map one dispatch result of a single-attempt strategy
pub fn to_response(
    strategy: StrategyKind,
    endpoint: &Endpoint,
    result: DispatchResult,
    started: Instant,
) -> DispatchResponse {
    if result.is_success {
        success_response(strategy, endpoint, result, started, 1)
    } else {
        endpoint_error(strategy, endpoint, &result, started)
    }
}

// ============================================================================
// Single-Shot Dispatch
// ============================================================================

/// Dispatch unless `cancel` fires first
///
/// `None` means the call was cancelled, including a failure the dispatcher
/// reported after the token fired.
pub async fn send_cancellable(
    dispatcher: &dyn Dispatcher,
    endpoint: &Endpoint,
    request: &DispatchRequest,
    cancel: &CancellationToken,
) -> Option<DispatchResult> {
    let result = tokio::select! {
        biased;
        () = cancel.cancelled() => return None,
        result = dispatcher.send(endpoint, request, cancel) => result,
    };

    if !result.is_success && cancel.is_cancelled() {
        None
    } else {
        Some(result)
    }
}

/// Feed one outcome into the health tracker
pub fn record_outcome(health: &HealthTracker, endpoint: &Endpoint, result: &DispatchResult) {
    if result.is_success {
        health.record_success(&endpoint.endpoint_id, result.latency_ms);
    } else {
        health.record_failure(&endpoint.endpoint_id);
        tracing::warn!(
            endpoint = %endpoint.endpoint_id,
            model = %endpoint.model_id,
            status = result.status_code,
            error = %result.error_text(),
            "Endpoint dispatch failed"
        );
    }
}

/// Dispatch once under the caller's token and record the outcome
pub async fn attempt(
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    request: &DispatchRequest,
) -> Result<DispatchResult, DispatchError> {
    let result = send_cancellable(ctx.dispatcher.as_ref(), endpoint, request, &ctx.cancel)
        .await
        .ok_or(DispatchError::Cancelled)?;
    record_outcome(&ctx.health, endpoint, &result);
    Ok(result)
}

/// Full single-attempt execution: dispatch, record, map
pub async fn execute_single(
    strategy: StrategyKind,
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    request: &DispatchRequest,
) -> Result<DispatchResponse, DispatchError> {
    let started = Instant::now();
    tracing::debug!(
        strategy = %strategy,
        endpoint = %endpoint.endpoint_id,
        request_id = %request.request_id,
        "Dispatching"
    );
    let result = attempt(ctx, endpoint, request).await?;
    Ok(to_response(strategy, endpoint, result, started))
}

// ============================================================================
// Streaming
// ============================================================================

/// Open a dispatcher stream unless `cancel` fires first
pub async fn open_stream(
    dispatcher: &dyn Dispatcher,
    endpoint: &Endpoint,
    request: &DispatchRequest,
    cancel: &CancellationToken,
) -> Option<mpsc::Receiver<DispatchChunk>> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        upstream = dispatcher.send_stream(endpoint, request, cancel) => Some(upstream),
    }
}

/// Next dispatcher chunk, or `Cancelled` if `cancel` fires first
pub async fn next_chunk(
    upstream: &mut mpsc::Receiver<DispatchChunk>,
    cancel: &CancellationToken,
) -> Result<Option<DispatchChunk>, DispatchError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(DispatchError::Cancelled),
        chunk = upstream.recv() => Ok(chunk),
    }
}

/// Forward a committed endpoint's stream to the caller, recording its outcome
///
/// Success is recorded before `Done` is yielded; failure before `Error`.
pub async fn forward_stream(
    health: &HealthTracker,
    endpoint: &Endpoint,
    mut upstream: mpsc::Receiver<DispatchChunk>,
    tx: &ChunkSender,
    cancel: &CancellationToken,
    started: Instant,
) {
    loop {
        let chunk = match next_chunk(&mut upstream, cancel).await {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        match chunk {
            Some(DispatchChunk::Text(content)) => {
                if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                    tracing::debug!(endpoint = %endpoint.endpoint_id, "Stream receiver dropped");
                    return;
                }
            }
            Some(DispatchChunk::Done {
                finish_reason,
                usage,
            }) => {
                health.record_success(&endpoint.endpoint_id, elapsed_ms(started));
                let _ = tx
                    .send(Ok(StreamChunk::Done {
                        finish_reason,
                        usage,
                    }))
                    .await;
                return;
            }
            Some(DispatchChunk::Error(message)) => {
                fail_stream(health, endpoint, tx, cancel, message).await;
                return;
            }
            None => {
                fail_stream(health, endpoint, tx, cancel, STREAM_CLOSED_EARLY.to_string()).await;
                return;
            }
        }
    }
}

async fn fail_stream(
    health: &HealthTracker,
    endpoint: &Endpoint,
    tx: &ChunkSender,
    cancel: &CancellationToken,
    message: String,
) {
    if cancel.is_cancelled() {
        let _ = tx.send(Err(DispatchError::Cancelled)).await;
        return;
    }

    health.record_failure(&endpoint.endpoint_id);
    tracing::warn!(
        endpoint = %endpoint.endpoint_id,
        model = %endpoint.model_id,
        error = %message,
        "Endpoint stream failed"
    );
    let _ = tx
        .send(Ok(StreamChunk::Error {
            code: ErrorCode::EndpointError,
            message,
        }))
        .await;
}

/// Stream one endpoint: `Start`, then its chunks forwarded live
pub fn stream_single(
    strategy: StrategyKind,
    ctx: &DispatchContext,
    endpoint: Endpoint,
    request: &DispatchRequest,
) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let ctx = ctx.clone();
    let request = request.clone();

    tracing::debug!(
        strategy = %strategy,
        endpoint = %endpoint.endpoint_id,
        request_id = %request.request_id,
        "Dispatching stream"
    );

    tokio::spawn(async move {
        let started = Instant::now();
        let start = StreamChunk::Start {
            endpoint: endpoint.dispatched(),
        };
        if tx.send(Ok(start)).await.is_err() {
            return;
        }

        let Some(upstream) =
            open_stream(ctx.dispatcher.as_ref(), &endpoint, &request, &ctx.cancel).await
        else {
            let _ = tx.send(Err(DispatchError::Cancelled)).await;
            return;
        };

        forward_stream(&ctx.health, &endpoint, upstream, &tx, &ctx.cancel, started).await;
    });

    rx
}

/// A dispatcher stream read to its end
#[derive(Clone, Debug, PartialEq)]
pub enum StreamOutcome {
    /// The stream reached `Done`
    Completed {
        /// Text deltas in arrival order
        texts: Vec<String>,
        /// Why generation stopped
        finish_reason: Option<String>,
        /// Token usage, if reported
        usage: Option<TokenUsage>,
        /// Time until `Done`
        latency_ms: u64,
    },
    /// The stream failed or closed early
    Failed(String),
}

/// Read a dispatcher stream to its end without forwarding or recording anything
pub async fn collect_stream(
    dispatcher: &dyn Dispatcher,
    endpoint: &Endpoint,
    request: &DispatchRequest,
    cancel: &CancellationToken,
) -> Result<StreamOutcome, DispatchError> {
    let started = Instant::now();
    let mut upstream = open_stream(dispatcher, endpoint, request, cancel)
        .await
        .ok_or(DispatchError::Cancelled)?;

    let mut texts = Vec::new();
    loop {
        match next_chunk(&mut upstream, cancel).await? {
            Some(DispatchChunk::Text(content)) => texts.push(content),
            Some(DispatchChunk::Done {
                finish_reason,
                usage,
            }) => {
                return Ok(StreamOutcome::Completed {
                    texts,
                    finish_reason,
                    usage,
                    latency_ms: elapsed_ms(started),
                });
            }
            Some(DispatchChunk::Error(message)) => {
                ensure_not_cancelled(cancel)?;
                return Ok(StreamOutcome::Failed(message));
            }
            None => {
                ensure_not_cancelled(cancel)?;
                return Ok(StreamOutcome::Failed(STREAM_CLOSED_EARLY.to_string()));
            }
        }
    }
}

/// Receiver pre-filled with a fixed chunk sequence
pub fn replay(chunks: Vec<Result<StreamChunk, DispatchError>>) -> ChunkReceiver {
    let (tx, rx) = mpsc::channel(chunks.len().max(1));
    for chunk in chunks {
        // Capacity covers every chunk
        let _ = tx.try_send(chunk);
    }
    rx
}

/// Stream consisting of a lone `NO_AVAILABLE_ENDPOINTS` error
pub fn no_available_stream(strategy: StrategyKind) -> ChunkReceiver {
    let response = no_available_endpoints(strategy, Instant::now());
    replay(response_chunks(&response))
}

/// Chunk sequence equivalent to a finished response
///
/// `Start` is emitted only when an endpoint served the response.
pub fn response_chunks(response: &DispatchResponse) -> Vec<Result<StreamChunk, DispatchError>> {
    let mut chunks = Vec::with_capacity(3);
    if let Some(endpoint) = &response.dispatched_endpoint {
        chunks.push(Ok(StreamChunk::Start {
            endpoint: endpoint.clone(),
        }));
    }

    if response.success {
        if let Some(content) = response.content.as_ref().filter(|c| !c.is_empty()) {
            chunks.push(Ok(StreamChunk::text(content.clone())));
        }
        chunks.push(Ok(StreamChunk::Done {
            finish_reason: None,
            usage: None,
        }));
    } else {
        chunks.push(Ok(StreamChunk::Error {
            code: response.error_code.unwrap_or(ErrorCode::EndpointError),
            message: response.error_message.clone().unwrap_or_default(),
        }));
    }
    chunks
}
