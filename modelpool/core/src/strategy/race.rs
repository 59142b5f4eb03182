//! Race Strategy
//!
//! Dispatches to every available endpoint at once and keeps the first success.
//!
//! ```text
//! caller token
//!     |
//!     +-- race scope (child token)
//!             |
//!             +-- endpoint A token ----x failure (recorded)
//!             +-- endpoint B token ---------> success: recorded, returned
//!             +-- endpoint C token ------------------> cancelled, never recorded
//! ```
//!
//! A single available endpoint behaves like fail-fast. The winner cancels its
//! siblings' tokens, never the caller's; cancelling the caller's token cancels
//! the whole race.
//!
//! Streaming runs the full race and replays the winner's answer, unless
//! stream racing is enabled: then every endpoint streams at once, the first to
//! produce output wins and is forwarded live while its siblings are cancelled.

use std::time::Instant;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::helper::{self, STREAM_CHANNEL_CAPACITY};
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::{DispatchChunk, DispatchRequest};
use crate::endpoint::Endpoint;
use crate::response::{DispatchError, DispatchResponse, ErrorCode, StreamChunk};

/// Concurrent fan-out, first success wins
#[derive(Debug, Default)]
pub struct RaceStrategy {
    stream_racing: bool,
}

impl RaceStrategy {
    /// Create with synthesized streaming
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Race streams by first output instead of replaying a full race
    #[must_use]
    pub fn with_stream_racing(mut self, enabled: bool) -> Self {
        self.stream_racing = enabled;
        self
    }

    /// Whether streams race by first output
    #[must_use]
    pub fn stream_racing(&self) -> bool {
        self.stream_racing
    }

    async fn race(
        &self,
        ctx: &DispatchContext,
        available: &[Endpoint],
        request: &DispatchRequest,
        started: Instant,
    ) -> Result<DispatchResponse, DispatchError> {
        let scope = ctx.cancel.child_token();
        tracing::debug!(
            endpoints = available.len(),
            request_id = %request.request_id,
            "Starting race"
        );

        let tokens: Vec<CancellationToken> = available.iter().map(|_| scope.child_token()).collect();

        let mut in_flight: FuturesUnordered<_> = available
            .iter()
            .zip(&tokens)
            .enumerate()
            .map(|(index, (endpoint, token))| async move {
                let outcome =
                    helper::send_cancellable(ctx.dispatcher.as_ref(), endpoint, request, token)
                        .await;
                (index, endpoint, outcome)
            })
            .collect();

        let mut errors = Vec::with_capacity(available.len());
        while let Some((index, endpoint, outcome)) = in_flight.next().await {
            // Before a winner exists only the caller can cancel the scope
            let Some(result) = outcome else {
                return Err(DispatchError::Cancelled);
            };

            if result.is_success {
                ctx.health
                    .record_success(&endpoint.endpoint_id, result.latency_ms);
                cancel_siblings(&tokens, index);
                tracing::info!(
                    endpoint = %endpoint.endpoint_id,
                    latency_ms = result.latency_ms,
                    "Race won"
                );
                return Ok(helper::success_response(
                    self.kind(),
                    endpoint,
                    result,
                    started,
                    available.len(),
                ));
            }

            helper::record_outcome(&ctx.health, endpoint, &result);
            errors.push(helper::failure_reason(endpoint, &result.error_text()));
        }

        Ok(helper::all_endpoints_failed(
            self.kind(),
            &errors,
            available.len(),
            started,
        ))
    }
}

/// Cancel every racer except the winner
fn cancel_siblings(tokens: &[CancellationToken], winner: usize) {
    for (index, token) in tokens.iter().enumerate() {
        if index != winner {
            token.cancel();
        }
    }
}

/// First thing a racing stream produced
enum FirstChunk {
    Cancelled,
    Received(Option<DispatchChunk>, mpsc::Receiver<DispatchChunk>),
}

async fn first_chunk(
    ctx: &DispatchContext,
    endpoint: &Endpoint,
    request: &DispatchRequest,
    token: &CancellationToken,
) -> FirstChunk {
    let Some(mut upstream) =
        helper::open_stream(ctx.dispatcher.as_ref(), endpoint, request, token).await
    else {
        return FirstChunk::Cancelled;
    };
    match helper::next_chunk(&mut upstream, token).await {
        Ok(chunk) => FirstChunk::Received(chunk, upstream),
        Err(_) => FirstChunk::Cancelled,
    }
}

/// Race streams by first output and forward the winner live
async fn stream_race(
    ctx: DispatchContext,
    available: Vec<Endpoint>,
    request: DispatchRequest,
    tx: mpsc::Sender<Result<StreamChunk, DispatchError>>,
) {
    let started = Instant::now();
    let scope = ctx.cancel.child_token();
    let tokens: Vec<CancellationToken> = available.iter().map(|_| scope.child_token()).collect();

    let mut in_flight: FuturesUnordered<_> = available
        .iter()
        .zip(&tokens)
        .enumerate()
        .map(|(index, (endpoint, token))| {
            let ctx = &ctx;
            let request = &request;
            async move { (index, first_chunk(ctx, endpoint, request, token).await) }
        })
        .collect();

    let mut errors = Vec::new();
    let winner = loop {
        let Some((index, first)) = in_flight.next().await else {
            break None;
        };
        let endpoint = &available[index];

        let FirstChunk::Received(chunk, upstream) = first else {
            let _ = tx.send(Err(DispatchError::Cancelled)).await;
            return;
        };

        let message = match chunk {
            Some(chunk @ (DispatchChunk::Text(_) | DispatchChunk::Done { .. })) => {
                break Some((index, chunk, upstream));
            }
            Some(DispatchChunk::Error(message)) => message,
            None => "stream closed before completion".to_string(),
        };

        if ctx.cancel.is_cancelled() {
            let _ = tx.send(Err(DispatchError::Cancelled)).await;
            return;
        }
        ctx.health.record_failure(&endpoint.endpoint_id);
        tracing::warn!(endpoint = %endpoint.endpoint_id, error = %message, "Racing stream failed");
        errors.push(helper::failure_reason(endpoint, &message));
    };

    let Some((index, first, upstream)) = winner else {
        let response =
            helper::all_endpoints_failed(StrategyKind::Race, &errors, available.len(), started);
        let _ = tx
            .send(Ok(StreamChunk::Error {
                code: ErrorCode::AllEndpointsFailed,
                message: response.error_message.unwrap_or_default(),
            }))
            .await;
        return;
    };

    drop(in_flight);
    cancel_siblings(&tokens, index);

    let endpoint = &available[index];
    tracing::info!(endpoint = %endpoint.endpoint_id, "Stream race won");
    let start = StreamChunk::Start {
        endpoint: endpoint.dispatched(),
    };
    if tx.send(Ok(start)).await.is_err() {
        return;
    }

    match first {
        DispatchChunk::Done {
            finish_reason,
            usage,
        } => {
            ctx.health
                .record_success(&endpoint.endpoint_id, helper::elapsed_ms(started));
            let _ = tx
                .send(Ok(StreamChunk::Done {
                    finish_reason,
                    usage,
                }))
                .await;
        }
        DispatchChunk::Text(content) => {
            if tx.send(Ok(StreamChunk::text(content))).await.is_err() {
                return;
            }
            helper::forward_stream(&ctx.health, endpoint, upstream, &tx, &tokens[index], started)
                .await;
        }
        DispatchChunk::Error(_) => {}
    }
}

#[async_trait]
impl DispatchStrategy for RaceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Race
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = Instant::now();
        let available = helper::prepare(ctx)?;
        match available.as_slice() {
            [] => Ok(helper::no_available_endpoints(self.kind(), started)),
            [only] => helper::execute_single(self.kind(), ctx, only, request).await,
            _ => self.race(ctx, &available, request, started).await,
        }
    }

    async fn execute_stream(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<ChunkReceiver, DispatchError> {
        let mut available = helper::prepare(ctx)?;
        match available.len() {
            0 => Ok(helper::no_available_stream(self.kind())),
            1 => {
                let only = available.remove(0);
                Ok(helper::stream_single(self.kind(), ctx, only, request))
            }
            _ if self.stream_racing => {
                let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
                tokio::spawn(stream_race(ctx.clone(), available, request.clone(), tx));
                Ok(rx)
            }
            _ => {
                let response = self.race(ctx, &available, request, Instant::now()).await?;
                Ok(helper::replay(helper::response_chunks(&response)))
            }
        }
    }
}
