//! Sequential Strategy
//!
//! Ordered fallback through the pool:
//!
//! ```text
//! available (healthy first, by priority)
//!     |
//!     v
//! endpoint 1 --fail--> record, remember reason
//!     |
//!     v
//! endpoint 2 --fail--> record, remember reason
//!     |
//!     v
//! endpoint 3 --ok----> record, return (endpoints_attempted = 3)
//!
//! all failed --------> ALL_ENDPOINTS_FAILED with every reason
//! ```
//!
//! Streaming buffers each candidate's whole output and only replays it once
//! that candidate reached `Done`, so the caller never sees a partial answer
//! from an endpoint that later failed.

use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::helper::{self, StreamOutcome, STREAM_CHANNEL_CAPACITY};
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::DispatchRequest;
use crate::response::{DispatchError, DispatchResponse, ErrorCode, StreamChunk};

/// Ordered fallback across every available endpoint
#[derive(Debug, Default)]
pub struct SequentialStrategy;

impl SequentialStrategy {
    /// Create the strategy
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DispatchStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = Instant::now();
        let available = helper::prepare(ctx)?;
        if available.is_empty() {
            return Ok(helper::no_available_endpoints(self.kind(), started));
        }

        let mut errors = Vec::new();
        for (index, endpoint) in available.iter().enumerate() {
            helper::ensure_not_cancelled(&ctx.cancel)?;
            tracing::debug!(
                endpoint = %endpoint.endpoint_id,
                attempt = index + 1,
                request_id = %request.request_id,
                "Sequential attempt"
            );

            let result = helper::attempt(ctx, endpoint, request).await?;
            if result.is_success {
                return Ok(helper::success_response(
                    self.kind(),
                    endpoint,
                    result,
                    started,
                    index + 1,
                ));
            }
            errors.push(helper::failure_reason(endpoint, &result.error_text()));
        }

        Ok(helper::all_endpoints_failed(
            self.kind(),
            &errors,
            available.len(),
            started,
        ))
    }

    async fn execute_stream(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<ChunkReceiver, DispatchError> {
        let available = helper::prepare(ctx)?;
        if available.is_empty() {
            return Ok(helper::no_available_stream(self.kind()));
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let ctx = ctx.clone();
        let request = request.clone();

        tokio::spawn(async move {
            let mut errors = Vec::new();

            for endpoint in &available {
                let outcome = match helper::collect_stream(
                    ctx.dispatcher.as_ref(),
                    endpoint,
                    &request,
                    &ctx.cancel,
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };

                match outcome {
                    StreamOutcome::Completed {
                        texts,
                        finish_reason,
                        usage,
                        latency_ms,
                    } => {
                        ctx.health.record_success(&endpoint.endpoint_id, latency_ms);

                        let mut replay = Vec::with_capacity(texts.len() + 2);
                        replay.push(StreamChunk::Start {
                            endpoint: endpoint.dispatched(),
                        });
                        replay.extend(texts.into_iter().map(StreamChunk::text));
                        replay.push(StreamChunk::Done {
                            finish_reason,
                            usage,
                        });

                        for chunk in replay {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        return;
                    }
                    StreamOutcome::Failed(message) => {
                        ctx.health.record_failure(&endpoint.endpoint_id);
                        tracing::warn!(
                            endpoint = %endpoint.endpoint_id,
                            error = %message,
                            "Sequential stream candidate failed"
                        );
                        errors.push(helper::failure_reason(endpoint, &message));
                    }
                }
            }

            let response =
                helper::all_endpoints_failed(StrategyKind::Sequential, &errors, errors.len(), Instant::now());
            let _ = tx
                .send(Ok(StreamChunk::Error {
                    code: ErrorCode::AllEndpointsFailed,
                    message: response.error_message.unwrap_or_default(),
                }))
                .await;
        });

        Ok(rx)
    }
}
