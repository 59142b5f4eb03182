//! Fail-Fast Strategy
//!
//! Dispatches once to the best available endpoint (healthy first, then lowest
//! priority value). No retry and no fallback: the endpoint's outcome is the
//! call's outcome.

use async_trait::async_trait;

use super::helper;
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::DispatchRequest;
use crate::response::{DispatchError, DispatchResponse};

/// Best endpoint, single attempt
#[derive(Debug, Default)]
pub struct FailFastStrategy;

impl FailFastStrategy {
    /// Create the strategy
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DispatchStrategy for FailFastStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::FailFast
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = std::time::Instant::now();
        let available = helper::prepare(ctx)?;
        let Some(endpoint) = available.first() else {
            return Ok(helper::no_available_endpoints(self.kind(), started));
        };

        helper::execute_single(self.kind(), ctx, endpoint, request).await
    }

    async fn execute_stream(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<ChunkReceiver, DispatchError> {
        let available = helper::prepare(ctx)?;
        match available.into_iter().next() {
            Some(endpoint) => Ok(helper::stream_single(self.kind(), ctx, endpoint, request)),
            None => Ok(helper::no_available_stream(self.kind())),
        }
    }
}
