//! Round-Robin Strategy
//!
//! One atomic counter per strategy instance rotates through the available
//! endpoints. Unavailable endpoints are filtered out before indexing, so a
//! tripped endpoint shifts the rotation instead of wasting a turn.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::helper;
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::DispatchRequest;
use crate::endpoint::Endpoint;
use crate::response::{DispatchError, DispatchResponse};

/// Rotating selection, single attempt
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    /// Calls served so far; wraps on overflow
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    /// Create with the counter at zero
    #[must_use]
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    /// Take the next slot from `available`
    fn select(&self, mut available: Vec<Endpoint>) -> Option<Endpoint> {
        if available.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % available.len();
        Some(available.swap_remove(index))
    }
}

#[async_trait]
impl DispatchStrategy for RoundRobinStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::RoundRobin
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = std::time::Instant::now();
        let Some(endpoint) = self.select(helper::prepare(ctx)?) else {
            return Ok(helper::no_available_endpoints(self.kind(), started));
        };

        helper::execute_single(self.kind(), ctx, &endpoint, request).await
    }

    async fn execute_stream(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<ChunkReceiver, DispatchError> {
        match self.select(helper::prepare(ctx)?) {
            Some(endpoint) => Ok(helper::stream_single(self.kind(), ctx, endpoint, request)),
            None => Ok(helper::no_available_stream(self.kind())),
        }
    }
}
