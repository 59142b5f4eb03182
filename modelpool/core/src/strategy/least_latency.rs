//! Least-Latency Strategy
//!
//! Explore first, then exploit: endpoints without a latency sample are always
//! preferred (lowest priority value first). Once every available endpoint has
//! been measured, the lowest rolling average wins. Ties go to healthy
//! endpoints over degraded ones, then to priority.

use std::cmp::Ordering;

use async_trait::async_trait;

use super::helper;
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::DispatchRequest;
use crate::endpoint::Endpoint;
use crate::health::HealthTracker;
use crate::response::{DispatchError, DispatchResponse};

/// Lowest observed latency, single attempt
#[derive(Debug, Default)]
pub struct LeastLatencyStrategy;

impl LeastLatencyStrategy {
    /// Create the strategy
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Pick one endpoint from an already filtered list
    pub fn select<'a>(available: &'a [Endpoint], health: &HealthTracker) -> Option<&'a Endpoint> {
        let bucket = |e: &Endpoint| health.status(&e.endpoint_id).sort_bucket();

        if let Some(unexplored) = available
            .iter()
            .filter(|e| !health.has_latency_sample(&e.endpoint_id))
            .min_by_key(|e| (bucket(e), e.priority))
        {
            tracing::debug!(endpoint = %unexplored.endpoint_id, "Exploring unmeasured endpoint");
            return Some(unexplored);
        }

        available
            .iter()
            .map(|e| (health.average_latency_ms(&e.endpoint_id), bucket(e), e))
            .min_by(|(a_latency, a_bucket, a), (b_latency, b_bucket, b)| {
                a_latency
                    .partial_cmp(b_latency)
                    .unwrap_or(Ordering::Equal)
                    .then(a_bucket.cmp(b_bucket))
                    .then(a.priority.cmp(&b.priority))
            })
            .map(|(_, _, endpoint)| endpoint)
    }
}

#[async_trait]
impl DispatchStrategy for LeastLatencyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LeastLatency
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = std::time::Instant::now();
        let available = helper::prepare(ctx)?;
        let Some(endpoint) = Self::select(&available, &ctx.health) else {
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
        match Self::select(&available, &ctx.health) {
            Some(endpoint) => Ok(helper::stream_single(
                self.kind(),
                ctx,
                endpoint.clone(),
                request,
            )),
            None => Ok(helper::no_available_stream(self.kind())),
        }
    }
}
