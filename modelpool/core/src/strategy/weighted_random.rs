//! Weighted-Random Strategy
//!
//! Each available endpoint gets `1 / max(priority, 1)` weight, halved while
//! degraded. A uniform draw in `[0, total)` walks the cumulative weights; the
//! first endpoint whose running sum reaches the draw is chosen, and the last
//! endpoint absorbs floating-point leftovers.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::helper;
use super::{ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind};
use crate::dispatch::DispatchRequest;
use crate::endpoint::Endpoint;
use crate::health::{EndpointHealthStatus, HealthTracker};
use crate::response::{DispatchError, DispatchResponse};

/// Priority-weighted random selection, single attempt
#[derive(Debug)]
pub struct WeightedRandomStrategy {
    rng: Mutex<StdRng>,
}

impl WeightedRandomStrategy {
    /// Create with an entropy-seeded generator
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create with a fixed seed for reproducible selection
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Selection weight of an endpoint
    #[must_use]
    pub fn weight(endpoint: &Endpoint, status: EndpointHealthStatus) -> f64 {
        let base = 1.0 / f64::from(endpoint.priority.max(1));
        if status == EndpointHealthStatus::Degraded {
            base / 2.0
        } else {
            base
        }
    }

    /// Pick one endpoint from an already filtered list
    pub fn select<'a>(&self, available: &'a [Endpoint], health: &HealthTracker) -> Option<&'a Endpoint> {
        match available {
            [] => None,
            [only] => Some(only),
            _ => {
                let weights: Vec<f64> = available
                    .iter()
                    .map(|e| Self::weight(e, health.status(&e.endpoint_id)))
                    .collect();
                let total: f64 = weights.iter().sum();
                let draw = self.rng.lock().gen_range(0.0..total);

                let mut cumulative = 0.0;
                for (endpoint, weight) in available.iter().zip(&weights) {
                    cumulative += weight;
                    if cumulative >= draw {
                        return Some(endpoint);
                    }
                }
                available.last()
            }
        }
    }
}

impl Default for WeightedRandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchStrategy for WeightedRandomStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WeightedRandom
    }

    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError> {
        let started = std::time::Instant::now();
        let available = helper::prepare(ctx)?;
        let Some(endpoint) = self.select(&available, &ctx.health) else {
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
        match self.select(&available, &ctx.health) {
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
