//! Dispatch Strategies
//!
//! A strategy turns one request into one response (or one chunk stream) by
//! choosing endpoints from a pool's directory, consulting and updating the
//! shared health tracker, and delegating I/O to the dispatcher.
//!
//! # Architecture
//!
//! ```text
//! ModelPool
//!     |
//!     v
//! DispatchContext { endpoints, health, dispatcher, cancel }
//!     |
//!     v
//! StrategyRegistry[StrategyKind] --> dyn DispatchStrategy
//!     |                                   |
//!     |                         helper::available_endpoints()
//!     |                                   |
//!     v                                   v
//! HealthTracker  <---- record_*() ---- Dispatcher::send / send_stream
//! ```
//!
//! # Strategies
//!
//! - [`FailFastStrategy`]: best available endpoint, one attempt
//! - [`SequentialStrategy`]: ordered fallback through every available endpoint
//! - [`RoundRobinStrategy`]: shared counter rotates through available endpoints
//! - [`WeightedRandomStrategy`]: priority-weighted random pick
//! - [`LeastLatencyStrategy`]: explore unmeasured endpoints, then lowest latency
//! - [`RaceStrategy`]: all available endpoints at once, first success wins

pub mod fail_fast;
pub mod helper;
pub mod least_latency;
pub mod race;
pub mod round_robin;
pub mod sequential;
pub mod weighted_random;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::endpoint::Endpoint;
use crate::health::HealthTracker;
use crate::response::{DispatchError, DispatchResponse, StreamChunk};

pub use fail_fast::FailFastStrategy;
pub use least_latency::LeastLatencyStrategy;
pub use race::RaceStrategy;
pub use round_robin::RoundRobinStrategy;
pub use sequential::SequentialStrategy;
pub use weighted_random::WeightedRandomStrategy;

/// Receiving half of a streamed pool call
pub type ChunkReceiver = mpsc::Receiver<Result<StreamChunk, DispatchError>>;

/// Sending half of a streamed pool call
pub type ChunkSender = mpsc::Sender<Result<StreamChunk, DispatchError>>;

// ============================================================================
// Strategy Kind
// ============================================================================

/// Discriminant selecting a strategy implementation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Best endpoint, no retry
    FailFast,
    /// Ordered fallback
    #[default]
    Sequential,
    /// Rotating counter
    RoundRobin,
    /// Priority-weighted random
    WeightedRandom,
    /// Lowest observed latency
    LeastLatency,
    /// Concurrent fan-out, first success wins
    Race,
}

impl StrategyKind {
    /// Every strategy kind
    pub const ALL: [Self; 6] = [
        Self::FailFast,
        Self::Sequential,
        Self::RoundRobin,
        Self::WeightedRandom,
        Self::LeastLatency,
        Self::Race,
    ];

    /// Configuration name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::Sequential => "sequential",
            Self::RoundRobin => "round_robin",
            Self::WeightedRandom => "weighted_random",
            Self::LeastLatency => "least_latency",
            Self::Race => "race",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown strategy: {s}"))
    }
}

// ============================================================================
// Dispatch Context
// ============================================================================

/// Everything a strategy needs for one call
///
/// Cheap to clone; streaming strategies move a clone into their producer task.
#[derive(Clone)]
pub struct DispatchContext {
    /// The pool's directory, in configuration order
    pub endpoints: Arc<[Endpoint]>,

    /// Health state shared by every caller of the pool
    pub health: Arc<HealthTracker>,

    /// Performs the actual I/O
    pub dispatcher: Arc<dyn Dispatcher>,

    /// Caller cancellation
    pub cancel: CancellationToken,
}

impl DispatchContext {
    /// Create a context with a fresh cancellation token
    pub fn new(
        endpoints: impl Into<Arc<[Endpoint]>>,
        health: Arc<HealthTracker>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            endpoints: endpoints.into(),
            health,
            dispatcher,
            cancel: CancellationToken::new(),
        }
    }

    /// Use the caller's cancellation token
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("endpoints", &self.endpoints.len())
            .field("dispatcher", &self.dispatcher.name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Strategy Trait
// ============================================================================

/// A load-balancing algorithm
///
/// Endpoint failures come back as unsuccessful [`DispatchResponse`]s (or a
/// terminal [`StreamChunk::Error`]). `Err` is reserved for caller cancellation
/// and directory contract violations.
#[async_trait]
pub trait DispatchStrategy: Send + Sync {
    /// Which algorithm this is
    fn kind(&self) -> StrategyKind;

    /// Run one call to completion
    async fn execute(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<DispatchResponse, DispatchError>;

    /// Run one call as a chunk stream
    async fn execute_stream(
        &self,
        ctx: &DispatchContext,
        request: &DispatchRequest,
    ) -> Result<ChunkReceiver, DispatchError>;
}

// ============================================================================
// Strategy Registry
// ============================================================================

/// Options applied when the registry builds its strategies
#[derive(Clone, Debug, Default)]
pub struct StrategyOptions {
    /// Race streams by first byte instead of synthesizing from a full race
    pub stream_racing: bool,

    /// Seed for the weighted-random generator (entropy when `None`)
    pub rng_seed: Option<u64>,
}

/// One instance of every strategy, keyed by kind
///
/// Instances live as long as the registry, so round-robin counters and the
/// weighted-random generator persist across calls.
pub struct StrategyRegistry {
    strategies: HashMap<StrategyKind, Arc<dyn DispatchStrategy>>,
}

impl StrategyRegistry {
    /// Registry with default options
    #[must_use]
    pub fn new() -> Self {
        Self::with_options(&StrategyOptions::default())
    }

    /// Registry with custom options
    #[must_use]
    pub fn with_options(options: &StrategyOptions) -> Self {
        let weighted = match options.rng_seed {
            Some(seed) => WeightedRandomStrategy::with_seed(seed),
            None => WeightedRandomStrategy::new(),
        };

        let mut strategies: HashMap<StrategyKind, Arc<dyn DispatchStrategy>> = HashMap::new();
        strategies.insert(StrategyKind::FailFast, Arc::new(FailFastStrategy::new()));
        strategies.insert(StrategyKind::Sequential, Arc::new(SequentialStrategy::new()));
        strategies.insert(StrategyKind::RoundRobin, Arc::new(RoundRobinStrategy::new()));
        strategies.insert(StrategyKind::WeightedRandom, Arc::new(weighted));
        strategies.insert(StrategyKind::LeastLatency, Arc::new(LeastLatencyStrategy::new()));
        strategies.insert(
            StrategyKind::Race,
            Arc::new(RaceStrategy::new().with_stream_racing(options.stream_racing)),
        );
        Self { strategies }
    }

    /// Strategy for a kind
    pub fn get(&self, kind: StrategyKind) -> Option<Arc<dyn DispatchStrategy>> {
        self.strategies.get(&kind).cloned()
    }

    /// Replace the strategy registered for its kind
    pub fn register(&mut self, strategy: Arc<dyn DispatchStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    /// Registered kinds
    pub fn kinds(&self) -> Vec<StrategyKind> {
        StrategyKind::ALL
            .into_iter()
            .filter(|kind| self.strategies.contains_key(kind))
            .collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
