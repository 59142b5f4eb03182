//! Endpoint Health Tracking
//!
//! Shared, concurrency-safe health state for every endpoint of a pool:
//! - Consecutive success/failure counters driving status transitions
//! - Rolling (exponential moving average) latency per endpoint
//! - Timed recovery probing for endpoints that were taken out of rotation
//!
//! # Status Transitions
//!
//! ```text
//!            N failures                 M failures
//! +---------+ ---------> +----------+ ------------> +-------------+
//! | Healthy |            | Degraded |               | Unavailable |
//! +---------+ <--------- +----------+ <------------ +-------------+
//!            K successes               1 success / recovery_timeout
//! ```
//!
//! - **Healthy**: preferred by every strategy
//! - **Degraded**: selectable, sorted after healthy endpoints, half weight
//! - **Unavailable**: never selected; once `recovery_timeout` has elapsed it is
//!   reported as `Degraded` again so a single trial request can reach it
//!
//! # Thread Safety
//!
//! Counters and latency are plain atomics. Status decisions run inside a
//! per-endpoint critical section that re-reads the counters, so a recorded
//! outcome is never observed half-applied. The tracker itself is a `DashMap`
//! of per-endpoint records created lazily on first observation.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

// ============================================================================
// Health Status
// ============================================================================

/// Health status of an endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointHealthStatus {
    /// Accepting requests, no recent failure streak
    #[default]
    Healthy,

    /// Recent failures; still selectable but disadvantaged
    Degraded,

    /// Failure threshold crossed; never selected
    Unavailable,
}

impl EndpointHealthStatus {
    /// Whether strategies may select an endpoint in this state
    #[must_use]
    pub fn is_selectable(self) -> bool {
        !matches!(self, Self::Unavailable)
    }

    /// Sort bucket used by the health-then-priority ordering
    #[must_use]
    pub fn sort_bucket(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded | Self::Unavailable => 1,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Unavailable => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Degraded,
            2 => Self::Unavailable,
            _ => Self::Healthy,
        }
    }
}

impl std::fmt::Display for EndpointHealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Thresholds driving status transitions
#[derive(Clone, Debug, PartialEq)]
pub struct HealthConfig {
    /// Consecutive failures before an endpoint is marked degraded
    pub degraded_after_failures: u32,

    /// Consecutive failures before an endpoint is marked unavailable
    pub unavailable_after_failures: u32,

    /// Consecutive successes before an endpoint is healthy again
    pub healthy_after_successes: u32,

    /// Time after which an unavailable endpoint may be tried again
    /// (`None` keeps it out of rotation until reset)
    pub recovery_timeout: Option<Duration>,

    /// Weight of the newest latency sample (0.0 - 1.0]
    pub latency_ema_alpha: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degraded_after_failures: 2,
            unavailable_after_failures: 5,
            healthy_after_successes: 2,
            recovery_timeout: Some(Duration::from_secs(30)),
            latency_ema_alpha: 0.3,
        }
    }
}

// ============================================================================
// Endpoint Health
// ============================================================================

/// Latency slot value meaning "no sample recorded yet"
const LATENCY_UNSET: u64 = u64::MAX;

/// Health record for a single endpoint
pub struct EndpointHealth {
    /// Endpoint identifier
    pub endpoint_id: String,

    config: HealthConfig,

    /// Stored status (see `EndpointHealthStatus::as_u8`)
    status: AtomicU8,

    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    total_successes: AtomicU64,
    total_failures: AtomicU64,

    /// Average latency as `f64` bits, `LATENCY_UNSET` until the first sample
    avg_latency_bits: AtomicU64,
    latency_samples: AtomicU64,

    /// Millis since `startup_time` when the endpoint became unavailable (0 = never)
    tripped_at_ms: AtomicU64,

    /// Serializes status transition decisions
    transition: Mutex<()>,

    startup_time: Instant,
}

impl EndpointHealth {
    /// Create a health record with default thresholds
    pub fn new(endpoint_id: impl Into<String>) -> Self {
        Self::with_config(endpoint_id, HealthConfig::default())
    }

    /// Create with custom thresholds
    pub fn with_config(endpoint_id: impl Into<String>, config: HealthConfig) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            config,
            status: AtomicU8::new(EndpointHealthStatus::Healthy.as_u8()),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            avg_latency_bits: AtomicU64::new(LATENCY_UNSET),
            latency_samples: AtomicU64::new(0),
            tripped_at_ms: AtomicU64::new(0),
            transition: Mutex::new(()),
            startup_time: Instant::now(),
        }
    }

    /// Current status as seen by strategies
    pub fn status(&self) -> EndpointHealthStatus {
        let stored = self.stored_status();
        if stored == EndpointHealthStatus::Unavailable && self.recovery_due() {
            return EndpointHealthStatus::Degraded;
        }
        stored
    }

    /// False iff the endpoint is unavailable
    pub fn is_available(&self) -> bool {
        self.status().is_selectable()
    }

    fn stored_status(&self) -> EndpointHealthStatus {
        EndpointHealthStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn recovery_due(&self) -> bool {
        let Some(timeout) = self.config.recovery_timeout else {
            return false;
        };
        let tripped_at = self.tripped_at_ms.load(Ordering::Acquire);
        if tripped_at == 0 {
            return false;
        }
        let elapsed = self.now_millis().saturating_sub(tripped_at);
        u128::from(elapsed) >= timeout.as_millis()
    }

    /// Record a successful call and its latency
    pub fn record_success(&self, latency_ms: u64) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        self.update_latency(latency_ms);

        // Both consecutive counters move together with the status decision
        let _guard = self.transition.lock();
        self.consecutive_failures.store(0, Ordering::Release);
        let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
        let stored = self.stored_status();

        if successes >= self.config.healthy_after_successes {
            if stored != EndpointHealthStatus::Healthy {
                self.status
                    .store(EndpointHealthStatus::Healthy.as_u8(), Ordering::Release);
                self.tripped_at_ms.store(0, Ordering::Release);
                tracing::info!(endpoint = %self.endpoint_id, from = %stored, "Endpoint recovered");
            }
        } else if stored == EndpointHealthStatus::Unavailable {
            // A successful trial brings the endpoint back into rotation
            self.status
                .store(EndpointHealthStatus::Degraded.as_u8(), Ordering::Release);
            self.tripped_at_ms.store(0, Ordering::Release);
            tracing::info!(endpoint = %self.endpoint_id, "Recovery trial succeeded");
        }
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);

        let _guard = self.transition.lock();
        self.consecutive_successes.store(0, Ordering::Release);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        let stored = self.stored_status();

        if failures >= self.config.unavailable_after_failures
            || (stored == EndpointHealthStatus::Unavailable && self.recovery_due())
        {
            // Crossing the threshold, or a failed trial, (re)starts the recovery clock
            self.status
                .store(EndpointHealthStatus::Unavailable.as_u8(), Ordering::Release);
            self.tripped_at_ms.store(self.now_millis(), Ordering::Release);
            if stored != EndpointHealthStatus::Unavailable {
                tracing::warn!(
                    endpoint = %self.endpoint_id,
                    consecutive_failures = failures,
                    "Endpoint marked unavailable"
                );
            }
        } else if failures >= self.config.degraded_after_failures
            && stored == EndpointHealthStatus::Healthy
        {
            self.status
                .store(EndpointHealthStatus::Degraded.as_u8(), Ordering::Release);
            tracing::warn!(
                endpoint = %self.endpoint_id,
                consecutive_failures = failures,
                "Endpoint degraded"
            );
        }
    }

    /// Update average latency using an exponential moving average seeded by the first sample
    fn update_latency(&self, latency_ms: u64) {
        let alpha = self.config.latency_ema_alpha;
        let sample = latency_ms as f64;

        loop {
            let current_bits = self.avg_latency_bits.load(Ordering::Acquire);
            let new_avg = if current_bits == LATENCY_UNSET {
                sample
            } else {
                alpha * sample + (1.0 - alpha) * f64::from_bits(current_bits)
            };

            if self
                .avg_latency_bits
                .compare_exchange(
                    current_bits,
                    new_avg.to_bits(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                break;
            }
        }
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    /// Average latency in milliseconds (0.0 = no sample yet)
    pub fn average_latency_ms(&self) -> f64 {
        let bits = self.avg_latency_bits.load(Ordering::Acquire);
        if bits == LATENCY_UNSET {
            0.0
        } else {
            f64::from_bits(bits)
        }
    }

    /// Whether at least one latency sample has been recorded
    pub fn has_latency_sample(&self) -> bool {
        self.avg_latency_bits.load(Ordering::Acquire) != LATENCY_UNSET
    }

    /// Number of latency samples recorded
    pub fn latency_samples(&self) -> u64 {
        self.latency_samples.load(Ordering::Relaxed)
    }

    /// Consecutive failure count
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Consecutive success count
    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes.load(Ordering::Acquire)
    }

    /// Total success count
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Total failure count
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Return to the neutral starting state
    pub fn reset(&self) {
        let _guard = self.transition.lock();
        self.status
            .store(EndpointHealthStatus::Healthy.as_u8(), Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
        self.total_successes.store(0, Ordering::Release);
        self.total_failures.store(0, Ordering::Release);
        self.avg_latency_bits.store(LATENCY_UNSET, Ordering::Release);
        self.latency_samples.store(0, Ordering::Release);
        self.tripped_at_ms.store(0, Ordering::Release);
    }

    /// Millis since creation; at least 1 so 0 can mean "never"
    fn now_millis(&self) -> u64 {
        u64::try_from(self.startup_time.elapsed().as_millis()).unwrap_or(u64::MAX - 1) + 1
    }

    /// Point-in-time copy of this record
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            endpoint_id: self.endpoint_id.clone(),
            status: self.status(),
            consecutive_failures: self.consecutive_failures(),
            consecutive_successes: self.consecutive_successes(),
            average_latency_ms: self.average_latency_ms(),
            latency_samples: self.latency_samples(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
        }
    }
}

impl std::fmt::Debug for EndpointHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointHealth")
            .field("endpoint_id", &self.endpoint_id)
            .field("status", &self.status())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("average_latency_ms", &self.average_latency_ms())
            .finish()
    }
}

// ============================================================================
// Health Snapshot
// ============================================================================

/// Immutable snapshot of an endpoint's health record
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthSnapshot {
    /// Endpoint identifier
    pub endpoint_id: String,
    /// Status at snapshot time
    pub status: EndpointHealthStatus,
    /// Consecutive failure count
    pub consecutive_failures: u32,
    /// Consecutive success count
    pub consecutive_successes: u32,
    /// Rolling average latency (0.0 = unexplored)
    pub average_latency_ms: f64,
    /// Number of latency samples
    pub latency_samples: u64,
    /// Total successes
    pub total_successes: u64,
    /// Total failures
    pub total_failures: u64,
}

impl HealthSnapshot {
    /// Success ratio over the record's lifetime (1.0 when nothing was recorded)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_successes + self.total_failures;
        if total == 0 {
            1.0
        } else {
            self.total_successes as f64 / total as f64
        }
    }
}

// ============================================================================
// Health Tracker
// ============================================================================

/// Health state for every endpoint a pool has observed
///
/// Shared by all strategies and all concurrent callers of a pool. Reads of
/// endpoints that were never observed report the neutral state (healthy,
/// no latency sample) without creating a record.
pub struct HealthTracker {
    endpoints: DashMap<String, Arc<EndpointHealth>>,
    config: RwLock<HealthConfig>,
}

impl HealthTracker {
    /// Create a tracker with default thresholds
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create with custom thresholds
    #[must_use]
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            endpoints: DashMap::new(),
            config: RwLock::new(config),
        }
    }

    /// Thresholds applied to newly observed endpoints
    pub fn config(&self) -> HealthConfig {
        self.config.read().clone()
    }

    /// Replace thresholds for endpoints observed from now on
    pub fn set_config(&self, config: HealthConfig) {
        *self.config.write() = config;
    }

    /// Health record for an endpoint, if it was observed
    pub fn get(&self, endpoint_id: &str) -> Option<Arc<EndpointHealth>> {
        self.endpoints.get(endpoint_id).map(|h| h.clone())
    }

    /// Health record for an endpoint, creating it on first observation
    pub fn get_or_create(&self, endpoint_id: &str) -> Arc<EndpointHealth> {
        if let Some(health) = self.get(endpoint_id) {
            return health;
        }
        self.endpoints
            .entry(endpoint_id.to_string())
            .or_insert_with(|| {
                let config = self.config.read().clone();
                Arc::new(EndpointHealth::with_config(endpoint_id, config))
            })
            .clone()
    }

    /// Record a successful call
    pub fn record_success(&self, endpoint_id: &str, latency_ms: u64) {
        self.get_or_create(endpoint_id).record_success(latency_ms);
    }

    /// Record a failed call
    pub fn record_failure(&self, endpoint_id: &str) {
        self.get_or_create(endpoint_id).record_failure();
    }

    /// False iff the endpoint is unavailable
    pub fn is_available(&self, endpoint_id: &str) -> bool {
        self.get(endpoint_id).map_or(true, |h| h.is_available())
    }

    /// Current status of an endpoint
    pub fn status(&self, endpoint_id: &str) -> EndpointHealthStatus {
        self.get(endpoint_id)
            .map_or(EndpointHealthStatus::Healthy, |h| h.status())
    }

    /// Average latency in milliseconds (0.0 = unexplored)
    pub fn average_latency_ms(&self, endpoint_id: &str) -> f64 {
        self.get(endpoint_id)
            .map_or(0.0, |h| h.average_latency_ms())
    }

    /// Whether an endpoint has at least one latency sample
    pub fn has_latency_sample(&self, endpoint_id: &str) -> bool {
        self.get(endpoint_id)
            .is_some_and(|h| h.has_latency_sample())
    }

    /// Snapshot of one endpoint
    pub fn snapshot(&self, endpoint_id: &str) -> Option<HealthSnapshot> {
        self.get(endpoint_id).map(|h| h.snapshot())
    }

    /// Snapshots of every observed endpoint, ordered by id
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let mut snapshots: Vec<_> = self.endpoints.iter().map(|e| e.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        snapshots
    }

    /// Reset one endpoint to the neutral state
    pub fn reset(&self, endpoint_id: &str) {
        if let Some(health) = self.get(endpoint_id) {
            health.reset();
        }
    }

    /// Number of observed endpoints
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Counts per status across observed endpoints
    pub fn aggregate_stats(&self) -> AggregateHealthStats {
        let mut stats = AggregateHealthStats::default();
        for entry in &self.endpoints {
            let health = entry.value();
            stats.total_endpoints += 1;
            match health.status() {
                EndpointHealthStatus::Healthy => stats.healthy_count += 1,
                EndpointHealthStatus::Degraded => stats.degraded_count += 1,
                EndpointHealthStatus::Unavailable => stats.unavailable_count += 1,
            }
            stats.total_successes += health.total_successes();
            stats.total_failures += health.total_failures();
        }
        stats
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTracker")
            .field("endpoints", &self.endpoints.len())
            .finish()
    }
}

// ============================================================================
// Aggregate Stats
// ============================================================================

/// Status counts across all observed endpoints
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateHealthStats {
    /// Observed endpoints
    pub total_endpoints: usize,
    /// Healthy endpoints
    pub healthy_count: usize,
    /// Degraded endpoints
    pub degraded_count: usize,
    /// Unavailable endpoints
    pub unavailable_count: usize,
    /// Successes across all endpoints
    pub total_successes: u64,
    /// Failures across all endpoints
    pub total_failures: u64,
}

impl AggregateHealthStats {
    /// Percentage of observed endpoints that can be selected
    #[must_use]
    pub fn availability_percentage(&self) -> f64 {
        if self.total_endpoints == 0 {
            100.0
        } else {
            let available = self.healthy_count + self.degraded_count;
            (available as f64 / self.total_endpoints as f64) * 100.0
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
