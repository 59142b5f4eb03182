//! Modelpool Core - Client-Side Load Balancing for Model Calls
//!
//! Routes one logical model call across a pool of interchangeable endpoints
//! (different platforms or models serving the same capability). Each call is
//! handled by a pluggable strategy; every strategy shares one live view of
//! endpoint health and latency.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          ModelPool                            │
//! │   name · endpoint directory · strategy · health · dispatcher  │
//! └───────────────┬──────────────────────────────────────────────┘
//!                 │ execute / execute_stream (+ CancellationToken)
//!                 v
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       DispatchStrategy                        │
//! │  FailFast · Sequential · RoundRobin · WeightedRandom ·        │
//! │  LeastLatency · Race                                          │
//! │                                                               │
//! │  helper: availability filter, ordering, response shapes      │
//! └───────┬──────────────────────────────────────────┬───────────┘
//!         │ is_available / status / latency           │ send / send_stream
//!         │ record_success / record_failure           v
//! ┌───────┴──────────────┐              ┌──────────────────────────┐
//! │    HealthTracker     │              │        Dispatcher        │
//! │ DashMap + atomics    │              │  (HttpDispatcher, mocks) │
//! └──────────────────────┘              └──────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ModelPool`]: binds a directory, strategy, health tracker and dispatcher
//! - [`DispatchStrategy`]: the load-balancing algorithm interface
//! - [`HealthTracker`]: shared per-endpoint health and latency state
//! - [`Dispatcher`]: performs I/O against a single endpoint
//! - [`DispatchResponse`] / [`StreamChunk`]: what callers get back
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use modelpool_core::{DispatchRequest, HttpDispatcher, ModelPool, config::load_config};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let dispatcher = Arc::new(HttpDispatcher::from_config(&config)?);
//!     let pool = ModelPool::from_config(&config, dispatcher)?;
//!
//!     let request = DispatchRequest::new(serde_json::json!({
//!         "messages": [{"role": "user", "content": "Hello"}]
//!     }));
//!     let response = pool.execute(&request, CancellationToken::new()).await?;
//!     println!("{}", response.content_or_empty());
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod health;
pub mod http;
pub mod pool;
pub mod response;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{ConfigError, PoolConfig};
pub use dispatch::{DispatchChunk, DispatchRequest, DispatchResult, Dispatcher, TokenUsage};
pub use endpoint::{DispatchedEndpoint, Endpoint};
pub use health::{EndpointHealthStatus, HealthConfig, HealthSnapshot, HealthTracker};
pub use http::{HttpDispatchError, HttpDispatcher};
pub use pool::{ModelPool, ModelPoolBuilder};
pub use response::{DispatchError, DispatchResponse, ErrorCode, StreamChunk};
pub use strategy::{
    ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind, StrategyOptions,
    StrategyRegistry,
};
