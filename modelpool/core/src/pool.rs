//! Model Pool
//!
//! Binds one endpoint directory to a strategy, a health tracker and a
//! dispatcher for the pool's whole lifetime. Strategy state (round-robin
//! counter, weighted-random generator) and health persist across calls.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::PoolConfig;
use crate::dispatch::{DispatchRequest, Dispatcher};
use crate::endpoint::Endpoint;
use crate::health::{HealthConfig, HealthTracker};
use crate::response::{DispatchError, DispatchResponse};
use crate::strategy::{
    helper, ChunkReceiver, DispatchContext, DispatchStrategy, StrategyKind, StrategyOptions,
    StrategyRegistry,
};

/// A named pool of interchangeable endpoints
pub struct ModelPool {
    name: String,
    endpoints: Arc<[Endpoint]>,
    strategy: Arc<dyn DispatchStrategy>,
    health: Arc<HealthTracker>,
    dispatcher: Arc<dyn Dispatcher>,
}

impl ModelPool {
    /// Build a pool from its parts
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidDirectory` for empty or duplicate endpoint ids.
    pub fn new(
        name: impl Into<String>,
        endpoints: Vec<Endpoint>,
        strategy: Arc<dyn DispatchStrategy>,
        health: Arc<HealthTracker>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, DispatchError> {
        helper::validate_directory(&endpoints)?;
        Ok(Self {
            name: name.into(),
            endpoints: endpoints.into(),
            strategy,
            health,
            dispatcher,
        })
    }

    /// Build a pool from a loaded configuration
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidDirectory` for empty or duplicate endpoint ids.
    pub fn from_config(
        config: &PoolConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, DispatchError> {
        let registry = StrategyRegistry::with_options(&config.strategy_options());
        let strategy = registry.get(config.strategy).ok_or_else(|| {
            DispatchError::InvalidDirectory(format!("no strategy registered for {}", config.strategy))
        })?;
        let health = Arc::new(HealthTracker::with_config(config.health.clone()));

        tracing::info!(
            pool = %config.name,
            strategy = %config.strategy,
            endpoints = config.endpoints.len(),
            "Pool created"
        );
        Self::new(
            config.name.clone(),
            config.endpoints.clone(),
            strategy,
            health,
            dispatcher,
        )
    }

    /// Start building a pool
    pub fn builder(name: impl Into<String>) -> ModelPoolBuilder {
        ModelPoolBuilder::new(name)
    }

    /// Pool name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Strategy in use
    #[must_use]
    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Endpoint directory
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Shared health tracker
    #[must_use]
    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    fn context(&self, cancel: CancellationToken) -> DispatchContext {
        DispatchContext {
            endpoints: self.endpoints.clone(),
            health: self.health.clone(),
            dispatcher: self.dispatcher.clone(),
            cancel,
        }
    }

    /// Run one call to completion
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Cancelled` if `cancel` fires before a result exists.
    pub async fn execute(
        &self,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<DispatchResponse, DispatchError> {
        let response = self.strategy.execute(&self.context(cancel), request).await?;
        tracing::debug!(
            pool = %self.name,
            request_id = %request.request_id,
            success = response.success,
            attempted = response.endpoints_attempted,
            duration_ms = response.duration_ms,
            "Pool call finished"
        );
        Ok(response)
    }

    /// Run one call as a chunk stream
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Cancelled` if `cancel` already fired.
    pub async fn execute_stream(
        &self,
        request: &DispatchRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, DispatchError> {
        self.strategy
            .execute_stream(&self.context(cancel), request)
            .await
    }
}

impl std::fmt::Debug for ModelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelPool")
            .field("name", &self.name)
            .field("strategy", &self.strategy.kind())
            .field("endpoints", &self.endpoints.len())
            .field("dispatcher", &self.dispatcher.name())
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ModelPool`]
pub struct ModelPoolBuilder {
    name: String,
    endpoints: Vec<Endpoint>,
    strategy: StrategyKind,
    options: StrategyOptions,
    health: Option<Arc<HealthTracker>>,
    health_config: HealthConfig,
}

impl ModelPoolBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
            strategy: StrategyKind::default(),
            options: StrategyOptions::default(),
            health: None,
            health_config: HealthConfig::default(),
        }
    }

    /// Add an endpoint
    #[must_use]
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Select the strategy
    #[must_use]
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Strategy options
    #[must_use]
    pub fn options(mut self, options: StrategyOptions) -> Self {
        self.options = options;
        self
    }

    /// Share an existing health tracker (e.g. between pools over the same endpoints)
    #[must_use]
    pub fn health(mut self, health: Arc<HealthTracker>) -> Self {
        self.health = Some(health);
        self
    }

    /// Thresholds for a tracker created by the builder
    #[must_use]
    pub fn health_config(mut self, config: HealthConfig) -> Self {
        self.health_config = config;
        self
    }

    /// Finish with a dispatcher
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::InvalidDirectory` for empty or duplicate endpoint ids.
    pub fn build(self, dispatcher: Arc<dyn Dispatcher>) -> Result<ModelPool, DispatchError> {
        let registry = StrategyRegistry::with_options(&self.options);
        let strategy = registry.get(self.strategy).ok_or_else(|| {
            DispatchError::InvalidDirectory(format!("no strategy registered for {}", self.strategy))
        })?;
        let health = self
            .health
            .unwrap_or_else(|| Arc::new(HealthTracker::with_config(self.health_config)));

        ModelPool::new(self.name, self.endpoints, strategy, health, dispatcher)
    }
}
