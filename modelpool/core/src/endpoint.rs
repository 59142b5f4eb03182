//! Endpoint Directory
//!
//! The members of one pool. Each [`Endpoint`] is a concrete (model, platform)
//! pair reachable through a base URL. The directory is owned by the pool
//! configuration and is read-only for the duration of a dispatch cycle.

use serde::{Deserialize, Serialize};

// ============================================================================
// Endpoint
// ============================================================================

/// One concrete (model, platform) pair that can serve a pool's calls
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier within the pool (health is keyed by this)
    pub endpoint_id: String,

    /// Model identifier sent to the platform
    pub model_id: String,

    /// Platform identifier
    pub platform_id: String,

    /// Human-readable platform name
    #[serde(default)]
    pub platform_name: String,

    /// Platform family (e.g. "openai", "anthropic", "ollama")
    #[serde(default)]
    pub platform_type: String,

    /// Base URL of the platform API
    pub api_url: String,

    /// Lower value = higher priority
    #[serde(default)]
    pub priority: i32,
}

impl Endpoint {
    /// Create an endpoint with the minimum set of fields
    pub fn new(
        endpoint_id: impl Into<String>,
        model_id: impl Into<String>,
        platform_id: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        let platform_id = platform_id.into();
        Self {
            endpoint_id: endpoint_id.into(),
            model_id: model_id.into(),
            platform_name: platform_id.clone(),
            platform_type: String::new(),
            platform_id,
            api_url: api_url.into(),
            priority: 0,
        }
    }

    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set platform display name
    pub fn with_platform_name(mut self, name: impl Into<String>) -> Self {
        self.platform_name = name.into();
        self
    }

    /// Set platform type
    pub fn with_platform_type(mut self, platform_type: impl Into<String>) -> Self {
        self.platform_type = platform_type.into();
        self
    }

    /// Short label used in aggregated error messages and logs
    ///
    /// `model (platform) [endpoint_id]`: the id tells apart endpoints that
    /// serve the same model on the same platform.
    #[must_use]
    pub fn label(&self) -> String {
        let platform = if self.platform_name.is_empty() {
            &self.platform_id
        } else {
            &self.platform_name
        };
        format!("{} ({platform}) [{}]", self.model_id, self.endpoint_id)
    }

    /// Public projection of this endpoint
    #[must_use]
    pub fn dispatched(&self) -> DispatchedEndpoint {
        DispatchedEndpoint::from(self)
    }
}

// ============================================================================
// Dispatched Endpoint
// ============================================================================

/// Read-only projection of the endpoint that actually served a call
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchedEndpoint {
    /// Endpoint identifier
    pub endpoint_id: String,
    /// Model identifier
    pub model_id: String,
    /// Platform identifier
    pub platform_id: String,
    /// Platform display name
    pub platform_name: String,
    /// Platform family
    pub platform_type: String,
}

impl From<&Endpoint> for DispatchedEndpoint {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            endpoint_id: endpoint.endpoint_id.clone(),
            model_id: endpoint.model_id.clone(),
            platform_id: endpoint.platform_id.clone(),
            platform_name: endpoint.platform_name.clone(),
            platform_type: endpoint.platform_type.clone(),
        }
    }
}
