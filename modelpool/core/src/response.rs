//! Responses, Stream Chunks and Errors
//!
//! What strategies hand back to callers. Ordinary endpoint failures are
//! structured [`DispatchResponse`]s carrying an [`ErrorCode`]; only caller
//! cancellation and directory contract violations surface as [`DispatchError`].

use serde::{Deserialize, Serialize};

use crate::dispatch::TokenUsage;
use crate::endpoint::DispatchedEndpoint;
use crate::strategy::StrategyKind;

// ============================================================================
// Error Codes
// ============================================================================

/// Machine-readable failure category of a response
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Every endpoint of the pool is unavailable (503)
    NoAvailableEndpoints,
    /// Every attempted endpoint failed (502)
    AllEndpointsFailed,
    /// The single attempted endpoint failed (its own status)
    EndpointError,
}

impl ErrorCode {
    /// Wire representation
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoAvailableEndpoints => "NO_AVAILABLE_ENDPOINTS",
            Self::AllEndpointsFailed => "ALL_ENDPOINTS_FAILED",
            Self::EndpointError => "ENDPOINT_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status reported when no endpoint could be selected
pub const STATUS_NO_AVAILABLE_ENDPOINTS: u16 = 503;

/// Status reported when every attempt failed, or a failed attempt had no status
pub const STATUS_BAD_GATEWAY: u16 = 502;

// ============================================================================
// Response
// ============================================================================

/// Result of one pool call
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DispatchResponse {
    /// Whether an endpoint produced a usable answer
    pub success: bool,

    /// Status code of the answer (or the synthesized failure status)
    pub status_code: u16,

    /// Content on success
    pub content: Option<String>,

    /// Failure category
    pub error_code: Option<ErrorCode>,

    /// Failure description
    pub error_message: Option<String>,

    /// Endpoint that produced this response (the winner for races)
    pub dispatched_endpoint: Option<DispatchedEndpoint>,

    /// Wall time spent inside the strategy
    pub duration_ms: u64,

    /// Strategy that produced the response
    pub strategy_used: StrategyKind,

    /// Endpoints dispatched to while producing the response
    pub endpoints_attempted: usize,
}

impl DispatchResponse {
    /// Content or an empty string
    #[must_use]
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

// ============================================================================
// Stream Chunks
// ============================================================================

/// Chunk of a streamed pool call
///
/// A well-formed stream is one `Start`, any number of `Text`, then exactly one
/// `Done` or `Error`. A pool with nothing to dispatch to yields a lone `Error`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// The endpoint whose output follows
    Start {
        /// Serving endpoint
        endpoint: DispatchedEndpoint,
    },

    /// Content delta
    Text {
        /// Delta text
        content: String,
    },

    /// Successful end of stream
    Done {
        /// Why generation stopped
        finish_reason: Option<String>,
        /// Token usage, if reported
        usage: Option<TokenUsage>,
    },

    /// Failed end of stream
    Error {
        /// Failure category
        code: ErrorCode,
        /// Failure description
        message: String,
    },
}

impl StreamChunk {
    /// Text chunk
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Whether this chunk ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Errors that are not endpoint outcomes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The caller's cancellation token fired
    #[error("dispatch cancelled by caller")]
    Cancelled,

    /// The endpoint directory violates its contract
    #[error("invalid endpoint directory: {0}")]
    InvalidDirectory(String),
}
