//! Error taxonomy for the transport, provider and orchestration layers.
//!
//! Quota exhaustion is a distinguished variant rather than a stringly-typed
//! catch-all so the plan runner's retry logic can match on it exhaustively.

use thiserror::Error;

/// Failures at the wire-protocol level of a single transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The initialize exchange produced no usable result.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Network-level failure. Not retried by the transport; retry policy
    /// belongs to the caller.
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx status on a request that expected a result.
    #[error("unexpected HTTP status {status} for {method}")]
    Status {
        status: reqwest::StatusCode,
        method: String,
    },

    /// JSON-RPC error payload from the server.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Response body was not a JSON-RPC response object.
    #[error("malformed response for {method}: {detail}")]
    Malformed { method: String, detail: String },
}

/// Failures at the provider-connection level.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Connection refused a call because it is not in the Ready state.
    #[error("provider '{0}' is not ready")]
    NotReady(String),

    #[error("provider '{provider}' initialization timed out after {seconds}s")]
    InitTimeout { provider: String, seconds: u64 },

    #[error("no provider exposes tool '{0}'")]
    UnknownTool(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Failures that cross the orchestration-loop boundary.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A provider signalled rate/plan exhaustion. Interrupts the current step
    /// immediately and triggers credential rotation in the plan runner.
    #[error("provider quota exhausted: {0}")]
    QuotaExceeded(String),

    /// Every configured provider failed to initialize.
    #[error("no providers available")]
    NoProvidersAvailable,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("model call failed: {0}")]
    Model(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Whether the plan runner should rotate credentials and retry the step.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, AgentError::QuotaExceeded(_))
    }
}
