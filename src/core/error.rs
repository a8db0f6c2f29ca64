use thiserror::Error;

use crate::core::strategy::Algorithm;

/// Errors surfaced by the balancer engine.
///
/// Probe failures are deliberately absent: they only flip server status and
/// are logged by the health checker, never propagated to callers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum BalancerError {
    /// No server with status UP at selection time.
    #[error("no healthy backend server available")]
    Unavailable,

    /// An operation referenced a server identity that is not registered.
    #[error("server not registered: {0}")]
    NotFound(String),

    /// A policy change named an algorithm outside the fixed set.
    #[error("unknown algorithm `{name}`, valid algorithms: {valid}")]
    InvalidAlgorithm { name: String, valid: String },

    /// Rejected administrative input (bad URL, zero weight, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for balancer operations.
pub type BalancerResult<T> = Result<T, BalancerError>;

impl BalancerError {
    pub(crate) fn invalid_algorithm(name: &str) -> Self {
        Self::InvalidAlgorithm {
            name: name.to_string(),
            valid: Algorithm::ALL
                .iter()
                .map(|a| a.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}
