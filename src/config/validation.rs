//! Configuration validation.
//!
//! Run before startup so a broken file fails fast with every problem
//! listed, instead of surfacing one registration error at a time.
use std::{collections::HashSet, net::SocketAddr};

use thiserror::Error;

use crate::{config::models::BalancerConfig, core::server::ServerUrl};

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("listen_addr `{0}` is not a valid socket address")]
    InvalidListenAddr(String),

    #[error("server {index}: {reason}")]
    InvalidServerUrl { index: usize, reason: String },

    #[error("server `{0}` is listed more than once")]
    DuplicateServer(String),

    #[error("server `{0}` has weight 0, must be at least 1")]
    ZeroWeight(String),

    #[error("health_check.interval_secs must be greater than 0")]
    ZeroInterval,

    #[error("health_check.timeout_secs must be greater than 0")]
    ZeroTimeout,

    #[error("health_check.path must start with `/`, got `{0}`")]
    InvalidHealthPath(String),
}

pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// Validate a configuration, collecting every violation.
pub fn validate(config: &BalancerConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.listen_addr.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidListenAddr(
            config.listen_addr.clone(),
        ));
    }

    let mut seen = HashSet::new();
    for (index, upstream) in config.servers.iter().enumerate() {
        match ServerUrl::new(&upstream.url) {
            Ok(url) => {
                if !seen.insert(url.as_str().to_string()) {
                    errors.push(ValidationError::DuplicateServer(
                        url.as_str().to_string(),
                    ));
                }
            }
            Err(err) => errors.push(ValidationError::InvalidServerUrl {
                index,
                reason: err.to_string(),
            }),
        }
        if upstream.weight == 0 {
            errors.push(ValidationError::ZeroWeight(upstream.url.clone()));
        }
    }

    if config.health_check.enabled {
        if config.health_check.interval_secs == 0 {
            errors.push(ValidationError::ZeroInterval);
        }
        if config.health_check.timeout_secs == 0 {
            errors.push(ValidationError::ZeroTimeout);
        }
        if !config.health_check.path.starts_with('/') {
            errors.push(ValidationError::InvalidHealthPath(
                config.health_check.path.clone(),
            ));
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
