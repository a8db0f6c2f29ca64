//! Configuration data structures for Rudder.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files.
//! They are serde-friendly and carry defaults so that minimal configs stay
//! concise; the defaults mirror a local three-backend setup.
use serde::{Deserialize, Serialize};

use crate::core::strategy::Algorithm;

fn default_weight() -> u32 {
    1
}

/// One backend server to register at startup.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Absolute http(s) URL of the backend
    pub url: String,
    /// Static selection weight, must be at least 1
    #[serde(default = "default_weight")]
    pub weight: u32,
}

/// Health probing configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Whether the periodic probe loop runs at all
    pub enabled: bool,
    /// Seconds between probe cycles
    pub interval_secs: u64,
    /// Per-probe timeout in seconds; expiry counts as failure
    pub timeout_secs: u64,
    /// Path appended to each server URL for the probe request
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            timeout_secs: 5,
            path: "/api/health".to_string(),
        }
    }
}

/// Event feed configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EventFeedConfig {
    /// Per-subscriber broadcast backlog before old events are dropped
    pub buffer: usize,
}

impl Default for EventFeedConfig {
    fn default() -> Self {
        Self { buffer: 256 }
    }
}

/// Top-level balancer configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BalancerConfig {
    /// Address the proxy + admin listener binds to
    pub listen_addr: String,
    /// Algorithm active at startup
    pub default_algorithm: Algorithm,
    pub health_check: HealthCheckConfig,
    /// Servers registered at startup
    pub servers: Vec<UpstreamConfig>,
    pub events: EventFeedConfig,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            default_algorithm: Algorithm::LeastConnections,
            health_check: HealthCheckConfig::default(),
            servers: Vec::new(),
            events: EventFeedConfig::default(),
        }
    }
}
