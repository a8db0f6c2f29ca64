//! Rudder - a policy-driven HTTP load balancer.
//!
//! Rudder routes inbound HTTP traffic across a pool of backend servers
//! using one of five selectable algorithms, keeps per-server and
//! per-client state, probes backend health on an interval, and exposes
//! live metrics, a routing event stream and an algorithm-performance
//! analyzer through an administrative API.
//!
//! # Features
//! - Five load-balancing policies: round robin, smooth weighted round
//!   robin, least connections, random, and load-adjusted least response
//!   time
//! - Active health checking with immediate probes for new servers
//! - Per-server connection and client-identity tracking
//! - Per-algorithm metrics with a fairness score and ranked comparison
//! - Administrative JSON API plus a Server-Sent-Events routing feed
//! - Structured tracing and exporter-agnostic metrics
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use rudder::{BalancerService, config::BalancerConfig};
//!
//! let config = Arc::new(BalancerConfig::default());
//! let service = Arc::new(BalancerService::new(config));
//! service.add_server("http://localhost:5001", 2)?;
//! # Ok::<(), rudder::core::BalancerError>(())
//! ```
//!
//! # Architecture
//! The crate follows a hexagonal layout: business logic lives in `core`
//! (pool, selection, stats, analyzer, façade), traits in `ports`, and I/O
//! in `adapters` (health checker, reqwest client, axum surface). The
//! engine itself never blocks on the network; probing and forwarding talk
//! to it through channels and method calls.
//!
//! # Error Handling
//! Domain operations return [`core::BalancerError`]; binary plumbing uses
//! `eyre::Result` with context attached via `WrapErr`.
// Re-export public modules with explicit visibility controls
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

// These modules are implementation details and should not be directly used by users
pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HealthChecker, HttpClientAdapter, admin_router},
    core::{Algorithm, BalancerError, BalancerService},
    ports::http_client::HttpClient,
};
