//! Central balancer orchestration service.
//!
//! [`BalancerService`] is the single owned aggregate holding the server
//! pool, the selection cursors, the metrics accumulators, the active
//! algorithm and the event bus. Every per-request and administrative
//! operation goes through it; an instance is cheap to share behind an
//! `Arc`. The service performs no network I/O itself — health probing and
//! request forwarding live in adapters that talk to it via channels and
//! method calls.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU8, Ordering},
    },
};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    config::models::{BalancerConfig, HealthCheckConfig},
    core::{
        analyzer::{self, AlgorithmAnalysis},
        error::BalancerResult,
        events::{BalancerEvent, EventBus},
        pool::{ClientDistribution, ServerPool},
        server::ServerUrl,
        stats::{MetricsSnapshot, StatsCollector},
        strategy::{Algorithm, SelectionState},
    },
    metrics,
};

/// Outcome of a successful routing decision.
#[derive(Debug, Clone)]
pub struct RoutedRequest {
    pub target: ServerUrl,
    pub algorithm: Algorithm,
}

/// Active algorithm plus the fixed catalog, for the administrative API.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmInfo {
    pub algorithm: Algorithm,
    pub available_algorithms: Vec<&'static str>,
    pub descriptions: HashMap<&'static str, &'static str>,
}

pub struct BalancerService {
    config: Arc<BalancerConfig>,
    pool: ServerPool,
    selection: SelectionState,
    stats: StatsCollector,
    active_algorithm: AtomicU8,
    events: EventBus,
    probe_tx: mpsc::UnboundedSender<ServerUrl>,
    probe_rx: Mutex<Option<mpsc::UnboundedReceiver<ServerUrl>>>,
}

impl BalancerService {
    /// Build the service and register the configured initial servers. Each
    /// initial server gets an immediate-probe request queued for the health
    /// checker, so status leaves `Unknown` as soon as probing starts.
    pub fn new(config: Arc<BalancerConfig>) -> Self {
        let (probe_tx, probe_rx) = mpsc::unbounded_channel();

        let service = Self {
            pool: ServerPool::new(),
            selection: SelectionState::new(),
            stats: StatsCollector::new(),
            active_algorithm: AtomicU8::new(config.default_algorithm as u8),
            events: EventBus::new(config.events.buffer),
            probe_tx,
            probe_rx: Mutex::new(Some(probe_rx)),
            config,
        };

        for upstream in &service.config.servers {
            if let Err(err) = service.add_server(&upstream.url, upstream.weight) {
                tracing::error!(url = %upstream.url, %err, "Skipping invalid initial server");
            }
        }

        service
    }

    /// The currently active algorithm.
    pub fn algorithm(&self) -> Algorithm {
        Algorithm::from_u8(self.active_algorithm.load(Ordering::Acquire))
    }

    /// Change the active algorithm. The only path that mutates it; unknown
    /// names are rejected and leave the active algorithm untouched.
    pub fn set_algorithm(&self, name: &str) -> BalancerResult<Algorithm> {
        let algorithm: Algorithm = name.parse()?;
        self.active_algorithm
            .store(algorithm as u8, Ordering::Release);
        tracing::info!(%algorithm, "Algorithm changed");
        Ok(algorithm)
    }

    /// The fixed catalog with human-readable descriptions.
    pub fn algorithm_info(&self) -> AlgorithmInfo {
        AlgorithmInfo {
            algorithm: self.algorithm(),
            available_algorithms: Algorithm::ALL.iter().map(|a| a.as_str()).collect(),
            descriptions: Algorithm::ALL
                .iter()
                .map(|a| (a.as_str(), a.description()))
                .collect(),
        }
    }

    /// Register a backend. Returns true when the server is new; an existing
    /// registration is a no-op returning false.
    pub fn add_server(&self, url: &str, weight: u32) -> BalancerResult<bool> {
        match self.pool.register(url, weight)? {
            Some(entry) => {
                tracing::info!(url = %entry.url(), weight, "Added server");
                // Ask the health checker for one out-of-band probe; if it is
                // not running yet the request is consumed on startup.
                let _ = self.probe_tx.send(entry.url().clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Deregister a backend and drop any client assignments pointing at it.
    pub fn remove_server(&self, url: &str) -> BalancerResult<()> {
        let removed = self.pool.deregister(url)?;
        tracing::info!(url = %removed.url(), "Removed server");
        Ok(())
    }

    /// Update a server's static weight, returning the previous value.
    pub fn set_server_weight(&self, url: &str, weight: u32) -> BalancerResult<u32> {
        let old = self.pool.set_weight(url, weight)?;
        tracing::info!(url, old_weight = old, new_weight = weight, "Updated server weight");
        Ok(old)
    }

    /// Route one inbound request: pick a target among the UP servers with
    /// the active algorithm and record the new in-flight connection. The
    /// caller forwards the request and reports back via [`Self::complete`].
    /// Fails fast with [`BalancerError::Unavailable`] when nothing is UP.
    pub fn route(&self, client: &str, method: &str, path: &str) -> BalancerResult<RoutedRequest> {
        let algorithm = self.algorithm();
        let available = self.pool.up_servers();
        let server = self.selection.select(algorithm, &available)?;

        self.pool.on_routed(&server, client);
        let connections = server.active_connections();
        metrics::set_server_active_connections(server.url().as_str(), connections);

        tracing::debug!(
            %algorithm,
            target = %server.url(),
            client,
            method,
            path,
            connections,
            "Routed request"
        );

        self.events.publish(BalancerEvent::Request {
            timestamp: Utc::now(),
            algorithm,
            server: server.url().as_str().to_string(),
            method: method.to_string(),
            path: path.to_string(),
            client: client.to_string(),
            connections,
        });

        Ok(RoutedRequest {
            target: server.url().clone(),
            algorithm,
        })
    }

    /// Report the outcome of a routed request. Must be called exactly once
    /// per successful `route`, for successes and failures alike. A target
    /// deregistered while the request was in flight still counts toward the
    /// global and algorithm metrics.
    pub fn complete(&self, target: &str, client: &str, latency_ms: u64, success: bool) {
        let algorithm = self.algorithm();

        if let Some(server) = self.pool.find(target) {
            self.pool.on_completed(&server, client);
            server.record_outcome(latency_ms, success);
            metrics::set_server_active_connections(target, server.active_connections());
        }

        self.stats
            .record_outcome(algorithm, latency_ms, success, &self.pool.up_servers());
        metrics::record_request(algorithm.as_str(), target, latency_ms, success);

        self.events.publish(BalancerEvent::Response {
            timestamp: Utc::now(),
            algorithm,
            server: target.to_string(),
            response_time_ms: latency_ms,
            success,
        });
    }

    /// Full metrics view for reporting.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.stats.snapshot(&self.pool, self.algorithm())
    }

    /// Raw per-server client/connection distribution.
    pub fn client_distribution(&self) -> Vec<ClientDistribution> {
        self.pool.client_distribution()
    }

    /// Zero every per-server and aggregate counter, clear the client map
    /// and rewind the rotation cursors. Server identities, weights and
    /// health status are preserved.
    pub fn reset_metrics(&self) {
        self.stats.reset();
        self.pool.reset();
        self.selection.reset();
        tracing::info!("Metrics and client distribution have been reset");
    }

    /// Ranked algorithm comparison plus advisory recommendations.
    pub fn analyze(&self) -> AlgorithmAnalysis {
        analyzer::analyze(&self.stats, &self.pool, self.algorithm())
    }

    /// Subscribe to the live event feed.
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<BalancerEvent> {
        self.events.subscribe()
    }

    /// Health-check settings this service was configured with.
    pub fn health_config(&self) -> &HealthCheckConfig {
        &self.config.health_check
    }

    /// The full startup configuration.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// The underlying pool, for the health checker and diagnostics.
    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Hand the immediate-probe receiver to the health checker. Yields
    /// `Some` exactly once.
    pub fn take_probe_receiver(&self) -> Option<mpsc::UnboundedReceiver<ServerUrl>> {
        match self.probe_rx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}
