use std::{sync::Arc, time::Duration};

use chrono::Utc;
use eyre::{Result, eyre};
use futures_util::future::join_all;
use tokio::time::MissedTickBehavior;

use crate::{
    core::{
        BalancerService,
        server::{HealthState, ServerEntry},
    },
    ports::http_client::HttpClient,
};

/// Health checker adapter driving the probe loop.
///
/// Two things wake it: the fixed interval (every registered server gets
/// probed, concurrently) and the immediate-probe channel the service writes
/// to on registration, so a new server does not sit in `Unknown` for a full
/// interval. Probes are isolated per server; one slow or failing backend
/// never delays the others.
pub struct HealthChecker {
    service: Arc<BalancerService>,
    http_client: Arc<dyn HttpClient>,
}

impl HealthChecker {
    pub fn new(service: Arc<BalancerService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            service,
            http_client,
        }
    }

    /// Run the probe loop. Returns immediately when health checking is
    /// disabled; otherwise runs until the task is dropped.
    pub async fn run(&self) -> Result<()> {
        let health_config = self.service.health_config().clone();

        if !health_config.enabled {
            tracing::info!("Health checking is disabled");
            return Ok(());
        }

        let mut probe_rx = self
            .service
            .take_probe_receiver()
            .ok_or_else(|| eyre!("health checker probe channel already claimed"))?;

        tracing::info!(
            interval_secs = health_config.interval_secs,
            timeout_secs = health_config.timeout_secs,
            path = %health_config.path,
            "Starting health checker"
        );

        let mut ticker =
            tokio::time::interval(Duration::from_secs(health_config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                Some(url) = probe_rx.recv() => {
                    if let Some(server) = self.service.pool().find(url.as_str()) {
                        self.probe_server(&server).await;
                    }
                }
            }
        }
    }

    /// Probe every registered server concurrently.
    pub async fn probe_all(&self) {
        let servers = self.service.pool().list();
        if servers.is_empty() {
            return;
        }
        tracing::debug!(count = servers.len(), "Running health checks on all servers");
        join_all(servers.iter().map(|server| self.probe_server(server))).await;
        tracing::debug!("Health check cycle completed");
    }

    /// Probe one server and apply the status transition. Transitions are
    /// logged only on change; steady states stay quiet.
    pub async fn probe_server(&self, server: &Arc<ServerEntry>) {
        let health_config = self.service.health_config();
        let probe_url = format!("{}{}", server.url(), health_config.path);
        let timeout = Duration::from_secs(health_config.timeout_secs);

        let healthy = match self.http_client.health_check(&probe_url, timeout).await {
            Ok(healthy) => healthy,
            Err(err) => {
                tracing::debug!(server = %server.url(), %err, "Health probe failed");
                false
            }
        };

        server.mark_probed(Utc::now());
        let next = if healthy {
            HealthState::Up
        } else {
            HealthState::Down
        };
        let previous = server.set_status(next);
        if previous != next {
            match next {
                HealthState::Up => tracing::info!(server = %server.url(), "Server is now UP"),
                HealthState::Down => {
                    tracing::warn!(server = %server.url(), was = %previous, "Server is now DOWN")
                }
                HealthState::Unknown => {}
            }
        }
    }

    /// Count of (healthy, unhealthy) servers as last probed.
    pub fn health_summary(&self) -> (usize, usize) {
        let mut healthy = 0;
        let mut unhealthy = 0;
        for server in self.service.pool().list() {
            match server.status() {
                HealthState::Up => healthy += 1,
                _ => unhealthy += 1,
            }
        }
        (healthy, unhealthy)
    }
}
