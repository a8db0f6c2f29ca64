//! Backend server registry and client/connection bookkeeping.
//!
//! The pool owns the ordered set of [`ServerEntry`] records and the global
//! client assignment map. Insertion order is preserved because round-robin
//! rotation and least-connections tie-breaks are defined over it. All
//! mutation goes through this type; routing code only ever sees `Arc`
//! snapshots, so administrative changes are observed atomically.
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::core::{
    error::{BalancerError, BalancerResult},
    server::{ServerEntry, ServerSnapshot, ServerUrl},
};

/// Per-server slice of the client distribution view.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDistribution {
    pub url: String,
    pub connections: u64,
    pub clients: Vec<String>,
    pub client_count: usize,
}

/// Insertion-ordered registry of backend servers plus the client map.
pub struct ServerPool {
    servers: RwLock<Vec<Arc<ServerEntry>>>,
    // client identity -> URL of the server currently serving it
    client_assignments: scc::HashMap<String, String>,
}

impl ServerPool {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            client_assignments: scc::HashMap::new(),
        }
    }

    /// Register a backend. Idempotent: an already-registered URL is left
    /// untouched and `Ok(None)` is returned. New entries start in `Unknown`
    /// status; the caller is responsible for requesting an immediate probe.
    pub fn register(&self, url: &str, weight: u32) -> BalancerResult<Option<Arc<ServerEntry>>> {
        let url = ServerUrl::new(url)
            .map_err(|e| BalancerError::InvalidConfiguration(e.to_string()))?;
        if weight == 0 {
            return Err(BalancerError::InvalidConfiguration(format!(
                "weight for {url} must be at least 1"
            )));
        }

        let mut servers = write_unpoisoned(&self.servers);
        if servers.iter().any(|s| s.url() == &url) {
            return Ok(None);
        }

        let entry = Arc::new(ServerEntry::new(url, weight));
        servers.push(entry.clone());
        Ok(Some(entry))
    }

    /// Remove a backend and purge every client assignment referencing it.
    pub fn deregister(&self, url: &str) -> BalancerResult<Arc<ServerEntry>> {
        let mut servers = write_unpoisoned(&self.servers);
        let position = servers
            .iter()
            .position(|s| s.url().as_str() == url)
            .ok_or_else(|| BalancerError::NotFound(url.to_string()))?;
        let removed = servers.remove(position);
        drop(servers);

        self.client_assignments
            .retain_sync(|_, assigned| assigned.as_str() != removed.url().as_str());
        Ok(removed)
    }

    pub fn find(&self, url: &str) -> Option<Arc<ServerEntry>> {
        read_unpoisoned(&self.servers)
            .iter()
            .find(|s| s.url().as_str() == url)
            .cloned()
    }

    /// Stable-ordered snapshot of every registered server.
    pub fn list(&self) -> Vec<Arc<ServerEntry>> {
        read_unpoisoned(&self.servers).clone()
    }

    /// Snapshot of the servers currently considered UP, registry order.
    pub fn up_servers(&self) -> Vec<Arc<ServerEntry>> {
        read_unpoisoned(&self.servers)
            .iter()
            .filter(|s| s.is_up())
            .cloned()
            .collect()
    }

    /// Update a server's static weight, returning the previous value.
    pub fn set_weight(&self, url: &str, weight: u32) -> BalancerResult<u32> {
        if weight == 0 {
            return Err(BalancerError::InvalidConfiguration(format!(
                "weight for {url} must be at least 1"
            )));
        }
        let server = self
            .find(url)
            .ok_or_else(|| BalancerError::NotFound(url.to_string()))?;
        Ok(server.set_weight(weight))
    }

    pub fn len(&self) -> usize {
        read_unpoisoned(&self.servers).len()
    }

    pub fn is_empty(&self) -> bool {
        read_unpoisoned(&self.servers).is_empty()
    }

    /// Record that `client` was routed to `server`.
    pub fn on_routed(&self, server: &ServerEntry, client: &str) {
        server.connection_opened();
        server.add_client(client);

        let url = server.url().as_str().to_string();
        if self
            .client_assignments
            .update_sync(client, |_, assigned| *assigned = url.clone())
            .is_none()
        {
            let _ = self.client_assignments.insert_sync(client.to_string(), url);
        }
    }

    /// Record that a request routed to `server` for `client` finished.
    /// When the server's connection count drains to zero the client is
    /// dropped from its set, and from the global map if it still points
    /// here.
    pub fn on_completed(&self, server: &ServerEntry, client: &str) {
        let remaining = server.connection_closed();
        if remaining == 0 && server.remove_client(client) {
            self.client_assignments
                .remove_if_sync(client, |assigned| assigned.as_str() == server.url().as_str());
        }
    }

    /// Number of distinct clients with an active assignment.
    pub fn unique_clients(&self) -> usize {
        self.client_assignments.len()
    }

    /// Which server a client is currently assigned to, if any.
    pub fn assignment(&self, client: &str) -> Option<String> {
        self.client_assignments
            .read_sync(client, |_, assigned| assigned.clone())
    }

    /// Sum of active connections across all servers.
    pub fn total_connections(&self) -> u64 {
        read_unpoisoned(&self.servers)
            .iter()
            .map(|s| s.active_connections())
            .sum()
    }

    /// Raw per-server client/connection distribution.
    pub fn client_distribution(&self) -> Vec<ClientDistribution> {
        read_unpoisoned(&self.servers)
            .iter()
            .map(|s| {
                let clients = s.clients();
                ClientDistribution {
                    url: s.url().as_str().to_string(),
                    connections: s.active_connections(),
                    client_count: clients.len(),
                    clients,
                }
            })
            .collect()
    }

    /// Point-in-time snapshots for the administrative surface.
    pub fn snapshots(&self) -> Vec<ServerSnapshot> {
        read_unpoisoned(&self.servers)
            .iter()
            .map(|s| s.snapshot())
            .collect()
    }

    /// Zero per-server counters and clear the client map. Identities,
    /// weights and health status are preserved.
    pub fn reset(&self) {
        for server in read_unpoisoned(&self.servers).iter() {
            server.reset_counters();
        }
        self.client_assignments.clear_sync();
    }
}

impl Default for ServerPool {
    fn default() -> Self {
        Self::new()
    }
}

fn read_unpoisoned<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_unpoisoned<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
