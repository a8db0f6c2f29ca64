use std::{
    fmt,
    str::FromStr,
    sync::{
        Mutex,
        atomic::{AtomicI64, AtomicU8, AtomicU32, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::set_server_health_status;

// Health status values stored in the atomic status field
const STATE_UNKNOWN: u8 = 0;
const STATE_UP: u8 = 1;
const STATE_DOWN: u8 = 2;

/// Errors related to server identity handling
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServerUrlError {
    /// Error when URL is invalid
    #[error("invalid server URL `{url}`: {reason}")]
    Invalid { url: String, reason: String },
}

/// A validated backend server URL, used as the unique identity key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ServerUrl {
    url: String,
}

impl ServerUrl {
    /// Creates a new ServerUrl if the provided string is a valid absolute
    /// http(s) URL. A trailing slash is stripped so that `http://a:1/` and
    /// `http://a:1` resolve to the same identity.
    pub fn new(raw: &str) -> Result<Self, ServerUrlError> {
        let parsed = url::Url::parse(raw).map_err(|e| ServerUrlError::Invalid {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match parsed.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ServerUrlError::Invalid {
                    url: raw.to_string(),
                    reason: format!("unsupported scheme `{other}`"),
                });
            }
        }

        if parsed.host_str().is_none() {
            return Err(ServerUrlError::Invalid {
                url: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(ServerUrl {
            url: raw.trim_end_matches('/').to_string(),
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Get the underlying URL as a string
    pub fn into_string(self) -> String {
        self.url
    }
}

impl FromStr for ServerUrl {
    type Err = ServerUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServerUrl::new(s)
    }
}

impl fmt::Display for ServerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Health status of a backend server as last determined by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Unknown,
    Up,
    Down,
}

impl HealthState {
    fn as_u8(self) -> u8 {
        match self {
            HealthState::Unknown => STATE_UNKNOWN,
            HealthState::Up => STATE_UP,
            HealthState::Down => STATE_DOWN,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            STATE_UP => HealthState::Up,
            STATE_DOWN => HealthState::Down,
            _ => HealthState::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthState::Unknown => "UNKNOWN",
            HealthState::Up => "UP",
            HealthState::Down => "DOWN",
        };
        write!(f, "{s}")
    }
}

/// One registered backend endpoint with its runtime state.
///
/// All counters are atomics so routing, completion callbacks, health probes
/// and administrative reads can touch the same entry without locking. The
/// signed `current_weight` is rotation state owned by the weighted
/// round-robin policy and has no meaning outside of it.
pub struct ServerEntry {
    url: ServerUrl,
    weight: AtomicU32,
    status: AtomicU8,
    active_connections: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
    current_weight: AtomicI64,
    clients: scc::HashSet<String>,
    last_probe: Mutex<Option<DateTime<Utc>>>,
}

impl ServerEntry {
    /// Create a new entry in `Unknown` status with the given static weight.
    pub fn new(url: ServerUrl, weight: u32) -> Self {
        Self {
            url,
            weight: AtomicU32::new(weight),
            status: AtomicU8::new(STATE_UNKNOWN),
            active_connections: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            current_weight: AtomicI64::new(0),
            clients: scc::HashSet::new(),
            last_probe: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &ServerUrl {
        &self.url
    }

    pub fn weight(&self) -> u32 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Replace the static weight, returning the previous value.
    pub fn set_weight(&self, weight: u32) -> u32 {
        self.weight.swap(weight, Ordering::Release)
    }

    pub fn status(&self) -> HealthState {
        HealthState::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.status.load(Ordering::Acquire) == STATE_UP
    }

    /// Update the health status, returning the previous state so callers can
    /// log transitions only on change.
    pub fn set_status(&self, state: HealthState) -> HealthState {
        let previous = HealthState::from_u8(self.status.swap(state.as_u8(), Ordering::AcqRel));
        if state != HealthState::Unknown {
            set_server_health_status(self.url.as_str(), state == HealthState::Up);
        }
        previous
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Acquire)
    }

    /// Record one more in-flight connection.
    pub fn connection_opened(&self) -> u64 {
        self.active_connections.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record a finished connection. Saturates at zero, returning the count
    /// after the decrement.
    pub fn connection_closed(&self) -> u64 {
        let mut current = self.active_connections.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return 0;
            }
            match self.active_connections.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return current - 1,
                Err(observed) => current = observed,
            }
        }
    }

    /// Add a client identity to this server's set. Returns false if it was
    /// already present.
    pub fn add_client(&self, client: &str) -> bool {
        self.clients.insert_sync(client.to_string()).is_ok()
    }

    /// Remove a client identity from this server's set. Returns true if it
    /// was present.
    pub fn remove_client(&self, client: &str) -> bool {
        self.clients.remove_sync(client).is_some()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Snapshot of the client identities currently routed here.
    pub fn clients(&self) -> Vec<String> {
        let mut clients = Vec::new();
        self.clients.iter_sync(|c| {
            clients.push(c.clone());
            true
        });
        clients
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Acquire)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Acquire)
    }

    /// Record a finished request against this server. Response time only
    /// accumulates for successes.
    pub fn record_outcome(&self, latency_ms: u64, success: bool) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        if success {
            self.successful_requests.fetch_add(1, Ordering::AcqRel);
            self.total_response_time_ms
                .fetch_add(latency_ms, Ordering::AcqRel);
        } else {
            self.failed_requests.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Average response time over successful requests, 0.0 with no samples.
    pub fn avg_response_time_ms(&self) -> f64 {
        let successes = self.successful_requests.load(Ordering::Acquire);
        if successes == 0 {
            return 0.0;
        }
        self.total_response_time_ms.load(Ordering::Acquire) as f64 / successes as f64
    }

    /// Add the static weight into the rotation cursor, returning the new
    /// value. Used only by weighted round-robin.
    pub(crate) fn bump_current_weight(&self, amount: i64) -> i64 {
        self.current_weight.fetch_add(amount, Ordering::AcqRel) + amount
    }

    /// Subtract the pool's total weight after a weighted selection.
    pub(crate) fn settle_current_weight(&self, total_weight: i64) {
        self.current_weight.fetch_sub(total_weight, Ordering::AcqRel);
    }

    #[cfg(test)]
    pub(crate) fn current_weight(&self) -> i64 {
        self.current_weight.load(Ordering::Acquire)
    }

    /// Stamp the wall-clock time of the latest health probe.
    pub fn mark_probed(&self, at: DateTime<Utc>) {
        let mut last = match self.last_probe.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last = Some(at);
    }

    pub fn last_probe(&self) -> Option<DateTime<Utc>> {
        match self.last_probe.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Zero every counter and drop client state. Identity, weight and health
    /// status survive a reset.
    pub fn reset_counters(&self) {
        self.active_connections.store(0, Ordering::Release);
        self.total_requests.store(0, Ordering::Release);
        self.successful_requests.store(0, Ordering::Release);
        self.failed_requests.store(0, Ordering::Release);
        self.total_response_time_ms.store(0, Ordering::Release);
        self.current_weight.store(0, Ordering::Release);
        self.clients.clear_sync();
    }

    /// Point-in-time view used by the administrative surface.
    pub fn snapshot(&self) -> ServerSnapshot {
        let status = self.status();
        let total = self.total_requests();
        let successful = self.successful_requests();
        let success_rate = if status == HealthState::Up {
            successful as f64 / total.max(1) as f64 * 100.0
        } else {
            0.0
        };

        ServerSnapshot {
            url: self.url.as_str().to_string(),
            status,
            connections: self.active_connections(),
            weight: self.weight(),
            total_requests: total,
            successful_requests: successful,
            failed_requests: self.failed_requests(),
            avg_response_time_ms: self.avg_response_time_ms(),
            success_rate,
            last_health_check: self.last_probe(),
            clients: self.clients(),
        }
    }
}

/// Serializable point-in-time view of one server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub url: String,
    pub status: HealthState,
    pub connections: u64,
    pub weight: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub last_health_check: Option<DateTime<Utc>>,
    pub clients: Vec<String>,
}
