//! Request metrics accumulation.
//!
//! One [`AlgorithmStats`] record exists per algorithm in the fixed set,
//! pre-populated at startup and never created dynamically. Global counters
//! feed the pool-wide snapshot. Everything here is in-memory and zeroed by
//! an explicit reset; nothing survives a restart.
use std::{
    sync::{
        Mutex,
        atomic::{AtomicU32, AtomicU64, Ordering},
    },
    time::Instant,
};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{
    pool::ServerPool,
    server::{ServerEntry, ServerSnapshot},
    strategy::Algorithm,
};

/// Accumulated outcomes for one algorithm.
#[derive(Debug)]
pub struct AlgorithmStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
    // 0..=100, derived from the spread of UP-server request counts
    fairness_score: AtomicU32,
    last_used: Mutex<Option<DateTime<Utc>>>,
}

impl AlgorithmStats {
    fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            fairness_score: AtomicU32::new(0),
            last_used: Mutex::new(None),
        }
    }

    fn record(&self, latency_ms: u64, success: bool, fairness: u32) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        if success {
            self.successful_requests.fetch_add(1, Ordering::AcqRel);
            self.total_response_time_ms
                .fetch_add(latency_ms, Ordering::AcqRel);
        } else {
            self.failed_requests.fetch_add(1, Ordering::AcqRel);
        }
        self.fairness_score.store(fairness, Ordering::Release);

        let mut last_used = match self.last_used.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last_used = Some(Utc::now());
    }

    fn reset(&self) {
        self.total_requests.store(0, Ordering::Release);
        self.successful_requests.store(0, Ordering::Release);
        self.failed_requests.store(0, Ordering::Release);
        self.total_response_time_ms.store(0, Ordering::Release);
        self.fairness_score.store(0, Ordering::Release);
        let mut last_used = match self.last_used.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *last_used = None;
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Acquire)
    }

    /// Average response time over successful requests, 0.0 with no samples.
    pub fn avg_response_time_ms(&self) -> f64 {
        let successes = self.successful_requests.load(Ordering::Acquire);
        if successes == 0 {
            return 0.0;
        }
        self.total_response_time_ms.load(Ordering::Acquire) as f64 / successes as f64
    }

    /// Success percentage over all requests, 0.0 with no samples.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        self.successful_requests.load(Ordering::Acquire) as f64 / total as f64 * 100.0
    }

    pub fn fairness_score(&self) -> u32 {
        self.fairness_score.load(Ordering::Acquire)
    }

    pub fn last_used(&self) -> Option<DateTime<Utc>> {
        match self.last_used.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self, algorithm: Algorithm) -> AlgorithmStatsSnapshot {
        AlgorithmStatsSnapshot {
            algorithm,
            total_requests: self.total_requests(),
            successful_requests: self.successful_requests(),
            failed_requests: self.failed_requests.load(Ordering::Acquire),
            avg_response_time_ms: self.avg_response_time_ms(),
            success_rate: self.success_rate(),
            distribution_score: self.fairness_score(),
            last_used: self.last_used(),
        }
    }
}

/// Serializable view of one algorithm's accumulated outcomes.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmStatsSnapshot {
    pub algorithm: Algorithm,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_response_time_ms: f64,
    pub success_rate: f64,
    pub distribution_score: u32,
    pub last_used: Option<DateTime<Utc>>,
}

/// Pool-wide metrics view returned by the administrative API.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub algorithm: Algorithm,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
    pub uptime: String,
    pub total_servers: usize,
    pub healthy_servers: usize,
    pub total_connections: u64,
    pub unique_clients: usize,
    pub servers: Vec<ServerSnapshot>,
}

/// Global and per-algorithm accumulators.
pub struct StatsCollector {
    started_at: Mutex<Instant>,
    total_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
    algorithms: [AlgorithmStats; Algorithm::ALL.len()],
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Mutex::new(Instant::now()),
            total_requests: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            algorithms: [
                AlgorithmStats::new(),
                AlgorithmStats::new(),
                AlgorithmStats::new(),
                AlgorithmStats::new(),
                AlgorithmStats::new(),
            ],
        }
    }

    pub fn for_algorithm(&self, algorithm: Algorithm) -> &AlgorithmStats {
        &self.algorithms[algorithm as usize]
    }

    /// Record one completed request against the active algorithm and the
    /// global counters, refreshing that algorithm's fairness score from the
    /// current UP set. The serving server's own counters are updated by the
    /// caller via [`ServerEntry::record_outcome`].
    pub fn record_outcome(
        &self,
        algorithm: Algorithm,
        latency_ms: u64,
        success: bool,
        up_servers: &[std::sync::Arc<ServerEntry>],
    ) {
        self.total_requests.fetch_add(1, Ordering::AcqRel);
        if success {
            self.total_response_time_ms
                .fetch_add(latency_ms, Ordering::AcqRel);
        }

        let fairness = fairness_score(up_servers);
        self.for_algorithm(algorithm)
            .record(latency_ms, success, fairness);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Acquire)
    }

    /// Pool-wide average response time across all recorded requests.
    pub fn avg_response_time_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Acquire);
        if total == 0 {
            return 0.0;
        }
        self.total_response_time_ms.load(Ordering::Acquire) as f64 / total as f64
    }

    /// Uptime since start or last reset, rendered as `"3m 42s"`.
    pub fn uptime(&self) -> String {
        let started = match self.started_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let elapsed = started.elapsed().as_secs();
        format!("{}m {}s", elapsed / 60, elapsed % 60)
    }

    /// Assemble the full metrics view for reporting.
    pub fn snapshot(&self, pool: &ServerPool, algorithm: Algorithm) -> MetricsSnapshot {
        let servers = pool.snapshots();
        let healthy = servers
            .iter()
            .filter(|s| s.status == crate::core::server::HealthState::Up)
            .count();

        MetricsSnapshot {
            algorithm,
            total_requests: self.total_requests(),
            avg_response_time_ms: self.avg_response_time_ms(),
            uptime: self.uptime(),
            total_servers: servers.len(),
            healthy_servers: healthy,
            total_connections: pool.total_connections(),
            unique_clients: pool.unique_clients(),
            servers,
        }
    }

    /// Zero the global and per-algorithm counters and restart the uptime
    /// clock. Per-server counters and the client map are reset by the pool.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Release);
        self.total_response_time_ms.store(0, Ordering::Release);
        for stats in &self.algorithms {
            stats.reset();
        }
        let mut started = match self.started_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *started = Instant::now();
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// How evenly requests are spread across the UP servers, 0..=100.
///
/// `100 * max(0, 1 - variance / ideal^2)` where ideal is the per-server
/// share of the total request count. An empty or zero-load pool is
/// vacuously fair and scores 100.
pub fn fairness_score(up_servers: &[std::sync::Arc<ServerEntry>]) -> u32 {
    if up_servers.is_empty() {
        return 100;
    }

    let total: u64 = up_servers.iter().map(|s| s.total_requests()).sum();
    if total == 0 {
        return 100;
    }

    let count = up_servers.len() as f64;
    let ideal = total as f64 / count;
    let variance = up_servers
        .iter()
        .map(|s| {
            let diff = s.total_requests() as f64 - ideal;
            diff * diff
        })
        .sum::<f64>()
        / count;

    (100.0 * (1.0 - variance / (ideal * ideal)))
        .clamp(0.0, 100.0)
        .round() as u32
}
