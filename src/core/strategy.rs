//! Load-balancing policies.
//!
//! All five policies operate on a snapshot of the currently UP servers and
//! share one [`SelectionState`] holding their rotation cursors. Selection
//! never blocks on I/O and never returns a DOWN server; an empty UP set is
//! reported as [`BalancerError::Unavailable`].
use std::{
    fmt,
    str::FromStr,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::core::{
    error::{BalancerError, BalancerResult},
    server::ServerEntry,
};

/// The fixed set of load-balancing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Algorithm {
    RoundRobin = 0,
    WeightedRoundRobin = 1,
    LeastConnections = 2,
    Random = 3,
    LeastResponseTime = 4,
}

impl Algorithm {
    /// Every known algorithm, in wire-name order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::RoundRobin,
        Algorithm::WeightedRoundRobin,
        Algorithm::LeastConnections,
        Algorithm::Random,
        Algorithm::LeastResponseTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "ROUND_ROBIN",
            Algorithm::WeightedRoundRobin => "WEIGHTED_ROUND_ROBIN",
            Algorithm::LeastConnections => "LEAST_CONNECTIONS",
            Algorithm::Random => "RANDOM",
            Algorithm::LeastResponseTime => "LEAST_RESPONSE_TIME",
        }
    }

    /// Human-readable description shown by the administrative API.
    pub fn description(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => {
                "Distributes requests sequentially across all servers. Simple and fair distribution."
            }
            Algorithm::WeightedRoundRobin => {
                "Distributes requests based on server weights. More powerful servers get more traffic."
            }
            Algorithm::LeastConnections => {
                "Routes to the server with fewest active connections. Best for varying request durations."
            }
            Algorithm::Random => {
                "Randomly selects a server for each request. Minimal overhead, statistically fair."
            }
            Algorithm::LeastResponseTime => {
                "Routes to the server with lowest response time and current load. Performance optimized."
            }
        }
    }

    pub(crate) fn from_u8(value: u8) -> Algorithm {
        match value {
            0 => Algorithm::RoundRobin,
            1 => Algorithm::WeightedRoundRobin,
            3 => Algorithm::Random,
            4 => Algorithm::LeastResponseTime,
            // 2 and anything corrupted resolve to the safe default.
            _ => Algorithm::LeastConnections,
        }
    }
}

impl Default for Algorithm {
    fn default() -> Self {
        Algorithm::LeastConnections
    }
}

impl FromStr for Algorithm {
    type Err = BalancerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .iter()
            .find(|a| a.as_str() == s)
            .copied()
            .ok_or_else(|| BalancerError::invalid_algorithm(s))
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rotation state shared by the cursor-based policies.
///
/// The round-robin cursor is a plain atomic taken modulo the live UP count
/// on every call, so fairness under topology change is best-effort. The
/// weighted cursor is mutex-guarded: one weighted selection is a single
/// logical step over several servers' `current_weight` fields and must not
/// interleave with another.
pub struct SelectionState {
    round_robin_cursor: AtomicUsize,
    weighted_cursor: Mutex<usize>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self {
            round_robin_cursor: AtomicUsize::new(0),
            weighted_cursor: Mutex::new(0),
        }
    }

    /// Rewind both cursors, used by the metrics reset.
    pub fn reset(&self) {
        self.round_robin_cursor.store(0, Ordering::Release);
        *lock_unpoisoned(&self.weighted_cursor) = 0;
    }

    /// Pick a server from the UP set according to `algorithm`.
    pub fn select(
        &self,
        algorithm: Algorithm,
        available: &[Arc<ServerEntry>],
    ) -> BalancerResult<Arc<ServerEntry>> {
        if available.is_empty() {
            return Err(BalancerError::Unavailable);
        }

        match algorithm {
            Algorithm::RoundRobin => Ok(self.round_robin(available)),
            Algorithm::WeightedRoundRobin => self.weighted_round_robin(available),
            Algorithm::LeastConnections => Ok(least_connections(available)),
            Algorithm::Random => Ok(random(available)),
            Algorithm::LeastResponseTime => Ok(least_response_time(available)),
        }
    }

    fn round_robin(&self, available: &[Arc<ServerEntry>]) -> Arc<ServerEntry> {
        let cursor = self.round_robin_cursor.fetch_add(1, Ordering::Relaxed);
        available[cursor % available.len()].clone()
    }

    /// Smooth weighted round-robin.
    ///
    /// Advances the rotation cursor, adding each server's static weight to
    /// its `current_weight`, and selects the first server whose accumulated
    /// weight reaches the pool maximum, then settles it by the pool total.
    /// The whole scan is one call; the loop is capped at
    /// `pool_size * total_weight` iterations, which is always enough with
    /// positive weights.
    fn weighted_round_robin(
        &self,
        available: &[Arc<ServerEntry>],
    ) -> BalancerResult<Arc<ServerEntry>> {
        let mut total_weight: i64 = 0;
        let mut max_weight: i64 = 0;
        for server in available {
            let weight = i64::from(server.weight());
            total_weight += weight;
            max_weight = max_weight.max(weight);
        }

        if total_weight == 0 {
            return Err(BalancerError::InvalidConfiguration(
                "all server weights are zero".to_string(),
            ));
        }

        let mut cursor = lock_unpoisoned(&self.weighted_cursor);
        let bound = available.len() as i64 * total_weight;
        for _ in 0..bound {
            *cursor = (*cursor + 1) % available.len();
            let server = &available[*cursor];
            let accumulated = server.bump_current_weight(i64::from(server.weight()));
            if accumulated >= max_weight {
                server.settle_current_weight(total_weight);
                return Ok(server.clone());
            }
        }

        // Unreachable with positive weights; guards a corrupted rotation.
        Ok(least_connections(available))
    }
}

impl Default for SelectionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Server with the fewest active connections, registry order breaking ties.
fn least_connections(available: &[Arc<ServerEntry>]) -> Arc<ServerEntry> {
    let mut best = &available[0];
    for server in &available[1..] {
        if server.active_connections() < best.active_connections() {
            best = server;
        }
    }
    best.clone()
}

/// Uniform random pick.
fn random(available: &[Arc<ServerEntry>]) -> Arc<ServerEntry> {
    let index = rand::rng().random_range(0..available.len());
    available[index].clone()
}

/// Load-adjusted response time: `avg_ms * (active_connections + 1)`.
///
/// A server without successful samples scores 0. If the winning candidate
/// has no samples the pool carries no usable latency signal for it, so the
/// decision falls back to least connections rather than favoring untested
/// servers indefinitely.
fn least_response_time(available: &[Arc<ServerEntry>]) -> Arc<ServerEntry> {
    let mut best = &available[0];
    let mut best_score = score(best);
    for server in &available[1..] {
        let candidate = score(server);
        if candidate < best_score {
            best = server;
            best_score = candidate;
        }
    }

    if best.successful_requests() == 0 {
        return least_connections(available);
    }
    best.clone()
}

fn score(server: &Arc<ServerEntry>) -> f64 {
    server.avg_response_time_ms() * (server.active_connections() as f64 + 1.0)
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::server::{HealthState, ServerUrl};

    fn up_server(url: &str, weight: u32) -> Arc<ServerEntry> {
        let entry = Arc::new(ServerEntry::new(ServerUrl::new(url).unwrap(), weight));
        entry.set_status(HealthState::Up);
        entry
    }

    fn pool(weights: &[u32]) -> Vec<Arc<ServerEntry>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, w)| up_server(&format!("http://localhost:{}", 5001 + i), *w))
            .collect()
    }

    #[test]
    fn test_algorithm_round_trip() {
        for algorithm in Algorithm::ALL {
            assert_eq!(algorithm.as_str().parse::<Algorithm>().unwrap(), algorithm);
        }
        assert!(matches!(
            "BOGUS".parse::<Algorithm>(),
            Err(BalancerError::InvalidAlgorithm { .. })
        ));
    }

    #[test]
    fn test_empty_pool_is_unavailable() {
        let state = SelectionState::new();
        for algorithm in Algorithm::ALL {
            assert!(matches!(
                state.select(algorithm, &[]),
                Err(BalancerError::Unavailable)
            ));
        }
    }

    #[test]
    fn test_round_robin_visits_each_server_once_per_cycle() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1, 1]);

        for cycle in 0..3 {
            for (i, expected) in servers.iter().enumerate() {
                let picked = state.select(Algorithm::RoundRobin, &servers).unwrap();
                assert_eq!(
                    picked.url(),
                    expected.url(),
                    "cycle {cycle}, position {i} should follow registry order"
                );
            }
        }
    }

    #[test]
    fn test_round_robin_cursor_is_modulo_live_count() {
        // Best-effort behavior under topology change: shrinking the UP set
        // re-wraps the cursor rather than resetting the rotation.
        let state = SelectionState::new();
        let servers = pool(&[1, 1, 1]);

        let _ = state.select(Algorithm::RoundRobin, &servers).unwrap();
        let _ = state.select(Algorithm::RoundRobin, &servers).unwrap();

        let shrunk = servers[..2].to_vec();
        let picked = state.select(Algorithm::RoundRobin, &shrunk).unwrap();
        // Cursor is at 2, live count is 2, so position 0 is picked again.
        assert_eq!(picked.url(), servers[0].url());
    }

    #[test]
    fn test_weighted_round_robin_share_matches_weights() {
        let state = SelectionState::new();
        let servers = pool(&[2, 1, 1]);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..400 {
            let picked = state
                .select(Algorithm::WeightedRoundRobin, &servers)
                .unwrap();
            *counts.entry(picked.url().to_string()).or_insert(0) += 1;
        }

        let share = |i: usize| *counts.get(servers[i].url().as_str()).unwrap_or(&0);
        assert!((185..=215).contains(&share(0)), "weight-2 share: {}", share(0));
        assert!((85..=115).contains(&share(1)), "weight-1 share: {}", share(1));
        assert!((85..=115).contains(&share(2)), "weight-1 share: {}", share(2));
    }

    #[test]
    fn test_weighted_round_robin_interleaves_rather_than_bursting() {
        let state = SelectionState::new();
        let servers = pool(&[2, 1, 1]);

        let picks: Vec<String> = (0..8)
            .map(|_| {
                state
                    .select(Algorithm::WeightedRoundRobin, &servers)
                    .unwrap()
                    .url()
                    .to_string()
            })
            .collect();

        // The smooth rotation never hands the weight-2 server more than two
        // slots in a row.
        let heavy = servers[0].url().as_str();
        let max_streak = picks
            .iter()
            .fold((0usize, 0usize), |(best, run), url| {
                let run = if url == heavy { run + 1 } else { 0 };
                (best.max(run), run)
            })
            .0;
        assert!(max_streak <= 2, "picks: {picks:?}");
    }

    #[test]
    fn test_weighted_round_robin_rejects_all_zero_weights() {
        let state = SelectionState::new();
        let servers = pool(&[0, 0]);
        assert!(matches!(
            state.select(Algorithm::WeightedRoundRobin, &servers),
            Err(BalancerError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_least_connections_picks_minimum_with_registry_tie_break() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1, 1]);
        servers[0].connection_opened();
        servers[0].connection_opened();
        servers[1].connection_opened();

        let picked = state.select(Algorithm::LeastConnections, &servers).unwrap();
        assert_eq!(picked.url(), servers[2].url());

        // All equal: first in registry order wins.
        servers[2].connection_opened();
        servers[2].connection_opened();
        servers[1].connection_opened();
        let picked = state.select(Algorithm::LeastConnections, &servers).unwrap();
        assert_eq!(picked.url(), servers[0].url());
    }

    #[test]
    fn test_random_stays_within_pool() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1, 1]);
        for _ in 0..50 {
            let picked = state.select(Algorithm::Random, &servers).unwrap();
            assert!(servers.iter().any(|s| s.url() == picked.url()));
        }
    }

    #[test]
    fn test_least_response_time_prefers_lower_adjusted_score() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1]);
        // Server 0: avg 10ms, no load. Server 1: avg 5ms but 3 connections
        // in flight, adjusted score 20.
        servers[0].record_outcome(10, true);
        servers[1].record_outcome(5, true);
        servers[1].connection_opened();
        servers[1].connection_opened();
        servers[1].connection_opened();

        let picked = state
            .select(Algorithm::LeastResponseTime, &servers)
            .unwrap();
        assert_eq!(picked.url(), servers[0].url());
    }

    #[test]
    fn test_least_response_time_falls_back_without_samples() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1, 1]);
        // No latency signal anywhere: behaves as least connections.
        servers[0].connection_opened();
        let picked = state
            .select(Algorithm::LeastResponseTime, &servers)
            .unwrap();
        assert_eq!(picked.url(), servers[1].url());
    }

    #[test]
    fn test_least_response_time_fallback_when_untested_server_would_win() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1]);
        // Server 0 is measured; server 1 has never succeeded and would win
        // on raw score 0. The fallback routes by connections instead.
        servers[0].record_outcome(8, true);
        servers[0].connection_opened();
        let picked = state
            .select(Algorithm::LeastResponseTime, &servers)
            .unwrap();
        assert_eq!(picked.url(), servers[1].url());
    }

    #[test]
    fn test_least_response_time_zero_latency_is_not_a_fallback_trigger() {
        let state = SelectionState::new();
        let servers = pool(&[1, 1]);
        // A genuinely measured 0ms average is a valid signal, not missing
        // data: the measured server keeps winning even while another holds
        // fewer connections.
        servers[0].record_outcome(0, true);
        servers[0].connection_opened();
        servers[1].record_outcome(50, true);

        let picked = state
            .select(Algorithm::LeastResponseTime, &servers)
            .unwrap();
        assert_eq!(picked.url(), servers[0].url());
    }
}
