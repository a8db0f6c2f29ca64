//! Algorithm performance comparison.
//!
//! Scores every algorithm that has recorded traffic (plus the active one),
//! ranks them by a composite of response time, reliability and load
//! distribution, and derives advisory recommendations. The output never
//! changes the active algorithm by itself.
use serde::Serialize;

use crate::core::{
    pool::ServerPool,
    stats::{AlgorithmStatsSnapshot, StatsCollector},
    strategy::Algorithm,
};

// Composite blend weights
const RESPONSE_WEIGHT: f64 = 0.4;
const RELIABILITY_WEIGHT: f64 = 0.3;
const DISTRIBUTION_WEIGHT: f64 = 0.3;

// Recommendation thresholds
const SWITCH_MARGIN: f64 = 10.0;
const HIGH_CONNECTION_AVG: f64 = 5.0;
const SLOW_RESPONSE_MS: f64 = 5.0;
const MIN_SAMPLE_SIZE: u64 = 50;

/// Neutral score assigned when an algorithm has no samples to judge.
const NO_DATA_SCORE: f64 = 50.0;

/// One ranked row of the comparison.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmScore {
    pub algorithm: Algorithm,
    pub metrics: AlgorithmStatsSnapshot,
    pub response_score: u32,
    pub reliability_score: u32,
    pub distribution_score: u32,
    pub composite_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationKind {
    Improvement,
    HighLoad,
    Performance,
    WeightedServers,
    Info,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub best_algorithm: Algorithm,
    pub best_score: f64,
    pub current_score: f64,
    pub worst_algorithm: Algorithm,
    pub worst_score: f64,
}

/// Ranked comparison plus advisory recommendations.
#[derive(Debug, Clone, Serialize)]
pub struct AlgorithmAnalysis {
    pub current_algorithm: Algorithm,
    pub comparison: Vec<AlgorithmScore>,
    pub summary: Option<AnalysisSummary>,
    pub recommendations: Vec<Recommendation>,
}

/// Score, rank and annotate every algorithm worth comparing.
pub fn analyze(stats: &StatsCollector, pool: &ServerPool, current: Algorithm) -> AlgorithmAnalysis {
    let mut comparison: Vec<AlgorithmScore> = Algorithm::ALL
        .iter()
        .filter(|&&algorithm| {
            stats.for_algorithm(algorithm).total_requests() > 0 || algorithm == current
        })
        .map(|&algorithm| score_algorithm(stats, algorithm))
        .collect();

    comparison.sort_by(|a, b| {
        b.composite_score
            .partial_cmp(&a.composite_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut recommendations = Vec::new();
    let summary = if comparison.len() > 1 {
        let best = &comparison[0];
        let worst = &comparison[comparison.len() - 1];
        let current_score = comparison
            .iter()
            .find(|s| s.algorithm == current)
            .map(|s| s.composite_score)
            .unwrap_or(0.0);

        if best.algorithm != current && best.composite_score > current_score + SWITCH_MARGIN {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Improvement,
                message: format!(
                    "Consider switching to {} for better performance ({:.0}% vs current {:.0}%)",
                    best.algorithm, best.composite_score, current_score
                ),
            });
        }

        let servers = pool.list();
        if !servers.is_empty() {
            let avg_connections = servers
                .iter()
                .map(|s| s.active_connections() as f64)
                .sum::<f64>()
                / servers.len() as f64;
            if avg_connections > HIGH_CONNECTION_AVG {
                recommendations.push(Recommendation {
                    kind: RecommendationKind::HighLoad,
                    message: format!(
                        "High connection count detected. {} recommended for better load distribution.",
                        Algorithm::LeastConnections
                    ),
                });
            }

            if servers.iter().any(|s| s.weight() != 1) {
                recommendations.push(Recommendation {
                    kind: RecommendationKind::WeightedServers,
                    message: format!(
                        "Server weights are configured. Consider {} for better utilization.",
                        Algorithm::WeightedRoundRobin
                    ),
                });
            }
        }

        if stats.for_algorithm(current).avg_response_time_ms() > SLOW_RESPONSE_MS {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Performance,
                message: format!(
                    "High response times detected. {} recommended for optimal performance routing.",
                    Algorithm::LeastResponseTime
                ),
            });
        }

        if stats.total_requests() < MIN_SAMPLE_SIZE {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Info,
                message: "Limited data available. Send more requests for accurate algorithm \
                          comparison and recommendations."
                    .to_string(),
            });
        }

        Some(AnalysisSummary {
            best_algorithm: best.algorithm,
            best_score: best.composite_score,
            current_score,
            worst_algorithm: worst.algorithm,
            worst_score: worst.composite_score,
        })
    } else {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Info,
            message: "Use different algorithms and send test requests to compare their \
                      performance."
                .to_string(),
        });
        None
    };

    AlgorithmAnalysis {
        current_algorithm: current,
        comparison,
        summary,
        recommendations,
    }
}

fn score_algorithm(stats: &StatsCollector, algorithm: Algorithm) -> AlgorithmScore {
    let record = stats.for_algorithm(algorithm);

    let avg_response = record.avg_response_time_ms();
    let response_score = if avg_response > 0.0 {
        (100.0 - avg_response / 10.0).max(0.0)
    } else {
        NO_DATA_SCORE
    };

    let reliability_score = if record.total_requests() > 0 {
        record.success_rate()
    } else {
        NO_DATA_SCORE
    };

    let distribution_score = f64::from(record.fairness_score());

    let composite_score = response_score * RESPONSE_WEIGHT
        + reliability_score * RELIABILITY_WEIGHT
        + distribution_score * DISTRIBUTION_WEIGHT;

    AlgorithmScore {
        algorithm,
        metrics: record.snapshot(algorithm),
        response_score: response_score.round() as u32,
        reliability_score: reliability_score.round() as u32,
        distribution_score: distribution_score.round() as u32,
        composite_score,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::server::{HealthState, ServerEntry};

    fn pool_of(count: usize) -> ServerPool {
        let pool = ServerPool::new();
        for i in 0..count {
            pool.register(&format!("http://localhost:{}", 5001 + i), 1)
                .unwrap();
        }
        for server in pool.list() {
            server.set_status(HealthState::Up);
        }
        pool
    }

    fn up_servers(pool: &ServerPool) -> Vec<Arc<ServerEntry>> {
        pool.up_servers()
    }

    fn seed(stats: &StatsCollector, pool: &ServerPool, algorithm: Algorithm, latency: u64, n: u64) {
        for _ in 0..n {
            stats.record_outcome(algorithm, latency, true, &up_servers(pool));
        }
    }

    #[test]
    fn test_unused_algorithms_are_omitted_except_current() {
        let stats = StatsCollector::new();
        let pool = pool_of(1);
        let analysis = analyze(&stats, &pool, Algorithm::LeastConnections);

        assert_eq!(analysis.comparison.len(), 1);
        assert_eq!(analysis.comparison[0].algorithm, Algorithm::LeastConnections);
        assert!(analysis.summary.is_none());
        assert_eq!(analysis.recommendations.len(), 1);
        assert_eq!(analysis.recommendations[0].kind, RecommendationKind::Info);
    }

    #[test]
    fn test_ranking_is_descending_by_composite() {
        let stats = StatsCollector::new();
        let pool = pool_of(2);
        // Fast and reliable round robin, slow random.
        seed(&stats, &pool, Algorithm::RoundRobin, 5, 10);
        seed(&stats, &pool, Algorithm::Random, 800, 10);

        let analysis = analyze(&stats, &pool, Algorithm::Random);
        assert!(analysis.comparison.len() >= 2);
        for window in analysis.comparison.windows(2) {
            assert!(window[0].composite_score >= window[1].composite_score);
        }
        assert_eq!(analysis.comparison[0].algorithm, Algorithm::RoundRobin);
    }

    #[test]
    fn test_improvement_recommendation_needs_ten_point_margin() {
        let stats = StatsCollector::new();
        let pool = pool_of(2);
        seed(&stats, &pool, Algorithm::RoundRobin, 5, 30);
        seed(&stats, &pool, Algorithm::Random, 900, 30);

        let analysis = analyze(&stats, &pool, Algorithm::Random);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::Improvement),
            "large gap should recommend switching: {:?}",
            analysis.recommendations
        );

        // Near-identical behavior: no switch recommendation.
        let stats = StatsCollector::new();
        seed(&stats, &pool, Algorithm::RoundRobin, 10, 30);
        seed(&stats, &pool, Algorithm::Random, 11, 30);
        let analysis = analyze(&stats, &pool, Algorithm::Random);
        assert!(
            !analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::Improvement)
        );
    }

    #[test]
    fn test_high_connection_recommendation() {
        let stats = StatsCollector::new();
        let pool = pool_of(1);
        let server = pool.find("http://localhost:5001").unwrap();
        for _ in 0..6 {
            server.connection_opened();
        }
        seed(&stats, &pool, Algorithm::RoundRobin, 5, 5);
        seed(&stats, &pool, Algorithm::Random, 5, 5);

        let analysis = analyze(&stats, &pool, Algorithm::RoundRobin);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::HighLoad)
        );
    }

    #[test]
    fn test_weighted_servers_recommendation() {
        let stats = StatsCollector::new();
        let pool = pool_of(2);
        pool.set_weight("http://localhost:5001", 3).unwrap();
        seed(&stats, &pool, Algorithm::RoundRobin, 5, 5);
        seed(&stats, &pool, Algorithm::Random, 5, 5);

        let analysis = analyze(&stats, &pool, Algorithm::RoundRobin);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::WeightedServers)
        );
    }

    #[test]
    fn test_low_sample_flag() {
        let stats = StatsCollector::new();
        let pool = pool_of(2);
        seed(&stats, &pool, Algorithm::RoundRobin, 5, 3);
        seed(&stats, &pool, Algorithm::Random, 5, 3);

        let analysis = analyze(&stats, &pool, Algorithm::RoundRobin);
        assert!(
            analysis
                .recommendations
                .iter()
                .any(|r| r.kind == RecommendationKind::Info)
        );
    }

    #[test]
    fn test_no_data_scores_are_neutral() {
        let stats = StatsCollector::new();
        let pool = pool_of(1);
        let analysis = analyze(&stats, &pool, Algorithm::LeastResponseTime);
        let row = &analysis.comparison[0];
        assert_eq!(row.response_score, 50);
        assert_eq!(row.reliability_score, 50);
    }
}
