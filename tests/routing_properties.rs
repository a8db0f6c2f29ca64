// End-to-end properties of the routing engine, driven through the service
// façade the way the proxy and admin surfaces drive it.
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use rudder::{
    adapters::HealthChecker,
    config::{BalancerConfig, UpstreamConfig},
    core::{Algorithm, BalancerError, BalancerService, server::HealthState},
    ports::http_client::{
        ForwardRequest, ForwardResponse, HttpClient, HttpClientError, HttpClientResult,
    },
};

fn config_with(servers: &[(&str, u32)], health_enabled: bool) -> Arc<BalancerConfig> {
    let mut config = BalancerConfig::default();
    config.health_check.enabled = health_enabled;
    config.servers = servers
        .iter()
        .map(|(url, weight)| UpstreamConfig {
            url: url.to_string(),
            weight: *weight,
        })
        .collect();
    Arc::new(config)
}

/// Service with every configured server already marked UP.
fn service_with_up_servers(servers: &[(&str, u32)]) -> Arc<BalancerService> {
    let service = Arc::new(BalancerService::new(config_with(servers, false)));
    for server in service.pool().list() {
        server.set_status(HealthState::Up);
    }
    service
}

fn three_equal_servers() -> Arc<BalancerService> {
    service_with_up_servers(&[
        ("http://localhost:5001", 1),
        ("http://localhost:5002", 1),
        ("http://localhost:5003", 1),
    ])
}

#[test]
fn active_connections_equal_routed_minus_completed() {
    let service = three_equal_servers();
    service.set_algorithm("ROUND_ROBIN").unwrap();

    let mut in_flight: Vec<(String, String)> = Vec::new();
    for i in 0..30 {
        let client = format!("10.0.0.{}", i % 7);
        let routed = service.route(&client, "GET", "/work").unwrap();
        in_flight.push((routed.target.into_string(), client));

        let expected = in_flight.len() as u64;
        assert_eq!(service.pool().total_connections(), expected);
    }

    while let Some((target, client)) = in_flight.pop() {
        service.complete(&target, &client, 5, true);
        assert_eq!(service.pool().total_connections(), in_flight.len() as u64);
    }
}

#[test]
fn round_robin_visits_each_server_once_per_cycle_in_registry_order() {
    let service = three_equal_servers();
    service.set_algorithm("ROUND_ROBIN").unwrap();

    let expected = [
        "http://localhost:5001",
        "http://localhost:5002",
        "http://localhost:5003",
    ];

    for cycle in 0..4 {
        for (position, expected_url) in expected.iter().enumerate() {
            let routed = service.route("10.0.0.1", "GET", "/").unwrap();
            assert_eq!(
                routed.target.as_str(),
                *expected_url,
                "cycle {cycle}, position {position}"
            );
            service.complete(routed.target.as_str(), "10.0.0.1", 1, true);
        }
    }
}

#[test]
fn weighted_round_robin_share_is_proportional_2_1_1() {
    let service = service_with_up_servers(&[
        ("http://localhost:5001", 2),
        ("http://localhost:5002", 1),
        ("http://localhost:5003", 1),
    ]);
    service.set_algorithm("WEIGHTED_ROUND_ROBIN").unwrap();

    let mut counts: HashMap<String, u32> = HashMap::new();
    for i in 0..400 {
        let client = format!("10.0.1.{}", i % 20);
        let routed = service.route(&client, "GET", "/").unwrap();
        *counts.entry(routed.target.as_str().to_string()).or_insert(0) += 1;
        service.complete(routed.target.as_str(), &client, 2, true);
    }

    let share = |url: &str| *counts.get(url).unwrap_or(&0);
    assert!((185..=215).contains(&share("http://localhost:5001")));
    assert!((85..=115).contains(&share("http://localhost:5002")));
    assert!((85..=115).contains(&share("http://localhost:5003")));
}

#[test]
fn weighted_round_robin_two_servers_300_requests() {
    let service = service_with_up_servers(&[
        ("http://localhost:5001", 2),
        ("http://localhost:5002", 1),
    ]);
    service.set_algorithm("WEIGHTED_ROUND_ROBIN").unwrap();

    let mut counts: HashMap<String, i64> = HashMap::new();
    for _ in 0..300 {
        let routed = service.route("10.0.0.1", "GET", "/").unwrap();
        *counts.entry(routed.target.as_str().to_string()).or_insert(0) += 1;
        service.complete(routed.target.as_str(), "10.0.0.1", 2, true);
    }

    let a = counts["http://localhost:5001"];
    let b = counts["http://localhost:5002"];
    assert!((a - 200).abs() <= 15, "weight-2 server got {a}");
    assert!((b - 100).abs() <= 15, "weight-1 server got {b}");
}

#[test]
fn least_connections_always_picks_a_minimum() {
    let service = three_equal_servers();
    service.set_algorithm("LEAST_CONNECTIONS").unwrap();

    // Never completing anything forces the counts apart; every pick must
    // still be a minimum at call time.
    for _ in 0..20 {
        let min_before = service
            .pool()
            .up_servers()
            .iter()
            .map(|s| s.active_connections())
            .min()
            .unwrap();
        let routed = service.route("10.0.0.1", "GET", "/").unwrap();
        let picked = service.pool().find(routed.target.as_str()).unwrap();
        assert_eq!(picked.active_connections(), min_before + 1);
    }
}

#[test]
fn least_connections_spreads_idle_servers_without_repeats() {
    let service = three_equal_servers();
    service.set_algorithm("LEAST_CONNECTIONS").unwrap();

    let mut seen = Vec::new();
    for i in 0..3 {
        let client = format!("10.0.2.{i}");
        let routed = service.route(&client, "GET", "/").unwrap();
        seen.push(routed.target.into_string());
    }

    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 3, "each idle server must be picked exactly once");
}

#[test]
fn unavailable_iff_no_server_is_up() {
    let service = three_equal_servers();

    for algorithm in Algorithm::ALL {
        service.set_algorithm(algorithm.as_str()).unwrap();
        assert!(service.route("10.0.0.1", "GET", "/").is_ok());
    }

    for server in service.pool().list() {
        server.set_status(HealthState::Down);
    }
    for algorithm in Algorithm::ALL {
        service.set_algorithm(algorithm.as_str()).unwrap();
        assert!(matches!(
            service.route("10.0.0.1", "GET", "/"),
            Err(BalancerError::Unavailable)
        ));
    }

    service
        .pool()
        .find("http://localhost:5002")
        .unwrap()
        .set_status(HealthState::Up);
    let routed = service.route("10.0.0.1", "GET", "/").unwrap();
    assert_eq!(routed.target.as_str(), "http://localhost:5002");
}

#[test]
fn reset_zeroes_counters_but_keeps_weights_and_identities() {
    let service = service_with_up_servers(&[
        ("http://localhost:5001", 2),
        ("http://localhost:5002", 1),
    ]);

    for i in 0..10 {
        let client = format!("10.0.3.{i}");
        let routed = service.route(&client, "GET", "/").unwrap();
        service.complete(routed.target.as_str(), &client, 8, i % 2 == 0);
    }
    let before = service.metrics_snapshot();
    assert_eq!(before.total_requests, 10);

    service.reset_metrics();

    let after = service.metrics_snapshot();
    assert_eq!(after.total_requests, 0);
    assert_eq!(after.unique_clients, 0);
    assert_eq!(after.total_connections, 0);
    assert_eq!(after.total_servers, 2);
    assert_eq!(after.healthy_servers, 2);
    for server in after.servers {
        assert_eq!(server.total_requests, 0);
        assert_eq!(server.successful_requests, 0);
        assert_eq!(server.failed_requests, 0);
        assert!(server.clients.is_empty());
    }
    assert_eq!(
        service.pool().find("http://localhost:5001").unwrap().weight(),
        2
    );
}

#[test]
fn bogus_algorithm_is_rejected_and_current_stays() {
    let service = three_equal_servers();
    service.set_algorithm("RANDOM").unwrap();

    let err = service.set_algorithm("BOGUS").unwrap_err();
    match err {
        BalancerError::InvalidAlgorithm { name, valid } => {
            assert_eq!(name, "BOGUS");
            assert!(valid.contains("WEIGHTED_ROUND_ROBIN"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(service.algorithm(), Algorithm::Random);
}

/// Probe client whose outcome can be flipped at runtime.
struct FlippableProbe {
    healthy: AtomicBool,
}

#[async_trait]
impl HttpClient for FlippableProbe {
    async fn forward(
        &self,
        _target: &str,
        _request: ForwardRequest,
    ) -> HttpClientResult<ForwardResponse> {
        Err(HttpClientError::Connection("not used".to_string()))
    }

    async fn health_check(&self, _url: &str, timeout: Duration) -> HttpClientResult<bool> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(true)
        } else {
            Err(HttpClientError::Timeout(timeout))
        }
    }
}

#[tokio::test]
async fn probe_timeout_excludes_server_until_recovery() {
    let service = Arc::new(BalancerService::new(config_with(
        &[("http://localhost:5001", 1), ("http://localhost:5002", 1)],
        true,
    )));
    for server in service.pool().list() {
        server.set_status(HealthState::Up);
    }

    let probe = Arc::new(FlippableProbe {
        healthy: AtomicBool::new(false),
    });
    let checker = HealthChecker::new(service.clone(), probe.clone());

    // Timeout flips the probed server DOWN...
    let victim = service.pool().find("http://localhost:5001").unwrap();
    checker.probe_server(&victim).await;
    assert_eq!(victim.status(), HealthState::Down);

    // ...and every algorithm stops handing it out.
    for algorithm in Algorithm::ALL {
        service.set_algorithm(algorithm.as_str()).unwrap();
        for _ in 0..10 {
            let routed = service.route("10.0.0.1", "GET", "/").unwrap();
            assert_eq!(routed.target.as_str(), "http://localhost:5002");
            service.complete(routed.target.as_str(), "10.0.0.1", 1, true);
        }
    }

    // A later successful probe brings it back.
    probe.healthy.store(true, Ordering::SeqCst);
    checker.probe_server(&victim).await;
    assert_eq!(victim.status(), HealthState::Up);
    assert_eq!(service.pool().up_servers().len(), 2);
}

#[tokio::test]
async fn event_feed_reports_routing_activity() {
    let service = service_with_up_servers(&[("http://localhost:5001", 1)]);
    let mut feed = service.subscribe_events();

    let routed = service.route("203.0.113.9", "POST", "/api/orders").unwrap();
    service.complete(routed.target.as_str(), "203.0.113.9", 14, false);

    let first = feed.recv().await.unwrap();
    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["type"], "request");
    assert_eq!(json["server"], "http://localhost:5001");
    assert_eq!(json["path"], "/api/orders");
    assert_eq!(json["client"], "203.0.113.9");

    let second = feed.recv().await.unwrap();
    let json = serde_json::to_value(&second).unwrap();
    assert_eq!(json["type"], "response");
    assert_eq!(json["response_time_ms"], 14);
    assert_eq!(json["success"], false);
}
