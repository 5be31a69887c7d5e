//! End-to-end wire-level smoke tests: a real `SimulationEngine` over
//! loopback TCP, compressed to sub-second real timings so the suite
//! stays fast. Module-level unit tests (colocated with `core::*` and
//! `node::*`) cover the deterministic, `VirtualClock`-driven timing
//! semantics (priority ordering, quorum, autoscale thresholds, retry
//! and timeout bookkeeping) in isolation; these tests instead validate
//! that the full topology wires together correctly end to end.

use std::time::Duration;

use relaysim::config::SimConfig;
use relaysim::distributions::{ServiceTimeConfig, ServiceTimeType};
use relaysim::SimulationEngine;

fn base_config(port_base: u16) -> SimConfig {
    SimConfig {
        duration: Duration::from_millis(400),
        rate: 20.0,
        seed: 7,
        tcp_port_base: port_base,
        output_path: "unused_in_tests.json".into(),
        service_time: ServiceTimeConfig {
            kind: ServiceTimeType::Fixed,
            param_a: 0.01,
            param_b: 0.0,
        },
        max_retries: 2,
        failure_probability: 0.0,
        idle_timeout: Duration::from_secs(60),
        client_request_timeout: Duration::from_millis(150),
        avg_wait_up: 5.0,
        scale_down: 1.5,
        cooldown: Duration::from_millis(50),
        min_per_class: 1,
        max_per_class: 5,
        scaling_tick_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn happy_path_produces_successful_completions() {
    let config = base_config(23_000);
    let engine = SimulationEngine::setup(config).await.expect("topology wires up");
    engine.run().await.expect("run completes without fatal error");

    let summary = engine.get_results().await;
    assert!(summary.total_sent > 0, "clients should have generated requests");
    assert!(
        summary.total_successful > 0,
        "at least some requests should reach full quorum over 400ms of healthy service"
    );

    // every queue that saw traffic reports coherent stats
    for stats in summary.queue_stats.values() {
        assert!(stats.avg_wait_time >= 0.0);
        assert!(stats.max_wait_time >= stats.avg_wait_time || stats.total_processed <= 1);
    }
}

#[tokio::test]
async fn permanent_stage_two_failure_is_survived_not_fatal() {
    let mut config = base_config(23_100);
    config.failure_probability = 1.0;
    config.max_retries = 1;
    let engine = SimulationEngine::setup(config).await.expect("topology wires up");
    engine.run().await.expect("run completes even when every stage-two lane fails");

    let summary = engine.get_results().await;
    assert!(summary.total_sent > 0);
    // with every lane permanently DOWN, no request should reach quorum
    assert_eq!(summary.total_successful, 0);
}

#[tokio::test]
async fn result_artifact_serializes_to_json() {
    let config = base_config(23_200);
    let engine = SimulationEngine::setup(config).await.expect("topology wires up");
    engine.run().await.expect("run completes");

    let summary = engine.get_results().await;
    let (processor_counts, _last_scale_times) = engine.scaling_status().await;
    let value = serde_json::json!({
        "clients": summary.clients,
        "queue_stats": summary.queue_stats,
        "distributed_count": engine.distributed_count(),
        "scaling_status": { "processor_counts": processor_counts },
    });
    let text = serde_json::to_string(&value).expect("artifact serializes");
    assert!(text.contains("\"clients\""));
    assert!(text.contains("\"queue_stats\""));
}
