//! End-to-end behavior of the caching fabric against a scripted upstream.

mod helpers;

use chrono::NaiveDate;
use helpers::{fabric, fabric_with, fabric_with_dead_kv, script_standard_place};
use serde_json::json;
use std::time::{Duration, Instant};

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

#[tokio::test]
async fn cold_cache_query_builds_the_full_tree_in_order() {
    let fabric = fabric().await;
    script_standard_place(&fabric.stub, "P", "2024-06-01");

    let tree = fabric.planner.get_availability("P", date()).await;

    // Upstream order preserved: club 1 (court 10, one slot) then club 2
    // (courts 20, 21, empty).
    assert_eq!(tree.len(), 2);
    assert_eq!(tree[0].club.id, 1);
    assert_eq!(tree[1].club.id, 2);
    assert_eq!(tree[0].courts.len(), 1);
    assert_eq!(tree[0].courts[0].court.id, 10);
    assert_eq!(tree[0].courts[0].available.len(), 1);
    assert_eq!(tree[0].courts[0].available[0].price, 500.0);
    assert_eq!(tree[1].courts.len(), 2);
    assert_eq!(tree[1].courts[0].court.id, 20);
    assert_eq!(tree[1].courts[1].court.id, 21);
    assert!(tree[1].courts[0].available.is_empty());
    assert!(tree[1].courts[1].available.is_empty());

    // Every touched key exists in both tiers.
    for key in [
        "clubs:P",
        "clubs:stale:P",
        "courts:1",
        "courts:stale:1",
        "courts:2",
        "courts:stale:2",
        "slots:1:10:2024-06-01",
        "slots:stale:1:10:2024-06-01",
        "slots:2:20:2024-06-01",
        "slots:stale:2:20:2024-06-01",
        "slots:2:21:2024-06-01",
        "slots:stale:2:21:2024-06-01",
    ] {
        assert!(fabric.kv.get(key).await.is_some(), "missing key {key}");
    }
}

#[tokio::test]
async fn warm_cache_serves_repeat_queries_without_upstream_calls() {
    let fabric = fabric().await;
    script_standard_place(&fabric.stub, "P", "2024-06-01");

    let first = fabric.planner.get_availability("P", date()).await;
    let calls_after_first = fabric.stub.calls().len();

    let second = fabric.planner.get_availability("P", date()).await;
    assert_eq!(second.len(), first.len());
    assert_eq!(
        fabric.stub.calls().len(),
        calls_after_first,
        "warm query must not reach the upstream"
    );
}

#[tokio::test]
async fn concurrent_identical_queries_coalesce_to_one_fetch_per_key() {
    let fabric = fabric().await;
    script_standard_place(&fabric.stub, "P", "2024-06-01");

    let mut handles = Vec::new();
    for _ in 0..50 {
        let planner = fabric.planner.clone();
        handles.push(tokio::spawn(async move {
            planner.get_availability("P", date()).await
        }));
    }
    for handle in handles {
        let tree = handle.await.unwrap();
        assert_eq!(tree.len(), 2);
    }

    assert_eq!(fabric.stub.count_calls("/clubs"), 1);
    // ≤ 1 (clubs) + |clubs| (courts) + Σ|courts| (slots) = 6.
    assert!(
        fabric.stub.calls().len() <= 6,
        "expected at most 6 upstream calls, saw {}",
        fabric.stub.calls().len()
    );
}

#[tokio::test]
async fn breaker_opens_after_failures_and_serves_the_stale_tier() {
    let fabric = fabric_with(|config| {
        config.breaker_failure_threshold = 5;
        config.breaker_timeout_ms = 300;
        config.breaker_success_threshold = 3;
    })
    .await;

    // Courts and slots are healthy; only /clubs fails. The clubs backbone is
    // available from a pre-populated stale mirror.
    fabric.stub.set_courts(1, json!([{"id": 10}]));
    fabric.stub.set_slots(
        1,
        10,
        "2024-06-01",
        json!([{
            "datetime": "2024-06-01T10:00:00Z",
            "start": "10:00",
            "end": "11:00",
            "duration": 60,
            "price": 500,
            "_priority": 1
        }]),
    );
    fabric
        .kv
        .set("clubs:stale:P", r#"[{"id":1}]"#, 7200)
        .await;
    fabric.stub.fail_clubs(5);

    // Five failing queries still produce the stale-backed tree.
    for _ in 0..5 {
        let tree = fabric.planner.get_availability("P", date()).await;
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].club.id, 1);
        assert_eq!(tree[0].courts[0].court.id, 10);
    }
    assert_eq!(fabric.stub.count_calls("/clubs"), 5);

    // Sixth query: breaker is open, the upstream is not touched.
    let tree = fabric.planner.get_availability("P", date()).await;
    assert_eq!(tree.len(), 1);
    assert_eq!(fabric.stub.count_calls("/clubs"), 5);
    assert_eq!(
        fabric.api.breaker().state(),
        courtside::upstream::breaker::BreakerState::Open
    );

    // After the timeout the upstream has recovered; the next query trials
    // through half-open and enough successes close the circuit.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let tree = fabric.planner.get_availability("P", date()).await;
    assert_eq!(tree.len(), 1);
    assert_eq!(
        fabric.api.breaker().state(),
        courtside::upstream::breaker::BreakerState::Closed
    );
}

#[tokio::test]
async fn rate_limiter_defers_excess_calls_to_the_next_window() {
    let fabric = fabric_with(|config| {
        config.rate_limit = 3;
        config.rate_window_ms = 1000;
    })
    .await;

    let started = Instant::now();
    let mut handles = Vec::new();
    for i in 0..6 {
        let api = fabric.api.clone();
        handles.push(tokio::spawn(
            async move { api.get_clubs(&format!("place-{i}")).await },
        ));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok(), "no query may fail");
    }

    let calls = fabric.stub.calls();
    assert_eq!(calls.len(), 6);

    let first = calls.iter().map(|c| c.at).min().unwrap();
    let in_first_window = calls
        .iter()
        .filter(|c| c.at.duration_since(first) < Duration::from_millis(700))
        .count();
    assert!(
        in_first_window <= 3,
        "limiter admitted {in_first_window} calls in the first window"
    );
    assert!(
        started.elapsed() >= Duration::from_millis(400),
        "the overflow calls must have waited for the window boundary"
    );
}

#[tokio::test]
async fn kv_outage_degrades_to_pure_upstream_reads() {
    let fabric = fabric_with_dead_kv().await;
    script_standard_place(&fabric.stub, "P", "2024-06-01");

    let tree = fabric.planner.get_availability("P", date()).await;
    assert_eq!(tree.len(), 2);

    // Nothing was cached, so a repeat query goes upstream again.
    let tree = fabric.planner.get_availability("P", date()).await;
    assert_eq!(tree.len(), 2);
    assert_eq!(fabric.stub.count_calls("/clubs"), 2);

    let metrics = fabric.kv.metrics();
    assert!(metrics.errors > 0 || metrics.operations > 0);
    assert_eq!(metrics.hits, 0);
    assert!(!metrics.connected);
}

#[tokio::test]
async fn empty_upstream_responses_shape_the_tree_without_errors() {
    let fabric = fabric().await;

    // Unknown place: no clubs at all.
    let tree = fabric.planner.get_availability("nowhere", date()).await;
    assert!(tree.is_empty());

    // A club with no courts still appears, with an empty court list.
    fabric.stub.set_clubs("Q", json!([{"id": 9}]));
    let tree = fabric.planner.get_availability("Q", date()).await;
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].club.id, 9);
    assert!(tree[0].courts.is_empty());
}

#[tokio::test]
async fn fresh_clubs_fetch_prefetches_courts_and_records_the_reverse_index() {
    let fabric = fabric().await;
    fabric.stub.set_clubs("P", json!([{"id": 5}]));
    fabric.stub.set_courts(5, json!([{"id": 50}]));

    let clubs = fabric.api.get_clubs("P").await.unwrap();
    assert_eq!(clubs.len(), 1);

    // The reverse index is written as part of the fresh clubs fetch.
    assert_eq!(fabric.kv.get("clubToPlace:5").await.as_deref(), Some("P"));

    // The background worker warms the courts entry without a query.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if fabric.kv.get("courts:5").await.is_some() {
            break;
        }
        assert!(Instant::now() < deadline, "prefetch never warmed courts:5");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(fabric.stub.count_calls("/clubs/5/courts"), 1);
}

#[tokio::test]
async fn place_invalidation_targets_one_day_or_the_whole_place() {
    let fabric = fabric().await;
    for key in [
        "availability:P:2024-06-01",
        "availability:stale:P:2024-06-01",
        "availability:P:2024-06-02",
        "availability:stale:P:2024-06-02",
    ] {
        fabric.kv.set(key, "[]", 7200).await;
    }

    fabric.planner.invalidate_place("P", Some(date())).await;
    assert!(fabric.kv.get("availability:P:2024-06-01").await.is_none());
    assert!(
        fabric
            .kv
            .get("availability:stale:P:2024-06-01")
            .await
            .is_none()
    );
    assert!(fabric.kv.get("availability:P:2024-06-02").await.is_some());

    fabric.planner.invalidate_place("P", None).await;
    assert!(fabric.kv.get("availability:P:2024-06-02").await.is_none());
    assert!(
        fabric
            .kv
            .get("availability:stale:P:2024-06-02")
            .await
            .is_none()
    );
}
