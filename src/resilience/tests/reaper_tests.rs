// src/resilience/tests/reaper_tests.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use super::utils::{harness, resilience_config};
use crate::resilience::Reaper;
use crate::storage::{CounterKey, CounterStore};
use crate::test_utils::T0_MS;

async fn seed(h: &super::utils::Harness, identities: usize, window: Duration) {
    for i in 0..identities {
        let key = CounterKey::new("ip:global", format!("ip:198.51.100.{}", i), T0_MS);
        h.local.increment_and_get(&key, window).await.unwrap();
    }
}

#[tokio::test]
async fn test_sweep_evicts_expired_and_records_metrics() {
    let h = harness(resilience_config(Duration::from_millis(250), 5));
    seed(&h, 10, Duration::from_secs(1)).await;
    let live = CounterKey::new("api:export", "user:1", T0_MS);
    h.local
        .increment_and_get(&live, Duration::from_secs(3600))
        .await
        .unwrap();

    let reaper = Reaper::new(
        Arc::clone(&h.local),
        Arc::clone(&h.metrics),
        Duration::from_secs(60),
    );
    assert_eq!(reaper.sweep(), 0);

    h.clock.advance(Duration::from_secs(1));
    assert_eq!(reaper.sweep(), 10);
    assert_eq!(h.local.len(), 1);
    assert_eq!(h.metrics.reaped_total(), 10);
    assert!(h.metrics.render().unwrap().contains("admission_local_entries 1"));
}

#[tokio::test(start_paused = true)]
async fn test_spawned_reaper_sweeps_on_interval_and_shuts_down() {
    let h = harness(resilience_config(Duration::from_millis(250), 5));
    seed(&h, 25, Duration::from_secs(1)).await;
    h.clock.advance(Duration::from_secs(2));

    let handle = Reaper::new(
        Arc::clone(&h.local),
        Arc::clone(&h.metrics),
        Duration::from_secs(120),
    )
    .spawn();

    // Nothing happens before the first interval elapses
    time::advance(Duration::from_secs(60)).await;
    tokio::task::yield_now().await;
    assert_eq!(h.local.len(), 25);

    time::advance(Duration::from_secs(61)).await;
    for _ in 0..10 {
        if h.local.is_empty() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(h.local.is_empty());
    assert_eq!(h.metrics.reaped_total(), 25);
    assert!(!handle.is_finished());

    handle.shutdown().await;
}
