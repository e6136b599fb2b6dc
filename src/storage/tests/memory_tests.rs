// src/storage/tests/memory_tests.rs

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use super::common;
use crate::clock::{Clock, ManualClock};
use crate::config::InMemoryConfig;
use crate::storage::{CounterKey, CounterStore, LocalCounterBackend};
use crate::test_utils::T0_MS;

fn backend() -> (LocalCounterBackend, ManualClock) {
    let clock = ManualClock::new(T0_MS);
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    (
        LocalCounterBackend::with_clock(&InMemoryConfig::default(), shared),
        clock,
    )
}

#[tokio::test]
async fn test_local_increment_sequence() {
    let (storage, _clock) = backend();
    let key = CounterKey::new("api:general", "user:42", T0_MS);

    common::test_increment_sequence(&storage, &key).await.unwrap();
    assert_eq!(storage.len(), 3);
}

#[tokio::test]
async fn test_expired_record_is_overwritten_lazily() {
    let (storage, clock) = backend();
    let window = Duration::from_secs(1);
    let key = CounterKey::new("auth:login", "ip:1.2.3.4", T0_MS);

    for _ in 0..7 {
        storage.increment_and_get(&key, window).await.unwrap();
    }
    assert_eq!(storage.record(&key).unwrap().count, 7);

    // Reaching reset_at counts as expired
    clock.set(T0_MS + 1_000);
    assert_eq!(storage.increment_and_get(&key, window).await.unwrap(), 1);
    assert_eq!(
        storage.record(&key).unwrap().reset_at_ms,
        T0_MS + 1_000,
        "reset time comes from the key's window"
    );
}

#[tokio::test]
async fn test_reap_removes_only_expired_records() {
    let (storage, clock) = backend();
    let short = CounterKey::new("api:general:burst", "user:1", T0_MS);
    let long = CounterKey::new("api:general", "user:1", T0_MS);

    storage
        .increment_and_get(&short, Duration::from_secs(10))
        .await
        .unwrap();
    storage
        .increment_and_get(&long, Duration::from_secs(60))
        .await
        .unwrap();

    clock.advance(Duration::from_secs(9));
    assert_eq!(storage.reap_expired(), 0);

    clock.advance(Duration::from_secs(1));
    assert_eq!(storage.reap_expired(), 1);
    assert!(storage.record(&short).is_none());
    assert_eq!(storage.record(&long).unwrap().count, 1);

    clock.advance(Duration::from_secs(50));
    assert_eq!(storage.reap_expired(), 1);
    assert!(storage.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_are_never_lost() {
    let (storage, _clock) = backend();
    let storage = Arc::new(storage);
    let key = CounterKey::new("api:time-entries", "user:7", T0_MS);
    let tasks = 50;
    let per_task = 20;
    let barrier = Arc::new(Barrier::new(tasks));

    let handles = (0..tasks).map(|_| {
        let storage = Arc::clone(&storage);
        let key = key.clone();
        let barrier = Arc::clone(&barrier);
        tokio::spawn(async move {
            barrier.wait().await;
            for _ in 0..per_task {
                storage
                    .increment_and_get(&key, Duration::from_secs(60))
                    .await
                    .unwrap();
            }
        })
    });

    for result in join_all(handles).await {
        result.unwrap();
    }

    assert_eq!(storage.record(&key).unwrap().count, (tasks * per_task) as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reaping_never_drops_live_counters() {
    let (storage, clock) = backend();
    let storage = Arc::new(storage);
    let window = Duration::from_secs(60);

    // A crowd of short-lived records to give the reaper real work
    for i in 0..500 {
        let identity = format!("ip:10.0.{}.{}", i / 256, i % 256);
        let stale = CounterKey::new("ip:global", identity, T0_MS);
        storage
            .increment_and_get(&stale, Duration::from_secs(1))
            .await
            .unwrap();
    }
    clock.advance(Duration::from_secs(2));

    let live = CounterKey::new("ip:global", "ip:192.0.2.1", T0_MS);
    let writers = (0..8).map(|_| {
        let storage = Arc::clone(&storage);
        let live = live.clone();
        tokio::spawn(async move {
            for _ in 0..250 {
                storage.increment_and_get(&live, window).await.unwrap();
            }
        })
    });
    let reaper = {
        let storage = Arc::clone(&storage);
        tokio::spawn(async move {
            let mut removed = 0;
            for _ in 0..50 {
                removed += storage.reap_expired();
                tokio::task::yield_now().await;
            }
            removed
        })
    };

    for result in join_all(writers).await {
        result.unwrap();
    }
    assert_eq!(reaper.await.unwrap(), 500);
    assert_eq!(storage.record(&live).unwrap().count, 2_000);
    assert_eq!(storage.len(), 1);
}
