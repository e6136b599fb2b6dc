// src/algorithms/tests/fixed_window_tests.rs

use std::sync::Arc;
use std::time::Duration;

use crate::algorithms::{window_start, FixedWindow, WindowCount};
use crate::clock::{Clock, ManualClock};
use crate::config::InMemoryConfig;
use crate::storage::LocalCounterBackend;
use crate::test_utils::T0_MS;

fn fixed_window() -> FixedWindow<LocalCounterBackend> {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(T0_MS));
    FixedWindow::new(LocalCounterBackend::with_clock(
        &InMemoryConfig::default(),
        clock,
    ))
}

#[test]
fn test_window_start_alignment() {
    let minute = Duration::from_secs(60);
    assert_eq!(window_start(0, minute), 0);
    assert_eq!(window_start(59_999, minute), 0);
    assert_eq!(window_start(60_000, minute), 60_000);
    assert_eq!(window_start(1_700_000_123_456, minute), 1_700_000_100_000);
}

#[test]
fn test_sub_millisecond_window_does_not_divide_by_zero() {
    assert_eq!(window_start(1_234, Duration::from_micros(10)), 1_234);
}

#[tokio::test]
async fn test_window_boundaries() {
    let window = fixed_window();
    let minute = Duration::from_secs(60);

    // Last millisecond of the window still counts against it
    let first = window
        .increment("auth:login", "ip:1.2.3.4", minute, T0_MS)
        .await
        .unwrap();
    let last = window
        .increment("auth:login", "ip:1.2.3.4", minute, T0_MS + 59_999)
        .await
        .unwrap();
    assert_eq!(
        first,
        WindowCount {
            count: 1,
            reset_at_ms: T0_MS + 60_000
        }
    );
    assert_eq!(last.count, 2);

    // The boundary itself opens a new window
    let next = window
        .increment("auth:login", "ip:1.2.3.4", minute, T0_MS + 60_000)
        .await
        .unwrap();
    assert_eq!(next.count, 1);
    assert_eq!(next.reset_at_ms, T0_MS + 120_000);
}

#[tokio::test]
async fn test_scopes_and_identities_are_isolated() {
    let window = fixed_window();
    let minute = Duration::from_secs(60);

    for _ in 0..3 {
        window
            .increment("api:general", "user:1", minute, T0_MS)
            .await
            .unwrap();
    }

    let other_user = window
        .increment("api:general", "user:2", minute, T0_MS)
        .await
        .unwrap();
    let other_scope = window
        .increment("api:general:burst", "user:1", minute, T0_MS)
        .await
        .unwrap();

    assert_eq!(other_user.count, 1);
    assert_eq!(other_scope.count, 1);
    assert_eq!(window.storage().len(), 3);
}

#[test]
fn test_key_uses_window_start() {
    let window = fixed_window();
    let key = window.key(
        "auth:login",
        "ip:1.2.3.4",
        Duration::from_secs(300),
        T0_MS + 299_999,
    );

    assert_eq!(key.window_start_ms, T0_MS);
    assert_eq!(key.to_string(), format!("auth:login:ip:1.2.3.4:{}", T0_MS));
}
