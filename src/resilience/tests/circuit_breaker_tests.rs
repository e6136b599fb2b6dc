// src/resilience/tests/circuit_breaker_tests.rs

use std::time::Duration;
use tokio::time;

use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

fn breaker(failure_threshold: usize, success_threshold: usize) -> CircuitBreaker {
    CircuitBreaker::new(CircuitBreakerConfig {
        failure_threshold,
        reset_timeout: Duration::from_secs(10),
        success_threshold,
    })
}

async fn open(breaker: &CircuitBreaker, failures: usize) {
    for _ in 0..failures {
        breaker.record_failure().await;
    }
    assert_eq!(breaker.state().await, CircuitState::Open);
}

#[tokio::test]
async fn test_initial_state_is_closed() {
    let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert!(breaker.allow_request().await);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_opens_after_consecutive_failures() {
    let breaker = breaker(3, 2);

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
    assert!(breaker.allow_request().await);

    breaker.record_failure().await;
    assert_eq!(
        breaker.state().await,
        CircuitState::Open,
        "Circuit should be Open after 3 failures"
    );
    assert!(!breaker.allow_request().await, "Open circuit must skip the store");
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_probes_after_reset_timeout() {
    let breaker = breaker(3, 2);
    open(&breaker, 3).await;

    time::advance(Duration::from_secs(9)).await;
    assert!(!breaker.allow_request().await);
    assert_eq!(breaker.state().await, CircuitState::Open);

    time::advance(Duration::from_secs(1)).await;
    assert!(breaker.allow_request().await);
    assert_eq!(breaker.state().await, CircuitState::HalfOpen);
}

#[tokio::test(start_paused = true)]
async fn test_circuit_closes_after_successful_probes() {
    let breaker = breaker(3, 2);
    open(&breaker, 3).await;
    time::advance(Duration::from_secs(10)).await;
    assert!(breaker.allow_request().await);

    breaker.record_success().await;
    assert_eq!(
        breaker.state().await,
        CircuitState::HalfOpen,
        "Still probing after the first success"
    );

    breaker.record_success().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);

    // Failure count starts over once closed
    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_probe_reopens_circuit() {
    let breaker = breaker(3, 2);
    open(&breaker, 3).await;
    time::advance(Duration::from_secs(10)).await;
    assert!(breaker.allow_request().await);

    breaker.record_success().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);

    // The reset timeout restarts from the failed probe
    time::advance(Duration::from_secs(5)).await;
    assert!(!breaker.allow_request().await);
}

#[tokio::test]
async fn test_success_in_closed_state_resets_failure_count() {
    let breaker = breaker(3, 2);

    breaker.record_failure().await;
    breaker.record_failure().await;
    breaker.record_success().await;
    breaker.record_failure().await;
    assert_eq!(
        breaker.state().await,
        CircuitState::Closed,
        "Circuit should remain Closed after success reset"
    );

    breaker.record_failure().await;
    breaker.record_failure().await;
    assert_eq!(breaker.state().await, CircuitState::Open);
}
