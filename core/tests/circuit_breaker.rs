use assert_matches::assert_matches;
use core_test_support::Reply;
use core_test_support::ScriptedFetch;
use core_test_support::deterministic_config;
use core_test_support::harness;
use core_test_support::harness_with;
use franchise_query_core::CircuitBreakerConfig;
use franchise_query_core::CircuitState;
use franchise_query_core::ErrorKind;
use franchise_query_core::FetchError;
use franchise_query_core::LogEvent;
use franchise_query_core::QueryClientConfig;
use franchise_query_core::QueryOptions;
use franchise_query_core::RequestError;
use franchise_query_core::RetryPolicy;
use franchise_query_core::keys;
use franchise_query_core::query_fn;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

const COOLDOWN: Duration = Duration::from_secs(300);

fn breaker_config(threshold: u32) -> QueryClientConfig {
    QueryClientConfig {
        circuit_breaker: CircuitBreakerConfig {
            threshold,
            cooldown_ms: COOLDOWN.as_millis() as u64,
        },
        ..deterministic_config()
    }
}

#[tokio::test]
async fn circuit_opens_and_stops_calling_the_backend() {
    let h = harness_with(breaker_config(3));
    let key = keys::notifications::list("u1");
    assert_eq!(key.endpoint(), "notifications/list");
    let fetch = ScriptedFetch::always(Reply::Status(500));

    for round in 1..=3 {
        let err = h
            .client
            .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
            .await
            .expect_err("server keeps failing");
        assert_eq!(err.kind(), Some(ErrorKind::Server), "round {round}");
    }
    assert!(h.client.breaker().is_open("notifications/list"));
    let calls_before = fetch.calls();
    assert_eq!(calls_before, 9, "three operations with three attempts each");

    let refused = h
        .client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await;
    assert_matches!(refused, Err(RequestError::CircuitOpen { ref endpoint }) if endpoint == "notifications/list");
    assert_eq!(fetch.calls(), calls_before, "fetch function never invoked");
    assert_eq!(h.logger.count(LogEvent::CircuitBreakerActivated), 1);
    assert_eq!(
        refused.expect_err("refused").user_message(),
        franchise_query_core::error::CIRCUIT_OPEN_MESSAGE
    );
}

#[tokio::test]
async fn cooldown_permits_one_trial() {
    let h = harness_with(breaker_config(1));
    let key = keys::orders::detail("42");
    let fetch = ScriptedFetch::new(
        [Reply::Status(502), Reply::Status(502), Reply::Status(502), Reply::Status(502)],
        Reply::Data(json!({"id": 42})),
    );

    h.client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect_err("opens the circuit");
    assert_eq!(fetch.calls(), 3);
    assert!(h.client.breaker().is_open("orders/detail"));

    h.clock.advance(COOLDOWN - Duration::from_millis(1));
    assert!(h.client.breaker().is_open("orders/detail"));

    h.clock.advance(Duration::from_millis(1));
    let trial = h
        .client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await;
    assert_eq!(trial.expect_err("trial fails").kind(), Some(ErrorKind::Server));
    assert_eq!(fetch.calls(), 4, "exactly one attempt while half-open");
    assert_eq!(h.client.breaker().state("orders/detail"), CircuitState::Open);

    h.clock.advance(COOLDOWN);
    let recovered = h
        .client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect("backend recovered");
    assert_eq!(*recovered, json!({"id": 42}));
    assert_eq!(h.client.breaker().state("orders/detail"), CircuitState::Closed);
    assert_eq!(h.client.breaker().failure_count("orders/detail"), 0);
}

#[tokio::test]
async fn retryable_errors_stop_at_the_attempt_ceiling() {
    let h = harness();
    let key = keys::products::detail("p-1");
    let fetch = ScriptedFetch::always(Reply::Network("connection reset"));

    let err = h
        .client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect_err("network down");

    assert_eq!(fetch.calls(), 3);
    assert_eq!(
        h.clock.sleeps(),
        vec![Duration::from_millis(1_000), Duration::from_millis(2_000)]
    );
    let classified = err.classified().expect("classified");
    assert!(classified.retryable());
    assert!(!RetryPolicy::query().should_retry(classified, 3, 3));
}

#[tokio::test]
async fn auth_failure_is_never_retried() {
    let h = harness();
    let key = keys::user::profile("42");
    let fetch = ScriptedFetch::always(Reply::Status(401));

    let err = h
        .client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect_err("unauthorized");

    assert_eq!(err.kind(), Some(ErrorKind::Auth));
    assert_eq!(fetch.calls(), 1);
    assert!(h.clock.sleeps().is_empty());
    let classified = err.classified().expect("classified");
    assert!(!RetryPolicy::query().should_retry(classified, 1, 3));
    assert_eq!(classified.endpoint(), "user/profile");
    assert_eq!(h.client.breaker().failure_count("user/profile"), 1);
}

#[tokio::test]
async fn success_clears_failure_count() {
    let h = harness_with(breaker_config(5));
    let key = keys::suppliers::detail("s-1");
    let fetch = ScriptedFetch::new([Reply::Status(403)], Reply::Data(json!({})));

    h.client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect_err("forbidden");
    assert_eq!(h.client.breaker().failure_count("suppliers/detail"), 1);

    h.client
        .get_or_fetch(&key, fetch.query_fn(), QueryOptions::default())
        .await
        .expect("allowed now");
    assert_eq!(h.client.breaker().failure_count("suppliers/detail"), 0);
}

fn order_details() -> Vec<franchise_query_core::QueryKey> {
    (1..=4).map(|id| keys::orders::detail(&id.to_string())).collect()
}

#[tokio::test]
async fn half_open_circuit_lets_one_concurrent_caller_through() {
    let h = harness_with(breaker_config(1));
    h.client.breaker().record_failure("orders/detail");
    h.clock.advance(COOLDOWN);
    let fetch = ScriptedFetch::always(Reply::Status(500));

    let details = order_details();
    let results = join_all(
        details
            .iter()
            .map(|key| h.client.get_or_fetch(key, fetch.query_fn(), QueryOptions::default())),
    )
    .await;

    assert_eq!(fetch.calls(), 1, "only the trial reaches the backend");
    assert_eq!(
        results[0].as_ref().err().and_then(RequestError::kind),
        Some(ErrorKind::Server)
    );
    for refused in &results[1..] {
        assert_matches!(refused, Err(RequestError::CircuitOpen { .. }));
    }
    assert_eq!(h.logger.count(LogEvent::CircuitBreakerActivated), 3);
    assert_eq!(h.client.breaker().state("orders/detail"), CircuitState::Open);
}

#[tokio::test]
async fn successful_trial_reopens_the_endpoint_for_everyone() {
    let h = harness_with(breaker_config(1));
    h.client.breaker().record_failure("orders/detail");
    h.clock.advance(COOLDOWN);
    let fetch = ScriptedFetch::data(json!({"status": "shipped"}));

    let details = order_details();
    let results = join_all(
        details
            .iter()
            .map(|key| h.client.get_or_fetch(key, fetch.query_fn(), QueryOptions::default())),
    )
    .await;
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert_eq!(fetch.calls(), 1);
    assert_eq!(h.client.breaker().state("orders/detail"), CircuitState::Closed);

    for key in &details[1..] {
        h.client
            .get_or_fetch(key, fetch.query_fn(), QueryOptions::default())
            .await
            .expect("circuit closed again");
    }
    assert_eq!(fetch.calls(), 4);
}

#[tokio::test]
async fn circuit_opened_by_another_caller_ends_the_retry_loop() {
    let h = harness_with(breaker_config(1));
    let key = keys::products::detail("p-9");
    let breaker = Arc::clone(h.client.breaker());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let fetch = query_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        breaker.record_failure("products/detail");
        async { Err(FetchError::network("connection reset")) }
    });

    let err = h
        .client
        .get_or_fetch(&key, fetch.clone(), QueryOptions::default())
        .await
        .expect_err("network down");
    assert_eq!(err.kind(), Some(ErrorKind::Network));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry once the circuit is open");
    assert!(h.clock.sleeps().is_empty());
    assert_eq!(h.logger.count(LogEvent::CircuitBreakerActivated), 1);

    let refused = h
        .client
        .get_or_fetch(&key, fetch, QueryOptions::default())
        .await;
    assert_matches!(refused, Err(RequestError::CircuitOpen { .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
