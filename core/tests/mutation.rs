use core_test_support::ScriptedFetch;
use core_test_support::harness;
use franchise_query_core::ErrorKind;
use franchise_query_core::FetchError;
use franchise_query_core::InvalidationContext;
use franchise_query_core::MutationOptions;
use franchise_query_core::MutationType;
use franchise_query_core::OperationKind;
use franchise_query_core::QueryOptions;
use franchise_query_core::keys;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn inventory_update_invalidates_and_refetches_subscribers() {
    let h = harness();
    let services = h.services();
    let summary = keys::inventory::summary("loc-7");
    let stock = keys::products::inventory_for("loc-7");
    let catalog = keys::products::list(json!({}));
    let summary_fetch = ScriptedFetch::data(json!({"units": 12}));
    let stock_fetch = ScriptedFetch::data(json!([]));
    let catalog_fetch = ScriptedFetch::data(json!([]));
    for (key, fetch) in [
        (&summary, &summary_fetch),
        (&stock, &stock_fetch),
        (&catalog, &catalog_fetch),
    ] {
        services
            .client
            .get_or_fetch(key, fetch.query_fn(), QueryOptions::default())
            .await
            .expect("populate");
    }
    let _watching = services.client.subscribe(&summary).expect("subscribe");

    let updated = services
        .mutations
        .run(
            |delta: i64| async move { Ok(json!({"delta": delta})) },
            -3,
            MutationOptions::new(MutationType::InventoryUpdated)
                .with_context(InvalidationContext::for_entity("loc-7")),
        )
        .await
        .expect("mutation");
    assert_eq!(updated, json!({"delta": -3}));

    assert!(services.client.snapshot(&summary).expect("entry").is_stale);
    assert!(services.client.snapshot(&stock).expect("entry").is_stale);
    assert!(!services.client.snapshot(&catalog).expect("entry").is_stale);

    services.client.wait_for_fetches().await;
    assert_eq!(summary_fetch.calls(), 2, "subscribed entry refetched");
    assert!(!services.client.snapshot(&summary).expect("entry").is_stale);
    assert_eq!(stock_fetch.calls(), 1, "unsubscribed entry only marked stale");
    assert_eq!(catalog_fetch.calls(), 1);
}

#[tokio::test]
async fn failed_mutation_surfaces_and_leaves_cache_alone() {
    let h = harness();
    let services = h.services();
    let orders = keys::orders::list(json!({}));
    services
        .client
        .get_or_fetch(
            &orders,
            ScriptedFetch::data(json!([])).query_fn(),
            QueryOptions::default(),
        )
        .await
        .expect("populate");

    let attempts = AtomicU32::new(0);
    let result: Result<Value, _> = services
        .mutations
        .run(
            |_: ()| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::network("offline")) }
            },
            (),
            MutationType::OrderCreated,
        )
        .await;

    let err = result.expect_err("write failed");
    assert_eq!(err.kind(), Some(ErrorKind::Network));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(h.clock.sleeps().len(), 1);
    assert!(!services.client.snapshot(&orders).expect("entry").is_stale);

    let logged = h.logger.records();
    assert!(
        logged
            .iter()
            .all(|record| record.context.method == OperationKind::Mutation
                && record.context.endpoint == "mutation/order_created")
    );
}

#[tokio::test]
async fn mutation_delay_uses_gentler_curve() {
    let h = harness();
    let services = h.services();
    let result: Result<(), _> = services
        .mutations
        .run(
            |_: ()| async { Err(FetchError::status(503, "unavailable")) },
            (),
            MutationType::ProfileUpdated,
        )
        .await;
    assert_eq!(result.expect_err("failed").kind(), Some(ErrorKind::Server));
    assert_eq!(h.clock.sleeps(), vec![std::time::Duration::from_millis(1_000)]);
    assert_eq!(services.client.mutation_policy().growth_factor, 1.5);
    assert_eq!(services.client.mutation_policy().max_delay_ms, 5_000);
}
