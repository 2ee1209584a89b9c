//! SQLite store tests against a private in-memory database.

mod common;

use chrono::Duration;

use common::*;
use volwatch::engine::PipelineSettings;
use volwatch::storage::{AlertFilter, SqliteStore, StoreTransaction, TimeSeriesStore};
use volwatch::types::{Alert, Sample};

/// One connection, so every transaction sees the same `:memory:` database.
async fn store() -> SqliteStore {
    let store = SqliteStore::connect("sqlite::memory:", 1).await.unwrap();
    store.migrate().await.unwrap();
    store
}

async fn count(store: &SqliteStore, table: &str) -> i64 {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    sqlx::query_scalar::<_, i64>(&sql).fetch_one(store.pool()).await.unwrap()
}

fn alert(minute: i64, subscriber: Option<&str>) -> Alert {
    Alert {
        timestamp: t0() + Duration::minutes(minute),
        previous_timestamp: t0() + Duration::minutes(minute - 5),
        asset: sym("BTC"),
        start_price: 100.0,
        end_price: 103.0,
        price_change_pct: 3.0,
        time_interval: "0:05:00".into(),
        subscriber: subscriber.map(String::from),
    }
}

#[tokio::test]
async fn test_migrate_is_idempotent() {
    let store = store().await;
    store.migrate().await.unwrap();
    assert_eq!(count(&store, "prices").await, 0);
}

#[tokio::test]
async fn test_sample_queries_are_ascending() {
    let store = store().await;
    let mut tx = store.begin().await.unwrap();
    // Out of order on purpose.
    for (m, p) in [(10, 3.0), (0, 1.0), (5, 2.0)] {
        tx.append_sample(&Sample::new(sym("BTC"), t0() + Duration::minutes(m), p))
            .await
            .unwrap();
    }
    tx.append_sample(&Sample::new(sym("ETH"), t0(), 3000.0)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let since = tx.query_samples(&sym("BTC"), t0() + Duration::minutes(5)).await.unwrap();
    let prices: Vec<f64> = since.iter().map(|s| s.price).collect();
    assert_eq!(prices, vec![2.0, 3.0]);

    let recent = tx.query_recent(&sym("BTC"), 2).await.unwrap();
    let prices: Vec<f64> = recent.iter().map(|s| s.price).collect();
    assert_eq!(prices, vec![2.0, 3.0]);

    assert!(tx.query_samples(&sym("XRP"), t0()).await.unwrap().is_empty());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_timestamps_survive_a_roundtrip() {
    let store = store().await;
    let at = t0() + Duration::milliseconds(123);
    let mut tx = store.begin().await.unwrap();
    tx.append_sample(&Sample::new(sym("BTC"), at, 64000.5)).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let got = tx.query_recent(&sym("BTC"), 1).await.unwrap();
    assert_eq!(got, vec![Sample::new(sym("BTC"), at, 64000.5)]);
}

#[tokio::test]
async fn test_duplicate_alert_is_ignored() {
    let store = store().await;
    let mut tx = store.begin().await.unwrap();
    assert!(tx.append_alert(&alert(5, None)).await.unwrap());
    assert!(!tx.append_alert(&alert(5, None)).await.unwrap());
    // Same crossing for a subscriber is a distinct alert.
    assert!(tx.append_alert(&alert(5, Some("alice"))).await.unwrap());
    tx.commit().await.unwrap();

    assert_eq!(count(&store, "alerts").await, 2);
}

#[tokio::test]
async fn test_alert_filters() {
    let store = store().await;
    let mut tx = store.begin().await.unwrap();
    for m in [5, 10, 15] {
        tx.append_alert(&alert(m, None)).await.unwrap();
    }
    tx.append_alert(&alert(20, Some("alice"))).await.unwrap();
    tx.commit().await.unwrap();

    let mut tx = store.begin().await.unwrap();

    let all = tx.query_alerts(&AlertFilter::default()).await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[0].timestamp, t0() + Duration::minutes(20));
    assert_eq!(all[0].subscriber.as_deref(), Some("alice"));
    assert_eq!(all[1].subscriber, None);

    let newest = tx.query_alerts(&AlertFilter::default().limit(1)).await.unwrap();
    assert_eq!(newest.len(), 1);

    let since = tx
        .query_alerts(&AlertFilter::default().since(t0() + Duration::minutes(10)))
        .await
        .unwrap();
    assert_eq!(since.len(), 3);

    let alice = tx
        .query_alerts(&AlertFilter::default().for_subscriber("alice"))
        .await
        .unwrap();
    assert_eq!(alice.len(), 1);

    let eth = tx
        .query_alerts(&AlertFilter::default().for_asset(sym("ETH")))
        .await
        .unwrap();
    assert!(eth.is_empty());
}

#[tokio::test]
async fn test_rollback_discards_writes() {
    let store = store().await;
    let mut tx = store.begin().await.unwrap();
    tx.append_sample(&Sample::new(sym("BTC"), t0(), 1.0)).await.unwrap();
    tx.append_alert(&alert(5, None)).await.unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(count(&store, "prices").await, 0);
    assert_eq!(count(&store, "alerts").await, 0);
}

#[tokio::test]
async fn test_non_positive_price_is_rejected_by_schema() {
    let store = store().await;
    let mut tx = store.begin().await.unwrap();
    assert!(tx.append_sample(&Sample::new(sym("BTC"), t0(), 0.0)).await.is_err());
}

#[tokio::test]
async fn test_pipeline_on_sqlite() {
    let store = store().await;
    let source = ScriptedSource::new();
    source.push_series("BTC", &[100.0, 103.0, 103.0]);
    let notifier = RecordingNotifier::new();
    let p = pipeline(&source, store.clone(), &notifier, PipelineSettings::default());
    let clock = clock();
    let assets = symbols(&["BTC"]);

    let mut raised = 0;
    for _ in 0..3 {
        raised += p.run_tick(&clock, &assets, 2.0).await.unwrap().alerts_raised;
        clock.advance(Duration::minutes(5));
    }

    assert_eq!(raised, 1);
    assert_eq!(count(&store, "prices").await, 3);
    assert_eq!(count(&store, "stats").await, 2);
    assert_eq!(count(&store, "alerts").await, 1);
    assert_eq!(notifier.sent().len(), 1);

    let latest = p.latest_alert().await.unwrap().unwrap();
    assert_eq!(latest.time_interval, "0:05:00");
    assert_eq!(latest.end_price, 103.0);
}
