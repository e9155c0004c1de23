//! Integration tests for the map consumer.
//!
//! These tests verify the consumer flow end to end:
//! - Store pushes → filtered, clustered `MapView`
//! - Expired records hidden immediately and deleted by the sweep
//! - Subscription failure, backoff, warning state and manual refresh
//! - Several consumers sweeping the same collection
//!
//! Run with: `cargo test --test bus_map_integration`

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;

use shuttletrack::consumer::cleanup::{CleanupConfig, CleanupSweeper, SweepOutcome};
use shuttletrack::consumer::marker::{GPS_TRACKER_COLOR, STALE_COLOR, STUDENT_SHARE_COLOR};
use shuttletrack::consumer::{BusMap, BusMapConfig, ConnectionState, MapMarker, MapView};
use shuttletrack::{ManualClock, MemoryStore, RealtimeStore, StoreError};

// ============================================================================
// Helper Functions
// ============================================================================

fn record(lat: f64, lng: f64, ts: i64, device_type: &str) -> Value {
    json!({
        "latitude": lat,
        "longitude": lng,
        "timestamp": ts,
        "accuracy": 5.0,
        "speed": 0.0,
        "heading": 0.0,
        "deviceType": device_type,
        "sharedBy": "Tester"
    })
}

async fn wait_for_view(
    views: &mut watch::Receiver<MapView>,
    what: &str,
    pred: impl FnMut(&MapView) -> bool,
) -> MapView {
    match tokio::time::timeout(Duration::from_secs(120), views.wait_for(pred)).await {
        Ok(Ok(view)) => view.clone(),
        Ok(Err(_)) => panic!("view channel closed while waiting for {what}"),
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

fn start_map(store: &MemoryStore, clock: &Arc<ManualClock>, config: BusMapConfig) -> BusMap {
    BusMap::start(Arc::new(store.clone()), clock.clone(), config)
}

// ============================================================================
// Staleness
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_expired_record_hidden_then_swept() {
    let store = MemoryStore::new();
    store.set("buses/Surma", record(22.46, 91.97, 0, "student_share")).await.unwrap();
    store.set("buses/Halda", record(22.47, 91.96, 199_000, "gps_tracker")).await.unwrap();

    let clock = Arc::new(ManualClock::new(200_000));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();

    let view = wait_for_view(&mut views, "first push", |v| v.connection.is_connected()).await;
    let keys: Vec<_> = view.active.iter().map(|b| b.key.as_str().to_string()).collect();
    assert_eq!(keys, vec!["Halda"]);

    // Still stored until the sweep runs.
    assert!(store.peek("buses/Surma").is_some());

    let outcome = map.cleanup_now().await;
    let SweepOutcome::Completed(report) = outcome else {
        panic!("sweep did not complete: {outcome:?}");
    };
    assert_eq!(report.deleted, 1);
    assert!(store.peek("buses/Surma").is_none());
    assert!(store.peek("buses/Halda").is_some());

    let stats = map.cleanup_stats();
    assert_eq!(stats.last_run, Some(200_000));
    assert_eq!(stats.deleted_count, 1);

    map.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_periodic_sweep_runs_within_interval_plus_jitter() {
    let store = MemoryStore::new();
    store.set("buses/Old", record(22.46, 91.97, 0, "student_share")).await.unwrap();

    let clock = Arc::new(ManualClock::new(200_000));
    let map = start_map(&store, &clock, BusMapConfig::default());

    tokio::time::sleep(Duration::from_secs(66)).await;
    assert!(store.peek("buses/Old").is_none());
    assert_eq!(map.cleanup_stats().runs, 1);

    map.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_aging_marker_turns_grey_before_it_disappears() {
    let store = MemoryStore::new();
    store.set("buses/Tracker", record(22.46, 91.97, 100_000, "gps_tracker")).await.unwrap();
    store.set("buses/Phone", record(22.30, 91.80, 100_000, "student_share")).await.unwrap();

    let clock = Arc::new(ManualClock::new(100_000));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();

    let view = wait_for_view(&mut views, "two buses", |v| v.active.len() == 2).await;
    let colors: Vec<_> = view
        .markers
        .iter()
        .map(|m| match m {
            MapMarker::Bus { style, .. } => style.color,
            MapMarker::Cluster { .. } => panic!("unexpected cluster"),
        })
        .collect();
    assert_eq!(colors, vec![STUDENT_SHARE_COLOR, GPS_TRACKER_COLOR]);

    clock.advance(Duration::from_secs(90));
    map.recompute();
    let view = map.view();
    assert_eq!(view.active.len(), 2);
    assert!(view.markers.iter().all(|m| matches!(
        m,
        MapMarker::Bus { style, .. } if style.color == STALE_COLOR
    )));

    clock.advance(Duration::from_secs(91));
    map.recompute();
    assert!(map.view().active.is_empty());

    map.shutdown().await;
}

// ============================================================================
// Connection State Machine
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_until_warning_then_refresh_recovers() {
    let store = MemoryStore::new();
    store.set("buses/Surma", record(22.46, 91.97, 1_000, "gps_tracker")).await.unwrap();
    let clock = Arc::new(ManualClock::new(2_000));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();

    wait_for_view(&mut views, "connected", |v| v.connection.is_connected()).await;

    // Break the live subscription and make every reconnect fail.
    store.fail_next_subscribes((0..3).map(|_| StoreError::Network("offline".into())));
    let broken_at = tokio::time::Instant::now();
    store.break_subscriptions(StoreError::Disconnected);

    for attempt in 1..=3 {
        wait_for_view(&mut views, "error state", |v| {
            v.connection == ConnectionState::Error { attempt }
        })
        .await;
    }
    let view = wait_for_view(&mut views, "warning", |v| {
        v.connection == ConnectionState::ConnectedWithWarning
    })
    .await;

    // 2s + 4s + 8s of backoff.
    assert!(broken_at.elapsed() >= Duration::from_secs(14));
    // The last known buses stay on screen.
    assert_eq!(view.active.len(), 1);

    map.refresh();
    wait_for_view(&mut views, "reconnected", |v| v.connection.is_connected()).await;
    assert_eq!(store.subscriber_count(), 1);

    map.shutdown().await;
    assert_eq!(map.connection(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_successful_push_resets_retry_budget() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(0));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();
    wait_for_view(&mut views, "connected", |v| v.connection.is_connected()).await;

    // Three separate breaks, each recovered: never reaches the warning state.
    for _ in 0..3 {
        store.fail_next_subscribes([StoreError::Timeout, StoreError::Timeout]);
        store.break_subscriptions(StoreError::Disconnected);
        wait_for_view(&mut views, "second retry", |v| {
            v.connection == ConnectionState::Error { attempt: 2 }
        })
        .await;
        wait_for_view(&mut views, "recovered", |v| v.connection.is_connected()).await;
    }

    map.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_while_connected_resubscribes() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(0));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();
    wait_for_view(&mut views, "connected", |v| v.connection.is_connected()).await;

    map.refresh();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(map.connection().is_connected());
    assert_eq!(store.subscriber_count(), 1);

    // The reopened subscription still delivers pushes.
    store.set("buses/Surma", record(22.46, 91.97, 0, "gps_tracker")).await.unwrap();
    wait_for_view(&mut views, "push after refresh", |v| v.active.len() == 1).await;

    map.shutdown().await;
}

// ============================================================================
// Clustering and Camera
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_dense_views_are_clustered() {
    let store = MemoryStore::new();
    // 22 buses packed around the main gate, 3 spread far apart.
    for i in 0..22 {
        let offset = i as f64 * 0.0002;
        store
            .set(&format!("buses/Gate{:02}", i), record(22.46 + offset, 91.97, 5_000, "student_share"))
            .await
            .unwrap();
    }
    for (i, (lat, lng)) in [(22.10, 91.50), (22.80, 92.20), (23.20, 90.90)].iter().enumerate() {
        store
            .set(&format!("buses/Far{}", i), record(*lat, *lng, 5_000, "gps_tracker"))
            .await
            .unwrap();
    }

    let clock = Arc::new(ManualClock::new(10_000));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();
    let view = wait_for_view(&mut views, "all buses", |v| v.active.len() == 25).await;

    assert!(view.is_clustered());
    let total: usize = view.markers.iter().map(MapMarker::count).sum();
    assert_eq!(total, 25);

    let clusters: Vec<_> = view
        .markers
        .iter()
        .filter(|m| matches!(m, MapMarker::Cluster { .. }))
        .collect();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].count(), 22);
    assert_eq!(view.markers.len(), 4);

    // Removing buses below the activation count switches clustering off.
    for i in 0..5 {
        store.remove(&format!("buses/Gate{:02}", i)).await.unwrap();
    }
    let view = wait_for_view(&mut views, "20 buses", |v| v.active.len() == 20).await;
    assert!(!view.is_clustered());
    assert_eq!(view.markers.len(), 20);

    map.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_fit_camera_follows_active_set() {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(10_000));
    let map = start_map(&store, &clock, BusMapConfig::default());
    let mut views = map.subscribe();
    wait_for_view(&mut views, "connected", |v| v.connection.is_connected()).await;
    assert!(map.fit_camera().is_none());

    store.set("buses/A", record(22.0, 91.0, 9_000, "gps_tracker")).await.unwrap();
    wait_for_view(&mut views, "one bus", |v| v.active.len() == 1).await;
    let single = map.fit_camera().unwrap();
    assert_eq!(single.center, (91.0, 22.0));
    assert_eq!(single.zoom, 14.0);

    store.set("buses/B", record(23.0, 92.0, 9_000, "gps_tracker")).await.unwrap();
    wait_for_view(&mut views, "two buses", |v| v.active.len() == 2).await;
    let both = map.fit_camera().unwrap();
    assert_eq!(both.center, (91.5, 22.5));
    assert_eq!(both.zoom, 12.0);

    map.shutdown().await;
}

// ============================================================================
// Multiple Consumers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_consumers_sweep_idempotently() {
    let store = MemoryStore::new();
    for i in 0..10 {
        store
            .set(&format!("buses/Old{}", i), record(22.46, 91.97, 0, "student_share"))
            .await
            .unwrap();
    }
    let shared: Arc<dyn RealtimeStore> = Arc::new(store.clone());
    let clock = Arc::new(ManualClock::new(500_000));
    let config = CleanupConfig::default().with_jitter(Duration::ZERO);

    let a = CleanupSweeper::new(Arc::clone(&shared), clock.clone(), config.clone());
    let b = CleanupSweeper::new(Arc::clone(&shared), clock.clone(), config);

    let (ra, rb) = tokio::join!(a.sweep(), b.sweep());
    for outcome in [ra, rb] {
        let SweepOutcome::Completed(report) = outcome else {
            panic!("sweep did not complete");
        };
        assert_eq!(report.failed, 0);
    }
    assert!(store.peek("buses").is_none());
}
