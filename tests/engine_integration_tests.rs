//! Integration Tests for the Settings Engine
//!
//! Drives whole engines through the public API with in-memory backends:
//! batching, retries, offline durability, cross-context convergence,
//! initialization precedence and import/export.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use settings_sync::models::{SaveOptions, Snapshot};
use settings_sync::persistence::{
    MemoryStorage, PersistenceLayer, StorageBackend, BACKUP_KEY, SNAPSHOT_KEY,
};
use settings_sync::queue::QueueBatch;
use settings_sync::remote::{FailureMode, MemoryRemote};
use settings_sync::sync::ChannelTransport;
use settings_sync::{
    Config, EngineEvent, ExportFormat, SaveOutcome, SettingsEngine, SettingsMap, TransportKind,
};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

// == Helper Functions ==

fn fast_config() -> Config {
    Config {
        debounce_ms: 30,
        retry_base_delay_ms: 5,
        max_retries: 2,
        ..Config::default()
    }
}

async fn engine_with(remote: &MemoryRemote, storage: &MemoryStorage) -> SettingsEngine {
    let engine = SettingsEngine::builder(fast_config())
        .remote(Arc::new(remote.clone()))
        .storage(Arc::new(storage.clone()))
        .build();
    engine.initialize().await.unwrap();
    engine
}

/// Reads what the engines sharing `storage` have persisted.
fn stored(storage: &MemoryStorage) -> PersistenceLayer {
    PersistenceLayer::new(Arc::new(storage.clone()), "reader", 1, 86_400_000)
}

fn map(value: Value) -> SettingsMap {
    value.as_object().unwrap().clone()
}

fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// == Batching ==

#[tokio::test]
async fn test_writes_in_one_window_become_one_remote_write() {
    let remote = MemoryRemote::new();
    let engine = engine_with(&remote, &MemoryStorage::new()).await;

    engine
        .set("menu_width", json!(180), SaveOptions::default())
        .unwrap();
    engine
        .set("menu_width", json!(200), SaveOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(remote.save_count(), 1);
    assert_eq!(remote.saves()[0].settings["menu_width"], 200);
    assert_eq!(engine.get_status().pending_changes, 0);
    engine.destroy().await;
}

#[tokio::test]
async fn test_save_then_load_returns_sanitized_values() {
    let remote = MemoryRemote::new();
    let engine = engine_with(&remote, &MemoryStorage::new()).await;

    let settings = map(json!({
        "menu_width": "200",
        "primary_color": "#ABCDEF",
        "custom_label": "  hello  ",
    }));
    let outcome = engine.save_settings(&settings).await.unwrap();
    assert!(outcome.is_saved());

    let loaded = engine.load_settings(true).await.unwrap();
    assert_eq!(loaded["menu_width"], 200);
    assert_eq!(loaded["primary_color"], "#ABCDEF");
    assert_eq!(loaded["custom_label"], "hello");
    assert_eq!(remote.settings()["custom_label"], "hello");
    engine.destroy().await;
}

// == Sanitization ==

#[tokio::test]
async fn test_invalid_values_fall_back_to_defaults() {
    let engine = engine_with(&MemoryRemote::new(), &MemoryStorage::new()).await;

    let stored = assert_ok!(engine.set("primary_color", json!("red"), SaveOptions::default()));
    assert_eq!(stored, "#0073aa");
    assert_eq!(engine.get("primary_color"), Some(json!("#0073aa")));

    let stored = assert_ok!(engine.set("menu_width", json!("200"), SaveOptions::default()));
    assert_eq!(stored, 200);

    assert_err!(engine.set("   ", json!(1), SaveOptions::default()));
    engine.destroy().await;
}

// == Retries and Offline Queue ==

#[tokio::test]
async fn test_retry_cap_demotes_without_further_attempts() {
    let remote = MemoryRemote::new();
    let engine = engine_with(&remote, &MemoryStorage::new()).await;
    let mut events = engine.subscribe();
    remote.fail_next(10, FailureMode::Network);

    engine
        .set("menu_width", json!(220), SaveOptions::default())
        .unwrap();
    let outcome = engine.force_save().await;

    assert!(matches!(outcome, SaveOutcome::Demoted { attempts: 3, .. }));
    assert_eq!(engine.get_metrics().save_attempts, 3);
    assert_eq!(engine.get_status().retry_queue_size, 1);
    assert!(drain(&mut events)
        .iter()
        .any(|event| matches!(event, EngineEvent::RetryFailed { attempts: 3, .. })));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(engine.get_metrics().save_attempts, 3);
    assert_eq!(remote.save_count(), 0);
    // Local state is kept regardless.
    assert_eq!(engine.get("menu_width"), Some(json!(220)));
    engine.destroy().await;
}

#[tokio::test]
async fn test_offline_writes_replay_on_reconnect() {
    let remote = MemoryRemote::new();
    let storage = MemoryStorage::new();
    let engine = engine_with(&remote, &storage).await;
    engine.set_online(false);

    engine
        .set("menu_width", json!(200), SaveOptions::default())
        .unwrap();

    // Counted and durable before the debounce window closes.
    assert_eq!(engine.get_status().retry_queue_size, 1);
    assert_eq!(stored(&storage).read_snapshot().unwrap()["menu_width"], 200);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.save_count(), 0);
    assert_eq!(engine.get_status().retry_queue_size, 1);

    engine.set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(engine.get_status().retry_queue_size, 0);
    assert_eq!(remote.settings()["menu_width"], 200);
    engine.destroy().await;
}

#[tokio::test]
async fn test_force_save_while_offline_demotes() {
    let remote = MemoryRemote::new();
    let engine = engine_with(&remote, &MemoryStorage::new()).await;
    engine.set_online(false);

    engine
        .set("menu_width", json!(240), SaveOptions::default())
        .unwrap();
    let outcome = engine.force_save().await;

    assert!(matches!(outcome, SaveOutcome::Demoted { .. }));
    assert_eq!(remote.save_count(), 0);
    assert_eq!(engine.get_status().retry_queue_size, 1);
    engine.destroy().await;
}

#[tokio::test]
async fn test_contexts_sharing_storage_keep_both_offline_batches() {
    let remote = MemoryRemote::new();
    let storage = MemoryStorage::new();
    let first = engine_with(&remote, &storage).await;
    let second = engine_with(&remote, &storage).await;
    first.set_online(false);
    second.set_online(false);

    first
        .set("menu_width", json!(240), SaveOptions::default())
        .unwrap();
    second
        .set("font_size", json!(18), SaveOptions::default())
        .unwrap();
    first.force_save().await;
    second.force_save().await;

    assert_eq!(stored(&storage).read_offline_queue().len(), 2);

    // Either context can deliver the whole backlog.
    first.set_online(true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(remote.settings()["menu_width"], 240);
    assert_eq!(remote.settings()["font_size"], 18);
    assert!(stored(&storage).read_offline_queue().is_empty());
    first.destroy().await;
    second.destroy().await;
}

#[tokio::test]
async fn test_offline_queue_survives_restart() {
    let remote = MemoryRemote::new();
    let storage = MemoryStorage::new();

    let engine = engine_with(&remote, &storage).await;
    engine.set_online(false);
    engine
        .set("font_size", json!(18), SaveOptions::default())
        .unwrap();
    engine.destroy().await;
    assert_eq!(remote.save_count(), 0);

    let restarted = engine_with(&remote, &storage).await;
    assert_eq!(restarted.get("font_size"), Some(json!(18)));
    assert_eq!(restarted.get_status().retry_queue_size, 1);

    let report = restarted.handle_reconnect().await;
    assert_eq!(report.replayed, 1);
    assert_eq!(report.remaining, 0);
    assert_eq!(remote.settings()["font_size"], 18);
    restarted.destroy().await;
}

// == Cache Expiry ==

fn short_ttl_config() -> Config {
    Config {
        cache_ttl: 1,
        sweep_interval: 3600,
        ..fast_config()
    }
}

async fn short_ttl_engine(remote: &MemoryRemote, storage: &MemoryStorage) -> SettingsEngine {
    let engine = SettingsEngine::builder(short_ttl_config())
        .remote(Arc::new(remote.clone()))
        .storage(Arc::new(storage.clone()))
        .build();
    engine.initialize().await.unwrap();
    engine
}

#[tokio::test]
async fn test_expired_value_survives_the_next_write() {
    let storage = MemoryStorage::new();
    let engine = short_ttl_engine(&MemoryRemote::new(), &storage).await;
    engine.set_online(false);
    engine
        .set("menu_width", json!(240), SaveOptions::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(engine.get("menu_width"), Some(json!(240)));

    engine
        .set("primary_color", json!("#ff0000"), SaveOptions::default())
        .unwrap();

    let persisted = stored(&storage).read_snapshot().unwrap();
    assert_eq!(persisted["menu_width"], 240);
    assert_eq!(persisted["primary_color"], "#ff0000");
    engine.destroy().await;
}

#[tokio::test]
async fn test_older_snapshot_does_not_roll_back_expired_write() {
    let storage = MemoryStorage::new();
    let engine = short_ttl_engine(&MemoryRemote::new(), &storage).await;
    engine.set_online(false);
    engine
        .set("menu_width", json!(240), SaveOptions::default())
        .unwrap();

    // A sibling's snapshot taken before the write lands afterwards.
    let older = Snapshot {
        settings: map(json!({"menu_width": 180})),
        timestamp: settings_sync::cache::current_timestamp_ms() - 10_000,
        schema_version: 1,
        origin_id: "sibling".to_string(),
        backup: false,
    };
    let raw = serde_json::to_string(&older).unwrap();
    storage.set_item(SNAPSHOT_KEY, &raw).unwrap();
    storage.set_item(BACKUP_KEY, &raw).unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(engine.get("menu_width"), Some(json!(240)));
    engine.destroy().await;
}

#[tokio::test]
async fn test_newer_snapshot_fills_in_missed_change() {
    let storage = MemoryStorage::new();
    let engine = short_ttl_engine(&MemoryRemote::new(), &storage).await;
    engine.set_online(false);
    engine
        .set("menu_width", json!(240), SaveOptions::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let sibling = PersistenceLayer::new(Arc::new(storage.clone()), "sibling", 1, 86_400_000);
    sibling
        .write_snapshot(&map(json!({"menu_width": 240, "font_size": 18})))
        .unwrap();
    let mut events = engine.subscribe();

    tokio::time::sleep(Duration::from_millis(1200)).await;

    assert_eq!(engine.get("font_size"), Some(json!(18)));
    assert_eq!(engine.get("menu_width"), Some(json!(240)));
    assert!(drain(&mut events).iter().any(|event| matches!(
        event,
        EngineEvent::UiUpdated { changes, .. } if changes.contains_key("font_size")
    )));
    engine.destroy().await;
}

// == Initialization ==

#[tokio::test]
async fn test_initialize_precedence() {
    let remote = MemoryRemote::with_settings(map(json!({
        "menu_width": 170,
        "font_size": 15,
        "border_radius": 2,
    })));
    let storage = MemoryStorage::new();
    let backend: Arc<dyn StorageBackend> = Arc::new(storage.clone());
    let seeded = PersistenceLayer::new(backend, "previous-run", 1, 86_400_000);
    seeded
        .write_snapshot(&map(json!({"menu_width": 180, "font_size": 16})))
        .unwrap();
    seeded
        .write_offline_queue(&[QueueBatch::new(
            map(json!({"menu_width": 190})),
            SaveOptions::default(),
        )])
        .unwrap();

    let engine = engine_with(&remote, &storage).await;

    assert_eq!(engine.get("menu_width"), Some(json!(190)));
    assert_eq!(engine.get("font_size"), Some(json!(16)));
    assert_eq!(engine.get("border_radius"), Some(json!(2)));
    assert_eq!(engine.get("compact_mode"), Some(json!(false)));
    engine.destroy().await;
}

#[tokio::test]
async fn test_unreachable_remote_does_not_block_initialize() {
    let remote = MemoryRemote::new();
    remote.set_reachable(false);
    let engine = engine_with(&remote, &MemoryStorage::new()).await;

    assert_eq!(engine.get("menu_width"), Some(json!(160)));
    assert!(engine.get_status().last_error.is_some());
    engine.destroy().await;
}

// == Cross-Context Sync ==

#[tokio::test]
async fn test_contexts_converge_without_echo() {
    let remote = MemoryRemote::new();
    let storage = MemoryStorage::new();
    let transport = ChannelTransport::new();
    let build = |origin: &str| {
        SettingsEngine::builder(fast_config())
            .remote(Arc::new(remote.clone()))
            .storage(Arc::new(storage.clone()))
            .transport(Arc::new(transport.clone()))
            .origin_id(origin)
            .build()
    };
    let a = build("ctx-a");
    let b = build("ctx-b");
    a.initialize().await.unwrap();
    b.initialize().await.unwrap();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();
    tokio::time::sleep(Duration::from_millis(5)).await;

    a.set("theme_mode", json!("dark"), SaveOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(b.get("theme_mode"), Some(json!("dark")));
    assert!(drain(&mut b_events).iter().any(|event| matches!(
        event,
        EngineEvent::CrossTabSync { origin_id, .. } if origin_id == "ctx-a"
    )));
    assert!(!drain(&mut a_events)
        .iter()
        .any(|event| matches!(event, EngineEvent::CrossTabSync { .. })));
    // Only the writer talks to the remote.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(remote.save_count(), 1);
    assert_eq!(remote.saves()[0].origin_id, "ctx-a");

    a.destroy().await;
    b.destroy().await;
}

#[tokio::test]
async fn test_storage_transport_fallback() {
    let remote = MemoryRemote::new();
    let storage = MemoryStorage::new();
    let config = Config {
        transport: TransportKind::Storage,
        broadcast_ttl_ms: 50,
        ..fast_config()
    };
    let build = || {
        SettingsEngine::builder(config.clone())
            .remote(Arc::new(remote.clone()))
            .storage(Arc::new(storage.clone()))
            .build()
    };
    let a = build();
    let b = build();
    a.initialize().await.unwrap();
    b.initialize().await.unwrap();
    assert_eq!(a.get_status().transport, "storage");
    tokio::time::sleep(Duration::from_millis(5)).await;

    a.set("compact_mode", json!(true), SaveOptions::default())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(b.get("compact_mode"), Some(json!(true)));
    a.destroy().await;
    b.destroy().await;
}

// == Reset, Clear, Import and Export ==

#[tokio::test]
async fn test_clear_and_reset() {
    let engine = engine_with(&MemoryRemote::new(), &MemoryStorage::new()).await;
    engine
        .set_multiple(
            &map(json!({"menu_width": 300, "font_size": 20, "custom_flag": "x"})),
            SaveOptions::default(),
        )
        .unwrap();

    let reset = engine
        .reset_to_defaults(Some(&["menu_width".to_string(), "unknown".to_string()]))
        .unwrap();
    assert_eq!(reset.len(), 1);
    assert_eq!(engine.get("menu_width"), Some(json!(160)));
    assert_eq!(engine.get("font_size"), Some(json!(20)));

    let cleared = engine.clear().unwrap();
    assert_eq!(cleared["font_size"], 14);
    assert!(!cleared.contains_key("custom_flag"));
    engine.destroy().await;
}

#[tokio::test]
async fn test_export_import_between_engines() {
    let source = engine_with(&MemoryRemote::new(), &MemoryStorage::new()).await;
    source
        .set("primary_color", json!("#112233"), SaveOptions::default())
        .unwrap();
    source
        .set("menu_position", json!("right"), SaveOptions::default())
        .unwrap();

    let exported = source.export(ExportFormat::Json).unwrap();
    let envelope: Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(envelope["version"], 1);
    assert!(envelope["exportedAt"].is_string());

    let remote = MemoryRemote::new();
    let target = engine_with(&remote, &MemoryStorage::new()).await;
    let imported = target.import(&exported).unwrap();
    assert_eq!(imported["primary_color"], "#112233");
    assert_eq!(target.get("menu_position"), Some(json!("right")));

    // Imports skip the debounce window.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(remote.save_count(), 1);

    let css = target.export(ExportFormat::Css).unwrap();
    assert!(css.contains("--primary-color: #112233;"));
    assert!(css.contains("--menu-position: right;"));

    source.destroy().await;
    target.destroy().await;
}

// == Refresh ==

#[tokio::test]
async fn test_refresh_keeps_unsynced_local_writes() {
    let remote = MemoryRemote::new();
    let engine = engine_with(&remote, &MemoryStorage::new()).await;
    engine.set_online(false);
    engine
        .set("menu_width", json!(250), SaveOptions::default())
        .unwrap();
    engine.force_save().await;

    remote.put("menu_width", json!(170));
    remote.put("font_size", json!(17));
    let changes = engine.refresh().await.unwrap();

    assert_eq!(changes.len(), 1);
    assert_eq!(engine.get("menu_width"), Some(json!(250)));
    assert_eq!(engine.get("font_size"), Some(json!(17)));
    engine.destroy().await;
}
