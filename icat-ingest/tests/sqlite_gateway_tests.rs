//! SQLite gateway integration tests
//!
//! Each test works on a fresh database file inside a TempDir.

mod helpers;

use chrono::Utc;
use helpers::{cat, default_response, ids, images, num, raw, Behavior, ScriptedAdapter};
use icat_ingest::fusion::FusionEngine;
use icat_ingest::orchestrator::{Orchestrator, OrchestratorConfig};
use icat_ingest::persistence::{ItemSource, PersistenceGateway, SqliteGateway};
use icat_ingest::types::{Checkpoint, FailureKind, FailureRecord, ImageRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tempfile::TempDir;

async fn open_gateway() -> (TempDir, SqliteGateway) {
    let temp_dir = TempDir::new().unwrap();
    let gateway = SqliteGateway::open(&temp_dir.path().join("icat.db"))
        .await
        .unwrap();
    (temp_dir, gateway)
}

fn checkpoint(wave_index: u64) -> Checkpoint {
    let mut failed = BTreeMap::new();
    failed.insert(
        "b".to_string(),
        FailureRecord {
            reason: "HTTP 503".to_string(),
            kind: FailureKind::Transient,
            attempts: 2,
        },
    );
    Checkpoint {
        completed: ["a".to_string()].into_iter().collect::<BTreeSet<_>>(),
        failed,
        wave_index,
        total_cost: 0.12,
        total_latency_ms: 900,
        total_elapsed_ms: 1500,
        started_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_open_creates_database_in_nested_directory() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("data").join("nested").join("icat.db");

    let gateway = SqliteGateway::open(&path).await.unwrap();

    assert!(path.exists());
    assert!(gateway.load_checkpoint().await.unwrap().is_none());
    assert!(gateway.pending_items().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_raw_extraction_upsert_keeps_one_row_per_image() {
    let (_dir, gateway) = open_gateway().await;

    let first = raw("sku-1", 0, vec![("weight", num(1.0, 0.5))]);
    let second = raw("sku-1", 1, vec![("color", cat("red", 0.9))]);
    gateway.save_raw("sku-1", &first.image_ref, &first).await.unwrap();
    gateway.save_raw("sku-1", &second.image_ref, &second).await.unwrap();

    let mut updated = first.clone();
    updated.fields.insert("weight".to_string(), num(1.2, 0.8));
    gateway.save_raw("sku-1", &updated.image_ref, &updated).await.unwrap();

    let loaded = gateway.load_raw("sku-1").await.unwrap();
    assert_eq!(loaded, vec![updated, second]);
    assert!(gateway.load_raw("sku-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_consolidated_record_roundtrip_and_overwrite() {
    let (_dir, gateway) = open_gateway().await;
    let engine = FusionEngine::default();

    let record = engine
        .fuse(&[
            raw("sku-1", 0, vec![("color", cat("green", 0.8))]),
            raw("sku-1", 1, vec![("color", cat("dark green", 0.5))]),
        ])
        .unwrap();
    gateway.save_consolidated("sku-1", &record).await.unwrap();
    assert_eq!(gateway.get_consolidated("sku-1").await.unwrap(), Some(record));

    let refreshed = engine
        .fuse(&[raw("sku-1", 0, vec![("color", cat("green", 0.9))])])
        .unwrap();
    gateway.save_consolidated("sku-1", &refreshed).await.unwrap();
    assert_eq!(gateway.get_consolidated("sku-1").await.unwrap(), Some(refreshed));
    assert!(gateway.get_consolidated("unknown").await.unwrap().is_none());
}

#[tokio::test]
async fn test_checkpoint_lifecycle() {
    let (_dir, gateway) = open_gateway().await;

    gateway.save_checkpoint(&checkpoint(1)).await.unwrap();
    let saved = checkpoint(4);
    gateway.save_checkpoint(&saved).await.unwrap();

    assert_eq!(gateway.load_checkpoint().await.unwrap(), Some(saved));

    gateway.clear_checkpoint().await.unwrap();
    assert!(gateway.load_checkpoint().await.unwrap().is_none());

    // Clearing twice is fine
    gateway.clear_checkpoint().await.unwrap();
}

#[tokio::test]
async fn test_register_item_replaces_images() {
    let (_dir, gateway) = open_gateway().await;

    gateway.register_item("sku-1", &images("sku-1", 3)).await.unwrap();
    gateway
        .register_item("sku-1", &[ImageRef::from("sku-1/retake.jpg")])
        .await
        .unwrap();

    assert_eq!(
        gateway.list_images("sku-1").await.unwrap(),
        vec![ImageRef::from("sku-1/retake.jpg")]
    );
    assert!(gateway.list_images("sku-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_pending_items_excludes_consolidated() {
    let (_dir, gateway) = open_gateway().await;
    for id in ["c", "a", "b"] {
        gateway.register_item(id, &images(id, 2)).await.unwrap();
    }

    assert_eq!(gateway.pending_items().await.unwrap(), ids(&["c", "a", "b"]));

    let record = FusionEngine::default()
        .fuse(&[raw("a", 0, vec![("weight", num(1.0, 0.9))])])
        .unwrap();
    gateway.save_consolidated("a", &record).await.unwrap();

    assert_eq!(gateway.pending_items().await.unwrap(), ids(&["c", "b"]));
}

#[tokio::test]
async fn test_run_resumes_after_restart() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("icat.db");
    let config = OrchestratorConfig {
        inter_wave_delay_ms: 0,
        ..OrchestratorConfig::default()
    };
    let items = ids(&["a", "b", "c"]);
    let adapter = Arc::new(ScriptedAdapter::new());
    adapter.script_item("b", 2, Behavior::Transient("HTTP 503".to_string()));

    {
        let gateway = Arc::new(SqliteGateway::open(&db_path).await.unwrap());
        for id in &items {
            gateway.register_item(id, &images(id, 2)).await.unwrap();
        }
        let orch = Orchestrator::new(
            adapter.clone(),
            gateway.clone(),
            gateway.clone(),
            FusionEngine::default(),
            config.clone(),
        );

        let summary = orch.run(&items, 2, true).await.unwrap();
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        gateway.close().await;
    }

    adapter.script_item("b", 2, Behavior::Respond(default_response()));

    let gateway = Arc::new(SqliteGateway::open(&db_path).await.unwrap());
    let checkpoint = gateway.load_checkpoint().await.unwrap().unwrap();
    assert_eq!(
        checkpoint.completed,
        ["a".to_string(), "c".to_string()].into_iter().collect::<BTreeSet<_>>()
    );

    let orch = Orchestrator::new(
        adapter.clone(),
        gateway.clone(),
        gateway.clone(),
        FusionEngine::default(),
        config,
    );
    let summary = orch.run_pending(2).await.unwrap();

    assert_eq!(summary.processed, 1);
    assert_eq!(adapter.call_count("a"), 2);
    assert_eq!(adapter.call_count("b"), 4);
    assert!(gateway.pending_items().await.unwrap().is_empty());
    assert!(gateway.load_checkpoint().await.unwrap().is_none());

    let mut raw_rows = 0;
    for id in &items {
        raw_rows += gateway.load_raw(id).await.unwrap().len();
    }
    assert_eq!(raw_rows, 6);
}
