//! Write-through and hydration across graph instances.

use std::sync::Arc;

use recgraph_storage::{DurableStore, LmdbDurableStore};
use recgraph_test_utils::assertions::{
    assert_clean, assert_field_state, assert_field_text, assert_links_to,
};
use recgraph_test_utils::fixtures::{in_memory_graph, record_ingester, record_path, test_config};
use recgraph_test_utils::payloads::{field, pending_field, record, value};
use recgraph_test_utils::{
    init_test_tracing, key_for_field_value, key_for_record, FieldState, InMemoryDurableStore,
    RecordGraph, RecordingInstrumentation,
};
use serde_json::{json, Value};
use tempfile::TempDir;

fn contact_with_account() -> Value {
    record(
        "003",
        "Contact",
        json!({
            "Name": value("Ada"),
            "Phone": pending_field(),
            "Account": field(record("001", "Account", json!({ "Name": value("Acme") })), Value::Null)
        }),
    )
}

#[tokio::test]
async fn test_flush_and_hydrate_preserve_the_view() {
    init_test_tracing();
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut writer = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    assert_clean(&writer.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000));
    let before = writer.read_record("003").expect("contact");
    assert!(writer.flush().await.unwrap() > 0);
    assert_eq!(writer.dirty_keys().count(), 0);

    // One blob per record.
    let raw = durable.snapshot().await;
    assert!(raw.contains_key(&key_for_record("003")));
    assert!(raw.contains_key(&key_for_record("001")));
    assert!(!raw.contains_key(&key_for_field_value(&key_for_record("003"), "Name")));

    let mut reader = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    let loaded = reader.hydrate(&[key_for_record("003")]).await.unwrap();
    assert!(loaded > 0);
    assert_eq!(reader.read_record("003"), Some(before));
    assert_links_to(reader.store(), "003", "Account", "001");
    assert_field_state(reader.store(), "003", "Phone", FieldState::Pending);
    assert_eq!(
        reader.store().metadata(&key_for_record("003")).map(|m| m.expires_at),
        Some(1_000 + test_config().record_ttl_ms())
    );
}

#[tokio::test]
async fn test_field_keys_hydrate_each_record_once() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut writer = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    writer.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000);
    writer.flush().await.unwrap();

    let contact_key = key_for_record("003");
    let keys = vec![
        contact_key.clone(),
        key_for_field_value(&contact_key, "Name"),
        key_for_field_value(&contact_key, "Account"),
    ];
    let before = durable.read_log().await.len();
    let mut reader = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    reader.hydrate(&keys).await.unwrap();

    // The contact blob, then the own blob of the account inlined in it.
    let log = durable.read_log().await;
    assert_eq!(&log[before..], &[contact_key, key_for_record("001")]);
    assert!(reader.read_record("001").is_some());
}

#[tokio::test]
async fn test_hydrate_prefers_latest_write_of_nested_record() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut writer = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    writer.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000);
    writer.flush().await.unwrap();

    // Only the account changes; the contact blob still inlines "Acme".
    let renamed = record("001", "Account", json!({ "Name": value("Acme Corp") }));
    assert_clean(&writer.ingest(&record_ingester(), &renamed, &record_path(), 5_000));
    writer.flush().await.unwrap();

    let ttl = test_config().record_ttl_ms();
    for keys in [
        vec![key_for_record("003")],
        vec![key_for_record("003"), key_for_record("001")],
    ] {
        let mut reader = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
        reader.hydrate(&keys).await.unwrap();
        assert_field_text(reader.store(), "001", "Name", "Acme Corp");
        assert_field_text(reader.store(), "003", "Name", "Ada");
        assert_eq!(
            reader.store().metadata(&key_for_record("001")).map(|m| m.expires_at),
            Some(5_000 + ttl)
        );
        assert_eq!(
            reader.store().metadata(&key_for_record("003")).map(|m| m.expires_at),
            Some(1_000 + ttl)
        );
    }
}

#[tokio::test]
async fn test_tracked_fields_from_durable_store() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut writer = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    writer.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000);
    writer.flush().await.unwrap();

    let reader = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    let mut fields = reader.get_tracked_fields_for_record("003").await.unwrap();
    fields.sort();
    assert_eq!(fields, vec!["Contact.Name", "Contact.Phone"]);
}

#[tokio::test]
async fn test_evicted_record_is_gone_after_reload() {
    let durable = Arc::new(InMemoryDurableStore::new());
    let mut graph = in_memory_graph(Arc::clone(&durable), RecordingInstrumentation::new());
    graph.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000);
    graph.flush().await.unwrap();

    graph.evict(&key_for_record("001")).await.unwrap();
    assert!(graph.read_record("001").is_none());
    assert!(durable
        .get_entries(&[key_for_record("001")])
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_lmdb_graph_survives_reopen() {
    init_test_tracing();
    let dir = TempDir::new().expect("TempDir creation should succeed");
    {
        let store = LmdbDurableStore::open(dir.path(), 10).expect("open lmdb");
        let mut graph = RecordGraph::new(store, test_config()).expect("valid config");
        graph.ingest(&record_ingester(), &contact_with_account(), &record_path(), 1_000);
        graph.flush().await.unwrap();
    }

    let store = LmdbDurableStore::open(dir.path(), 10).expect("reopen lmdb");
    let mut graph = RecordGraph::new(store, test_config()).expect("valid config");
    graph.hydrate(&[key_for_record("003")]).await.unwrap();
    let view = graph.read_record("003").expect("contact");
    assert_eq!(view.api_name, "Contact");
    assert_links_to(graph.store(), "003", "Account", "001");
    assert!(graph.durable().inner().written_at(&key_for_record("003")).unwrap().is_some());
}
