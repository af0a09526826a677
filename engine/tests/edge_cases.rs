//! Edge case tests for grove-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use futures::TryStreamExt;
use grove_engine::{Document, ErrorKind, Filter, MemoryKv, Record, RootList, Store};
use serde_json::{json, Value};
use std::sync::Arc;

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

fn filter(value: Value) -> Filter {
    value.as_object().cloned().unwrap()
}

fn id_of(record: &Record) -> String {
    record["id"].as_str().unwrap().to_string()
}

fn create_test_store() -> Store {
    let mut store = Store::in_memory();
    store
        .define_type(
            "folder",
            [("title", "string"), ("size", "number?"), ("open", "boolean?")],
        )
        .unwrap();
    store
        .define_type("item", [("name", "string"), ("folder", "id:folder")])
        .unwrap();
    store.create_index("folder", "size").unwrap();
    store.create_index("folder", "open").unwrap();
    store.create_index("item", "name").unwrap();
    store
}

async fn folder(store: &Store) -> String {
    let folder = store
        .create("folder", record(json!({"title": "f"})))
        .await
        .unwrap();
    id_of(&folder)
}

// ============================================================================
// String Edge Cases
// ============================================================================

#[tokio::test]
async fn empty_string_fields() {
    let store = create_test_store();
    let folder_id = folder(&store).await;

    let item = store
        .create("item", record(json!({"name": "", "folder": folder_id})))
        .await
        .unwrap();

    let found = store.find("item", &filter(json!({"name": ""}))).await.unwrap();
    assert_eq!(found, vec![item]);
}

#[tokio::test]
async fn unicode_strings_are_indexed() {
    let store = create_test_store();
    let folder_id = folder(&store).await;

    let names = [
        "日本語テスト",
        "Привет мир",
        "مرحبا بالعالم",
        "🎉🚀💯",
        "Hello\nWorld\tTab",
    ];
    for name in names {
        store
            .create("item", record(json!({"name": name, "folder": folder_id})))
            .await
            .unwrap();
    }

    for name in names {
        let found = store.find("item", &filter(json!({"name": name}))).await.unwrap();
        assert_eq!(found.len(), 1, "{name}");
        assert_eq!(found[0]["name"], name);
    }
}

#[tokio::test]
async fn separator_characters_do_not_collide() {
    let store = create_test_store();
    let folder_id = folder(&store).await;

    for name in ["a/b", "a", "a%2Fb", "a b"] {
        store
            .create("item", record(json!({"name": name, "folder": folder_id})))
            .await
            .unwrap();
    }

    for name in ["a/b", "a", "a%2Fb", "a b"] {
        let found = store.find("item", &filter(json!({"name": name}))).await.unwrap();
        assert_eq!(found.len(), 1, "{name}");
    }
}

#[tokio::test]
async fn very_long_strings() {
    let store = create_test_store();
    let folder_id = folder(&store).await;
    let long = "x".repeat(10_000);

    let item = store
        .create("item", record(json!({"name": long, "folder": folder_id})))
        .await
        .unwrap();

    let got = store.get("item", &id_of(&item)).await.unwrap().unwrap();
    assert_eq!(got["name"].as_str().unwrap().len(), 10_000);
}

// ============================================================================
// Value Edge Cases
// ============================================================================

#[tokio::test]
async fn integral_floats_match_integers() {
    let store = create_test_store();
    let folder = store
        .create("folder", record(json!({"title": "f", "size": 5.0})))
        .await
        .unwrap();

    let found = store
        .find_ids("folder", &filter(json!({"size": 5})))
        .await
        .unwrap();
    assert_eq!(found, [id_of(&folder)]);

    let found = store
        .find_ids("folder", &filter(json!({"size": 5.5})))
        .await
        .unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
async fn wrong_kind_filter_values_match_nothing() {
    let store = create_test_store();
    let folder = store
        .create("folder", record(json!({"title": "f", "size": 5, "open": true})))
        .await
        .unwrap();

    for (wrong, right) in [
        (json!({"size": "5"}), json!({"size": 5})),
        (json!({"open": "true"}), json!({"open": true})),
    ] {
        let wrong = filter(wrong);
        assert!(store.find("folder", &wrong).await.unwrap().is_empty());
        assert!(store.find_ids("folder", &wrong).await.unwrap().is_empty());

        let right = filter(right);
        assert_eq!(store.find("folder", &right).await.unwrap(), vec![folder.clone()]);
        assert_eq!(store.find_ids("folder", &right).await.unwrap(), [id_of(&folder)]);
    }
}

#[tokio::test]
async fn boolean_index() {
    let store = create_test_store();
    let open = store
        .create("folder", record(json!({"title": "a", "open": true})))
        .await
        .unwrap();
    store
        .create("folder", record(json!({"title": "b", "open": false})))
        .await
        .unwrap();

    let found = store.find("folder", &filter(json!({"open": true}))).await.unwrap();
    assert_eq!(found, vec![open]);
}

#[tokio::test]
async fn null_values_are_not_indexed() {
    let store = create_test_store();
    store
        .create("folder", record(json!({"title": "a", "size": null})))
        .await
        .unwrap();

    // A null filter value narrows nothing, so the root query has no index
    let err = store
        .find("folder", &filter(json!({"size": null})))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
}

#[tokio::test]
async fn optional_field_can_be_cleared() {
    let store = create_test_store();
    let folder = store
        .create("folder", record(json!({"title": "a", "size": 3})))
        .await
        .unwrap();
    let folder_id = id_of(&folder);

    store
        .set_field("folder", &folder_id, "size", Value::Null)
        .await
        .unwrap();

    assert!(store
        .find_ids("folder", &filter(json!({"size": 3})))
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        store.get("folder", &folder_id).await.unwrap().unwrap()["size"],
        Value::Null
    );
}

#[tokio::test]
async fn invalid_records_are_rejected() {
    let store = create_test_store();
    let folder_id = folder(&store).await;

    for bad in [
        json!({"folder": folder_id}),
        json!({"name": 7, "folder": folder_id}),
        json!({"name": "x", "folder": folder_id, "extra": 1}),
        json!({"name": "x", "folder": 12}),
    ] {
        let err = store.create("item", record(bad)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRecord);
    }
    assert!(store
        .entries("item")
        .try_collect::<Vec<_>>()
        .await
        .unwrap()
        .is_empty());
}

// ============================================================================
// Scale
// ============================================================================

#[tokio::test]
async fn many_children_share_one_root_document() {
    let values: Arc<MemoryKv<Document>> = Arc::new(MemoryKv::new());
    let indexes: Arc<MemoryKv<RootList>> = Arc::new(MemoryKv::new());
    let mut store = Store::new(values.clone(), indexes.clone());
    store
        .define_type("folder", [("title", "string")])
        .unwrap();
    store
        .define_type("item", [("name", "string"), ("folder", "id:folder")])
        .unwrap();
    store.create_index("item", "name").unwrap();

    let folder = store
        .create("folder", record(json!({"title": "f"})))
        .await
        .unwrap();
    for i in 0..200 {
        store
            .create(
                "item",
                record(json!({"name": format!("n{}", i % 10), "folder": id_of(&folder)})),
            )
            .await
            .unwrap();
    }

    assert_eq!(values.len(), 1);
    // 200 identifier keys plus 10 name keys
    assert_eq!(indexes.len(), 210);

    let found = store.find("item", &filter(json!({"name": "n3"}))).await.unwrap();
    assert_eq!(found.len(), 20);

    store.delete("folder", &id_of(&folder)).await.unwrap();
    assert!(values.is_empty());
    assert!(indexes.is_empty());
}

#[tokio::test]
async fn concurrent_reads() {
    let store = create_test_store();
    let folder_id = folder(&store).await;
    let item = store
        .create("item", record(json!({"name": "x", "folder": folder_id})))
        .await
        .unwrap();

    let item_id = id_of(&item);
    let reads = (0..32).map(|_| store.get("item", &item_id));
    for got in futures::future::try_join_all(reads).await.unwrap() {
        assert_eq!(got.as_ref(), Some(&item));
    }
}
