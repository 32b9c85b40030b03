//! Data layer scenarios against the in-process engine
//! Covers find/count/sort/pagination and the write contracts

use std::sync::Arc;

use arango_datalayer::storage::CountSource;
use arango_datalayer::{
    CollectionPerResource, DataLayer, DbError, Document, Engine, Lookup, MemoryEngine,
    ParsedRequest, Value,
};
use serde_json::json;

fn doc(value: serde_json::Value) -> Document {
    Document::from_json(value).expect("test document must be an object")
}

/// Helper to create a data layer over a seeded musicians collection
async fn musicians() -> DataLayer<MemoryEngine> {
    let engine = MemoryEngine::new();
    engine.create_collection("musicians");
    engine
        .insert_many(
            "musicians",
            vec![
                doc(json!({"_key": "miles", "name": "Miles Davis", "born": 1926, "instrument": "trumpet"})),
                doc(json!({"_key": "bill", "name": "Bill Evans", "born": 1929, "instrument": "piano"})),
                doc(json!({"_key": "trane", "name": "John Coltrane", "born": 1926, "instrument": "saxophone"})),
            ],
        )
        .await
        .expect("seed insert failed");
    DataLayer::new(engine, CollectionPerResource)
}

fn names(docs: &[Document]) -> Vec<&str> {
    docs.iter()
        .filter_map(|d| d.get("name").and_then(Value::as_str))
        .collect()
}

#[tokio::test]
async fn test_find_single_match_counts_one() {
    let layer = musicians().await;
    let req = ParsedRequest::new().filter(r#"name=="Bill Evans""#);

    let result = layer.find("musicians", &req, None).await.unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.count(), 1);
    assert_eq!(names(result.documents()), ["Bill Evans"]);
}

#[tokio::test]
async fn test_sort_primary_key_wins() {
    let engine = MemoryEngine::new();
    engine.create_collection("people");
    engine
        .insert_many(
            "people",
            vec![
                doc(json!({"name": "B", "born": "1960"})),
                doc(json!({"name": "A", "born": "1950"})),
            ],
        )
        .await
        .unwrap();
    let layer = DataLayer::new(engine, CollectionPerResource);

    let req = ParsedRequest::new().sort("name,-born");
    let result = layer.find("people", &req, None).await.unwrap();

    assert_eq!(names(result.documents()), ["A", "B"]);
}

#[tokio::test]
async fn test_count_reports_total_beyond_page() {
    let layer = musicians().await;
    let req = ParsedRequest::new().sort("name").page(2, 1);

    let result = layer.find("musicians", &req, None).await.unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result.count(), 3);
    assert_eq!(result.count_source(), CountSource::FullCount);
    assert_eq!(names(result.documents()), ["John Coltrane"]);
}

#[tokio::test]
async fn test_pages_partition_the_result() {
    let layer = musicians().await;
    let mut seen = Vec::new();
    for page in 1..=4 {
        let req = ParsedRequest::new().sort("-name").page(page, 2);
        let result = layer.find("musicians", &req, None).await.unwrap();
        assert_eq!(result.count(), 3);
        seen.extend(result.into_documents());
    }
    assert_eq!(names(&seen), ["Miles Davis", "John Coltrane", "Bill Evans"]);
}

#[tokio::test]
async fn test_empty_where_returns_everything() {
    let layer = musicians().await;
    let req = ParsedRequest::new().filter("");
    let result = layer.find("musicians", &req, None).await.unwrap();
    assert_eq!(result.len(), 3);
}

#[tokio::test]
async fn test_combined_clauses() {
    let layer = musicians().await;
    let req = ParsedRequest::new()
        .filter(r#"born==1926, instrument=="trumpet" OR instrument=="saxophone" NOT name LIKE "%Davis""#)
        .sort("name");

    let result = layer.find("musicians", &req, None).await.unwrap();

    // born==1926 AND (trumpet OR (saxophone AND NOT Davis))
    assert_eq!(names(result.documents()), ["John Coltrane", "Miles Davis"]);
}

#[tokio::test]
async fn test_malformed_filter_is_client_error() {
    let layer = musicians().await;
    for filter in ["name===1", "born IN 1926", "born==1.2.3", "name==\"open", "name ~= \"x\""] {
        let req = ParsedRequest::new().filter(filter);
        let err = layer.find("musicians", &req, None).await.unwrap_err();
        assert!(
            matches!(err, DbError::MalformedFilter(_)),
            "{} gave {:?}",
            filter,
            err
        );
        assert!(err.is_client_error());
    }
}

#[tokio::test]
async fn test_update_missing_id_is_not_found() {
    let layer = musicians().await;
    let err = layer
        .update("musicians", "nobody", doc(json!({"name": "X"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DocumentNotFound(_)));

    let err = layer
        .replace("musicians", "nobody", doc(json!({"name": "X"})), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DocumentNotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_with_same_base_revision() {
    let layer = Arc::new(musicians().await);
    let original = layer
        .find_one_raw("musicians", &Lookup::key("bill"))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let layer = Arc::clone(&layer);
        let original = original.clone();
        handles.push(tokio::spawn(async move {
            layer
                .update(
                    "musicians",
                    "bill",
                    doc(json!({"writer": i})),
                    Some(&original),
                )
                .await
        }));
    }

    let mut committed = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.expect("task panicked") {
            Ok(_) => committed += 1,
            Err(DbError::ConflictError(_)) => conflicts += 1,
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(committed, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_second_writer_with_divergent_revision_conflicts() {
    let layer = musicians().await;
    let base = layer
        .find_one_raw("musicians", &Lookup::key("miles"))
        .await
        .unwrap();

    let (first, second) = tokio::join!(
        layer.update("musicians", "miles", doc(json!({"a": 1})), Some(&base)),
        layer.update("musicians", "miles", doc(json!({"b": 2})), Some(&base)),
    );

    assert!(first.is_ok() != second.is_ok());
    let err = first.err().or(second.err()).unwrap();
    assert!(matches!(err, DbError::ConflictError(_)));
}

#[tokio::test]
async fn test_unconditional_update_ignores_revisions() {
    let layer = musicians().await;
    let first = layer
        .update("musicians", "trane", doc(json!({"a": 1})), None)
        .await
        .unwrap();
    let second = layer
        .update("musicians", "trane", doc(json!({"a": 2})), None)
        .await
        .unwrap();
    assert_eq!(second.old_rev, first.rev);
    assert_ne!(second.rev, second.old_rev);
}

#[tokio::test]
async fn test_insert_reports_partial_failures() {
    let layer = musicians().await;
    let results = layer
        .insert(
            "musicians",
            vec![
                doc(json!({"name": "Wayne Shorter"})),
                doc(json!({"_key": "miles", "name": "Duplicate"})),
                doc(json!({"name": "Herbie Hancock"})),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].is_created());
    assert!(!results[1].is_created());
    assert!(results[2].is_created());

    let engine = layer.engine();
    assert_eq!(engine.count("musicians").await.unwrap(), 5);
}

#[tokio::test]
async fn test_find_by_ids_and_find_one() {
    let layer = musicians().await;
    let ids = vec![
        "musicians/trane".to_string(),
        "ghost".to_string(),
        "miles".to_string(),
    ];
    let docs = layer.find_by_ids("musicians", &ids).await.unwrap();
    assert_eq!(names(&docs), ["John Coltrane", "Miles Davis"]);

    let err = layer
        .find_one("musicians", &Lookup::key("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::DocumentNotFound(_)));
}

#[tokio::test]
async fn test_remove_then_empty() {
    let layer = musicians().await;
    assert!(!layer.is_empty("musicians").await.unwrap());

    let removed = layer
        .remove("musicians", &Lookup::Example(doc(json!({"born": 1926}))))
        .await
        .unwrap();
    assert_eq!(removed, 2);

    let removed = layer
        .remove("musicians", &Lookup::Id("musicians/bill".to_string()))
        .await
        .unwrap();
    assert_eq!(removed, 1);
    assert!(layer.is_empty("musicians").await.unwrap());
}

#[tokio::test]
async fn test_field_ending_in_not_is_not_negated() {
    let engine = MemoryEngine::new();
    engine.create_collection("knots");
    engine
        .insert_many(
            "knots",
            vec![
                doc(json!({"_key": "a", "KNOT": 1})),
                doc(json!({"_key": "b", "KNOT": 2})),
            ],
        )
        .await
        .unwrap();
    let layer = DataLayer::new(engine, CollectionPerResource);

    let req = ParsedRequest::new().filter("KNOT IN [1]");
    let result = layer.find("knots", &req, None).await.unwrap();

    let keys: Vec<&str> = result.documents().iter().filter_map(|d| d.key()).collect();
    assert_eq!(keys, ["a"]);
}
