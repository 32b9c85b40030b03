//! In-process engine.
//!
//! Executes the same [`CompiledQuery`] plans the HTTP engine sends to
//! ArangoDB, reading field names and values from the bind parameters.
//! Used by the tests and by callers that want the data layer without a
//! running database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{DbError, DbResult};
use crate::query::compiler::{CompiledQuery, Terminal, COLLECTION_PARAM};

use super::cursor::Cursor;
use super::document::{
    Document, DocumentMeta, InsertResult, RevisionResult, Value, ID_FIELD, KEY_FIELD, REV_FIELD,
};
use super::engine::Engine;
use super::evaluate::{matches_all, sort_documents};

#[derive(Debug, Default)]
struct MemCollection {
    documents: IndexMap<String, Document>,
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    collections: Arc<RwLock<HashMap<String, MemCollection>>>,
}

fn new_key() -> String {
    uuid::Uuid::new_v7(uuid::Timestamp::now(uuid::NoContext)).to_string()
}

fn new_rev() -> String {
    format!("_{}", uuid::Uuid::new_v4().simple())
}

fn is_system_field(field: &str) -> bool {
    matches!(field, KEY_FIELD | ID_FIELD | REV_FIELD)
}

/// System attributes first, then the user attributes in their order.
fn stamp(collection: &str, key: &str, rev: &str, body: Document) -> Document {
    let mut doc = Document::new();
    doc.insert(KEY_FIELD, key);
    doc.insert(ID_FIELD, format!("{}/{}", collection, key));
    doc.insert(REV_FIELD, rev);
    for (field, value) in body {
        if !is_system_field(&field) {
            doc.insert(field, value);
        }
    }
    doc
}

/// Merge `patch` into `target`; nested documents are merged recursively.
fn merge(target: &mut Document, patch: Document) {
    for (field, value) in patch {
        if is_system_field(&field) {
            continue;
        }
        match (target.get(&field).cloned(), value) {
            (Some(Value::Object(mut existing)), Value::Object(nested)) => {
                merge(&mut existing, nested);
                target.insert(field, Value::Object(existing));
            }
            (_, value) => {
                target.insert(field, value);
            }
        }
    }
}

fn check_revision(key: &str, current: &Document, if_match: Option<&str>) -> DbResult<()> {
    match if_match {
        Some(expected) if current.rev() != Some(expected) => {
            let actual = current.rev().unwrap_or_default();
            tracing::warn!(
                "Revision conflict on '{}': expected '{}', current '{}'",
                key,
                expected,
                actual
            );
            Err(DbError::ConflictError(format!(
                "Document '{}' has been modified. Expected revision '{}', but current is '{}'",
                key, expected, actual
            )))
        }
        _ => Ok(()),
    }
}

/// Filter, sort and paginate one collection for a compiled plan.
fn select_page(
    coll: &MemCollection,
    query: &CompiledQuery,
) -> DbResult<(Vec<Document>, Option<u64>)> {
    let plan = &query.plan;
    let mut matched = Vec::new();
    for doc in coll.documents.values() {
        if matches_all(doc, &plan.filters, &query.bind_vars)? {
            matched.push(doc.clone());
        }
    }
    sort_documents(&mut matched, &plan.sort);

    let full_count = plan.full_count.then_some(matched.len() as u64);
    let skip = usize::try_from(plan.skip).unwrap_or(usize::MAX);
    let page = match plan.limit {
        Some(limit) => matched
            .into_iter()
            .skip(skip)
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect(),
        None => matched.into_iter().skip(skip).collect(),
    };
    Ok((page, full_count))
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty collection. Returns false when it already exists.
    pub fn create_collection(&self, name: &str) -> bool {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return false;
        }
        collections.insert(name.to_string(), MemCollection::default());
        tracing::debug!("Created in-memory collection '{}'", name);
        true
    }

    fn write_document<F>(
        &self,
        collection: &str,
        key: &str,
        if_match: Option<&str>,
        change: F,
    ) -> DbResult<RevisionResult>
    where
        F: FnOnce(&Document) -> Document,
    {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| DbError::CollectionNotFound(collection.to_string()))?;
        let current = coll
            .documents
            .get(key)
            .ok_or_else(|| DbError::DocumentNotFound(format!("{}/{}", collection, key)))?;

        check_revision(key, current, if_match)?;

        let old_rev = current.rev().unwrap_or_default().to_string();
        let rev = new_rev();
        let doc = stamp(collection, key, &rev, change(current));
        coll.documents.insert(key.to_string(), doc);

        Ok(RevisionResult {
            id: format!("{}/{}", collection, key),
            key: key.to_string(),
            rev,
            old_rev,
        })
    }
}

#[async_trait]
impl Engine for MemoryEngine {
    async fn query(&self, query: &CompiledQuery) -> DbResult<Cursor> {
        let plan = &query.plan;
        let collection = query
            .bind_var(COLLECTION_PARAM)
            .and_then(|v| v.as_str())
            .unwrap_or(plan.collection.as_str())
            .to_string();

        match plan.terminal {
            Terminal::Return => {
                let collections = self.collections.read();
                let coll = collections
                    .get(&collection)
                    .ok_or_else(|| DbError::CollectionNotFound(collection.clone()))?;
                let (page, full_count) = select_page(coll, query)?;
                Ok(Cursor::new(page, full_count))
            }
            Terminal::Remove => {
                let mut collections = self.collections.write();
                let coll = collections
                    .get_mut(&collection)
                    .ok_or_else(|| DbError::CollectionNotFound(collection.clone()))?;
                let (page, full_count) = select_page(coll, query)?;
                let mut removed = Vec::with_capacity(page.len());
                for doc in page {
                    let Some(key) = doc.key() else { continue };
                    if coll.documents.shift_remove(key).is_some() {
                        removed.push(doc.project(&[]));
                    }
                }
                tracing::debug!("Removed {} documents from '{}'", removed.len(), collection);
                Ok(Cursor::new(removed, full_count))
            }
        }
    }

    async fn get(&self, collection: &str, key: &str) -> DbResult<Option<Document>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| DbError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.documents.get(key).cloned())
    }

    async fn get_many(&self, collection: &str, keys: &[String]) -> DbResult<Vec<Document>> {
        let collections = self.collections.read();
        let coll = collections
            .get(collection)
            .ok_or_else(|| DbError::CollectionNotFound(collection.to_string()))?;
        Ok(keys
            .iter()
            .filter_map(|key| coll.documents.get(key).cloned())
            .collect())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DbResult<Vec<InsertResult>> {
        let mut collections = self.collections.write();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| DbError::CollectionNotFound(collection.to_string()))?;

        let mut results = Vec::with_capacity(documents.len());
        for (index, body) in documents.into_iter().enumerate() {
            let key = match body.get(KEY_FIELD) {
                None => new_key(),
                Some(Value::String(key)) if !key.is_empty() => key.clone(),
                Some(_) => {
                    results.push(InsertResult::Rejected {
                        index,
                        error: "_key must be a non-empty string".to_string(),
                    });
                    continue;
                }
            };
            if coll.documents.contains_key(&key) {
                results.push(InsertResult::Rejected {
                    index,
                    error: format!("unique constraint violated for key '{}'", key),
                });
                continue;
            }

            let rev = new_rev();
            let doc = stamp(collection, &key, &rev, body);
            coll.documents.insert(key.clone(), doc);
            results.push(InsertResult::Created(DocumentMeta {
                id: format!("{}/{}", collection, key),
                key,
                rev,
            }));
        }
        Ok(results)
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult> {
        self.write_document(collection, key, if_match, |current| {
            let mut doc = current.clone();
            merge(&mut doc, patch);
            doc
        })
    }

    async fn replace(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult> {
        self.write_document(collection, key, if_match, |_| document)
    }

    async fn count(&self, collection: &str) -> DbResult<u64> {
        let collections = self.collections.read();
        collections
            .get(collection)
            .map(|coll| coll.documents.len() as u64)
            .ok_or_else(|| DbError::CollectionNotFound(collection.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::compiler::{compile, QueryBuilder};
    use crate::query::lexer::scan;
    use crate::query::sort::parse_sort;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(value).unwrap()
    }

    async fn seeded() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.create_collection("musicians");
        engine
            .insert_many(
                "musicians",
                vec![
                    doc(json!({"_key": "1", "name": "Miles Davis", "born": 1926})),
                    doc(json!({"_key": "2", "name": "Bill Evans", "born": 1929})),
                    doc(json!({"_key": "3", "name": "John Coltrane", "born": 1926})),
                ],
            )
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_query_filters_sorts_and_counts() {
        let engine = seeded().await;
        let query = compile(
            &scan("born==1926").unwrap(),
            &parse_sort("-name").unwrap(),
            Some(1),
            1,
            "musicians",
        )
        .unwrap();

        let cursor = engine.query(&query).await.unwrap();
        assert_eq!(cursor.full_count(), Some(2));
        let docs: Vec<Document> = cursor.collect();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].key(), Some("1"));
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let engine = MemoryEngine::new();
        let query = compile(&[], &[], None, 10, "nowhere").unwrap();
        assert!(matches!(
            engine.query(&query).await,
            Err(DbError::CollectionNotFound(_))
        ));
        assert!(matches!(
            engine.count("nowhere").await,
            Err(DbError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_assigns_system_attributes() {
        let engine = MemoryEngine::new();
        engine.create_collection("albums");
        let results = engine
            .insert_many(
                "albums",
                vec![doc(json!({"title": "Kind of Blue"})), doc(json!({"_key": 7}))],
            )
            .await
            .unwrap();

        let meta = results[0].meta().unwrap();
        assert_eq!(meta.id, format!("albums/{}", meta.key));
        assert!(matches!(results[1], InsertResult::Rejected { index: 1, .. }));

        let stored = engine.get("albums", &meta.key).await.unwrap().unwrap();
        let fields: Vec<&String> = stored.iter().map(|(k, _)| k).collect();
        assert_eq!(fields, ["_key", "_id", "_rev", "title"]);
        assert_eq!(stored.rev(), Some(meta.rev.as_str()));
    }

    #[tokio::test]
    async fn test_duplicate_key_is_rejected_per_item() {
        let engine = seeded().await;
        let results = engine
            .insert_many(
                "musicians",
                vec![doc(json!({"_key": "1"})), doc(json!({"_key": "4"}))],
            )
            .await
            .unwrap();
        assert!(!results[0].is_created());
        assert!(results[1].is_created());
        assert_eq!(engine.count("musicians").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_update_merges_and_replace_overwrites() {
        let engine = seeded().await;
        engine
            .update(
                "musicians",
                "2",
                doc(json!({"instrument": "piano", "_key": "ignored"})),
                None,
            )
            .await
            .unwrap();
        let updated = engine.get("musicians", "2").await.unwrap().unwrap();
        assert_eq!(updated.get("name").and_then(Value::as_str), Some("Bill Evans"));
        assert_eq!(updated.get("instrument").and_then(Value::as_str), Some("piano"));
        assert_eq!(updated.key(), Some("2"));

        engine
            .replace("musicians", "2", doc(json!({"name": "B. Evans"})), None)
            .await
            .unwrap();
        let replaced = engine.get("musicians", "2").await.unwrap().unwrap();
        assert!(!replaced.contains_key("instrument"));
        assert!(!replaced.contains_key("born"));
    }

    #[tokio::test]
    async fn test_update_merges_nested_documents() {
        let engine = MemoryEngine::new();
        engine.create_collection("c");
        engine
            .insert_many("c", vec![doc(json!({"_key": "a", "meta": {"x": 1, "y": 2}}))])
            .await
            .unwrap();
        engine
            .update("c", "a", doc(json!({"meta": {"y": 3}})), None)
            .await
            .unwrap();
        let stored = engine.get("c", "a").await.unwrap().unwrap();
        assert_eq!(
            stored.get("meta").cloned().map(|v| v.to_json()),
            Some(json!({"x": 1, "y": 3}))
        );
    }

    #[tokio::test]
    async fn test_revision_check() {
        let engine = seeded().await;
        let current = engine.get("musicians", "1").await.unwrap().unwrap();
        let rev = current.rev().unwrap().to_string();

        let result = engine
            .update("musicians", "1", doc(json!({"a": 1})), Some(&rev))
            .await
            .unwrap();
        assert_eq!(result.old_rev, rev);
        assert_ne!(result.rev, rev);

        let stale = engine
            .update("musicians", "1", doc(json!({"a": 2})), Some(&rev))
            .await;
        assert!(matches!(stale, Err(DbError::ConflictError(_))));
    }

    #[tokio::test]
    async fn test_missing_document() {
        let engine = seeded().await;
        assert!(engine.get("musicians", "99").await.unwrap().is_none());
        assert!(matches!(
            engine.update("musicians", "99", Document::new(), None).await,
            Err(DbError::DocumentNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_many_keeps_order_and_skips_missing() {
        let engine = seeded().await;
        let keys = vec!["3".to_string(), "99".to_string(), "1".to_string()];
        let docs = engine.get_many("musicians", &keys).await.unwrap();
        let got: Vec<&str> = docs.iter().filter_map(|d| d.key()).collect();
        assert_eq!(got, ["3", "1"]);
    }

    #[tokio::test]
    async fn test_remove_terminal() {
        let engine = seeded().await;
        let query = QueryBuilder::new("musicians")
            .filter(scan("born==1926").unwrap())
            .remove()
            .build()
            .unwrap();
        let removed: Vec<Document> = engine.query(&query).await.unwrap().collect();
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|d| d.len() == 3 && d.rev().is_some()));
        assert_eq!(engine.count("musicians").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_return_query_shares_the_lock_with_readers() {
        let engine = seeded().await;
        let query = compile(&scan("born==1926").unwrap(), &[], None, 10, "musicians").unwrap();

        // A write lock here would deadlock against the held read guard
        let reader = engine.collections.read();
        let cursor = engine.query(&query).await.unwrap();
        drop(reader);

        assert_eq!(cursor.full_count(), Some(2));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_revision_conflict_is_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let mut current = Document::new();
        current.insert(REV_FIELD, "_current");
        let result = tracing::subscriber::with_default(subscriber, || {
            check_revision("1", &current, Some("_stale"))
        });

        assert!(matches!(result, Err(DbError::ConflictError(_))));
        let text = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(text.contains("WARN"));
        assert!(text.contains("Revision conflict on '1'"));
    }
}
