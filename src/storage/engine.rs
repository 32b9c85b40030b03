use async_trait::async_trait;

use crate::error::DbResult;
use crate::query::compiler::CompiledQuery;

use super::cursor::Cursor;
use super::document::{Document, InsertResult, RevisionResult};

/// The seam between the data layer and a document store.
///
/// Implementations are cheap to clone handles that may be used by many
/// requests at once; correctness under concurrent writes comes from the
/// engine's revision checks, not from locks held by callers.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Execute a compiled query and return every produced document.
    async fn query(&self, query: &CompiledQuery) -> DbResult<Cursor>;

    async fn get(&self, collection: &str, key: &str) -> DbResult<Option<Document>>;

    /// Documents for `keys`, in order. Missing keys are skipped.
    async fn get_many(&self, collection: &str, keys: &[String]) -> DbResult<Vec<Document>>;

    /// One result per input document, in input order.
    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DbResult<Vec<InsertResult>>;

    /// Merge `patch` into the document. With `if_match`, fail with a
    /// conflict unless the stored revision equals it.
    async fn update(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult>;

    async fn replace(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult>;

    async fn count(&self, collection: &str) -> DbResult<u64>;
}
