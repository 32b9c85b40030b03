//! The storage facade a REST framework registers as its data layer.
//!
//! Every call resolves the framework's resource name to a [`Datasource`],
//! compiles the request into a parameterized query and runs it through
//! the shared [`Engine`] handle. Nothing is cached between calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::config::{ArangoConfig, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::error::{DbError, DbResult};
use crate::query::compiler::QueryBuilder;
use crate::query::lexer::{example_tokens, scan_where, FilterToken};
use crate::query::sort::{parse_sort, SortKey};
use crate::storage::document::KEY_FIELD;
use crate::storage::{DateFormats, Document, Engine, InsertResult, ResultSet, RevisionResult};

/// Physical target of a resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Datasource {
    pub collection: String,
    /// Equality conditions every read and remove is restricted to
    pub filter: Option<Document>,
    /// Sort used when the request has none
    pub default_sort: Option<String>,
    /// Attributes returned by `find` and `find_one`
    pub projection: Option<Vec<String>>,
}

impl Datasource {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_default_sort(mut self, sort: impl Into<String>) -> Self {
        self.default_sort = Some(sort.into());
        self
    }

    pub fn with_projection<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }
}

/// Maps a resource name to the collection it is stored in.
pub trait ResourceResolver: Send + Sync {
    fn datasource(&self, resource: &str) -> DbResult<Datasource>;
}

/// Resource names are collection names.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionPerResource;

impl ResourceResolver for CollectionPerResource {
    fn datasource(&self, resource: &str) -> DbResult<Datasource> {
        Ok(Datasource::new(resource))
    }
}

/// A fixed table of resources
#[derive(Debug, Clone, Default)]
pub struct Domain {
    resources: HashMap<String, Datasource>,
}

impl Domain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(mut self, name: impl Into<String>, datasource: Datasource) -> Self {
        self.resources.insert(name.into(), datasource);
        self
    }
}

impl ResourceResolver for Domain {
    fn datasource(&self, resource: &str) -> DbResult<Datasource> {
        self.resources
            .get(resource)
            .cloned()
            .ok_or_else(|| DbError::CollectionNotFound(resource.to_string()))
    }
}

/// The query parameters of a `GET` on a resource endpoint.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ParsedRequest {
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub max_results: Option<u32>,
}

impl ParsedRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, where_clause: impl Into<String>) -> Self {
        self.where_clause = Some(where_clause.into());
        self
    }

    pub fn sort(mut self, sort: impl Into<String>) -> Self {
        self.sort = Some(sort.into());
        self
    }

    pub fn page(mut self, page: u32, max_results: u32) -> Self {
        self.page = Some(page);
        self.max_results = Some(max_results);
        self
    }
}

/// How a single document is addressed
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Key(String),
    /// `collection/key`
    Id(String),
    Example(Document),
}

impl Lookup {
    pub fn key(key: impl Into<String>) -> Self {
        Lookup::Key(key.into())
    }

    /// Equality conditions for this lookup against `collection`, or `None`
    /// when it cannot match anything there.
    fn tokens(&self, collection: &str) -> DbResult<Option<Vec<FilterToken>>> {
        let key = match self {
            Lookup::Key(key) => key.as_str(),
            Lookup::Id(id) => match id.split_once('/') {
                Some((coll, key)) if coll == collection => key,
                _ => return Ok(None),
            },
            Lookup::Example(example) => return example_tokens(example).map(Some),
        };
        let mut example = Document::new();
        example.insert(KEY_FIELD, key);
        example_tokens(&example).map(Some)
    }

    fn describe(&self, collection: &str) -> String {
        match self {
            Lookup::Key(key) => format!("{}/{}", collection, key),
            Lookup::Id(id) => id.clone(),
            Lookup::Example(example) => format!("{} matching {}", collection, example.clone().into_json()),
        }
    }
}

/// One document or a batch, for `insert`
#[derive(Debug, Clone, PartialEq)]
pub enum Documents {
    One(Document),
    Many(Vec<Document>),
}

impl Documents {
    fn into_vec(self) -> Vec<Document> {
        match self {
            Documents::One(doc) => vec![doc],
            Documents::Many(docs) => docs,
        }
    }
}

impl From<Document> for Documents {
    fn from(doc: Document) -> Self {
        Documents::One(doc)
    }
}

impl From<Vec<Document>> for Documents {
    fn from(docs: Vec<Document>) -> Self {
        Documents::Many(docs)
    }
}

#[derive(Debug, Clone)]
pub struct DataLayerSettings {
    pub default_page_size: u32,
    pub max_page_size: u32,
    /// When set, string attributes that parse as dates are returned as dates.
    pub date_formats: Option<DateFormats>,
}

impl Default for DataLayerSettings {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: MAX_PAGE_SIZE,
            date_formats: None,
        }
    }
}

impl From<&ArangoConfig> for DataLayerSettings {
    fn from(config: &ArangoConfig) -> Self {
        Self {
            default_page_size: config.default_page_size,
            max_page_size: config.max_page_size,
            date_formats: config.coerce_dates.then(DateFormats::default),
        }
    }
}

fn post_process(
    mut doc: Document,
    projection: Option<&[String]>,
    formats: Option<&DateFormats>,
) -> Document {
    if let Some(fields) = projection {
        doc = doc.project(fields);
    }
    if let Some(formats) = formats {
        doc.coerce_dates(formats);
    }
    doc
}

/// Accept either a bare key or a `collection/key` id of this collection.
fn key_of<'a>(collection: &str, id: &'a str) -> &'a str {
    match id.split_once('/') {
        Some((coll, key)) if coll == collection => key,
        _ => id,
    }
}

pub struct DataLayer<E: Engine> {
    engine: E,
    resolver: Arc<dyn ResourceResolver>,
    settings: DataLayerSettings,
}

impl<E: Engine> DataLayer<E> {
    pub fn new<R: ResourceResolver + 'static>(engine: E, resolver: R) -> Self {
        Self {
            engine,
            resolver: Arc::new(resolver),
            settings: DataLayerSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DataLayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn settings(&self) -> &DataLayerSettings {
        &self.settings
    }

    /// Requested page size, defaulted and capped.
    pub fn page_size(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.settings.default_page_size)
            .min(self.settings.max_page_size)
    }

    fn datasource(&self, resource: &str) -> DbResult<Datasource> {
        self.resolver.datasource(resource)
    }

    /// Builder preloaded with the datasource's base filter.
    fn builder(&self, ds: &Datasource) -> DbResult<QueryBuilder> {
        let mut builder = QueryBuilder::new(&ds.collection);
        if let Some(filter) = &ds.filter {
            builder = builder.filter(example_tokens(filter)?);
        }
        Ok(builder)
    }

    fn sort_for(&self, ds: &Datasource, req: &ParsedRequest) -> DbResult<Vec<SortKey>> {
        let fields = req
            .sort
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or(ds.default_sort.as_deref());
        match fields {
            Some(fields) => parse_sort(fields),
            None => Ok(Vec::new()),
        }
    }

    /// Run a filtered, sorted, paginated query.
    ///
    /// `sub_resource_lookup` restricts the result to documents matching
    /// it, as in `/artists/1/albums` => `{"artist": "1"}`.
    pub async fn find(
        &self,
        resource: &str,
        req: &ParsedRequest,
        sub_resource_lookup: Option<&Document>,
    ) -> DbResult<ResultSet> {
        let ds = self.datasource(resource)?;
        let mut builder = self.builder(&ds)?;
        if let Some(lookup) = sub_resource_lookup {
            builder = builder.filter(example_tokens(lookup)?);
        }
        if let Some(where_clause) = req.where_clause.as_deref() {
            builder = builder.filter(scan_where(where_clause)?);
        }

        let query = builder
            .sort(self.sort_for(&ds, req)?)
            .paginate(req.page, self.page_size(req.max_results))
            .build()?;

        let projection = ds.projection.clone();
        let formats = self.settings.date_formats.clone();
        let cursor = self
            .engine
            .query(&query)
            .await?
            .map_documents(move |doc| post_process(doc, projection.as_deref(), formats.as_ref()));

        Ok(ResultSet::from_cursor(cursor))
    }

    /// A single document, restricted by the datasource filter and shaped
    /// by its projection.
    pub async fn find_one(&self, resource: &str, lookup: &Lookup) -> DbResult<Document> {
        let ds = self.datasource(resource)?;
        let not_found = || DbError::DocumentNotFound(lookup.describe(&ds.collection));
        let tokens = lookup.tokens(&ds.collection)?.ok_or_else(not_found)?;

        let query = self.builder(&ds)?.filter(tokens).paginate(None, 1).full_count(false).build()?;
        let doc = self.engine.query(&query).await?.next().ok_or_else(not_found)?;

        Ok(post_process(
            doc,
            ds.projection.as_deref(),
            self.settings.date_formats.as_ref(),
        ))
    }

    /// A single document as stored, without the datasource filter,
    /// projection or date coercion.
    pub async fn find_one_raw(&self, resource: &str, lookup: &Lookup) -> DbResult<Document> {
        let ds = self.datasource(resource)?;
        let not_found = || DbError::DocumentNotFound(lookup.describe(&ds.collection));

        match lookup {
            Lookup::Key(key) => self.engine.get(&ds.collection, key).await?.ok_or_else(not_found),
            Lookup::Id(id) => match id.split_once('/') {
                Some((coll, key)) if coll == ds.collection => {
                    self.engine.get(&ds.collection, key).await?.ok_or_else(not_found)
                }
                _ => Err(not_found()),
            },
            Lookup::Example(example) => {
                let query = QueryBuilder::new(&ds.collection)
                    .filter(example_tokens(example)?)
                    .paginate(None, 1)
                    .full_count(false)
                    .build()?;
                self.engine.query(&query).await?.next().ok_or_else(not_found)
            }
        }
    }

    /// Documents for `ids` (keys or `collection/key`), in order. Unknown
    /// ids are left out.
    pub async fn find_by_ids(&self, resource: &str, ids: &[String]) -> DbResult<Vec<Document>> {
        let ds = self.datasource(resource)?;
        let keys: Vec<String> = ids
            .iter()
            .map(|id| key_of(&ds.collection, id).to_string())
            .collect();
        let docs = self.engine.get_many(&ds.collection, &keys).await?;
        Ok(docs
            .into_iter()
            .map(|doc| {
                post_process(
                    doc,
                    ds.projection.as_deref(),
                    self.settings.date_formats.as_ref(),
                )
            })
            .collect())
    }

    pub async fn insert(
        &self,
        resource: &str,
        documents: impl Into<Documents>,
    ) -> DbResult<Vec<InsertResult>> {
        let ds = self.datasource(resource)?;
        let results = self
            .engine
            .insert_many(&ds.collection, documents.into().into_vec())
            .await?;

        for result in &results {
            if let InsertResult::Rejected { index, error } = result {
                tracing::warn!(
                    "Insert into '{}' rejected document {}: {}",
                    ds.collection,
                    index,
                    error
                );
            }
        }
        Ok(results)
    }

    /// Merge `patch` into document `id`. When `original` carries a `_rev`
    /// the write only succeeds if the stored revision still equals it.
    pub async fn update(
        &self,
        resource: &str,
        id: &str,
        mut patch: Document,
        original: Option<&Document>,
    ) -> DbResult<RevisionResult> {
        let ds = self.datasource(resource)?;
        let key = key_of(&ds.collection, id);
        patch.insert(KEY_FIELD, key);
        self.engine
            .update(&ds.collection, key, patch, original.and_then(Document::rev))
            .await
    }

    /// Swap the body of document `id`, with the same revision rules as
    /// [`DataLayer::update`].
    pub async fn replace(
        &self,
        resource: &str,
        id: &str,
        mut document: Document,
        original: Option<&Document>,
    ) -> DbResult<RevisionResult> {
        let ds = self.datasource(resource)?;
        let key = key_of(&ds.collection, id);
        document.insert(KEY_FIELD, key);
        self.engine
            .replace(&ds.collection, key, document, original.and_then(Document::rev))
            .await
    }

    /// Remove every document matching `lookup` and the datasource filter.
    /// Returns how many were removed.
    pub async fn remove(&self, resource: &str, lookup: &Lookup) -> DbResult<u64> {
        let ds = self.datasource(resource)?;
        let Some(tokens) = lookup.tokens(&ds.collection)? else {
            return Ok(0);
        };
        let query = self.builder(&ds)?.filter(tokens).remove().build()?;
        let removed = self.engine.query(&query).await?.count() as u64;
        tracing::debug!("Removed {} documents from '{}'", removed, ds.collection);
        Ok(removed)
    }

    pub async fn is_empty(&self, resource: &str) -> DbResult<bool> {
        let ds = self.datasource(resource)?;
        if ds.filter.is_none() {
            return Ok(self.engine.count(&ds.collection).await? == 0);
        }
        let query = self.builder(&ds)?.paginate(None, 1).full_count(false).build()?;
        Ok(self.engine.query(&query).await?.next().is_none())
    }
}
