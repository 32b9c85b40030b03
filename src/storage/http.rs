//! Engine speaking the ArangoDB HTTP API.
//!
//! - queries: `POST /_db/{db}/_api/cursor`, continued with
//!   `PUT /_db/{db}/_api/cursor/{id}` while `hasMore`
//! - documents: `/_db/{db}/_api/document/{collection}[/{key}]`
//! - counts: `GET /_db/{db}/_api/collection/{collection}/count`

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ArangoConfig;
use crate::error::{DbError, DbResult};
use crate::query::compiler::{BindVars, CompiledQuery, COLLECTION_PARAM};

use super::cursor::Cursor;
use super::document::{Document, DocumentMeta, InsertResult, RevisionResult};
use super::engine::Engine;

const ERROR_CONFLICT: i64 = 1200;
const ERROR_DOCUMENT_NOT_FOUND: i64 = 1202;
const ERROR_COLLECTION_NOT_FOUND: i64 = 1203;

const GET_MANY_AQL: &str =
    "FOR key IN @keys\n  LET doc = DOCUMENT(@@collection, key)\n  FILTER doc != null\n  RETURN doc";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CursorRequest<'a> {
    query: &'a str,
    bind_vars: &'a BindVars,
    batch_size: u32,
    options: CursorOptions,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CursorOptions {
    full_count: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorResponse {
    #[serde(default)]
    result: Vec<serde_json::Value>,
    #[serde(default)]
    has_more: bool,
    id: Option<String>,
    extra: Option<CursorExtra>,
}

#[derive(Deserialize)]
struct CursorExtra {
    stats: Option<CursorStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CursorStats {
    full_count: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArangoErrorBody {
    error_num: Option<i64>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

/// What a failed request was about, for error messages
struct Target<'a> {
    collection: &'a str,
    key: Option<&'a str>,
}

impl Target<'_> {
    fn document_id(&self) -> String {
        match self.key {
            Some(key) => format!("{}/{}", self.collection, key),
            None => self.collection.to_string(),
        }
    }
}

fn map_error(status: StatusCode, body: &str, target: &Target<'_>) -> DbError {
    let parsed: Option<ArangoErrorBody> = serde_json::from_str(body).ok();
    let error_num = parsed.as_ref().and_then(|b| b.error_num);
    let message = parsed
        .and_then(|b| b.error_message)
        .unwrap_or_else(|| body.to_string());

    match (status, error_num) {
        (_, Some(ERROR_DOCUMENT_NOT_FOUND)) => DbError::DocumentNotFound(target.document_id()),
        (_, Some(ERROR_COLLECTION_NOT_FOUND)) => {
            DbError::CollectionNotFound(target.collection.to_string())
        }
        (StatusCode::PRECONDITION_FAILED, _) | (_, Some(ERROR_CONFLICT)) => {
            tracing::warn!("Revision conflict on {}: {}", target.document_id(), message);
            DbError::ConflictError(message)
        }
        (StatusCode::SERVICE_UNAVAILABLE, _) => DbError::EngineUnavailable(message),
        (StatusCode::UNAUTHORIZED, _) | (StatusCode::FORBIDDEN, _) => {
            DbError::EngineUnavailable(format!("authentication failed: {}", message))
        }
        (_, Some(code)) => DbError::EngineError { code, message },
        _ => DbError::ProtocolError(format!("unexpected status {}: {}", status, message)),
    }
}

async fn check(response: Response, target: &Target<'_>) -> DbResult<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(map_error(status, &body, target))
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> DbResult<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DbError::ProtocolError(format!("failed to decode response: {}", e)))
}

#[derive(Clone)]
pub struct HttpEngine {
    client: Client,
    base_url: Url,
    database: String,
    username: Option<String>,
    password: Option<String>,
    batch_size: u32,
}

impl HttpEngine {
    pub fn new(config: &ArangoConfig) -> DbResult<Self> {
        let base_url = config.base_url()?;
        Self::with_base_url(base_url.as_str(), config)
    }

    /// Connect to `base_url` instead of the configured host and port.
    pub fn with_base_url(base_url: &str, config: &ArangoConfig) -> DbResult<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DbError::ConfigError(format!("invalid server url '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DbError::ConfigError(format!("failed to build HTTP client: {}", e)))?;

        tracing::info!(
            "ArangoDB engine for database '{}' at {}",
            config.database,
            base_url
        );

        Ok(Self {
            client,
            base_url,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            batch_size: config.batch_size,
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// `{base}/_db/{database}/_api/{segments...}`, each segment escaped.
    fn endpoint(&self, segments: &[&str]) -> DbResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DbError::ConfigError(format!("'{}' cannot be a base url", self.base_url)))?
            .pop_if_empty()
            .extend(["_db", self.database.as_str(), "_api"])
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn run_cursor(
        &self,
        aql: &str,
        bind_vars: &BindVars,
        full_count: bool,
        target: &Target<'_>,
    ) -> DbResult<Cursor> {
        let request = CursorRequest {
            query: aql,
            bind_vars,
            batch_size: self.batch_size,
            options: CursorOptions { full_count },
        };

        let response = self
            .authorize(self.client.post(self.endpoint(&["cursor"])?))
            .json(&request)
            .send()
            .await?;
        let mut page: CursorResponse = decode(check(response, target).await?).await?;

        let full_count = page
            .extra
            .as_ref()
            .and_then(|e| e.stats.as_ref())
            .and_then(|s| s.full_count);
        let mut values = std::mem::take(&mut page.result);

        while page.has_more {
            let id = page.id.clone().ok_or_else(|| {
                DbError::ProtocolError("cursor has more results but no id".to_string())
            })?;
            tracing::debug!("Fetching next batch of cursor {}", id);
            let response = self
                .authorize(self.client.put(self.endpoint(&["cursor", id.as_str()])?))
                .send()
                .await?;
            page = decode(check(response, target).await?).await?;
            values.append(&mut page.result);
        }

        let documents = values
            .into_iter()
            .map(Document::from_json)
            .collect::<DbResult<Vec<_>>>()
            .map_err(|e| DbError::ProtocolError(format!("query returned a non-document: {}", e)))?;

        Ok(Cursor::new(documents, full_count))
    }

    async fn write(
        &self,
        request: RequestBuilder,
        body: Document,
        if_match: Option<&str>,
        target: &Target<'_>,
    ) -> DbResult<RevisionResult> {
        let mut request = self.authorize(request).json(&body);
        if let Some(rev) = if_match {
            request = request.header(reqwest::header::IF_MATCH, rev);
        }
        let response = request.send().await?;
        decode(check(response, target).await?).await
    }
}

#[async_trait]
impl Engine for HttpEngine {
    async fn query(&self, query: &CompiledQuery) -> DbResult<Cursor> {
        let collection = query
            .bind_var(COLLECTION_PARAM)
            .and_then(|v| v.as_str())
            .unwrap_or(query.plan.collection.as_str());
        let target = Target {
            collection,
            key: None,
        };
        self.run_cursor(&query.aql, &query.bind_vars, query.plan.full_count, &target)
            .await
    }

    async fn get(&self, collection: &str, key: &str) -> DbResult<Option<Document>> {
        let target = Target {
            collection,
            key: Some(key),
        };
        let response = self
            .authorize(self.client.get(self.endpoint(&["document", collection, key])?))
            .send()
            .await?;

        match check(response, &target).await {
            Ok(response) => {
                let value: serde_json::Value = decode(response).await?;
                Document::from_json(value).map(Some)
            }
            Err(DbError::DocumentNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_many(&self, collection: &str, keys: &[String]) -> DbResult<Vec<Document>> {
        let mut bind_vars = BindVars::new();
        bind_vars.insert(COLLECTION_PARAM.to_string(), json!(collection));
        bind_vars.insert("keys".to_string(), json!(keys));
        let target = Target {
            collection,
            key: None,
        };
        let cursor = self
            .run_cursor(GET_MANY_AQL, &bind_vars, false, &target)
            .await?;
        Ok(cursor.collect())
    }

    async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> DbResult<Vec<InsertResult>> {
        let target = Target {
            collection,
            key: None,
        };
        let response = self
            .authorize(self.client.post(self.endpoint(&["document", collection])?))
            .json(&documents)
            .send()
            .await?;
        let items: Vec<serde_json::Value> = decode(check(response, &target).await?).await?;

        items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                if item.get("error").and_then(|e| e.as_bool()) == Some(true) {
                    let error = item
                        .get("errorMessage")
                        .and_then(|m| m.as_str())
                        .unwrap_or("rejected")
                        .to_string();
                    Ok(InsertResult::Rejected { index, error })
                } else {
                    let meta: DocumentMeta = serde_json::from_value(item).map_err(|e| {
                        DbError::ProtocolError(format!("malformed insert result: {}", e))
                    })?;
                    Ok(InsertResult::Created(meta))
                }
            })
            .collect()
    }

    async fn update(
        &self,
        collection: &str,
        key: &str,
        patch: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult> {
        let target = Target {
            collection,
            key: Some(key),
        };
        let url = self.endpoint(&["document", collection, key])?;
        self.write(self.client.patch(url), patch, if_match, &target)
            .await
    }

    async fn replace(
        &self,
        collection: &str,
        key: &str,
        document: Document,
        if_match: Option<&str>,
    ) -> DbResult<RevisionResult> {
        let target = Target {
            collection,
            key: Some(key),
        };
        let url = self.endpoint(&["document", collection, key])?;
        self.write(self.client.put(url), document, if_match, &target)
            .await
    }

    async fn count(&self, collection: &str) -> DbResult<u64> {
        let target = Target {
            collection,
            key: None,
        };
        let response = self
            .authorize(
                self.client
                    .get(self.endpoint(&["collection", collection, "count"])?),
            )
            .send()
            .await?;
        let body: CountResponse = decode(check(response, &target).await?).await?;
        Ok(body.count)
    }
}
