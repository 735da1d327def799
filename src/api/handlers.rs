use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::error::RestError;
use crate::logic::{
    DeleteEngine, PatchEngine, PathResolver, QueryEngine, QueryParams, RowReader, RowWriter,
    ValidatorRegistry, WriteContext,
};
use crate::model::{Schema, TableSummary};
use crate::store::{RowStore, Transaction, TransactionCoordinator};

/// Shared per-process state: the read-only schema model, the live row
/// store, and the static validator registry.
#[derive(Clone)]
pub struct AppState {
    pub schema: Arc<Schema>,
    pub store: Arc<dyn RowStore>,
    pub validators: Arc<ValidatorRegistry>,
}

impl AppState {
    pub fn new(
        schema: Arc<Schema>,
        store: Arc<dyn RowStore>,
        validators: Arc<ValidatorRegistry>,
    ) -> Self {
        Self {
            schema,
            store,
            validators,
        }
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct SchemaResponse {
    pub name: String,
    pub version: String,
    pub tables: Vec<TableSummary>,
}

pub async fn get_schema_summary(State(state): State<AppState>) -> Json<SchemaResponse> {
    Json(SchemaResponse {
        name: state.schema.name.clone(),
        version: state.schema.version.clone(),
        tables: state.schema.summaries(),
    })
}

// Wildcard-route adapters. The root resource has no wildcard segment, so
// it gets its own thin set.

pub async fn get_root(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, RestError> {
    do_get(&state, "system".to_string(), query).await
}

pub async fn put_root(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, RestError> {
    do_put(&state, "system".to_string(), query, headers, body).await
}

pub async fn patch_root(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, RestError> {
    do_patch(&state, "system".to_string(), query, headers, body).await
}

pub async fn get_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, RestError> {
    do_get(&state, format!("system/{}", path), query).await
}

pub async fn post_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, RestError> {
    do_post(&state, format!("system/{}", path), query, body).await
}

pub async fn put_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, RestError> {
    do_put(&state, format!("system/{}", path), query, headers, body).await
}

pub async fn patch_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, RestError> {
    do_patch(&state, format!("system/{}", path), query, headers, body).await
}

pub async fn delete_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Response, RestError> {
    do_delete(&state, format!("system/{}", path), query).await
}

async fn do_get(
    state: &AppState,
    path: String,
    query: Option<String>,
) -> Result<Response, RestError> {
    ensure_ready(state)?;
    let chain = PathResolver::resolve(&path, &state.schema, state.store.as_ref(), &Method::GET)?;
    let leaf = chain.last();
    let table = state
        .schema
        .table(&leaf.table)
        .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;
    let params = QueryParams::parse(query.as_deref(), table, leaf.is_collection)?;

    if leaf.is_collection {
        let result = QueryEngine::query(
            &chain,
            &params,
            &state.schema,
            state.store.as_ref(),
            &path,
        )?;
        return Ok(Json(result).into_response());
    }

    let uuid = leaf
        .row
        .ok_or_else(|| RestError::not_found("resource not found"))?;
    let doc = RowReader::read(
        state.store.as_ref(),
        &state.schema,
        &leaf.table,
        uuid,
        params.depth,
        0,
        params.selector,
        false,
    )?;
    let etag = resource_etag(state, &leaf.table, uuid)?;
    Ok((
        [(header::ETAG, format!("\"{}\"", etag))],
        Json(doc),
    )
        .into_response())
}

async fn do_post(
    state: &AppState,
    path: String,
    query: Option<String>,
    body: serde_json::Value,
) -> Result<Response, RestError> {
    reject_query(&query)?;
    ensure_ready(state)?;
    let chain = PathResolver::resolve(&path, &state.schema, state.store.as_ref(), &Method::POST)?;
    if !chain.last().is_collection {
        return Err(RestError::MethodNotAllowed(
            "POST targets a collection resource".into(),
        ));
    }
    let (config, referenced_by) = RowWriter::parse_body(&body)?;

    let mut txn = Transaction::new();
    let mut ctx = WriteContext::new();
    let uuid = match RowWriter::create(
        &chain,
        config,
        &referenced_by,
        &state.schema,
        state.store.as_ref(),
        &mut txn,
        &mut ctx,
        &state.validators,
    ) {
        Ok(uuid) => uuid,
        Err(err) => {
            txn.abort();
            return Err(err);
        }
    };
    TransactionCoordinator::commit(state.store.as_ref(), &mut txn).await?;

    let location = RowReader::row_uri(state.store.as_ref(), &state.schema, &chain.last().table, uuid)
        .unwrap_or_default();
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
    )
        .into_response())
}

async fn do_put(
    state: &AppState,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: serde_json::Value,
) -> Result<Response, RestError> {
    reject_query(&query)?;
    ensure_ready(state)?;
    let chain = PathResolver::resolve(&path, &state.schema, state.store.as_ref(), &Method::PUT)?;
    let leaf = chain.last();
    let uuid = leaf
        .row
        .ok_or_else(|| RestError::not_found("resource not found"))?;
    let (config, _) = RowWriter::parse_body(&body)?;

    if let Some(matched) = if_match(&headers, &resource_etag(state, &leaf.table, uuid)?) {
        if !matched {
            // Safe-idempotent PUT: a body identical to the current
            // configuration succeeds even under a stale etag.
            let table = state
                .schema
                .table(&leaf.table)
                .ok_or_else(|| RestError::Internal(format!("unknown table {}", leaf.table)))?;
            let row = state
                .store
                .get_row(&uuid)
                .ok_or_else(|| RestError::not_found("resource not found"))?;
            if RowWriter::config_equals_current(
                table,
                config,
                &row,
                &state.schema,
                state.store.as_ref(),
            ) {
                return Ok(StatusCode::OK.into_response());
            }
            return Err(RestError::PreconditionFailed);
        }
    }

    let mut txn = Transaction::new();
    let mut ctx = WriteContext::new();
    if let Err(err) = RowWriter::update(
        &chain,
        config,
        &state.schema,
        state.store.as_ref(),
        &mut txn,
        &mut ctx,
        &state.validators,
    ) {
        txn.abort();
        return Err(err);
    }
    TransactionCoordinator::commit(state.store.as_ref(), &mut txn).await?;
    Ok(StatusCode::OK.into_response())
}

async fn do_patch(
    state: &AppState,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: serde_json::Value,
) -> Result<Response, RestError> {
    reject_query(&query)?;
    ensure_ready(state)?;
    let chain = PathResolver::resolve(&path, &state.schema, state.store.as_ref(), &Method::PATCH)?;
    let leaf = chain.last();
    let uuid = leaf
        .row
        .ok_or_else(|| RestError::not_found("resource not found"))?;

    if let Some(matched) = if_match(&headers, &resource_etag(state, &leaf.table, uuid)?) {
        if !matched {
            return Err(RestError::PreconditionFailed);
        }
    }

    let ops = PatchEngine::parse(&body)?;
    let current = RowReader::read(
        state.store.as_ref(),
        &state.schema,
        &leaf.table,
        uuid,
        0,
        0,
        None,
        false,
    )?;
    let (patched, mutated) = PatchEngine::apply(&current, &ops)?;
    if !mutated {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    let config = patched
        .get("configuration")
        .and_then(|c| c.as_object())
        .ok_or_else(|| {
            RestError::validation("patched document lost its 'configuration' group")
        })?;

    let mut txn = Transaction::new();
    let mut ctx = WriteContext::new();
    if let Err(err) = RowWriter::update(
        &chain,
        config,
        &state.schema,
        state.store.as_ref(),
        &mut txn,
        &mut ctx,
        &state.validators,
    ) {
        txn.abort();
        return Err(err);
    }
    TransactionCoordinator::commit(state.store.as_ref(), &mut txn).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn do_delete(
    state: &AppState,
    path: String,
    query: Option<String>,
) -> Result<Response, RestError> {
    reject_query(&query)?;
    ensure_ready(state)?;
    let chain =
        PathResolver::resolve(&path, &state.schema, state.store.as_ref(), &Method::DELETE)?;

    let mut txn = Transaction::new();
    if let Err(err) = DeleteEngine::delete(
        &chain,
        &state.schema,
        state.store.as_ref(),
        &mut txn,
        &state.validators,
    ) {
        txn.abort();
        return Err(err);
    }
    TransactionCoordinator::commit(state.store.as_ref(), &mut txn).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

fn ensure_ready(state: &AppState) -> Result<(), RestError> {
    if state.store.ready() {
        Ok(())
    } else {
        Err(RestError::Unavailable("database connection is down".into()))
    }
}

/// Query parameters carry query semantics and are GET-only.
fn reject_query(query: &Option<String>) -> Result<(), RestError> {
    match query {
        Some(q) if !q.is_empty() => Err(RestError::validation(
            "query parameters are not allowed on this method",
        )),
        _ => Ok(()),
    }
}

/// Hex digest over the canonical serialized representation (depth 0, all
/// groups, empty values omitted).
fn resource_etag(state: &AppState, table: &str, uuid: uuid::Uuid) -> Result<String, RestError> {
    let doc = RowReader::read(
        state.store.as_ref(),
        &state.schema,
        table,
        uuid,
        0,
        0,
        None,
        false,
    )?;
    let serialized = serde_json::to_string(&doc)
        .map_err(|e| RestError::Internal(format!("serialization failed: {}", e)))?;
    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Evaluate an `If-Match` header against the current etag. `None` when
/// the header is absent; `*` always matches.
fn if_match(headers: &HeaderMap, etag: &str) -> Option<bool> {
    let raw = headers.get(header::IF_MATCH)?.to_str().ok()?;
    for candidate in raw.split(',') {
        let trimmed = candidate.trim().trim_matches('"');
        if trimmed == "*" || trimmed == etag {
            return Some(true);
        }
    }
    Some(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn if_match_parses_lists_and_wildcard() {
        let mut headers = HeaderMap::new();
        assert_eq!(if_match(&headers, "abc"), None);

        headers.insert(header::IF_MATCH, HeaderValue::from_static("\"abc\""));
        assert_eq!(if_match(&headers, "abc"), Some(true));
        assert_eq!(if_match(&headers, "def"), Some(false));

        headers.insert(
            header::IF_MATCH,
            HeaderValue::from_static("\"xyz\", \"abc\""),
        );
        assert_eq!(if_match(&headers, "abc"), Some(true));

        headers.insert(header::IF_MATCH, HeaderValue::from_static("*"));
        assert_eq!(if_match(&headers, "anything"), Some(true));
    }
}
