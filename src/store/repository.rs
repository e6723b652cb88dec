//! Generic verbs over an abstract document collection: query construction,
//! conditional insert, paginated find, upsert-by-operation, text search.
//!
//! None of these are atomic across multiple store calls unless the backend
//! guarantees it; the comments on the individual verbs call out where that
//! matters.

use chrono::Utc;
use serde_json::{Map, Value};

use crate::error::ApiError;

use super::{
    Collection, Document, Projection, Query, Sort, UpdateReport, UpdateSpec, UpsertOp,
    FIELD_API_VERSION, FIELD_CREATED_AT, FIELD_ID,
};

/// Project the named keys out of a source mapping into an equality query.
///
/// Every key must be present; by the time a query is built the payload has
/// been through validation, so a missing key is a defect in the endpoint,
/// not in the request.
pub fn build_query(keys: &[&str], source: &Map<String, Value>) -> Result<Query, ApiError> {
    let mut query = Map::new();
    for key in keys {
        let value = source.get(*key).ok_or_else(|| {
            ApiError::internal(format!("query builder: source has no key '{key}'"))
        })?;
        query.insert((*key).to_string(), value.clone());
    }
    Ok(Query(query))
}

fn stamp(doc: &mut Document, api_version: &str) {
    doc.insert(
        FIELD_CREATED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    doc.insert(
        FIELD_API_VERSION.to_string(),
        Value::String(api_version.to_string()),
    );
}

/// Insert unless a document already matches `query`; a match is a conflict
/// and nothing is written.
///
/// The existence check and the insert are two store calls. Under concurrent
/// writers the store needs a uniqueness index on the queried fields to make
/// the conflict guarantee hold.
pub async fn insert_or_conflict(
    coll: &dyn Collection,
    error_message: &str,
    mut doc: Document,
    query: &Query,
    api_version: &str,
) -> Result<Document, ApiError> {
    if coll.find_one(query, None, None).await?.is_some() {
        return Err(ApiError::conflict(error_message));
    }
    stamp(&mut doc, api_version);
    let id = coll.insert_one(doc.clone()).await?;
    doc.insert(FIELD_ID.to_string(), Value::String(id));
    Ok(doc)
}

/// First match or a `NotFound` carrying the caller's message.
pub async fn find_or_not_found(
    coll: &dyn Collection,
    error_message: &str,
    query: &Query,
    projection: Option<&Projection>,
) -> Result<Document, ApiError> {
    coll.find_one(query, projection, None)
        .await?
        .ok_or_else(|| ApiError::not_found(error_message))
}

/// First match, or nothing.
pub async fn find_optional(
    coll: &dyn Collection,
    query: &Query,
    projection: Option<&Projection>,
    sort: Option<&Sort>,
) -> Result<Option<Document>, ApiError> {
    Ok(coll.find_one(query, projection, sort).await?)
}

/// Ordered page of matches. `limit == 0` means unbounded.
pub async fn find_all_paginated(
    coll: &dyn Collection,
    query: &Query,
    projection: Option<&Projection>,
    sort: Option<&Sort>,
    skip: usize,
    limit: usize,
) -> Result<Vec<Document>, ApiError> {
    Ok(coll.find_many(query, projection, sort, skip, limit).await?)
}

/// Every match, in sort order.
pub async fn find_all(
    coll: &dyn Collection,
    query: &Query,
    projection: Option<&Projection>,
    sort: Option<&Sort>,
) -> Result<Vec<Document>, ApiError> {
    Ok(coll.find_many(query, projection, sort, 0, 0).await?)
}

pub async fn count_matching(coll: &dyn Collection, query: &Query) -> Result<u64, ApiError> {
    Ok(coll.count(query).await?)
}

/// Replace the first match; returns the prior document, if any.
pub async fn find_one_and_replace(
    coll: &dyn Collection,
    query: &Query,
    replacement: Document,
) -> Result<Option<Document>, ApiError> {
    Ok(coll.find_one_and_replace(query, replacement).await?)
}

/// Unconditional stamped insert. Reads the document back so the caller sees
/// exactly what the store holds, generated id included.
pub async fn insert_stamped(
    coll: &dyn Collection,
    mut doc: Document,
    api_version: &str,
) -> Result<Document, ApiError> {
    stamp(&mut doc, api_version);
    let id = coll.insert_one(doc).await?;
    coll.find_one(&Query::by_id(&id), None, None)
        .await?
        .ok_or_else(|| ApiError::internal("stored document vanished between write and read"))
}

/// Idempotent-by-query insert: the existing id when `query` already
/// matches, otherwise stamp, insert and return the fresh id.
pub async fn insert_or_return_id(
    coll: &dyn Collection,
    query: &Query,
    mut doc: Document,
    api_version: &str,
) -> Result<String, ApiError> {
    if let Some(existing) = coll.find_one(query, None, None).await? {
        return existing
            .get(FIELD_ID)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::internal("stored document has no id"));
    }
    stamp(&mut doc, api_version);
    Ok(coll.insert_one(doc).await?)
}

/// Best-effort insert for low-priority writes; the caller trades durability
/// and the generated id for throughput.
pub async fn fire_and_forget_insert(coll: &dyn Collection, mut doc: Document) -> Result<(), ApiError> {
    doc.insert(
        FIELD_CREATED_AT.to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    Ok(coll.insert_one_unacked(doc).await?)
}

pub async fn delete_one(coll: &dyn Collection, query: &Query) -> Result<u64, ApiError> {
    Ok(coll.delete_one(query).await?)
}

pub async fn delete_many(coll: &dyn Collection, query: &Query) -> Result<u64, ApiError> {
    Ok(coll.delete_many(query).await?)
}

pub async fn text_search(coll: &dyn Collection, term: &str) -> Result<Vec<Document>, ApiError> {
    Ok(coll.text_search(term).await?)
}

/// Upsert through a named operation: `push` appends to an array field,
/// `set` overwrites the named fields. Upsert is always on, so an absent
/// document is created rather than skipped. Anything else is rejected
/// before the store is touched.
pub async fn upsert_by_op(
    coll: &dyn Collection,
    query: &Query,
    update_data: Map<String, Value>,
    op: &str,
) -> Result<UpdateReport, ApiError> {
    let op: UpsertOp = op.parse()?;
    Ok(coll
        .update_one(
            query,
            UpdateSpec {
                op,
                fields: update_data,
            },
            true,
        )
        .await?)
}
