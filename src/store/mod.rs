// Abstract document store seam plus the generic access verbs built on it.
mod memory;
pub mod repository;

pub use memory::{MemoryCollection, MemoryStore};

use async_trait::async_trait;
use serde_json::{Map, Value};

/// One record in the generic store. Identity lives in `id`; `created_at`
/// and `api_version` are stamped exactly once, at first write.
pub type Document = Map<String, Value>;

pub const FIELD_ID: &str = "id";
pub const FIELD_CREATED_AT: &str = "created_at";
pub const FIELD_API_VERSION: &str = "api_version";

/// Equality query over a field subset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(pub Map<String, Value>);

impl Query {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(FIELD_ID.to_string(), Value::String(id.into()));
        Self(map)
    }

    /// An empty query matches every document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.0.iter().all(|(k, v)| doc.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Ordered list of (field, direction) pairs; earlier pairs win.
pub type Sort = Vec<(String, SortOrder)>;

/// Field exclusion applied to documents on their way out of the store.
#[derive(Debug, Clone, Default)]
pub struct Projection {
    exclude: Vec<String>,
}

impl Projection {
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exclude: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn apply(&self, mut doc: Document) -> Document {
        for field in &self.exclude {
            doc.remove(field);
        }
        doc
    }
}

/// Supported upsert operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOp {
    /// Append values to array fields.
    Push,
    /// Overwrite named fields.
    Set,
}

impl std::str::FromStr for UpsertOp {
    type Err = crate::error::ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(UpsertOp::Push),
            "set" => Ok(UpsertOp::Set),
            other => Err(crate::error::ApiError::invalid_operation(format!(
                "unsupported upsert operation '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub op: UpsertOp,
    pub fields: Map<String, Value>,
}

/// What an update touched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateReport {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<String>,
}

/// Failure inside the storage backend. Access-layer verbs translate these
/// into generic 500s; the raw detail is for the logs.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// An abstract document collection.
///
/// Implementations provide the standard find/insert/update/delete verbs;
/// everything with richer semantics (conflict checks, stamping, pagination
/// defaults) lives in [`repository`] on top of this trait. Individual calls
/// are atomic only as far as the backend makes them so.
#[async_trait]
pub trait Collection: Send + Sync {
    async fn find_one(
        &self,
        query: &Query,
        projection: Option<&Projection>,
        sort: Option<&Sort>,
    ) -> Result<Option<Document>, StoreError>;

    /// `limit == 0` means unbounded.
    async fn find_many(
        &self,
        query: &Query,
        projection: Option<&Projection>,
        sort: Option<&Sort>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, query: &Query) -> Result<u64, StoreError>;

    /// Insert, generating an `id` when the document has none. Returns the id.
    async fn insert_one(&self, doc: Document) -> Result<String, StoreError>;

    /// Relaxed-durability insert: the caller accepts at-most-once semantics
    /// and never learns the id.
    async fn insert_one_unacked(&self, doc: Document) -> Result<(), StoreError>;

    async fn update_one(
        &self,
        query: &Query,
        update: UpdateSpec,
        upsert: bool,
    ) -> Result<UpdateReport, StoreError>;

    /// Replace the first match, keeping its identity. Returns the prior
    /// document.
    async fn find_one_and_replace(
        &self,
        query: &Query,
        replacement: Document,
    ) -> Result<Option<Document>, StoreError>;

    async fn delete_one(&self, query: &Query) -> Result<u64, StoreError>;

    async fn delete_many(&self, query: &Query) -> Result<u64, StoreError>;

    /// Full-text query against an indexed collection.
    async fn text_search(&self, term: &str) -> Result<Vec<Document>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn query_matches_on_every_key() {
        let query = Query(doc(json!({"kind": "note", "owner": "ada"})));
        assert!(query.matches(&doc(json!({"kind": "note", "owner": "ada", "extra": 1}))));
        assert!(!query.matches(&doc(json!({"kind": "note", "owner": "bob"}))));
        assert!(Query::empty().matches(&doc(json!({"anything": true}))));
    }

    #[test]
    fn projection_strips_named_fields() {
        let projected = Projection::exclude(["secret"]).apply(doc(json!({
            "title": "x",
            "secret": "y"
        })));
        assert!(projected.get("secret").is_none());
        assert!(projected.get("title").is_some());
    }

    #[test]
    fn upsert_op_parsing_rejects_unknown_operations() {
        assert_eq!("push".parse::<UpsertOp>().unwrap(), UpsertOp::Push);
        assert_eq!("set".parse::<UpsertOp>().unwrap(), UpsertOp::Set);
        let err = "merge".parse::<UpsertOp>().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_OPERATION");
    }
}
