use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use super::{
    Collection, Document, Projection, Query, Sort, SortOrder, StoreError, UpdateReport,
    UpdateSpec, UpsertOp, FIELD_ID,
};

/// In-memory document store backing the tests and the demo binary.
///
/// Not a production engine: queries scan, the "text index" is a substring
/// match, and nothing survives the process. It exists so the access layer
/// and endpoints can be exercised without a real backend.
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Get or create the named collection.
    pub fn collection(&self, name: &str) -> Arc<MemoryCollection> {
        if let Ok(collections) = self.collections.read() {
            if let Some(coll) = collections.get(name) {
                return Arc::clone(coll);
            }
        }
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            collections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(MemoryCollection::new())),
        )
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// One named collection: a vector of documents behind a single lock, held
/// only across one synchronous operation at a time.
pub struct MemoryCollection {
    docs: RwLock<Vec<Document>>,
}

impl MemoryCollection {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
        }
    }

    fn read_docs(&self) -> Result<RwLockReadGuard<'_, Vec<Document>>, StoreError> {
        self.docs
            .read()
            .map_err(|_| StoreError::Backend("collection lock poisoned".to_string()))
    }

    fn write_docs(&self) -> Result<RwLockWriteGuard<'_, Vec<Document>>, StoreError> {
        self.docs
            .write()
            .map_err(|_| StoreError::Backend("collection lock poisoned".to_string()))
    }
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_value(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(m), Value::Number(n)) => {
            let (m, n) = (m.as_f64().unwrap_or(0.0), n.as_f64().unwrap_or(0.0));
            m.partial_cmp(&n).unwrap_or(Ordering::Equal)
        }
        (Value::String(s), Value::String(t)) => s.cmp(t),
        (Value::Bool(p), Value::Bool(q)) => p.cmp(q),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_value(x, y),
    }
}

fn apply_sort(docs: &mut [Document], sort: &Sort) {
    docs.sort_by(|a, b| {
        for (field, order) in sort {
            let ord = compare_fields(a.get(field), b.get(field));
            let ord = match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

fn apply_update(doc: &mut Document, update: &UpdateSpec) {
    match update.op {
        UpsertOp::Set => {
            for (k, v) in &update.fields {
                doc.insert(k.clone(), v.clone());
            }
        }
        UpsertOp::Push => {
            for (k, v) in &update.fields {
                match doc.get_mut(k) {
                    Some(Value::Array(items)) => items.push(v.clone()),
                    _ => {
                        doc.insert(k.clone(), Value::Array(vec![v.clone()]));
                    }
                }
            }
        }
    }
}

fn matches_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Array(items) => items.iter().any(|item| matches_text(item, needle)),
        _ => false,
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    async fn find_one(
        &self,
        query: &Query,
        projection: Option<&Projection>,
        sort: Option<&Sort>,
    ) -> Result<Option<Document>, StoreError> {
        let mut page = self.find_many(query, projection, sort, 0, 1).await?;
        Ok(page.pop())
    }

    async fn find_many(
        &self,
        query: &Query,
        projection: Option<&Projection>,
        sort: Option<&Sort>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<Document>, StoreError> {
        let mut matches: Vec<Document> = {
            let docs = self.read_docs()?;
            docs.iter().filter(|d| query.matches(d)).cloned().collect()
        };

        if let Some(sort) = sort {
            apply_sort(&mut matches, sort);
        }

        let page = matches.into_iter().skip(skip);
        let selected: Vec<Document> = if limit == 0 {
            page.collect()
        } else {
            page.take(limit).collect()
        };

        Ok(match projection {
            Some(p) => selected.into_iter().map(|d| p.apply(d)).collect(),
            None => selected,
        })
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let docs = self.read_docs()?;
        Ok(docs.iter().filter(|d| query.matches(d)).count() as u64)
    }

    async fn insert_one(&self, mut doc: Document) -> Result<String, StoreError> {
        let id = match doc.get(FIELD_ID).and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                let id = Uuid::new_v4().to_string();
                doc.insert(FIELD_ID.to_string(), Value::String(id.clone()));
                id
            }
        };
        self.write_docs()?.push(doc);
        Ok(id)
    }

    async fn insert_one_unacked(&self, doc: Document) -> Result<(), StoreError> {
        // In memory the write is as durable as any other; the contract
        // difference is that the caller never learns the id.
        self.insert_one(doc).await.map(|_| ())
    }

    async fn update_one(
        &self,
        query: &Query,
        update: UpdateSpec,
        upsert: bool,
    ) -> Result<UpdateReport, StoreError> {
        let mut docs = self.write_docs()?;

        if let Some(target) = docs.iter_mut().find(|d| query.matches(d)) {
            apply_update(target, &update);
            return Ok(UpdateReport {
                matched: 1,
                modified: 1,
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(UpdateReport::default());
        }

        let mut fresh = Document::new();
        match update.op {
            UpsertOp::Set => {
                fresh = update.fields.clone();
            }
            UpsertOp::Push => {
                for (k, v) in &update.fields {
                    fresh.insert(k.clone(), Value::Array(vec![v.clone()]));
                }
            }
        }
        let id = Uuid::new_v4().to_string();
        fresh.insert(FIELD_ID.to_string(), Value::String(id.clone()));
        docs.push(fresh);

        Ok(UpdateReport {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    async fn find_one_and_replace(
        &self,
        query: &Query,
        mut replacement: Document,
    ) -> Result<Option<Document>, StoreError> {
        let mut docs = self.write_docs()?;
        let Some(index) = docs.iter().position(|d| query.matches(d)) else {
            return Ok(None);
        };

        let prior = docs[index].clone();
        // Document identity is immutable; the replacement inherits it.
        if let Some(id) = prior.get(FIELD_ID) {
            replacement.insert(FIELD_ID.to_string(), id.clone());
        }
        docs[index] = replacement;
        Ok(Some(prior))
    }

    async fn delete_one(&self, query: &Query) -> Result<u64, StoreError> {
        let mut docs = self.write_docs()?;
        match docs.iter().position(|d| query.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_many(&self, query: &Query) -> Result<u64, StoreError> {
        let mut docs = self.write_docs()?;
        let before = docs.len();
        docs.retain(|d| !query.matches(d));
        Ok((before - docs.len()) as u64)
    }

    async fn text_search(&self, term: &str) -> Result<Vec<Document>, StoreError> {
        let needle = term.to_lowercase();
        let docs = self.read_docs()?;
        Ok(docs
            .iter()
            .filter(|d| d.values().any(|v| matches_text(v, &needle)))
            .cloned()
            .collect())
    }
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

    #[tokio::test]
    async fn sort_skip_limit_select_a_stable_page() {
        let coll = MemoryCollection::new();
        for rank in [3, 1, 2, 5, 4] {
            coll.insert_one(doc(json!({"rank": rank}))).await.unwrap();
        }

        let sort: Sort = vec![("rank".to_string(), SortOrder::Asc)];
        let page = coll
            .find_many(&Query::empty(), None, Some(&sort), 1, 2)
            .await
            .unwrap();
        let ranks: Vec<i64> = page.iter().map(|d| d["rank"].as_i64().unwrap()).collect();
        assert_eq!(ranks, vec![2, 3]);
    }

    #[tokio::test]
    async fn replace_keeps_document_identity() {
        let coll = MemoryCollection::new();
        let id = coll
            .insert_one(doc(json!({"name": "ada"})))
            .await
            .unwrap();

        let prior = coll
            .find_one_and_replace(&Query::by_id(&id), doc(json!({"name": "lovelace"})))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(prior["name"], "ada");

        let current = coll
            .find_one(&Query::by_id(&id), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current["name"], "lovelace");
        assert_eq!(current[FIELD_ID], Value::String(id));
    }

    #[tokio::test]
    async fn push_appends_and_set_overwrites() {
        let coll = MemoryCollection::new();
        let id = coll
            .insert_one(doc(json!({"tags": ["a"]})))
            .await
            .unwrap();

        coll.update_one(
            &Query::by_id(&id),
            UpdateSpec {
                op: UpsertOp::Push,
                fields: doc(json!({"tags": "b"})),
            },
            true,
        )
        .await
        .unwrap();

        coll.update_one(
            &Query::by_id(&id),
            UpdateSpec {
                op: UpsertOp::Set,
                fields: doc(json!({"state": "open"})),
            },
            true,
        )
        .await
        .unwrap();

        let current = coll
            .find_one(&Query::by_id(&id), None, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current["tags"], json!(["a", "b"]));
        assert_eq!(current["state"], "open");
    }

    #[tokio::test]
    async fn text_search_matches_nested_strings() {
        let coll = MemoryCollection::new();
        coll.insert_one(doc(json!({"title": "Quarterly Report", "tags": ["finance"]})))
            .await
            .unwrap();
        coll.insert_one(doc(json!({"title": "Holiday plan"})))
            .await
            .unwrap();

        let hits = coll.text_search("finance").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0]["title"], "Quarterly Report");
    }
}
