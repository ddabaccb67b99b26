//! Document store abstraction.
//!
//! The recorder only needs a handful of operations from its backing store, so it is
//! written against [`DocumentStore`] instead of the Firestore client directly.
//! [`MemoryStore`] keeps everything in a map and is what the tests run on.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// A document as returned by a store: its id, full path and plain JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub path: String,
    pub data: Value,
}

/// Paths are slash-separated, alternating collection and document ids:
/// `users/abc/March 2024/consumptionFlight`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Documents directly in `collection` whose `field` equals `value`.
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>>;

    /// Read a document, `None` if it does not exist.
    async fn get(&self, path: &str) -> Result<Option<StoredDocument>>;

    /// Every document directly in `collection`.
    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    /// Create or fully replace the document at `path`.
    async fn set(&self, path: &str, data: Value) -> Result<()>;

    /// Create a document with a store-generated id and return that id.
    async fn add(&self, collection: &str, data: Value) -> Result<String>;
}

/// Join path segments with `/`.
#[must_use]
pub fn join_path(segments: &[&str]) -> String {
    segments.join("/")
}

/// Split `a/b/c` into (`a/b`, `c`).
fn split_parent(path: &str) -> Option<(&str, &str)> {
    path.rsplit_once('/')
}

fn check_data(path: &str, data: &Value) -> Result<()> {
    if data.is_object() {
        Ok(())
    } else {
        Err(Error::store(format!("{path}: document data must be an object")))
    }
}

/// In-process document store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<String, Value>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents across all collections.
    pub async fn len(&self) -> usize {
        self.documents.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.lock().await.is_empty()
    }

    fn to_document(path: &str, data: &Value) -> StoredDocument {
        let id = split_parent(path).map_or(path, |(_, id)| id);
        StoredDocument {
            id: id.to_string(),
            path: path.to_string(),
            data: data.clone(),
        }
    }

    fn in_collection<'a>(
        documents: &'a BTreeMap<String, Value>,
        collection: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        documents
            .iter()
            .filter(move |(path, _)| split_parent(path).map(|(parent, _)| parent) == Some(collection))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>> {
        let documents = self.documents.lock().await;
        Ok(Self::in_collection(&documents, collection)
            .filter(|(_, data)| data.get(field).and_then(Value::as_str) == Some(value))
            .map(|(path, data)| Self::to_document(path, data))
            .collect())
    }

    async fn get(&self, path: &str) -> Result<Option<StoredDocument>> {
        let documents = self.documents.lock().await;
        Ok(documents
            .get(path)
            .map(|data| Self::to_document(path, data)))
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let documents = self.documents.lock().await;
        Ok(Self::in_collection(&documents, collection)
            .map(|(path, data)| Self::to_document(path, data))
            .collect())
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        check_data(path, &data)?;
        self.documents.lock().await.insert(path.to_string(), data);
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        check_data(collection, &data)?;
        let id = format!("doc{:06}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let path = join_path(&[collection, &id]);
        self.documents.lock().await.insert(path, data);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store
            .set("users/abc", json!({"email": "a@x.com"}))
            .await
            .unwrap();

        let doc = store.get("users/abc").await.unwrap().unwrap();
        assert_eq!(doc.id, "abc");
        assert_eq!(doc.path, "users/abc");
        assert_eq!(doc.data["email"], "a@x.com");

        assert!(store.get("users/missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_replaces_whole_document() {
        let store = MemoryStore::new();
        store
            .set("users/abc", json!({"email": "a@x.com", "name": "A"}))
            .await
            .unwrap();
        store
            .set("users/abc", json!({"email": "b@x.com"}))
            .await
            .unwrap();

        let doc = store.get("users/abc").await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"email": "b@x.com"}));
    }

    #[tokio::test]
    async fn test_list_only_direct_children() {
        let store = MemoryStore::new();
        store.set("users/abc", json!({})).await.unwrap();
        store
            .set("users/abc/March 2024/consumptionFlight", json!({"x": 1}))
            .await
            .unwrap();
        store
            .set("users/abc/March 2024/consumptionHome", json!({"x": 2}))
            .await
            .unwrap();
        store
            .set("users/abc/April 2024/consumptionHome", json!({"x": 3}))
            .await
            .unwrap();

        let docs = store.list("users/abc/March 2024").await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["consumptionFlight", "consumptionHome"]);

        assert_eq!(store.list("users").await.unwrap().len(), 1);
        assert!(store.list("users/abc/May 2024").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_find_by_field() {
        let store = MemoryStore::new();
        store
            .set("users/one", json!({"email": "a@x.com"}))
            .await
            .unwrap();
        store
            .set("users/two", json!({"email": "b@x.com"}))
            .await
            .unwrap();
        store
            .set("admins/three", json!({"email": "a@x.com"}))
            .await
            .unwrap();

        let found = store.find_by_field("users", "email", "a@x.com").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "one");

        assert!(store
            .find_by_field("users", "email", "nobody@x.com")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_add_generates_distinct_ids() {
        let store = MemoryStore::new();
        let first = store.add("users", json!({"email": "a@x.com"})).await.unwrap();
        let second = store.add("users", json!({"email": "b@x.com"})).await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.len().await, 2);
        assert!(store.get(&join_path(&["users", &first])).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_non_object_rejected() {
        let store = MemoryStore::new();
        let err = store.set("users/abc", json!(42)).await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert!(store.is_empty().await);
    }
}
