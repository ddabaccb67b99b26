use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::auth::{ensure_success, FirebaseAuth};
use crate::config::Config;
use crate::error::Result;
use crate::store::{join_path, DocumentStore, StoredDocument};

const LIST_PAGE_SIZE: u32 = 100;

/// Cloud Firestore REST client.
#[derive(Clone)]
pub struct FirestoreClient {
    client: Client,
    auth: FirebaseAuth,
    documents_base: String,
}

#[derive(Debug, Deserialize)]
pub struct Document {
    pub name: String,
    pub fields: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ListDocumentsResponse {
    documents: Option<Vec<Document>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunQueryResponse {
    document: Option<Document>,
}

impl FirestoreClient {
    pub fn new(config: &Config, auth: FirebaseAuth) -> Self {
        Self {
            client: Client::new(),
            auth,
            documents_base: config.documents_base(),
        }
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.documents_base.clone()
        } else {
            format!("{}/{}", self.documents_base, path)
        }
    }

    /// Fetch a document, `None` on 404.
    pub async fn get_document(&self, path: &str) -> Result<Option<Document>> {
        let token = self.auth.get_id_token().await?;
        debug!(path, "GET document");

        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&token)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, &format!("GET {path}")).await?;
        Ok(Some(resp.json().await?))
    }

    /// One page of a collection listing.
    pub async fn list_documents(
        &self,
        collection_path: &str,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<(Vec<Document>, Option<String>)> {
        let token = self.auth.get_id_token().await?;
        debug!(collection_path, ?page_token, "LIST documents");

        let mut req = self.client.get(self.url(collection_path)).bearer_auth(&token);

        if let Some(size) = page_size {
            req = req.query(&[("pageSize", size.to_string())]);
        }
        if let Some(pt) = page_token {
            req = req.query(&[("pageToken", pt)]);
        }

        let resp = req.send().await?;
        let resp = ensure_success(resp, &format!("LIST {collection_path}")).await?;

        let list_resp: ListDocumentsResponse = resp.json().await?;
        Ok((
            list_resp.documents.unwrap_or_default(),
            list_resp.next_page_token.filter(|pt| !pt.is_empty()),
        ))
    }

    /// Run a structured query under `parent_path` (the database root if `None`).
    pub async fn run_query(
        &self,
        parent_path: Option<&str>,
        structured_query: Value,
    ) -> Result<Vec<Document>> {
        let token = self.auth.get_id_token().await?;
        let url = format!("{}:runQuery", self.url(parent_path.unwrap_or("")));
        debug!(?parent_path, "runQuery");

        let body = json!({
            "structuredQuery": structured_query
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;
        let resp = ensure_success(resp, "runQuery").await?;

        let results: Vec<RunQueryResponse> = resp.json().await?;
        Ok(results.into_iter().filter_map(|r| r.document).collect())
    }

    /// Replace the whole document at `path`, creating it if needed.
    ///
    /// No update mask is sent, so fields absent from `fields` are removed.
    pub async fn set_document(&self, path: &str, fields: Map<String, Value>) -> Result<Document> {
        let token = self.auth.get_id_token().await?;
        debug!(path, "PATCH document");

        let resp = self
            .client
            .patch(self.url(path))
            .bearer_auth(&token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let resp = ensure_success(resp, &format!("PATCH {path}")).await?;

        Ok(resp.json().await?)
    }

    /// Create a document with a server-generated id.
    pub async fn create_document(
        &self,
        collection_path: &str,
        fields: Map<String, Value>,
    ) -> Result<Document> {
        let token = self.auth.get_id_token().await?;
        debug!(collection_path, "POST document");

        let resp = self
            .client
            .post(self.url(collection_path))
            .bearer_auth(&token)
            .json(&json!({ "fields": fields }))
            .send()
            .await?;
        let resp = ensure_success(resp, &format!("POST {collection_path}")).await?;

        Ok(resp.json().await?)
    }

    /// Strip the `projects/.../documents/` prefix from a document name.
    fn relative_path<'a>(&self, name: &'a str) -> &'a str {
        name.split_once("/documents/").map_or(name, |(_, rest)| rest)
    }

    fn to_stored(&self, doc: &Document) -> StoredDocument {
        let data = doc
            .fields
            .as_ref()
            .map(|fields| parse_firestore_fields(&Value::Object(fields.clone())))
            .unwrap_or_else(|| Value::Object(Map::new()));
        StoredDocument {
            id: document_id(&doc.name).to_string(),
            path: self.relative_path(&doc.name).to_string(),
            data,
        }
    }
}

#[async_trait]
impl DocumentStore for FirestoreClient {
    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>> {
        let (parent, collection_id) = match collection.rsplit_once('/') {
            Some((parent, id)) => (Some(parent), id),
            None => (None, collection),
        };
        let docs = self
            .run_query(parent, equality_query(collection_id, field, value))
            .await?;
        Ok(docs.iter().map(|d| self.to_stored(d)).collect())
    }

    async fn get(&self, path: &str) -> Result<Option<StoredDocument>> {
        Ok(self
            .get_document(path)
            .await?
            .map(|doc| self.to_stored(&doc)))
    }

    async fn list(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        let mut all = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let (docs, next) = self
                .list_documents(collection, Some(LIST_PAGE_SIZE), page_token.as_deref())
                .await?;
            all.extend(docs.iter().map(|d| self.to_stored(d)));

            match next {
                Some(pt) => page_token = Some(pt),
                None => break,
            }
        }

        Ok(all)
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        self.set_document(path, to_firestore_fields(&data)).await?;
        Ok(())
    }

    async fn add(&self, collection: &str, data: Value) -> Result<String> {
        let doc = self
            .create_document(collection, to_firestore_fields(&data))
            .await?;
        let id = document_id(&doc.name).to_string();
        debug!(path = %join_path(&[collection, &id]), "document created");
        Ok(id)
    }
}

/// Structured query for `collection_id` documents whose `field` equals `value`.
pub fn equality_query(collection_id: &str, field: &str, value: &str) -> Value {
    json!({
        "from": [{ "collectionId": collection_id }],
        "where": {
            "fieldFilter": {
                "field": { "fieldPath": field },
                "op": "EQUAL",
                "value": { "stringValue": value }
            }
        }
    })
}

/// Last segment of a document name.
pub fn document_id(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Convert a serde_json::Value into Firestore's typed value format.
pub fn to_firestore_value(val: &Value) -> Value {
    match val {
        Value::Null => json!({"nullValue": null}),
        Value::Bool(b) => json!({"booleanValue": b}),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({"integerValue": i.to_string()})
            } else if let Some(f) = n.as_f64() {
                json!({"doubleValue": f})
            } else {
                json!({"integerValue": n.to_string()})
            }
        }
        Value::String(s) => json!({"stringValue": s}),
        Value::Array(arr) => {
            let values: Vec<Value> = arr.iter().map(to_firestore_value).collect();
            json!({"arrayValue": {"values": values}})
        }
        Value::Object(map) => {
            let mut fields = Map::new();
            for (k, v) in map {
                fields.insert(k.clone(), to_firestore_value(v));
            }
            json!({"mapValue": {"fields": fields}})
        }
    }
}

/// Convert a flat JSON object into Firestore fields format.
pub fn to_firestore_fields(obj: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(map) = obj.as_object() {
        for (k, v) in map {
            fields.insert(k.clone(), to_firestore_value(v));
        }
    }
    fields
}

/// Parse a Firestore typed value into a serde_json::Value.
pub fn parse_firestore_value(val: &Value) -> Value {
    if let Some(s) = val.get("stringValue") {
        return s.clone();
    }
    if let Some(i) = val.get("integerValue") {
        // Integers arrive as strings
        if let Some(n) = i.as_str().and_then(|s| s.parse::<i64>().ok()) {
            return json!(n);
        }
        return i.clone();
    }
    if let Some(d) = val.get("doubleValue") {
        return d.clone();
    }
    if let Some(b) = val.get("booleanValue") {
        return b.clone();
    }
    if val.get("nullValue").is_some() {
        return Value::Null;
    }
    if let Some(ts) = val.get("timestampValue") {
        return ts.clone();
    }
    if let Some(r) = val.get("referenceValue") {
        return r.clone();
    }
    if let Some(map) = val.get("mapValue") {
        if let Some(fields) = map.get("fields") {
            return parse_firestore_fields(fields);
        }
        return json!({});
    }
    if let Some(arr) = val.get("arrayValue") {
        if let Some(values) = arr.get("values").and_then(|v| v.as_array()) {
            return Value::Array(values.iter().map(parse_firestore_value).collect());
        }
        return json!([]);
    }

    val.clone()
}

/// Parse Firestore document fields into a flat JSON object.
pub fn parse_firestore_fields(fields: &Value) -> Value {
    if let Some(map) = fields.as_object() {
        let mut result = Map::new();
        for (key, val) in map {
            result.insert(key.clone(), parse_firestore_value(val));
        }
        Value::Object(result)
    } else {
        Value::Null
    }
}
