use std::time::Duration;

use evidx_core::domain::{DocumentId, Metadata, Modality};
use evidx_core::error::{codes, AppError};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{IndexSchema, KnnQuery, Similarity, StoredDocument, StoredHit, StoredRecord, VectorStore};

const SOURCE_FIELDS: [&str; 5] = ["content", "modality", "description", "metadata", "content_path"];

/// Elasticsearch REST adapter. ES cosine `_score` is already `(1 + cos) / 2`.
#[derive(Debug, Clone)]
pub struct ElasticsearchStore {
    base_url: String,
    api_key: Option<String>,
    agent: ureq::Agent,
}

impl ElasticsearchStore {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "Elasticsearch URL must be http(s)",
            )
            .with_details(format!("url={base_url}")));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            agent,
        })
    }

    fn request(&self, method: &str, path: &str) -> ureq::Request {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let req = self
            .agent
            .request(method, &url)
            .set("Content-Type", "application/json");
        match self.api_key.as_deref() {
            Some(key) => req.set("Authorization", &format!("ApiKey {key}")),
            None => req,
        }
    }

    /// Run a request and return `(status, body)`. Any HTTP status is a response;
    /// only transport failures are errors here.
    fn send(&self, method: &str, path: &str, body: Option<&Value>) -> Result<(u16, Value), AppError> {
        let req = self.request(method, path);
        let resp = match body {
            Some(b) => req.send_json(b.clone()),
            None => req.call(),
        };
        let r = match resp {
            Ok(r) => r,
            Err(ureq::Error::Status(_, r)) => r,
            Err(e) => {
                return Err(AppError::new(
                    codes::STORE_UNREACHABLE,
                    "Failed to reach Elasticsearch",
                )
                .with_details(format!("{method} {path}: {e}"))
                .with_retryable(true))
            }
        };
        let status = r.status();
        if method == "HEAD" {
            return Ok((status, Value::Null));
        }
        let text = r.into_string().map_err(|e| {
            AppError::new(codes::STORE_OPERATION_FAILED, "Failed to read Elasticsearch response")
                .with_details(e.to_string())
        })?;
        let value = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok((status, value))
    }

    fn expect_ok(&self, method: &str, path: &str, body: Option<&Value>) -> Result<Value, AppError> {
        let (status, value) = self.send(method, path, body)?;
        if !(200..300).contains(&status) {
            return Err(status_error(method, path, status, &value));
        }
        Ok(value)
    }

    fn read_schema(&self, index: &str) -> Result<IndexSchema, AppError> {
        let v = self.expect_ok("GET", &format!("{index}/_mapping"), None)?;
        parse_mapping_schema(&v, index)
    }
}

fn status_error(method: &str, path: &str, status: u16, body: &Value) -> AppError {
    let reason = body
        .pointer("/error/reason")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string().chars().take(200).collect());
    AppError::new(codes::STORE_OPERATION_FAILED, "Elasticsearch request failed")
        .with_details(format!("{method} {path}: status={status}; reason={reason}"))
}

pub(crate) fn index_mapping(schema: &IndexSchema) -> Value {
    json!({
        "mappings": {
            "properties": {
                "embedding": {
                    "type": "dense_vector",
                    "dims": schema.dims,
                    "index": true,
                    "similarity": schema.similarity.as_str(),
                },
                "modality": {"type": "keyword"},
                "content": {"type": "binary"},
                "metadata": {"type": "object"},
                "description": {"type": "text"},
                "content_path": {"type": "keyword"},
            }
        }
    })
}

pub(crate) fn parse_mapping_schema(mapping: &Value, index: &str) -> Result<IndexSchema, AppError> {
    let embedding = mapping
        .as_object()
        .and_then(|m| m.values().next())
        .and_then(|idx| idx.pointer("/mappings/properties/embedding"))
        .ok_or_else(|| {
            AppError::new(codes::STORE_OPERATION_FAILED, "Index has no embedding field")
                .with_details(format!("index={index}"))
        })?;
    let dims = embedding.get("dims").and_then(Value::as_u64).ok_or_else(|| {
        AppError::new(codes::STORE_OPERATION_FAILED, "Embedding field has no dims")
            .with_details(format!("index={index}"))
    })?;
    match embedding.get("similarity").and_then(Value::as_str) {
        None | Some("cosine") => Ok(IndexSchema {
            dims: dims as usize,
            similarity: Similarity::Cosine,
        }),
        Some(other) => Err(AppError::new(
            codes::STORE_OPERATION_FAILED,
            "Index uses an unsupported similarity",
        )
        .with_details(format!("index={index}; similarity={other}"))),
    }
}

pub(crate) fn document_body(doc: &StoredDocument) -> Value {
    let mut body = json!({
        "embedding": doc.embedding,
        "modality": doc.modality,
        "description": doc.description,
        "metadata": doc.metadata,
    });
    if let Some(obj) = body.as_object_mut() {
        if let Some(c) = doc.content_b64.as_ref() {
            obj.insert("content".to_string(), Value::String(c.clone()));
        }
        if let Some(p) = doc.content_path.as_ref() {
            obj.insert("content_path".to_string(), Value::String(p.clone()));
        }
    }
    body
}

pub(crate) fn knn_body(query: &KnnQuery<'_>) -> Value {
    let mut knn = json!({
        "field": "embedding",
        "query_vector": query.vector,
        "k": query.k,
        "num_candidates": query.num_candidates.max(query.k),
    });
    if let (Some(m), Some(obj)) = (query.modality, knn.as_object_mut()) {
        obj.insert("filter".to_string(), json!({"term": {"modality": m.as_str()}}));
    }
    json!({
        "knn": knn,
        "size": query.k,
        "_source": SOURCE_FIELDS,
    })
}

#[derive(Debug, Deserialize)]
struct SourceFields {
    #[serde(default)]
    embedding: Vec<f32>,
    modality: Modality,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
    #[serde(default)]
    content_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f32>,
    #[serde(rename = "_source")]
    source: SourceFields,
}

#[derive(Debug, Deserialize)]
struct Hits {
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: Hits,
}

pub(crate) fn parse_search_hits(v: Value) -> Result<Vec<StoredHit>, AppError> {
    let resp: SearchResponse = serde_json::from_value(v).map_err(|e| {
        AppError::new(codes::STORE_OPERATION_FAILED, "Failed to decode search response")
            .with_details(e.to_string())
    })?;
    Ok(resp
        .hits
        .hits
        .into_iter()
        .map(|h| StoredHit {
            id: DocumentId(h.id),
            score: h.score.unwrap_or(0.0),
            modality: h.source.modality,
            content_b64: h.source.content,
            description: h.source.description.unwrap_or_default(),
            metadata: h.source.metadata.unwrap_or_default(),
            content_path: h.source.content_path,
        })
        .collect())
}

fn parse_record(id: &DocumentId, v: Value) -> Result<StoredRecord, AppError> {
    let source = v.get("_source").cloned().unwrap_or(Value::Null);
    let s: SourceFields = serde_json::from_value(source).map_err(|e| {
        AppError::new(codes::STORE_OPERATION_FAILED, "Failed to decode stored document")
            .with_details(format!("id={id}; err={e}"))
    })?;
    Ok(StoredRecord {
        id: id.clone(),
        doc: StoredDocument {
            embedding: s.embedding,
            modality: s.modality,
            content_b64: s.content,
            description: s.description.unwrap_or_default(),
            metadata: s.metadata.unwrap_or_default(),
            content_path: s.content_path,
        },
    })
}

fn modality_term(modality: Modality) -> Value {
    json!({"query": {"term": {"modality": modality.as_str()}}})
}

impl VectorStore for ElasticsearchStore {
    fn ping(&self) -> Result<(), AppError> {
        let (status, body) = self.send("GET", "/", None)?;
        if !(200..300).contains(&status) {
            return Err(AppError::new(
                codes::STORE_UNREACHABLE,
                "Elasticsearch ping failed",
            )
            .with_details(status_error("GET", "/", status, &body).details.unwrap_or_default()));
        }
        Ok(())
    }

    fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<IndexSchema, AppError> {
        let (status, _) = self.send("HEAD", index, None)?;
        if status == 200 {
            return self.read_schema(index);
        }

        let (status, body) = self.send("PUT", index, Some(&index_mapping(schema)))?;
        match status {
            200..=299 => {
                info!(index, dims = schema.dims, "created elasticsearch index");
                Ok(*schema)
            }
            // Lost a create race: the index exists now, report whatever it holds.
            400 if body.pointer("/error/type").and_then(Value::as_str)
                == Some("resource_already_exists_exception") =>
            {
                self.read_schema(index)
            }
            _ => Err(status_error("PUT", index, status, &body)),
        }
    }

    fn insert(&self, index: &str, doc: &StoredDocument) -> Result<DocumentId, AppError> {
        let v = self.expect_ok("POST", &format!("{index}/_doc?refresh=true"), Some(&document_body(doc)))?;
        let id = v.get("_id").and_then(Value::as_str).ok_or_else(|| {
            AppError::new(codes::STORE_OPERATION_FAILED, "Index response has no _id")
        })?;
        debug!(index, id, "indexed document");
        Ok(DocumentId(id.to_string()))
    }

    fn get(&self, index: &str, id: &DocumentId) -> Result<Option<StoredRecord>, AppError> {
        let path = format!("{index}/_doc/{}", id.as_str());
        let (status, body) = self.send("GET", &path, None)?;
        match status {
            404 => Ok(None),
            200..=299 => {
                if body.get("found").and_then(Value::as_bool) == Some(false) {
                    return Ok(None);
                }
                parse_record(id, body).map(Some)
            }
            _ => Err(status_error("GET", &path, status, &body)),
        }
    }

    fn knn(&self, index: &str, query: &KnnQuery<'_>) -> Result<Vec<StoredHit>, AppError> {
        if query.k == 0 {
            return Ok(Vec::new());
        }
        let v = self.expect_ok("POST", &format!("{index}/_search"), Some(&knn_body(query)))?;
        parse_search_hits(v)
    }

    fn delete(&self, index: &str, id: &DocumentId) -> Result<bool, AppError> {
        let path = format!("{index}/_doc/{}?refresh=true", id.as_str());
        let (status, body) = self.send("DELETE", &path, None)?;
        match status {
            404 => Ok(false),
            200..=299 => Ok(true),
            _ => Err(status_error("DELETE", &path, status, &body)),
        }
    }

    fn delete_by_modality(&self, index: &str, modality: Modality) -> Result<u64, AppError> {
        let v = self.expect_ok(
            "POST",
            &format!("{index}/_delete_by_query?refresh=true"),
            Some(&modality_term(modality)),
        )?;
        Ok(v.get("deleted").and_then(Value::as_u64).unwrap_or(0))
    }

    fn count(&self, index: &str, modality: Option<Modality>) -> Result<u64, AppError> {
        let path = format!("{index}/_count");
        let v = match modality {
            Some(m) => self.expect_ok("POST", &path, Some(&modality_term(m)))?,
            None => self.expect_ok("GET", &path, None)?,
        };
        v.get("count").and_then(Value::as_u64).ok_or_else(|| {
            AppError::new(codes::STORE_OPERATION_FAILED, "Count response has no count")
        })
    }
}
