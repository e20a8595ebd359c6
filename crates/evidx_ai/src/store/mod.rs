use evidx_core::domain::{DocumentId, Metadata, Modality};
use evidx_core::error::AppError;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod elasticsearch;
pub mod sqlite;

pub use client::{EvidenceStoreClient, NewEvidence};
pub use elasticsearch::ElasticsearchStore;
pub use sqlite::SqliteVectorStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    Cosine,
}

impl Similarity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Similarity::Cosine => "cosine",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSchema {
    pub dims: usize,
    pub similarity: Similarity,
}

impl IndexSchema {
    pub fn cosine(dims: usize) -> Self {
        Self {
            dims,
            similarity: Similarity::Cosine,
        }
    }
}

/// Document as persisted. Content is already base64 text at this layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDocument {
    pub embedding: Vec<f32>,
    pub modality: Modality,
    pub content_b64: Option<String>,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: DocumentId,
    pub doc: StoredDocument,
}

/// kNN hit; never carries the embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredHit {
    pub id: DocumentId,
    pub score: f32,
    pub modality: Modality,
    pub content_b64: Option<String>,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct KnnQuery<'a> {
    pub vector: &'a [f32],
    pub k: usize,
    pub num_candidates: usize,
    pub modality: Option<Modality>,
}

/// Backend seam for the evidence index. Scores follow `(1 + cosine) / 2`.
/// Writes are visible to the next read on return.
pub trait VectorStore: Send + Sync {
    fn ping(&self) -> Result<(), AppError>;
    /// Create the index if absent and return the schema now in effect.
    fn ensure_index(&self, index: &str, schema: &IndexSchema) -> Result<IndexSchema, AppError>;
    fn insert(&self, index: &str, doc: &StoredDocument) -> Result<DocumentId, AppError>;
    fn get(&self, index: &str, id: &DocumentId) -> Result<Option<StoredRecord>, AppError>;
    fn knn(&self, index: &str, query: &KnnQuery<'_>) -> Result<Vec<StoredHit>, AppError>;
    fn delete(&self, index: &str, id: &DocumentId) -> Result<bool, AppError>;
    fn delete_by_modality(&self, index: &str, modality: Modality) -> Result<u64, AppError>;
    fn count(&self, index: &str, modality: Option<Modality>) -> Result<u64, AppError>;
}

/// Cosine similarity mapped onto `[0, 1]`.
pub fn normalized_cosine(cosine: f32) -> f32 {
    ((1.0 + cosine) / 2.0).clamp(0.0, 1.0)
}
