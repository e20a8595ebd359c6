use std::sync::Arc;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use evidx_core::domain::{DocumentId, EvidenceDocument, Metadata, Modality};
use evidx_core::error::{codes, AppError};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use super::{IndexSchema, KnnQuery, StoredDocument, StoredHit, VectorStore};

pub const CONTENT_SHA256_KEY: &str = "content_sha256";

/// Accepts padded and unpadded standard base64 on read; writes are always padded.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub fn encode_content(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_content(b64: &str) -> Result<Vec<u8>, AppError> {
    LENIENT.decode(b64.trim()).map_err(|e| {
        AppError::new(codes::STORE_OPERATION_FAILED, "Stored content is not valid base64")
            .with_details(e.to_string())
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvidence {
    pub embedding: Vec<f32>,
    pub modality: Modality,
    pub content: Option<Vec<u8>>,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
}

impl NewEvidence {
    pub fn new(embedding: Vec<f32>, modality: Modality) -> Self {
        Self {
            embedding,
            modality,
            content: None,
            description: String::new(),
            metadata: Metadata::new(),
            content_path: None,
        }
    }

    pub fn with_content(mut self, content: Vec<u8>) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_content_path(mut self, path: impl Into<String>) -> Self {
        self.content_path = Some(path.into());
        self
    }
}

/// Typed access to one named evidence index of fixed dimension.
#[derive(Clone)]
pub struct EvidenceStoreClient {
    store: Arc<dyn VectorStore>,
    index: String,
    dims: usize,
}

impl EvidenceStoreClient {
    /// Verify liveness, then make sure the index exists with `dims` dimensions.
    pub fn connect(store: Arc<dyn VectorStore>, index: &str, dims: usize) -> Result<Self, AppError> {
        if dims == 0 {
            return Err(AppError::new(codes::CONFIG_INVALID, "Index dimension must be > 0"));
        }
        store.ping().map_err(|e| {
            if e.is(codes::STORE_UNREACHABLE) {
                e
            } else {
                AppError::new(codes::STORE_UNREACHABLE, "Vector store liveness check failed")
                    .with_details(e.to_string())
                    .with_retryable(true)
            }
        })?;

        let client = Self {
            store,
            index: index.to_string(),
            dims,
        };
        client.ensure_index()?;
        Ok(client)
    }

    /// Idempotent. An existing index is never altered; a dimension disagreement is reported.
    pub fn ensure_index(&self) -> Result<IndexSchema, AppError> {
        let wanted = IndexSchema::cosine(self.dims);
        let effective = self.store.ensure_index(&self.index, &wanted)?;
        if effective.dims != self.dims {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Existing index has a different dimension",
            )
            .with_details(format!(
                "index={}; existing={}; requested={}",
                self.index, effective.dims, self.dims
            )));
        }
        Ok(effective)
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn check_vector(&self, v: &[f32]) -> Result<(), AppError> {
        if v.len() != self.dims {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Vector length does not match index dimension",
            )
            .with_details(format!("index={}; expected={}; got={}", self.index, self.dims, v.len())));
        }
        if let Some(pos) = v.iter().position(|x| !x.is_finite()) {
            return Err(AppError::new(codes::NON_FINITE_VECTOR, "Vector has a non-finite component")
                .with_details(format!("index={}; position={pos}; value={}", self.index, v[pos])));
        }
        Ok(())
    }

    pub fn upsert(&self, evidence: NewEvidence) -> Result<DocumentId, AppError> {
        self.check_vector(&evidence.embedding)?;

        let NewEvidence {
            embedding,
            modality,
            content,
            description,
            mut metadata,
            content_path,
        } = evidence;

        if content.is_none() && content_path.is_none() && description.trim().is_empty() {
            warn!(%modality, "indexing document with no content, path, or description");
        }

        if let Some(bytes) = content.as_deref() {
            if !metadata.contains_key(CONTENT_SHA256_KEY) {
                let digest = hex::encode(Sha256::digest(bytes));
                metadata.insert(CONTENT_SHA256_KEY.to_string(), digest.into());
            }
        }

        let doc = StoredDocument {
            embedding,
            modality,
            content_b64: content.as_deref().map(encode_content),
            description,
            metadata,
            content_path,
        };
        let id = self.store.insert(&self.index, &doc)?;
        info!(index = %self.index, %id, %modality, "indexed evidence");
        Ok(id)
    }

    pub fn get(&self, id: &DocumentId) -> Result<Option<EvidenceDocument>, AppError> {
        let Some(rec) = self.store.get(&self.index, id)? else {
            return Ok(None);
        };
        let content = rec.doc.content_b64.as_deref().map(decode_content).transpose()?;
        Ok(Some(EvidenceDocument {
            id: rec.id,
            embedding: rec.doc.embedding,
            modality: rec.doc.modality,
            content,
            description: rec.doc.description,
            metadata: rec.doc.metadata,
            content_path: rec.doc.content_path,
        }))
    }

    pub fn delete(&self, id: &DocumentId) -> Result<bool, AppError> {
        let deleted = self.store.delete(&self.index, id)?;
        if deleted {
            info!(index = %self.index, %id, "deleted evidence");
        }
        Ok(deleted)
    }

    pub fn delete_where(&self, modality: Modality) -> Result<u64, AppError> {
        let n = self.store.delete_by_modality(&self.index, modality)?;
        info!(index = %self.index, %modality, deleted = n, "deleted evidence by modality");
        Ok(n)
    }

    pub fn count(&self, modality: Option<Modality>) -> Result<u64, AppError> {
        self.store.count(&self.index, modality)
    }

    pub(crate) fn knn(&self, query: &KnnQuery<'_>) -> Result<Vec<StoredHit>, AppError> {
        self.store.knn(&self.index, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_encoding_is_padded_and_decoding_is_lenient() {
        assert_eq!(encode_content(b"hi"), "aGk=");
        assert_eq!(decode_content("aGk=").unwrap(), b"hi".to_vec());
        assert_eq!(decode_content("aGk").unwrap(), b"hi".to_vec());
        assert!(decode_content("@@@").is_err());
    }
}
