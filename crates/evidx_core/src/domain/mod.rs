use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Content type of one evidence item. Declaration order is the iteration order everywhere
/// (bundles, summaries, reports).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Vision,
    Audio,
    Text,
    Depth,
    Video,
}

impl Modality {
    pub const ALL: [Modality; 5] = [
        Modality::Vision,
        Modality::Audio,
        Modality::Text,
        Modality::Depth,
        Modality::Video,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Vision => "vision",
            Modality::Audio => "audio",
            Modality::Text => "text",
            Modality::Depth => "depth",
            Modality::Video => "video",
        }
    }

    /// Modality the embedding oracle sees. Video frames are embedded as still images.
    pub fn oracle_modality(&self) -> Modality {
        match self {
            Modality::Video => Modality::Vision,
            m => *m,
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Modality {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        Modality::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == t)
            .ok_or_else(|| {
                AppError::new(codes::UNSUPPORTED_MODALITY, "Unsupported modality")
                    .with_details(format!("modality={s}"))
            })
    }
}

/// Store-assigned document identifier. Opaque; ordering is only used as a tie-breaker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        DocumentId(s.to_string())
    }
}

/// A stored evidence item as read back from the vector store.
///
/// Notes:
/// - `embedding.len()` equals the index dimension for every document in one index.
/// - `content` is the decoded original artifact; it is absent for reference-only documents.
/// - Documents are never mutated; re-indexing creates a new document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceDocument {
    pub id: DocumentId,
    pub embedding: Vec<f32>,
    pub modality: Modality,
    pub content: Option<Vec<u8>>,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
}

/// Ranked projection of a document. Never carries the embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub id: DocumentId,
    pub score: f32,
    pub modality: Modality,
    pub content: Option<Vec<u8>>,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
}

/// Per-modality ranked results; each sequence is ordered by descending score.
pub type EvidenceBundle = BTreeMap<Modality, Vec<QueryResult>>;

/// Two modalities' result sequences packaged for cross-modal analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationRequest {
    pub modality_a: Modality,
    pub results_a: Vec<QueryResult>,
    pub modality_b: Modality,
    pub results_b: Vec<QueryResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RowWarning {
    pub row: usize,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl RowWarning {
    pub fn new(row: usize, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_modality_set() {
        assert_eq!("vision".parse::<Modality>().unwrap(), Modality::Vision);
        assert_eq!(" Depth ".parse::<Modality>().unwrap(), Modality::Depth);
        let err = "smell".parse::<Modality>().unwrap_err();
        assert_eq!(err.code, codes::UNSUPPORTED_MODALITY);
    }

    #[test]
    fn modality_serializes_snake_case() {
        let s = serde_json::to_string(&Modality::Video).unwrap();
        assert_eq!(s, "\"video\"");
        let m: Modality = serde_json::from_str("\"audio\"").unwrap();
        assert_eq!(m, Modality::Audio);
        assert!(serde_json::from_str::<Modality>("\"test\"").is_err());
    }

    #[test]
    fn video_is_embedded_as_vision() {
        assert_eq!(Modality::Video.oracle_modality(), Modality::Vision);
        assert_eq!(Modality::Depth.oracle_modality(), Modality::Depth);
    }
}
