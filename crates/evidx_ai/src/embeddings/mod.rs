use evidx_core::domain::Modality;
use evidx_core::error::AppError;

use crate::processor::PreparedInput;

/// Maps prepared inputs of one modality into the shared vector space.
///
/// Implementations must return exactly one vector per input, in input order.
pub trait EmbeddingOracle: Send + Sync {
    fn embed(&self, inputs: &[PreparedInput], modality: Modality) -> Result<Vec<Vec<f32>>, AppError>;
}

pub mod http_oracle;
pub mod orchestrator;

pub use http_oracle::HttpEmbeddingOracle;
pub use orchestrator::{mean_vector, BatchEmbedding, EmbeddingOrchestrator, ItemFailure};
