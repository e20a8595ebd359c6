use std::sync::Arc;

use evidx_core::domain::Modality;
use evidx_core::error::{codes, AppError};
use tracing::{debug, warn};

use super::EmbeddingOracle;
use crate::processor::{PreparedInput, ProcessedInput};

#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub index: usize,
    pub label: String,
    pub error: AppError,
}

/// Result of a batch call: `vectors[i]` is `None` exactly when item `i` appears in `failures`.
#[derive(Debug, Clone, Default)]
pub struct BatchEmbedding {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failures: Vec<ItemFailure>,
}

#[derive(Clone)]
pub struct EmbeddingOrchestrator {
    oracle: Arc<dyn EmbeddingOracle>,
    dims: usize,
    batch_size: usize,
}

impl EmbeddingOrchestrator {
    pub fn new(oracle: Arc<dyn EmbeddingOracle>, dims: usize, batch_size: usize) -> Self {
        Self {
            oracle,
            dims,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    fn check_vector(&self, v: &[f32]) -> Result<(), AppError> {
        if v.len() != self.dims {
            return Err(AppError::new(
                codes::DIMENSION_MISMATCH,
                "Embedding oracle returned a vector of the wrong length",
            )
            .with_details(format!("expected={}; got={}", self.dims, v.len())));
        }
        if let Some(pos) = v.iter().position(|x| !x.is_finite()) {
            return Err(AppError::new(
                codes::NON_FINITE_VECTOR,
                "Embedding oracle returned a non-finite component",
            )
            .with_details(format!("position={pos}; value={}", v[pos])));
        }
        Ok(())
    }

    fn embed_one(&self, input: &PreparedInput, modality: Modality) -> Result<Vec<f32>, AppError> {
        let mut out = self.oracle.embed(std::slice::from_ref(input), modality)?;
        if out.len() != 1 {
            return Err(AppError::new(
                codes::EMBEDDING_FAILED,
                "Embedding oracle returned the wrong number of vectors",
            )
            .with_details(format!("expected=1; got={}", out.len())));
        }
        let v = out.remove(0);
        self.check_vector(&v)?;
        Ok(v)
    }

    /// One aggregated vector per evidence item. Video frames are embedded one at a time
    /// and averaged over the frames that succeed.
    pub fn embed(&self, prepared: &ProcessedInput) -> Result<Vec<f32>, AppError> {
        let oracle_modality = prepared.modality.oracle_modality();
        if prepared.inputs.is_empty() {
            return Err(AppError::new(
                codes::NO_EMBEDDING_PRODUCED,
                "No input could be embedded",
            )
            .with_details(format!(
                "modality={}; skipped_frames={}",
                prepared.modality, prepared.skipped_frames
            )));
        }

        if prepared.modality != Modality::Video {
            return self.embed_one(&prepared.inputs[0], oracle_modality);
        }

        let mut frames: Vec<Vec<f32>> = Vec::with_capacity(prepared.inputs.len());
        for (i, input) in prepared.inputs.iter().enumerate() {
            match self.embed_one(input, oracle_modality) {
                Ok(v) => frames.push(v),
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => {
                    warn!(frame = i, code = %e.code, details = ?e.details, "frame embedding failed; skipping");
                }
            }
        }

        debug!(frames = frames.len(), of = prepared.inputs.len(), "video frames embedded");
        mean_vector(&frames).ok_or_else(|| {
            AppError::new(
                codes::NO_EMBEDDING_PRODUCED,
                "No video frame produced an embedding",
            )
            .with_details(format!("frames={}", prepared.inputs.len()))
        })
    }

    /// Embed many single-input items of one modality. Chunks are sent as one oracle call;
    /// a failing chunk falls back to per-item calls so one bad item never sinks its siblings.
    pub fn embed_batch(
        &self,
        inputs: &[PreparedInput],
        labels: &[String],
        modality: Modality,
    ) -> Result<BatchEmbedding, AppError> {
        let oracle_modality = modality.oracle_modality();
        let mut out = BatchEmbedding {
            vectors: vec![None; inputs.len()],
            failures: Vec::new(),
        };

        for (chunk_idx, chunk) in inputs.chunks(self.batch_size).enumerate() {
            let offset = chunk_idx * self.batch_size;
            match self.oracle.embed(chunk, oracle_modality) {
                Ok(vectors) if vectors.len() == chunk.len() => {
                    for (i, v) in vectors.into_iter().enumerate() {
                        self.check_vector(&v)?;
                        out.vectors[offset + i] = Some(v);
                    }
                    continue;
                }
                Ok(vectors) => {
                    warn!(
                        %modality,
                        expected = chunk.len(),
                        got = vectors.len(),
                        "batch returned the wrong number of vectors; retrying per item"
                    );
                }
                Err(e) if e.is_structural() => return Err(e),
                Err(e) => {
                    warn!(%modality, size = chunk.len(), code = %e.code, "batch embedding failed; retrying per item");
                }
            }

            for (i, input) in chunk.iter().enumerate() {
                let index = offset + i;
                match self.embed_one(input, oracle_modality) {
                    Ok(v) => out.vectors[index] = Some(v),
                    Err(e) if e.is_structural() => return Err(e),
                    Err(error) => {
                        let label = labels.get(index).cloned().unwrap_or_else(|| format!("#{index}"));
                        warn!(index, %label, code = %error.code, details = ?error.details, "item embedding failed");
                        out.failures.push(ItemFailure { index, label, error });
                    }
                }
            }
        }

        Ok(out)
    }
}

/// Element-wise mean, accumulated in f64. `None` for an empty slice.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = vectors.first()?;
    let mut acc = vec![0.0f64; first.len()];
    for v in vectors {
        for (a, x) in acc.iter_mut().zip(v.iter()) {
            *a += f64::from(*x);
        }
    }
    let n = vectors.len() as f64;
    Some(acc.into_iter().map(|a| (a / n) as f32).collect())
}
