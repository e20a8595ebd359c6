use std::sync::Arc;

use evidx_core::domain::{Modality, QueryResult};
use evidx_core::error::AppError;
use tracing::debug;

use crate::store::client::decode_content;
use crate::store::{EvidenceStoreClient, KnnQuery, StoredHit};

pub(crate) mod similarity;

/// Read side of the evidence index: nearest neighbours of a query vector.
#[derive(Clone)]
pub struct Retriever {
    client: Arc<EvidenceStoreClient>,
    num_candidates: usize,
}

impl Retriever {
    pub fn new(client: Arc<EvidenceStoreClient>, num_candidates: usize) -> Self {
        Self {
            client,
            num_candidates: num_candidates.max(1),
        }
    }

    pub fn client(&self) -> &Arc<EvidenceStoreClient> {
        &self.client
    }

    /// At most `k` results, descending score, ties broken by id ascending.
    /// With a filter, only documents of that modality are returned.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<Modality>,
    ) -> Result<Vec<QueryResult>, AppError> {
        self.client.check_vector(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let knn = KnnQuery {
            vector: query,
            k,
            num_candidates: self.num_candidates.max(k),
            modality: filter,
        };
        let mut hits: Vec<StoredHit> = self.client.knn(&knn)?;
        if let Some(m) = filter {
            hits.retain(|h| h.modality == m);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(k);

        let mut out = Vec::with_capacity(hits.len());
        for h in hits {
            out.push(QueryResult {
                content: h.content_b64.as_deref().map(decode_content).transpose()?,
                id: h.id,
                score: h.score,
                modality: h.modality,
                description: h.description,
                metadata: h.metadata,
                content_path: h.content_path,
            });
        }
        debug!(k, filter = ?filter, returned = out.len(), "search complete");
        Ok(out)
    }
}
