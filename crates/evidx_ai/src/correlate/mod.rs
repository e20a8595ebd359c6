use std::collections::BTreeMap;
use std::sync::Arc;

use evidx_core::domain::{CorrelationRequest, EvidenceBundle, Modality, QueryResult};
use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::embeddings::EmbeddingOrchestrator;
use crate::pool::{CancelToken, WorkerPool};
use crate::processor::{ContentRef, ModalityProcessor};
use crate::retrieve::Retriever;

/// Which documents a per-modality query may return.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalScope {
    /// Only documents of the query's own modality.
    SameModality,
    /// Anything in the shared space.
    #[default]
    AllModalities,
}

impl RetrievalScope {
    fn filter_for(self, modality: Modality) -> Option<Modality> {
        match self {
            RetrievalScope::SameModality => Some(modality),
            RetrievalScope::AllModalities => None,
        }
    }
}

pub struct CorrelationCoordinator {
    processor: ModalityProcessor,
    orchestrator: EmbeddingOrchestrator,
    retriever: Retriever,
    pool: Arc<WorkerPool>,
}

impl CorrelationCoordinator {
    pub fn new(
        processor: ModalityProcessor,
        orchestrator: EmbeddingOrchestrator,
        retriever: Retriever,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            processor,
            orchestrator,
            retriever,
            pool,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Process, embed, and search for one piece of query content.
    pub fn query_by_content(
        &self,
        content: &ContentRef,
        modality: Modality,
        k: usize,
        scope: RetrievalScope,
    ) -> Result<Vec<QueryResult>, AppError> {
        let prepared = self.processor.prepare(content, modality)?;
        let vector = self.orchestrator.embed(&prepared)?;
        self.retriever.search(&vector, k, scope.filter_for(modality))
    }

    /// Query every supplied modality in parallel. A modality that fails contributes an
    /// empty sequence; structural failures are logged the same way and never abort siblings.
    pub fn gather(
        &self,
        refs: &BTreeMap<Modality, ContentRef>,
        k: usize,
        scope: RetrievalScope,
        cancel: &CancelToken,
    ) -> EvidenceBundle {
        let jobs: Vec<(Modality, &ContentRef)> = refs.iter().map(|(m, c)| (*m, c)).collect();

        let results = self.pool.map(jobs, |(modality, content)| {
            if cancel.is_cancelled() {
                warn!(%modality, "gather cancelled before query");
                return (modality, Vec::new());
            }
            match self.query_by_content(content, modality, k, scope) {
                Ok(found) => (modality, found),
                Err(e) => {
                    warn!(
                        %modality,
                        source = %content.label(),
                        code = %e.code,
                        details = ?e.details,
                        "modality query failed; recording no evidence"
                    );
                    (modality, Vec::new())
                }
            }
        });

        let bundle: EvidenceBundle = results.into_iter().collect();
        info!(
            modalities = bundle.len(),
            hits = bundle.values().map(Vec::len).sum::<usize>(),
            "evidence gathered"
        );
        bundle
    }
}

/// Package two modalities' results for cross-modal analysis. `a == b` is allowed.
pub fn correlate(bundle: &EvidenceBundle, a: Modality, b: Modality) -> Result<CorrelationRequest, AppError> {
    let pick = |m: Modality| -> Result<Vec<QueryResult>, AppError> {
        match bundle.get(&m) {
            Some(results) if !results.is_empty() => Ok(results.clone()),
            Some(_) => Err(AppError::new(
                codes::INSUFFICIENT_EVIDENCE,
                "Modality has no results to correlate",
            )
            .with_details(format!("modality={m}"))),
            None => Err(AppError::new(
                codes::INSUFFICIENT_EVIDENCE,
                "Modality is absent from the evidence bundle",
            )
            .with_details(format!("modality={m}"))),
        }
    };
    Ok(CorrelationRequest {
        modality_a: a,
        results_a: pick(a)?,
        modality_b: b,
        results_b: pick(b)?,
    })
}

fn result_lines(modality: Modality, results: &[QueryResult], out: &mut Vec<String>) {
    out.push(format!("\n{}:", modality.as_str().to_uppercase()));
    for (i, r) in results.iter().enumerate() {
        let description = if r.description.is_empty() {
            "No description"
        } else {
            r.description.as_str()
        };
        out.push(format!("{}. {} (Similarity: {:.2})", i + 1, description, r.score));
    }
}

/// One modality's block, as it appears inside [`format_evidence`].
pub fn format_results(modality: Modality, results: &[QueryResult]) -> String {
    let mut lines = Vec::new();
    result_lines(modality, results, &mut lines);
    lines.join("\n")
}

/// Human-readable summary of a bundle, modalities in enum order.
pub fn format_evidence(bundle: &EvidenceBundle) -> String {
    let mut lines = Vec::new();
    for (modality, results) in bundle {
        result_lines(*modality, results, &mut lines);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use evidx_core::domain::{DocumentId, Metadata};
    use pretty_assertions::assert_eq;

    fn hit(id: &str, description: &str, score: f32, modality: Modality) -> QueryResult {
        QueryResult {
            id: DocumentId::from(id),
            score,
            modality,
            content: None,
            description: description.to_string(),
            metadata: Metadata::new(),
            content_path: None,
        }
    }

    #[test]
    fn format_evidence_is_stable() {
        let mut bundle = EvidenceBundle::new();
        bundle.insert(
            Modality::Audio,
            vec![hit("2", "Audio: laugh.wav", 0.876, Modality::Audio)],
        );
        bundle.insert(
            Modality::Vision,
            vec![
                hit("1", "Image: card.jpg", 0.95, Modality::Vision),
                hit("3", "", 0.5, Modality::Vision),
            ],
        );
        assert_eq!(
            format_evidence(&bundle),
            "\nVISION:\n1. Image: card.jpg (Similarity: 0.95)\n2. No description (Similarity: 0.50)\n\nAUDIO:\n1. Audio: laugh.wav (Similarity: 0.88)"
        );
    }

    #[test]
    fn correlate_requires_both_sides() {
        let mut bundle = EvidenceBundle::new();
        bundle.insert(Modality::Vision, vec![hit("1", "x", 0.9, Modality::Vision)]);
        bundle.insert(Modality::Audio, Vec::new());

        let err = correlate(&bundle, Modality::Audio, Modality::Vision).unwrap_err();
        assert_eq!(err.code, codes::INSUFFICIENT_EVIDENCE);
        let err = correlate(&bundle, Modality::Vision, Modality::Text).unwrap_err();
        assert_eq!(err.code, codes::INSUFFICIENT_EVIDENCE);

        let req = correlate(&bundle, Modality::Vision, Modality::Vision).unwrap();
        assert_eq!(req.results_a, req.results_b);
    }

    #[test]
    fn scope_maps_to_filter() {
        assert_eq!(RetrievalScope::default(), RetrievalScope::AllModalities);
        assert_eq!(RetrievalScope::SameModality.filter_for(Modality::Depth), Some(Modality::Depth));
        assert_eq!(RetrievalScope::AllModalities.filter_for(Modality::Depth), None);
    }
}
