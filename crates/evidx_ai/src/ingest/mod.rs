use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;

use evidx_core::clock::now_rfc3339_utc;
use evidx_core::domain::{DocumentId, Metadata, Modality};
use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::embeddings::EmbeddingOrchestrator;
use crate::pool::{CancelToken, WorkerPool};
use crate::processor::{ContentRef, ModalityProcessor, PreparedInput, ProcessedInput};
use crate::store::{EvidenceStoreClient, NewEvidence};

pub mod discover;

pub use discover::{discover_directory, items_from_manifest, ManifestItems};

/// One artifact to index.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestItem {
    pub source: ContentRef,
    pub modality: Modality,
    pub description: String,
    pub metadata: Metadata,
    pub content_path: Option<String>,
    /// Keep the original bytes in the document (base64) in addition to the embedding.
    pub store_content: bool,
}

impl IngestItem {
    pub fn new(source: ContentRef, modality: Modality) -> Self {
        Self {
            source,
            modality,
            description: String::new(),
            metadata: Metadata::new(),
            content_path: None,
            store_content: true,
        }
    }

    pub fn label(&self) -> String {
        self.content_path
            .clone()
            .unwrap_or_else(|| self.source.label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    Indexed { id: DocumentId },
    Failed { code: String, message: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestItemReport {
    pub label: String,
    pub modality: Modality,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    pub started_at: String,
    pub finished_at: String,
    pub indexed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Same order as the submitted items.
    pub items: Vec<IngestItemReport>,
}

fn failed(e: &AppError) -> ItemOutcome {
    ItemOutcome::Failed {
        code: e.code.clone(),
        message: e.message.clone(),
    }
}

fn load_content(item: &IngestItem) -> Result<Option<Vec<u8>>, AppError> {
    if !item.store_content {
        return Ok(None);
    }
    match &item.source {
        ContentRef::Path(p) if p.is_dir() => Ok(None),
        ContentRef::Path(p) => fs::read(p).map(Some).map_err(|e| {
            AppError::new(codes::CONTENT_NOT_FOUND, "Failed to read content file")
                .with_details(format!("path={}; err={}", p.display(), e))
        }),
        ContentRef::Bytes(b) => Ok(Some(b.clone())),
        ContentRef::Text(t) => Ok(Some(t.as_bytes().to_vec())),
    }
}

fn entry(index: usize, label: String, modality: Modality, outcome: ItemOutcome) -> (usize, IngestItemReport) {
    (
        index,
        IngestItemReport {
            label,
            modality,
            outcome,
        },
    )
}

/// Append the ids a failed run already wrote, so the caller can account for them.
fn with_written_ids(e: AppError, written: &[DocumentId]) -> AppError {
    if written.is_empty() {
        return e;
    }
    let ids = written.iter().map(DocumentId::as_str).collect::<Vec<_>>().join(",");
    let details = match e.details.as_deref() {
        Some(d) => format!("{d}; written_ids={ids}"),
        None => format!("written_ids={ids}"),
    };
    e.with_details(details)
}

struct Prepared {
    index: usize,
    input: ProcessedInput,
    content: Option<Vec<u8>>,
}

/// Batch writer: process, embed, and upsert many items on the worker pool.
pub struct Ingestor {
    processor: ModalityProcessor,
    orchestrator: EmbeddingOrchestrator,
    client: Arc<EvidenceStoreClient>,
    pool: Arc<WorkerPool>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        processor: ModalityProcessor,
        orchestrator: EmbeddingOrchestrator,
        client: Arc<EvidenceStoreClient>,
        pool: Arc<WorkerPool>,
        batch_size: usize,
    ) -> Self {
        Self {
            processor,
            orchestrator,
            client,
            pool,
            batch_size: batch_size.max(1),
        }
    }

    /// Index every item. Item-level failures are tallied in the report; structural
    /// failures (store unreachable, dimension mismatch, oracle unreachable) abort with `Err`.
    ///
    /// On abort, chunks still running stop before their next write, and the error details end
    /// with `written_ids=...` listing every document this call did write.
    pub fn ingest(&self, items: Vec<IngestItem>, cancel: &CancelToken) -> Result<IngestReport, AppError> {
        let started_at = now_rfc3339_utc()?;
        let total = items.len();

        let mut by_modality: BTreeMap<Modality, Vec<(usize, IngestItem)>> = BTreeMap::new();
        for (i, item) in items.into_iter().enumerate() {
            by_modality.entry(item.modality).or_default().push((i, item));
        }
        let mut chunks: Vec<(Modality, Vec<(usize, IngestItem)>)> = Vec::new();
        for (modality, group) in by_modality {
            let mut group = group.into_iter().peekable();
            while group.peek().is_some() {
                chunks.push((modality, group.by_ref().take(self.batch_size).collect()));
            }
        }

        info!(items = total, chunks = chunks.len(), workers = self.pool.workers(), "ingest started");
        let abort = CancelToken::new();
        let results = self.pool.map(chunks, |(modality, chunk)| {
            self.ingest_chunk(modality, chunk, &Stop { cancel, abort: &abort })
        });

        let mut slots: Vec<Option<IngestItemReport>> = vec![None; total];
        let mut fatal: Option<AppError> = None;
        for (entries, err) in results {
            for (i, report) in entries {
                slots[i] = Some(report);
            }
            if fatal.is_none() {
                fatal = err;
            }
        }
        if let Some(e) = fatal {
            let written: Vec<DocumentId> = slots
                .iter()
                .flatten()
                .filter_map(|r| match &r.outcome {
                    ItemOutcome::Indexed { id } => Some(id.clone()),
                    _ => None,
                })
                .collect();
            error!(code = %e.code, written = written.len(), "ingest aborted");
            return Err(with_written_ids(e, &written));
        }
        let reports: Vec<IngestItemReport> = slots.into_iter().flatten().collect();

        let mut report = IngestReport {
            started_at,
            finished_at: now_rfc3339_utc()?,
            indexed: 0,
            failed: 0,
            cancelled: 0,
            items: reports,
        };
        for r in &report.items {
            match r.outcome {
                ItemOutcome::Indexed { .. } => report.indexed += 1,
                ItemOutcome::Failed { .. } => report.failed += 1,
                ItemOutcome::Cancelled => report.cancelled += 1,
            }
        }
        info!(
            indexed = report.indexed,
            failed = report.failed,
            cancelled = report.cancelled,
            "ingest finished"
        );
        Ok(report)
    }

    /// Entries for the items this chunk settled, plus the structural error that stopped it.
    fn ingest_chunk(
        &self,
        modality: Modality,
        chunk: Vec<(usize, IngestItem)>,
        stop: &Stop<'_>,
    ) -> (Vec<(usize, IngestItemReport)>, Option<AppError>) {
        let mut out: Vec<(usize, IngestItemReport)> = Vec::with_capacity(chunk.len());
        let mut labels: BTreeMap<usize, String> = BTreeMap::new();
        let mut prepared: Vec<Prepared> = Vec::new();
        let mut pending: BTreeMap<usize, IngestItem> = BTreeMap::new();

        for (index, item) in chunk {
            let label = item.label();
            if stop.requested() {
                out.push(entry(index, label, modality, ItemOutcome::Cancelled));
                continue;
            }
            let step = self
                .processor
                .prepare(&item.source, modality)
                .and_then(|input| Ok((input, load_content(&item)?)));
            match step {
                Ok((input, content)) => {
                    labels.insert(index, label);
                    prepared.push(Prepared { index, input, content });
                    pending.insert(index, item);
                }
                Err(e) => {
                    warn!(%label, code = %e.code, details = ?e.details, "skipping item");
                    out.push(entry(index, label, modality, failed(&e)));
                }
            }
        }

        // Embed.
        let mut vectors: Vec<(Prepared, Result<Vec<f32>, AppError>)> = Vec::with_capacity(prepared.len());
        if stop.requested() {
            for p in prepared {
                let label = labels.remove(&p.index).unwrap_or_default();
                out.push(entry(p.index, label, modality, ItemOutcome::Cancelled));
            }
            return (out, None);
        }
        if modality == Modality::Video {
            for p in prepared {
                match self.orchestrator.embed(&p.input) {
                    Err(e) if e.is_structural() => return stop.trip(out, e),
                    res => vectors.push((p, res)),
                }
            }
        } else {
            let inputs: Vec<PreparedInput> = prepared
                .iter()
                .map(|p| p.input.inputs.first().cloned().unwrap_or_else(|| PreparedInput::Text(String::new())))
                .collect();
            let batch_labels: Vec<String> = prepared
                .iter()
                .map(|p| labels.get(&p.index).cloned().unwrap_or_default())
                .collect();
            let mut batch = match self.orchestrator.embed_batch(&inputs, &batch_labels, modality) {
                Ok(b) => b,
                Err(e) => return stop.trip(out, e),
            };
            let mut errors: BTreeMap<usize, AppError> =
                batch.failures.drain(..).map(|f| (f.index, f.error)).collect();
            for (i, (p, v)) in prepared.into_iter().zip(batch.vectors).enumerate() {
                let res = match v {
                    Some(v) => Ok(v),
                    None => Err(errors.remove(&i).unwrap_or_else(|| {
                        AppError::new(codes::NO_EMBEDDING_PRODUCED, "No embedding produced")
                    })),
                };
                vectors.push((p, res));
            }
        }

        // Write.
        for (p, res) in vectors {
            let label = labels.remove(&p.index).unwrap_or_default();
            let Some(item) = pending.remove(&p.index) else {
                continue;
            };
            let embedding = match res {
                Ok(v) => v,
                Err(e) => {
                    out.push(entry(p.index, label, modality, failed(&e)));
                    continue;
                }
            };
            if stop.requested() {
                out.push(entry(p.index, label, modality, ItemOutcome::Cancelled));
                continue;
            }

            let mut metadata = item.metadata;
            if p.input.skipped_frames > 0 {
                metadata.insert("skipped_frames".to_string(), p.input.skipped_frames.into());
            }
            let evidence = NewEvidence {
                embedding,
                modality,
                content: p.content,
                description: item.description,
                metadata,
                content_path: item.content_path,
            };
            match self.client.upsert(evidence) {
                Ok(id) => out.push(entry(p.index, label, modality, ItemOutcome::Indexed { id })),
                Err(e) if e.is_structural() => return stop.trip(out, e),
                Err(e) => {
                    warn!(%label, code = %e.code, details = ?e.details, "store write failed");
                    out.push(entry(p.index, label, modality, failed(&e)));
                }
            }
        }

        (out, None)
    }
}

/// Caller cancellation plus the run-wide abort raised by the first structural failure.
struct Stop<'a> {
    cancel: &'a CancelToken,
    abort: &'a CancelToken,
}

impl Stop<'_> {
    fn requested(&self) -> bool {
        self.cancel.is_cancelled() || self.abort.is_cancelled()
    }

    fn trip<T>(&self, settled: Vec<T>, e: AppError) -> (Vec<T>, Option<AppError>) {
        self.abort.cancel();
        (settled, Some(e))
    }
}
