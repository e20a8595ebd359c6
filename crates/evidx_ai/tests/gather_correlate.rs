use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use evidx_ai::correlate::{correlate, format_evidence, RetrievalScope};
use evidx_ai::embeddings::EmbeddingOracle;
use evidx_ai::pool::CancelToken;
use evidx_ai::processor::{ContentRef, PreparedInput};
use evidx_ai::reasoning::{ReasoningOracle, ReasoningRequest};
use evidx_ai::store::{NewEvidence, SqliteVectorStore, VectorStore};
use evidx_ai::Services;
use evidx_core::config::EvidxConfig;
use evidx_core::domain::Modality;
use evidx_core::error::{codes, AppError};
use image::{ImageFormat, Rgb, RgbImage};
use pretty_assertions::assert_eq;

const D: usize = 4;

/// Text and images embed fine; audio always fails.
struct DeafOracle;

impl EmbeddingOracle for DeafOracle {
    fn embed(&self, inputs: &[PreparedInput], modality: Modality) -> Result<Vec<Vec<f32>>, AppError> {
        match modality {
            Modality::Audio => Err(AppError::new(codes::EMBEDDING_FAILED, "audio model unavailable")),
            Modality::Text => Ok(vec![vec![1.0, 0.2, 0.0, 0.0]; inputs.len()]),
            _ => Ok(vec![vec![0.2, 1.0, 0.0, 0.0]; inputs.len()]),
        }
    }
}

#[derive(Default)]
struct RecordingReasoner {
    seen: Mutex<Vec<ReasoningRequest>>,
    reply: String,
}

impl ReasoningOracle for RecordingReasoner {
    fn analyze(&self, req: &ReasoningRequest) -> Result<String, AppError> {
        self.seen.lock().unwrap().push(req.clone());
        Ok(self.reply.clone())
    }
}

fn png() -> Vec<u8> {
    let img = RgbImage::from_pixel(8, 8, Rgb([200, 30, 30]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

fn wav() -> Vec<u8> {
    let mut b = b"RIFF".to_vec();
    b.extend_from_slice(&36u32.to_le_bytes());
    b.extend_from_slice(b"WAVEfmt ");
    b
}

fn services(reasoner: Option<Arc<dyn ReasoningOracle>>) -> Services {
    let mut cfg = EvidxConfig::default();
    cfg.embedding.dims = D;
    cfg.concurrency.max_workers = 3;
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    let s = Services::with_components(&cfg, Arc::new(DeafOracle), store, reasoner)
        .ok()
        .expect("services");
    s.client
        .upsert(NewEvidence::new(vec![1.0, 0.2, 0.0, 0.0], Modality::Text).with_description("Text: note.txt"))
        .unwrap();
    s.client
        .upsert(NewEvidence::new(vec![0.2, 1.0, 0.0, 0.0], Modality::Vision).with_description("Image: card.jpg"))
        .unwrap();
    s
}

fn query_refs() -> BTreeMap<Modality, ContentRef> {
    BTreeMap::from([
        (Modality::Vision, ContentRef::Bytes(png())),
        (Modality::Audio, ContentRef::Bytes(wav())),
        (Modality::Text, ContentRef::Text("Why so serious?".to_string())),
    ])
}

#[test]
fn one_failing_modality_does_not_sink_the_gather() {
    let s = services(None);
    let bundle = s
        .coordinator
        .gather(&query_refs(), 5, RetrievalScope::SameModality, &CancelToken::new());

    assert_eq!(
        bundle.keys().copied().collect::<Vec<_>>(),
        vec![Modality::Vision, Modality::Audio, Modality::Text]
    );
    assert!(bundle[&Modality::Audio].is_empty());
    assert_eq!(bundle[&Modality::Vision].len(), 1);
    assert_eq!(bundle[&Modality::Vision][0].description, "Image: card.jpg");
    assert_eq!(bundle[&Modality::Text][0].description, "Text: note.txt");

    let err = correlate(&bundle, Modality::Audio, Modality::Vision).unwrap_err();
    assert_eq!(err.code, codes::INSUFFICIENT_EVIDENCE);
    let req = correlate(&bundle, Modality::Vision, Modality::Text).unwrap();
    assert_eq!(req.results_a.len(), 1);
    assert_eq!(req.results_b.len(), 1);
}

#[test]
fn cross_modal_scope_reads_the_shared_space() {
    let s = services(None);
    let bundle = s
        .coordinator
        .gather(&query_refs(), 5, RetrievalScope::AllModalities, &CancelToken::new());
    assert_eq!(bundle[&Modality::Vision].len(), 2);
    assert_eq!(bundle[&Modality::Vision][0].modality, Modality::Vision);
    assert_eq!(bundle[&Modality::Text][0].modality, Modality::Text);
}

#[test]
fn cancelled_gather_returns_empty_sequences() {
    let s = services(None);
    let cancel = CancelToken::new();
    cancel.cancel();
    let bundle = s.coordinator.gather(&query_refs(), 5, RetrievalScope::default(), &cancel);
    assert_eq!(bundle.len(), 3);
    assert!(bundle.values().all(Vec::is_empty));
}

#[test]
fn analyses_wrap_formatted_evidence() {
    let reasoner = Arc::new(RecordingReasoner {
        reply: "Probable suspect: the Joker (85%)".to_string(),
        ..Default::default()
    });
    let s = services(Some(reasoner.clone() as Arc<dyn ReasoningOracle>));
    let bundle = s
        .coordinator
        .gather(&query_refs(), 5, RetrievalScope::SameModality, &CancelToken::new());

    let report = s.analyst().unwrap().analyze_bundle(&bundle).unwrap();
    assert_eq!(report, "Probable suspect: the Joker (85%)");

    let req = correlate(&bundle, Modality::Vision, Modality::Text).unwrap();
    s.analyst().unwrap().analyze_correlation(&req).unwrap();

    let seen = reasoner.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].prompt.contains(&format_evidence(&bundle)));
    assert!(seen[0].prompt.contains("0-100%"));
    assert_eq!(seen[0].max_tokens, 1000);
    assert_eq!(seen[1].max_tokens, 500);
    assert!(seen[1].prompt.contains("\nVISION:\n1. Image: card.jpg (Similarity: "));
    assert_eq!(seen[1].prompt.matches("VISION:").count(), 1);
    assert_eq!(seen[1].prompt.matches("TEXT:").count(), 1);
    assert!(seen[1].prompt.contains("Correlation strength (0-100%)"));
    assert!((seen[0].temperature - 0.7).abs() < 1e-6);
}

#[test]
fn empty_model_output_is_a_reasoning_failure() {
    let s = services(Some(Arc::new(RecordingReasoner::default())));
    let bundle = s
        .coordinator
        .gather(&query_refs(), 5, RetrievalScope::SameModality, &CancelToken::new());
    let err = s.analyst().unwrap().analyze_bundle(&bundle).unwrap_err();
    assert_eq!(err.code, codes::REASONING_FAILED);
}

#[test]
fn analysis_needs_evidence_and_an_enabled_reasoner() {
    let s = services(None);
    let err = s.analyst().err().expect("disabled");
    assert_eq!(err.code, codes::CONFIG_INVALID);

    let s = services(Some(Arc::new(RecordingReasoner::default())));
    let bundle = BTreeMap::from([(Modality::Audio, Vec::new())]);
    let err = s.analyst().unwrap().analyze_bundle(&bundle).unwrap_err();
    assert_eq!(err.code, codes::INSUFFICIENT_EVIDENCE);
}
