use std::sync::Arc;

use evidx_ai::correlate::RetrievalScope;
use evidx_ai::embeddings::EmbeddingOracle;
use evidx_ai::processor::{ContentRef, PreparedInput};
use evidx_ai::retrieve::Retriever;
use evidx_ai::store::{EvidenceStoreClient, NewEvidence, SqliteVectorStore, VectorStore};
use evidx_ai::Services;
use evidx_core::config::EvidxConfig;
use evidx_core::domain::Modality;
use evidx_core::error::{codes, AppError};
use pretty_assertions::assert_eq;

const D: usize = 1024;

fn joker_vector() -> Vec<f32> {
    let mut v = vec![0.0; D];
    v[0] = 0.9;
    v[1] = 0.1;
    v
}

/// Maps the one known phrase to a fixed vector and everything else to a far-away one.
struct PhraseOracle;

impl EmbeddingOracle for PhraseOracle {
    fn embed(&self, inputs: &[PreparedInput], _modality: Modality) -> Result<Vec<Vec<f32>>, AppError> {
        Ok(inputs
            .iter()
            .map(|input| match input {
                PreparedInput::Text(t) if t == "Why so serious?" => joker_vector(),
                _ => {
                    let mut v = vec![0.0; D];
                    v[D - 1] = 1.0;
                    v
                }
            })
            .collect())
    }
}

fn client(dims: usize) -> Arc<EvidenceStoreClient> {
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    Arc::new(EvidenceStoreClient::connect(store, "gotham_evidence", dims).unwrap())
}

#[test]
fn identical_query_returns_the_document_with_full_score() {
    let client = client(D);
    client
        .upsert(
            NewEvidence::new(joker_vector(), Modality::Text)
                .with_content(b"Why so serious?".to_vec())
                .with_description("Why so serious?"),
        )
        .unwrap();

    let results = Retriever::new(client, 100).search(&joker_vector(), 1, None).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].description, "Why so serious?");
    assert_eq!(results[0].content.as_deref(), Some(&b"Why so serious?"[..]));
    assert!((results[0].score - 1.0).abs() < 1e-5, "score={}", results[0].score);
}

#[test]
fn query_by_content_runs_the_full_read_path() {
    let mut cfg = EvidxConfig::default();
    cfg.concurrency.max_workers = 2;
    let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::open_in_memory().unwrap());
    let services = Services::with_components(&cfg, Arc::new(PhraseOracle), store, None)
        .ok()
        .expect("services");

    services
        .client
        .upsert(NewEvidence::new(joker_vector(), Modality::Text).with_description("Why so serious?"))
        .unwrap();
    services
        .client
        .upsert(NewEvidence::new(joker_vector(), Modality::Vision).with_description("Image: card.jpg"))
        .unwrap();

    let text_only = services
        .coordinator
        .query_by_content(
            &ContentRef::Text("Why so serious?".to_string()),
            Modality::Text,
            5,
            RetrievalScope::SameModality,
        )
        .unwrap();
    assert_eq!(text_only.len(), 1);
    assert_eq!(text_only[0].modality, Modality::Text);

    let everything = services
        .coordinator
        .query_by_content(
            &ContentRef::Text("Why so serious?".to_string()),
            Modality::Text,
            5,
            RetrievalScope::AllModalities,
        )
        .unwrap();
    assert_eq!(everything.len(), 2);
}

#[test]
fn results_are_bounded_ordered_and_filtered() {
    let client = client(3);
    let docs = [
        (vec![1.0, 0.0, 0.0], Modality::Vision),
        (vec![0.9, 0.1, 0.0], Modality::Audio),
        (vec![0.5, 0.5, 0.0], Modality::Vision),
        (vec![0.0, 1.0, 0.0], Modality::Text),
        (vec![0.2, 0.0, 0.9], Modality::Vision),
        (vec![-1.0, 0.0, 0.0], Modality::Depth),
    ];
    for (v, m) in docs {
        client.upsert(NewEvidence::new(v, m)).unwrap();
    }
    let retriever = Retriever::new(client, 100);

    let top = retriever.search(&[1.0, 0.0, 0.0], 4, None).unwrap();
    assert_eq!(top.len(), 4);
    assert!(top.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(top[0].modality, Modality::Vision);
    assert_eq!(top[1].modality, Modality::Audio);

    let vision = retriever.search(&[1.0, 0.0, 0.0], 10, Some(Modality::Vision)).unwrap();
    assert_eq!(vision.len(), 3);
    assert!(vision.iter().all(|r| r.modality == Modality::Vision));

    assert!(retriever.search(&[1.0, 0.0, 0.0], 10, Some(Modality::Video)).unwrap().is_empty());
    assert!(retriever.search(&[1.0, 0.0, 0.0], 0, None).unwrap().is_empty());
}

#[test]
fn equal_scores_tie_break_by_id() {
    let client = client(2);
    let first = client.upsert(NewEvidence::new(vec![0.0, 1.0], Modality::Text)).unwrap();
    let second = client.upsert(NewEvidence::new(vec![0.0, 2.0], Modality::Text)).unwrap();
    let retriever = Retriever::new(client, 100);

    let ids: Vec<_> = retriever
        .search(&[0.0, 1.0], 2, None)
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert!(first < second);
    assert_eq!(ids, vec![first.clone(), second]);

    let only = retriever.search(&[0.0, 1.0], 1, None).unwrap();
    assert_eq!(only[0].id, first);
}

#[test]
fn wrong_query_length_is_dimension_mismatch() {
    let retriever = Retriever::new(client(4), 100);
    let err = retriever.search(&[1.0, 0.0], 3, None).unwrap_err();
    assert_eq!(err.code, codes::DIMENSION_MISMATCH);
}
