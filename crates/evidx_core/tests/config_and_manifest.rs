use std::fs;

use evidx_core::config::{EvidxConfig, ReasoningProvider, StoreBackend};
use evidx_core::domain::Modality;
use evidx_core::error::codes;
use evidx_core::ingest::manifest::parse_manifest;
use pretty_assertions::assert_eq;

#[test]
fn config_file_round_trip_and_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evidx.toml");
    fs::write(
        &path,
        r#"
[store]
backend = "elasticsearch"
url = "https://es.example.test:9243"
index_name = "arkham"

[embedding]
dims = 512

[reasoning]
provider = "disabled"
"#,
    )
    .unwrap();

    let cfg = EvidxConfig::from_file(&path).expect("load");
    cfg.validate().expect("valid");
    assert_eq!(cfg.store.backend, StoreBackend::Elasticsearch);
    assert_eq!(cfg.store.index_name, "arkham");
    assert_eq!(cfg.embedding.dims, 512);
    assert_eq!(cfg.embedding.batch_size, 16);
    assert_eq!(cfg.reasoning.provider, ReasoningProvider::Disabled);
    assert_eq!(cfg.concurrency.max_workers, 4);
}

#[test]
fn broken_config_names_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    fs::write(&path, "[store\nbackend = ").unwrap();

    let err = EvidxConfig::from_file(&path).unwrap_err();
    assert_eq!(err.code, codes::CONFIG_INVALID);
    assert!(err.details.unwrap().contains("broken.toml"));

    let missing = EvidxConfig::from_file(dir.path().join("nope.toml")).unwrap_err();
    assert_eq!(missing.code, codes::CONFIG_INVALID);
}

#[test]
fn zero_workers_fail_validation_with_section_prefix() {
    let mut cfg = EvidxConfig::default();
    cfg.concurrency.max_workers = 0;
    let err = cfg.validate().unwrap_err();
    assert!(err.details.unwrap().starts_with("[concurrency]"));
}

#[test]
fn manifest_handles_unicode_and_header_case() {
    let csv = "Path,MODALITY,Description\n\
               \"images/cena do crime.jpg\",Vision,Cena do crime em Gotham \u{1F987}\n\
               depths/perfil.png,depth,Mapa de profundidade\n";
    let parsed = parse_manifest(csv).expect("parse");
    assert_eq!(parsed.skipped, 0);
    let got: Vec<(&str, Modality)> = parsed
        .entries
        .iter()
        .map(|e| (e.path.as_str(), e.modality))
        .collect();
    assert_eq!(
        got,
        vec![
            ("images/cena do crime.jpg", Modality::Vision),
            ("depths/perfil.png", Modality::Depth),
        ]
    );
    assert!(parsed.entries[0].description.ends_with('\u{1F987}'));
}
