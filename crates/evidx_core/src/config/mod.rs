//! Runtime configuration for the evidence indexing services.
//!
//! Loaded from TOML, then optionally overridden from the environment:
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! index_name = "gotham_evidence"
//! sqlite_path = "data/evidx.sqlite"
//!
//! [embedding]
//! url = "http://127.0.0.1:8808"
//! dims = 1024
//!
//! [reasoning]
//! provider = "ollama"
//! model = "llama3.1"
//! ```
//!
//! Invalid values are rejected by [`EvidxConfig::validate`]; nothing is silently clamped.

use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Sqlite,
    Elasticsearch,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
    #[serde(default = "default_index_name")]
    pub index_name: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    /// Elasticsearch base URL. Required when `backend = "elasticsearch"`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Sqlite
}

fn default_index_name() -> String {
    "gotham_evidence".to_string()
}

fn default_sqlite_path() -> String {
    "data/evidx.sqlite".to_string()
}

fn default_store_timeout_secs() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            index_name: default_index_name(),
            sqlite_path: default_sqlite_path(),
            url: None,
            api_key: None,
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.index_name.trim().is_empty() {
            return Err("index_name cannot be empty".to_string());
        }
        if self.index_name.chars().any(|c| c.is_ascii_uppercase() || c == ' ' || c == '/') {
            return Err(format!(
                "index_name must be lowercase without spaces or '/': '{}'",
                self.index_name
            ));
        }
        match self.backend {
            StoreBackend::Sqlite if self.sqlite_path.trim().is_empty() => {
                Err("sqlite_path cannot be empty for the sqlite backend".to_string())
            }
            StoreBackend::Elasticsearch if self.url.as_deref().unwrap_or("").trim().is_empty() => {
                Err("url is required for the elasticsearch backend".to_string())
            }
            _ if self.timeout_secs == 0 => Err("timeout_secs must be > 0".to_string()),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_url")]
    pub url: String,
    /// Fixed vector dimension of the index. Set once at index creation.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_embedding_url() -> String {
    "http://127.0.0.1:8808".to_string()
}

fn default_dims() -> usize {
    1024
}

fn default_batch_size() -> usize {
    16
}

fn default_embedding_timeout_secs() -> u64 {
    60
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("url cannot be empty".to_string());
        }
        if self.dims == 0 {
            return Err("dims must be > 0".to_string());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessingConfig {
    /// Upper bound on sampled frames per video.
    #[serde(default = "default_video_frames")]
    pub video_frames: usize,
    /// Side length of the square canonical depth resolution.
    #[serde(default = "default_depth_size")]
    pub depth_size: u32,
}

fn default_video_frames() -> usize {
    8
}

fn default_depth_size() -> u32 {
    224
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            video_frames: default_video_frames(),
            depth_size: default_depth_size(),
        }
    }
}

impl ProcessingConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.video_frames == 0 {
            return Err("video_frames must be > 0".to_string());
        }
        if self.depth_size == 0 || self.depth_size > 4096 {
            return Err(format!("depth_size must be in 1..=4096, got {}", self.depth_size));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrievalConfig {
    /// Candidate pool handed to approximate kNN backends; never less than the requested `k`.
    #[serde(default = "default_num_candidates")]
    pub num_candidates: usize,
}

fn default_num_candidates() -> usize {
    100
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            num_candidates: default_num_candidates(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.num_candidates == 0 {
            return Err("num_candidates must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningProvider {
    Disabled,
    Ollama,
    ChatCompletions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_provider")]
    pub provider: ReasoningProvider,
    #[serde(default = "default_reasoning_url")]
    pub base_url: String,
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_reasoning_provider() -> ReasoningProvider {
    ReasoningProvider::Ollama
}

fn default_reasoning_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_reasoning_model() -> String {
    "llama3.1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_reasoning_provider(),
            base_url: default_reasoning_url(),
            model: default_reasoning_model(),
            api_key: None,
            temperature: default_temperature(),
        }
    }
}

impl ReasoningConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.provider == ReasoningProvider::Disabled {
            return Ok(());
        }
        if self.base_url.trim().is_empty() {
            return Err("base_url cannot be empty".to_string());
        }
        if self.model.trim().is_empty() {
            return Err("model cannot be empty".to_string());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be in 0.0..=2.0, got {}", self.temperature));
        }
        if self.provider == ReasoningProvider::ChatCompletions
            && self.api_key.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err("api_key is required for chat_completions".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConcurrencyConfig {
    /// Upper bound on in-flight oracle/store calls issued by batch work.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    4
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == 0 || self.max_workers > 64 {
            return Err(format!("max_workers must be in 1..=64, got {}", self.max_workers));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvidxConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
}

impl EvidxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, AppError> {
        toml::from_str(s).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Failed to parse configuration TOML")
                .with_details(e.to_string())
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::CONFIG_INVALID, "Failed to read configuration file")
                .with_details(format!("path={}; err={}", path.display(), e))
        })?;
        Self::from_toml_str(&raw).map_err(|e| {
            let details = format!(
                "path={}; err={}",
                path.display(),
                e.details.as_deref().unwrap_or("")
            );
            e.with_details(details)
        })
    }

    /// Apply environment overrides. A set but unparseable value is `CONFIG_INVALID` naming the
    /// variable; it never falls back to the file or default value.
    pub fn with_env_overrides(mut self) -> Result<Self, AppError> {
        if let Ok(val) = env::var("EVIDX_STORE_BACKEND") {
            self.store.backend = match val.trim().to_ascii_lowercase().as_str() {
                "sqlite" => StoreBackend::Sqlite,
                "elasticsearch" => StoreBackend::Elasticsearch,
                _ => return Err(invalid_env("EVIDX_STORE_BACKEND", &val, "expected sqlite or elasticsearch")),
            };
        }
        if let Ok(val) = env::var("EVIDX_STORE_URL") {
            self.store.url = Some(val);
        }
        if let Ok(val) = env::var("EVIDX_SQLITE_PATH") {
            self.store.sqlite_path = val;
        }
        if let Ok(val) = env::var("EVIDX_INDEX_NAME") {
            self.store.index_name = val;
        }
        if let Ok(val) = env::var("ELASTIC_API_KEY") {
            self.store.api_key = Some(val);
        }

        if let Ok(val) = env::var("EVIDX_EMBEDDING_URL") {
            self.embedding.url = val;
        }
        if let Some(n) = env_usize("EVIDX_EMBEDDING_DIMS")? {
            self.embedding.dims = n;
        }

        if let Ok(val) = env::var("EVIDX_REASONING_URL") {
            self.reasoning.base_url = val;
        }
        if let Ok(val) = env::var("EVIDX_REASONING_MODEL") {
            self.reasoning.model = val;
        }
        if let Ok(val) = env::var("OPENAI_API_KEY") {
            self.reasoning.api_key = Some(val);
        }

        if let Some(n) = env_usize("EVIDX_MAX_WORKERS")? {
            self.concurrency.max_workers = n;
        }
        Ok(self)
    }

    /// Validate every section, returning the first failure prefixed with its section name.
    pub fn validate(&self) -> Result<(), AppError> {
        let sections: [(&str, Result<(), String>); 6] = [
            ("store", self.store.validate()),
            ("embedding", self.embedding.validate()),
            ("processing", self.processing.validate()),
            ("retrieval", self.retrieval.validate()),
            ("reasoning", self.reasoning.validate()),
            ("concurrency", self.concurrency.validate()),
        ];
        for (name, res) in sections {
            if let Err(msg) = res {
                return Err(AppError::new(codes::CONFIG_INVALID, "Invalid configuration")
                    .with_details(format!("[{name}] {msg}")));
            }
        }
        Ok(())
    }
}

fn invalid_env(var: &str, val: &str, expected: &str) -> AppError {
    AppError::new(codes::CONFIG_INVALID, "Invalid environment override")
        .with_details(format!("{var}={val:?}; {expected}"))
}

fn env_usize(var: &str) -> Result<Option<usize>, AppError> {
    match env::var(var) {
        Ok(val) => val
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| invalid_env(var, &val, "expected a non-negative integer")),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        let cfg = EvidxConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.store.index_name, "gotham_evidence");
        assert_eq!(cfg.embedding.dims, 1024);
        assert_eq!(cfg.processing.video_frames, 8);
        assert_eq!(cfg.processing.depth_size, 224);
        assert_eq!(cfg.retrieval.num_candidates, 100);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg = EvidxConfig::from_toml_str(
            r#"
[store]
backend = "elasticsearch"
url = "https://es.example:9243"

[embedding]
dims = 512
"#,
        )
        .expect("parse");
        assert_eq!(cfg.store.backend, StoreBackend::Elasticsearch);
        assert_eq!(cfg.store.index_name, "gotham_evidence");
        assert_eq!(cfg.embedding.dims, 512);
        assert_eq!(cfg.embedding.batch_size, 16);
        assert_eq!(cfg.reasoning, ReasoningConfig::default());
        cfg.validate().expect("valid");
    }

    #[test]
    fn validation_names_the_failing_section() {
        let mut cfg = EvidxConfig::default();
        cfg.retrieval.num_candidates = 0;
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        assert!(err.details.unwrap().starts_with("[retrieval]"));

        let mut cfg = EvidxConfig::default();
        cfg.store.backend = StoreBackend::Elasticsearch;
        let err = cfg.validate().unwrap_err();
        assert!(err.details.unwrap().starts_with("[store]"));
    }

    #[test]
    fn chat_completions_requires_api_key() {
        let mut cfg = EvidxConfig::default();
        cfg.reasoning.provider = ReasoningProvider::ChatCompletions;
        assert!(cfg.validate().is_err());
        cfg.reasoning.api_key = Some("sk-test".to_string());
        cfg.validate().expect("valid with key");
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = EvidxConfig::from_toml_str("[store\nbackend=").unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
    }

    // The only test in this crate that touches these variables.
    #[test]
    fn env_overrides_apply_and_reject_typos() {
        env::set_var("EVIDX_EMBEDDING_DIMS", "512");
        env::set_var("EVIDX_STORE_BACKEND", "Elasticsearch");
        let cfg = EvidxConfig::default().with_env_overrides().expect("overrides");
        assert_eq!(cfg.embedding.dims, 512);
        assert_eq!(cfg.store.backend, StoreBackend::Elasticsearch);

        env::set_var("EVIDX_EMBEDDING_DIMS", "1O24");
        let err = EvidxConfig::default().with_env_overrides().unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        assert!(err.details.unwrap().starts_with("EVIDX_EMBEDDING_DIMS=\"1O24\""));
        env::remove_var("EVIDX_EMBEDDING_DIMS");

        env::set_var("EVIDX_STORE_BACKEND", "postgres");
        let err = EvidxConfig::default().with_env_overrides().unwrap_err();
        assert!(err.details.unwrap().starts_with("EVIDX_STORE_BACKEND="));
        env::remove_var("EVIDX_STORE_BACKEND");

        env::set_var("EVIDX_MAX_WORKERS", "four");
        let err = EvidxConfig::default().with_env_overrides().unwrap_err();
        assert!(err.details.unwrap().starts_with("EVIDX_MAX_WORKERS="));
        env::remove_var("EVIDX_MAX_WORKERS");
    }
}
