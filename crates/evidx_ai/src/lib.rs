pub mod correlate;
pub mod embeddings;
pub mod guardrails;
pub mod ingest;
pub mod ollama;
pub mod pool;
pub mod processor;
pub mod reasoning;
pub mod retrieve;
pub mod services;
pub mod store;

pub use services::Services;
