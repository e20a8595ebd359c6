use std::sync::Arc;

use evidx_core::domain::{CorrelationRequest, EvidenceBundle};
use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::correlate::{format_evidence, format_results};
use crate::guardrails::{ensure_bundle_has_evidence, ensure_correlation_has_evidence};

pub mod chat_completions;
pub mod ollama_reasoner;
pub mod prompts;

pub use chat_completions::ChatCompletionsReasoner;
pub use ollama_reasoner::OllamaReasoner;

const REPORT_MAX_TOKENS: u32 = 1000;
const CROSS_MODAL_MAX_TOKENS: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Free-text analysis backend. Implementations return the raw model text.
pub trait ReasoningOracle: Send + Sync {
    fn analyze(&self, req: &ReasoningRequest) -> Result<String, AppError>;
}

/// Turns gathered evidence into prompts and reads the analysis back.
#[derive(Clone)]
pub struct EvidenceAnalyst {
    oracle: Arc<dyn ReasoningOracle>,
    temperature: f32,
}

fn non_empty(text: String) -> Result<String, AppError> {
    if text.trim().is_empty() {
        return Err(AppError::new(codes::REASONING_FAILED, "Reasoning response was empty"));
    }
    Ok(text)
}

impl EvidenceAnalyst {
    pub fn new(oracle: Arc<dyn ReasoningOracle>, temperature: f32) -> Self {
        Self { oracle, temperature }
    }

    /// Suspect report over every modality in the bundle.
    pub fn analyze_bundle(&self, bundle: &EvidenceBundle) -> Result<String, AppError> {
        ensure_bundle_has_evidence(bundle)?;
        let req = ReasoningRequest {
            system: prompts::FORENSIC_SYSTEM.to_string(),
            prompt: prompts::suspect_report_prompt(&format_evidence(bundle)),
            max_tokens: REPORT_MAX_TOKENS,
            temperature: self.temperature,
        };
        let report = non_empty(self.oracle.analyze(&req)?)?;
        info!(modalities = bundle.len(), chars = report.len(), "forensic report generated");
        Ok(report)
    }

    pub fn analyze_correlation(&self, req: &CorrelationRequest) -> Result<String, AppError> {
        ensure_correlation_has_evidence(req)?;
        let prompt = prompts::cross_modal_prompt(
            &format_results(req.modality_a, &req.results_a),
            &format_results(req.modality_b, &req.results_b),
        );
        let analysis = non_empty(self.oracle.analyze(&ReasoningRequest {
            system: prompts::CROSS_MODAL_SYSTEM.to_string(),
            prompt,
            max_tokens: CROSS_MODAL_MAX_TOKENS,
            temperature: self.temperature,
        })?)?;
        info!(a = %req.modality_a, b = %req.modality_b, "cross-modal analysis generated");
        Ok(analysis)
    }
}
