use std::time::Duration;

use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{ReasoningOracle, ReasoningRequest};
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaReasoner {
    client: OllamaClient,
    model: String,
}

impl OllamaReasoner {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        self.client.health_check()
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl ReasoningOracle for OllamaReasoner {
    fn analyze(&self, req: &ReasoningRequest) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let body = GenerateRequest {
            model: &self.model,
            system: &req.system,
            prompt: &req.prompt,
            stream: false,
            options: GenerateOptions {
                temperature: req.temperature,
                num_predict: req.max_tokens,
            },
        };

        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(120))
            .send_json(serde_json::to_value(body).map_err(|e| {
                AppError::new(codes::REASONING_FAILED, "Failed to encode generate request")
                    .with_details(e.to_string())
            })?);

        match resp {
            Ok(r) => {
                let v: GenerateResponse = r.into_json().map_err(|e| {
                    AppError::new(codes::REASONING_FAILED, "Failed to decode generate response")
                        .with_details(e.to_string())
                })?;
                Ok(v.response)
            }
            Err(ureq::Error::Status(status, _)) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Generate request failed",
            )
            .with_details(format!("status={status}; model={}", self.model))),
            Err(e) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Failed to call Ollama generate endpoint",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}
