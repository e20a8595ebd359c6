use std::time::Duration;

use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::{ReasoningOracle, ReasoningRequest};

/// OpenAI-compatible `/v1/chat/completions` backend.
#[derive(Debug, Clone)]
pub struct ChatCompletionsReasoner {
    base_url: String,
    api_key: Option<String>,
    model: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

impl ChatCompletionsReasoner {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::new(codes::CONFIG_INVALID, "Reasoning URL must be http(s)")
                .with_details(format!("url={base_url}")));
        }
        Ok(Self {
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: model.into(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        })
    }
}

fn parse_content(resp: ChatResponse) -> Result<String, AppError> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AppError::new(codes::REASONING_FAILED, "Chat response had no content"))
}

impl ReasoningOracle for ChatCompletionsReasoner {
    fn analyze(&self, req: &ReasoningRequest) -> Result<String, AppError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: &req.system,
                },
                Message {
                    role: "user",
                    content: &req.prompt,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };
        let body = serde_json::to_value(body).map_err(|e| {
            AppError::new(codes::REASONING_FAILED, "Failed to encode chat request")
                .with_details(e.to_string())
        })?;

        let mut request = self.agent.post(&url);
        if let Some(key) = self.api_key.as_deref() {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        match request.send_json(body) {
            Ok(r) => {
                let v: ChatResponse = r.into_json().map_err(|e| {
                    AppError::new(codes::REASONING_FAILED, "Failed to decode chat response")
                        .with_details(e.to_string())
                })?;
                parse_content(v)
            }
            Err(ureq::Error::Status(status, _)) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Chat completion request failed",
            )
            .with_details(format!("status={status}; model={}", self.model))
            .with_retryable(status == 429 || status >= 500)),
            Err(e) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Failed to call chat completion endpoint",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_first_choice() {
        let v: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"The Joker."}}]}"#,
        )
        .unwrap();
        assert_eq!(parse_content(v).unwrap(), "The Joker.");

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert_eq!(parse_content(empty).unwrap_err().code, codes::REASONING_FAILED);
    }
}
