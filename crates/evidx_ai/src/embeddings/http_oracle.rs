use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use evidx_core::domain::Modality;
use evidx_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::EmbeddingOracle;
use crate::processor::{AudioFormat, PreparedInput};

/// JSON-over-HTTP embedding oracle (`POST {base}/embed`).
#[derive(Debug, Clone)]
pub struct HttpEmbeddingOracle {
    base_url: String,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum WireInput<'a> {
    Text {
        text: &'a str,
    },
    Image {
        image_base64: String,
        format: &'a str,
    },
    Audio {
        audio_base64: String,
        format: AudioFormat,
    },
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    modality: Modality,
    inputs: Vec<WireInput<'a>>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

fn to_wire(input: &PreparedInput) -> WireInput<'_> {
    match input {
        PreparedInput::Text(t) => WireInput::Text { text: t },
        PreparedInput::Image(img) => WireInput::Image {
            image_base64: STANDARD.encode(&img.bytes),
            format: &img.format,
        },
        PreparedInput::Audio(a) => WireInput::Audio {
            audio_base64: STANDARD.encode(&a.bytes),
            format: a.format,
        },
    }
}

impl HttpEmbeddingOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::new(
                codes::CONFIG_INVALID,
                "Embedding oracle URL must be http(s)",
            )
            .with_details(format!("url={base_url}")));
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self { base_url, agent })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/health", self.base_url);
        match self.agent.get(&url).timeout(Duration::from_millis(800)).call() {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(AppError::new(
                codes::EMBEDDING_FAILED,
                "Embedding oracle health check failed",
            )
            .with_details(format!("status={status}"))),
            Err(e) => Err(AppError::new(
                codes::EMBEDDING_UNREACHABLE,
                "Failed to reach embedding oracle",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

pub(crate) fn encode_request(inputs: &[PreparedInput], modality: Modality) -> Result<serde_json::Value, AppError> {
    let req = EmbedRequest {
        modality,
        inputs: inputs.iter().map(to_wire).collect(),
    };
    serde_json::to_value(req).map_err(|e| {
        AppError::new(codes::EMBEDDING_FAILED, "Failed to encode embedding request")
            .with_details(e.to_string())
    })
}

impl EmbeddingOracle for HttpEmbeddingOracle {
    fn embed(&self, inputs: &[PreparedInput], modality: Modality) -> Result<Vec<Vec<f32>>, AppError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/embed", self.base_url);
        let body = encode_request(inputs, modality)?;
        debug!(%modality, n = inputs.len(), "calling embedding oracle");

        match self.agent.post(&url).send_json(body) {
            Ok(r) => {
                let v: EmbedResponse = r.into_json().map_err(|e| {
                    AppError::new(codes::EMBEDDING_FAILED, "Failed to decode embedding response")
                        .with_details(e.to_string())
                })?;
                Ok(v.embeddings)
            }
            Err(ureq::Error::Status(status, r)) => {
                let body = r.into_string().unwrap_or_default();
                Err(AppError::new(codes::EMBEDDING_FAILED, "Embedding request failed")
                    .with_details(format!("status={status}; body={}", truncate(&body, 200)))
                    .with_retryable(status >= 500))
            }
            Err(e) => Err(AppError::new(
                codes::EMBEDDING_UNREACHABLE,
                "Failed to call embedding endpoint",
            )
            .with_details(e.to_string())
            .with_retryable(true)),
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::{EncodedAudio, EncodedImage};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn request_shape_matches_wire_contract() {
        let inputs = vec![
            PreparedInput::Text("Why so serious?".to_string()),
            PreparedInput::Image(EncodedImage {
                format: "png".to_string(),
                width: 1,
                height: 1,
                bytes: vec![1, 2, 3],
            }),
            PreparedInput::Audio(EncodedAudio {
                format: AudioFormat::Wav,
                bytes: vec![0xff],
            }),
        ];
        let v = encode_request(&inputs, Modality::Text).unwrap();
        assert_eq!(
            v,
            json!({
                "modality": "text",
                "inputs": [
                    {"text": "Why so serious?"},
                    {"image_base64": "AQID", "format": "png"},
                    {"audio_base64": "/w==", "format": "wav"},
                ]
            })
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        let err = HttpEmbeddingOracle::new("ftp://x", Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        let ok = HttpEmbeddingOracle::new("http://127.0.0.1:8808/", Duration::from_secs(1)).unwrap();
        assert_eq!(ok.base_url(), "http://127.0.0.1:8808");
    }
}
