use std::time::Duration;

use evidx_core::error::{codes, AppError};

/// Local Ollama endpoint. Only `http://127.0.0.1[:port]` is accepted so evidence
/// never leaves the machine through this client.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

fn not_allowed(base_url: &str) -> AppError {
    AppError::new(
        codes::REMOTE_NOT_ALLOWED,
        "Ollama base URL must be localhost (127.0.0.1)",
    )
    .with_details(format!("base_url={base_url}"))
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if base_url == "http://127.0.0.1" {
            return Ok(Self { base_url });
        }
        let port = base_url
            .strip_prefix("http://127.0.0.1:")
            .ok_or_else(|| not_allowed(&base_url))?;
        match port.parse::<u16>() {
            Ok(p) if p > 0 && port.chars().all(|c| c.is_ascii_digit()) => Ok(Self { base_url }),
            _ => Err(not_allowed(&base_url)),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(Duration::from_millis(800)).call();

        match resp {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Ollama health check failed",
            )
            .with_details(format!("status={status}"))),
            Err(e) => Err(AppError::new(
                codes::REASONING_FAILED,
                "Failed to reach Ollama on 127.0.0.1",
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
    fn enforces_localhost_only_base_url() {
        assert!(OllamaClient::new("http://127.0.0.1:11434").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1").is_ok());
        assert!(OllamaClient::new("http://127.0.0.1:11434/").is_ok());

        assert!(OllamaClient::new("http://localhost:11434").is_err());
        assert!(OllamaClient::new("http://0.0.0.0:11434").is_err());
        assert!(OllamaClient::new("https://example.com").is_err());

        // prefix tricks
        assert!(OllamaClient::new("http://127.0.0.1.evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1@evil.com:11434").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:0").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:99999").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:+80").is_err());
        assert!(OllamaClient::new("http://127.0.0.1:11434/api").is_err());
    }

    #[test]
    fn remote_urls_report_remote_not_allowed() {
        let err = OllamaClient::new("http://10.0.0.5:11434").unwrap_err();
        assert_eq!(err.code, codes::REMOTE_NOT_ALLOWED);
    }
}
