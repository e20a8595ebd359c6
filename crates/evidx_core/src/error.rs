use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by every layer. Matching is done on these strings, never on messages.
pub mod codes {
    pub const UNSUPPORTED_MODALITY: &str = "UNSUPPORTED_MODALITY";
    pub const CONTENT_NOT_FOUND: &str = "CONTENT_NOT_FOUND";
    pub const CONTENT_INVALID: &str = "CONTENT_INVALID";
    pub const DIMENSION_MISMATCH: &str = "DIMENSION_MISMATCH";
    pub const NON_FINITE_VECTOR: &str = "NON_FINITE_VECTOR";
    pub const NO_EMBEDDING_PRODUCED: &str = "NO_EMBEDDING_PRODUCED";
    pub const EMBEDDING_FAILED: &str = "EMBEDDING_FAILED";
    pub const EMBEDDING_UNREACHABLE: &str = "EMBEDDING_UNREACHABLE";
    pub const STORE_UNREACHABLE: &str = "STORE_UNREACHABLE";
    pub const STORE_OPERATION_FAILED: &str = "STORE_OPERATION_FAILED";
    pub const INSUFFICIENT_EVIDENCE: &str = "INSUFFICIENT_EVIDENCE";
    pub const REASONING_FAILED: &str = "REASONING_FAILED";
    pub const REMOTE_NOT_ALLOWED: &str = "REMOTE_NOT_ALLOWED";
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    pub const MANIFEST_INVALID: &str = "MANIFEST_INVALID";
    pub const CANCELLED: &str = "CANCELLED";
}

/// Single structured error shape used across backend layers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
            retryable: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is(&self, code: &str) -> bool {
        self.code == code
    }

    /// Structural failures abort the current operation instead of being tallied per item.
    pub fn is_structural(&self) -> bool {
        matches!(
            self.code.as_str(),
            codes::DIMENSION_MISMATCH
                | codes::NON_FINITE_VECTOR
                | codes::STORE_UNREACHABLE
                | codes::EMBEDDING_UNREACHABLE
                | codes::CONFIG_INVALID
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(d) = self.details.as_deref() {
            write!(f, " ({d})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}
