// Data structures for remote frame submission

use serde::{Deserialize, Serialize};

/// Backend answer to a frame submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    #[serde(default)]
    pub stored_at: Option<String>,
}

impl SubmitReceipt {
    /// Status line shown after a successful submission
    pub fn status_text(&self) -> String {
        match &self.stored_at {
            Some(location) => format!("Stored at: {}", location),
            None => "Sent".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("Set Backend URL first")]
    NoBackend,

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("No frame to send yet")]
    EmptyFrame,

    #[error("Failed to encode frame: {0}")]
    Encode(String),

    #[error("Backend request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Backend rejected frame (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

pub type SubmitResult<T> = Result<T, SubmitError>;
