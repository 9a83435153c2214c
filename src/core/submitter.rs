// Remote frame submission to the inference backend

use crate::models::pose::Variant;
use crate::models::submission::{SubmitError, SubmitReceipt, SubmitResult};
use reqwest::multipart::{Form, Part};
use std::time::Duration;
use tracing::{debug, info};

/// Encoded frames below this size are treated as "nothing rendered yet"
pub const MIN_PAYLOAD_BYTES: usize = 100;

/// Period of automatic submissions while the loop is running
pub const AUTO_SUBMIT_PERIOD: Duration = Duration::from_secs(5);

/// Strip whitespace and trailing slashes; None if nothing is left
pub fn normalize_base_url(url: &str) -> Option<String> {
    let trimmed = url.trim().trim_end_matches('/');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Posts JPEG frames to `{base}/predict`
#[derive(Debug, Clone)]
pub struct FrameSubmitter {
    client: reqwest::Client,
    base_url: String,
}

impl FrameSubmitter {
    pub fn new(base_url: &str, timeout: Duration) -> SubmitResult<Self> {
        let base_url = normalize_base_url(base_url).ok_or(SubmitError::NoBackend)?;
        reqwest::Url::parse(&base_url)
            .map_err(|e| SubmitError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Host part of the base URL, for status display
    pub fn host(&self) -> Option<String> {
        reqwest::Url::parse(&self.base_url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_string))
    }

    pub fn predict_url(&self, variant: Variant, store: bool) -> String {
        format!(
            "{}/predict?variant={}&store={}",
            self.base_url,
            variant.api_id(),
            store
        )
    }

    /// Submit one encoded frame
    pub async fn submit(&self, jpeg: Vec<u8>, variant: Variant, store: bool) -> SubmitResult<SubmitReceipt> {
        if jpeg.len() < MIN_PAYLOAD_BYTES {
            return Err(SubmitError::EmptyFrame);
        }

        let url = self.predict_url(variant, store);
        debug!(url = %url, bytes = jpeg.len(), "Submitting frame");

        let part = Part::bytes(jpeg)
            .file_name("frame.jpg")
            .mime_str("image/jpeg")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SubmitError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let receipt: SubmitReceipt = response.json().await.map_err(classify)?;
        info!(variant = %variant, stored_at = ?receipt.stored_at, "Frame submitted");
        Ok(receipt)
    }
}

fn classify(error: reqwest::Error) -> SubmitError {
    if error.is_timeout() {
        SubmitError::Timeout
    } else {
        SubmitError::Network(error)
    }
}
