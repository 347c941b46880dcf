//! External diagnosis oracle
//!
//! The oracle is an opaque black box: one user-role message carrying the
//! instruction text plus an inline image reference goes out, free-form
//! diagnostic text comes back. Nothing about the answer is validated or
//! parsed beyond "a text field was present".

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::ingest::EncodedImage;
use crate::types::{CropgateError, Result};

/// Fixed instruction sent with every diagnosis request
fn instruction(crop: &str) -> String {
    format!(
        "You are an experienced agronomist. The attached photo shows a {} plant. \
         Identify any pest or disease visible in the image, name the most likely \
         cause, and give concise treatment advice a farmer can act on. \
         If the plant looks healthy, say so.",
        crop
    )
}

/// Seam to the external vision model, swappable for a scripted fake in tests
#[async_trait]
pub trait DiagnosisOracle: Send + Sync {
    /// One diagnosis call; the returned text is treated as opaque
    async fn diagnose(&self, image: &EncodedImage, crop: &str) -> Result<String>;
}

/// Chat-completions oracle over HTTP
pub struct HttpOracle {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl HttpOracle {
    pub fn new(url: String, api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        }
    }
}

#[async_trait]
impl DiagnosisOracle for HttpOracle {
    async fn diagnose(&self, image: &EncodedImage, crop: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": instruction(crop) },
                    { "type": "image_url", "image_url": { "url": image.data_url() } }
                ]
            }]
        });

        debug!(model = %self.model, crop = %crop, "Calling diagnosis oracle");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CropgateError::OracleFailure(format!("request failed: {}", e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| CropgateError::OracleFailure(format!("unreadable response: {}", e)))?;

        if !status.is_success() {
            let message = payload
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("provider error");
            warn!(status = %status, "Oracle returned error: {}", message);
            return Err(CropgateError::OracleFailure(format!(
                "{} ({})",
                message, status
            )));
        }

        payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                CropgateError::OracleFailure("response carried no diagnosis text".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_names_the_crop() {
        let text = instruction("tomato");
        assert!(text.contains("tomato"));
    }
}
