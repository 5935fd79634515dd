//! HTTP client for the model-runner sidecar.
//!
//! The runner exposes the whole inference surface behind three calls:
//! load a model, invoke an operation on it, release the GPU memory pool.
//! Image inputs and outputs cross the wire base64-encoded.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::PipelineError;

/// Model calls can legitimately take minutes; the dispatcher enforces the
/// per-kind time limits above this.
const INVOKE_TIMEOUT: Duration = Duration::from_secs(360);

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Clone)]
pub struct RunnerClient {
    http: reqwest::Client,
    base: String,
}

impl RunnerClient {
    pub fn new(base_url: &str) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .timeout(INVOKE_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn load_model(&self, model: &str) -> Result<(), PipelineError> {
        let response = self
            .http
            .post(format!("{}/models/load", self.base))
            .json(&serde_json::json!({ "model": model }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn invoke(
        &self,
        operation: &str,
        model: &str,
        params: serde_json::Value,
    ) -> Result<Vec<Vec<u8>>, PipelineError> {
        let body = self.invoke_raw(operation, model, params).await?;
        body.images
            .iter()
            .map(|encoded| {
                BASE64
                    .decode(encoded)
                    .map_err(|e| PipelineError::Decode {
                        message: format!("bad image payload: {e}"),
                    })
            })
            .collect()
    }

    pub async fn invoke_text(
        &self,
        operation: &str,
        model: &str,
        params: serde_json::Value,
    ) -> Result<String, PipelineError> {
        let body = self.invoke_raw(operation, model, params).await?;
        body.text.ok_or_else(|| PipelineError::Remote {
            message: "runner returned no text".to_string(),
        })
    }

    async fn invoke_raw(
        &self,
        operation: &str,
        model: &str,
        params: serde_json::Value,
    ) -> Result<InvokeResponse, PipelineError> {
        let response = self
            .http
            .post(format!("{}/invoke", self.base))
            .json(&serde_json::json!({
                "operation": operation,
                "model": model,
                "params": params,
            }))
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json().await?)
    }

    pub async fn release_memory(&self) -> Result<(), PipelineError> {
        let response = self
            .http
            .post(format!("{}/memory/release", self.base))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, PipelineError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let detail = response
            .json::<InvokeResponse>()
            .await
            .ok()
            .and_then(|body| body.detail)
            .unwrap_or_else(|| status.to_string());
        Err(PipelineError::Remote { message: detail })
    }
}
