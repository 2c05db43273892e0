//! HTTP client for the license server

use parley_common::{
    ActivateRequest, CaptchaVerifyRequest, CaptchaVerifyResponse, ErrorResponse, IncrementRequest,
    IncrementResponse, LicenseSnapshot, VerifyRequest,
};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("parley-cli/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn verify(&self, request: &VerifyRequest) -> Result<LicenseSnapshot, ApiError> {
        self.post("/api/license/verify", request).await
    }

    pub async fn activate(&self, request: &ActivateRequest) -> Result<LicenseSnapshot, ApiError> {
        self.post("/api/license/activate", request).await
    }

    pub async fn increment(&self, request: &IncrementRequest) -> Result<IncrementResponse, ApiError> {
        self.post("/api/license/increment", request).await
    }

    /// Captcha responses carry a body on failure too, so the status is not an error here
    pub async fn verify_captcha(&self, token: &str) -> Result<CaptchaVerifyResponse, ApiError> {
        let response = self
            .http
            .post(format!("{}/api/captcha/verify", self.base_url))
            .json(&CaptchaVerifyRequest {
                token: Some(token.to_string()),
            })
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|_| ApiError::Status {
            status: status.as_u16(),
            message: text,
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("POST {}", url);

        let response = self.http.post(&url).json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            return Err(ApiError::Status { status, message });
        }

        Ok(response.json().await?)
    }
}
