//! CAPTCHA token verification (Cloudflare Turnstile siteverify)
//!
//! Fails closed: anything other than an explicit success from the upstream
//! service is a failure.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Default verification endpoint
pub const TURNSTILE_VERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha token is required")]
    MissingToken,

    #[error("captcha secret is not configured")]
    NotConfigured,

    #[error("captcha verification timed out")]
    Timeout,

    #[error("captcha service unreachable: {0}")]
    Transport(reqwest::Error),

    #[error("captcha service returned HTTP {0}")]
    Upstream(u16),

    #[error("captcha token rejected: {error_codes:?}")]
    Rejected { error_codes: Vec<String> },
}

impl From<reqwest::Error> for CaptchaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CaptchaError::Timeout
        } else {
            CaptchaError::Transport(e)
        }
    }
}

/// A token the upstream service accepted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptchaPass {
    pub challenge_ts: Option<String>,
    pub hostname: Option<String>,
}

#[derive(Debug, Serialize)]
struct SiteVerifyRequest<'a> {
    secret: &'a str,
    response: &'a str,
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    challenge_ts: Option<String>,
    hostname: Option<String>,
    #[serde(default, rename = "error-codes", alias = "error_codes")]
    error_codes: Vec<String>,
}

pub struct CaptchaVerifier {
    client: reqwest::Client,
    secret: Option<String>,
    verify_url: String,
}

impl CaptchaVerifier {
    pub fn new(
        secret: Option<String>,
        verify_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            secret: secret.filter(|s| !s.trim().is_empty()),
            verify_url: verify_url.into(),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Forward `token` to the verification service with the server secret
    pub async fn verify(&self, token: &str) -> Result<CaptchaPass, CaptchaError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CaptchaError::MissingToken);
        }

        let Some(secret) = self.secret.as_deref() else {
            return Err(CaptchaError::NotConfigured);
        };

        let response = self
            .client
            .post(&self.verify_url)
            .json(&SiteVerifyRequest {
                secret,
                response: token,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(CaptchaError::Upstream(response.status().as_u16()));
        }

        let body: SiteVerifyResponse = response.json().await?;

        if !body.success {
            return Err(CaptchaError::Rejected {
                error_codes: body.error_codes,
            });
        }

        Ok(CaptchaPass {
            challenge_ts: body.challenge_ts,
            hostname: body.hostname,
        })
    }
}
