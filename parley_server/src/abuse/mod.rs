//! Abuse prevention module
//!
//! Provides the gates that run in front of license operations:
//! - Device id validation (client fingerprints are untrusted input)
//! - Per-device activation rate limiting
//! - CAPTCHA verification
//!
//! None of these checks touch license state.

pub mod captcha;
pub mod device;
pub mod rate_limit;

pub use captcha::{CaptchaError, CaptchaPass, CaptchaVerifier};
pub use device::check_device_id;
pub use rate_limit::{RateLimitConfig, RateLimiter};

use crate::license::LicenseError;

pub struct AbuseGate {
    captcha: CaptchaVerifier,
    limiter: RateLimiter,
    activation_limit: RateLimitConfig,
    require_captcha_for_activation: bool,
}

impl AbuseGate {
    pub fn new(
        captcha: CaptchaVerifier,
        activation_limit: RateLimitConfig,
        require_captcha_for_activation: bool,
    ) -> Self {
        Self {
            captcha,
            limiter: RateLimiter::new(),
            activation_limit,
            require_captcha_for_activation,
        }
    }

    pub fn captcha(&self) -> &CaptchaVerifier {
        &self.captcha
    }

    /// Drop activation windows that have outlived the configured window.
    /// Returns how many were removed.
    pub fn sweep_limiter(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.cleanup(self.activation_limit.window);
        before.saturating_sub(self.limiter.len())
    }

    /// Gate run before every activation attempt
    pub async fn check_activation(
        &self,
        device_id: Option<&str>,
        captcha_token: Option<&str>,
    ) -> Result<(), LicenseError> {
        let device_id = check_device_id(device_id)
            .map_err(|rejection| LicenseError::InvalidRequest(rejection.message()))?;

        let limit = self
            .limiter
            .check(&format!("activate:{}", device_id), &self.activation_limit);
        if !limit.allowed {
            tracing::warn!(
                "Activation rate limit hit for device {} ({}/{} attempts)",
                device_id,
                limit.current,
                limit.limit
            );
            return Err(LicenseError::RateLimited(format!(
                "Too many activation attempts. Try again in {} seconds",
                limit.reset_in_secs
            )));
        }

        if self.require_captcha_for_activation {
            let token = captcha_token.unwrap_or_default();
            match self.captcha.verify(token).await {
                Ok(_) => {}
                Err(CaptchaError::MissingToken) => {
                    return Err(LicenseError::InvalidRequest(
                        "Captcha token is required".to_string(),
                    ));
                }
                Err(CaptchaError::Rejected { error_codes }) => {
                    tracing::info!("Captcha rejected for device {}: {:?}", device_id, error_codes);
                    return Err(LicenseError::Forbidden(
                        "Captcha verification failed".to_string(),
                    ));
                }
                Err(e) => {
                    tracing::error!("Captcha verification error: {}", e);
                    return Err(LicenseError::Internal(
                        "Captcha verification failed".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
