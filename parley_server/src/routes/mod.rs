//! Route handlers for the Parley license server

pub mod admin;
pub mod captcha;
pub mod license;

use crate::{
    abuse::{rate_limit::limits, AbuseGate, CaptchaVerifier},
    config::Config,
    license::{ActivationPolicy, LicenseError, LicenseService},
    store::LicenseStore,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parley_common::ErrorResponse;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn LicenseStore>,
    pub licenses: Arc<LicenseService>,
    pub abuse: Arc<AbuseGate>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn LicenseStore>) -> anyhow::Result<Self> {
        let licenses = LicenseService::new(
            store.clone(),
            ActivationPolicy {
                clear_moderation_flags: config.activation_clears_moderation,
            },
            config.store_timeout,
            chrono::Duration::days(config.quota_reset_days),
        );

        let captcha = CaptchaVerifier::new(
            config.captcha_secret.clone(),
            config.captcha_verify_url.clone(),
            config.captcha_timeout,
        )?;
        let abuse = AbuseGate::new(
            captcha,
            limits::activation_attempts(config.activation_rate_limit),
            config.require_captcha_for_activation,
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            licenses: Arc::new(licenses),
            abuse: Arc::new(abuse),
        })
    }
}

/// Build the full application router
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .merge(api_routes())
        .nest("/api", api_routes())
        .merge(admin::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Public API, mounted both at the root and under `/api`
fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(license::router())
        .merge(captcha::router())
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_status = match tokio::time::timeout(state.config.store_timeout, state.store.ping()).await {
        Ok(Ok(())) => "ok",
        _ => "error",
    };

    let status = if store_status == "ok" { "healthy" } else { "degraded" };

    Json(serde_json::json!({
        "status": status,
        "store": store_status,
        "backend": state.store.backend(),
    }))
}

/// HTTP status for each failure kind
pub fn status_for(error: &LicenseError) -> StatusCode {
    match error {
        LicenseError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        LicenseError::NotFound(_) => StatusCode::NOT_FOUND,
        LicenseError::Conflict(_) | LicenseError::Forbidden(_) => StatusCode::FORBIDDEN,
        LicenseError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
        LicenseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for LicenseError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        let body = ErrorResponse {
            valid: None,
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
