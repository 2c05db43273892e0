//! CAPTCHA verification route

use crate::abuse::{CaptchaError, CaptchaPass};
use crate::routes::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parley_common::{CaptchaVerifyRequest, CaptchaVerifyResponse};

pub fn router() -> Router<AppState> {
    Router::new().route("/captcha/verify", post(verify_captcha))
}

/// Verify a client CAPTCHA token against the upstream service
async fn verify_captcha(
    State(state): State<AppState>,
    payload: Result<Json<CaptchaVerifyRequest>, JsonRejection>,
) -> Response {
    let token = payload
        .ok()
        .and_then(|Json(request)| request.token)
        .unwrap_or_default();

    match state.abuse.captcha().verify(&token).await {
        Ok(CaptchaPass {
            challenge_ts,
            hostname,
        }) => Json(CaptchaVerifyResponse {
            success: true,
            challenge_ts,
            hostname,
            ..Default::default()
        })
        .into_response(),
        Err(CaptchaError::MissingToken) => {
            failure(StatusCode::BAD_REQUEST, "Captcha token is required", None)
        }
        Err(CaptchaError::Rejected { error_codes }) => failure(
            StatusCode::FORBIDDEN,
            "Captcha verification failed",
            Some(error_codes),
        ),
        Err(CaptchaError::NotConfigured) => {
            tracing::error!("Captcha verification requested but no secret is configured");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Captcha is not configured",
                None,
            )
        }
        Err(e) => {
            tracing::error!("Captcha verification error: {}", e);
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Captcha verification failed",
                None,
            )
        }
    }
}

fn failure(status: StatusCode, error: &str, error_codes: Option<Vec<String>>) -> Response {
    let body = CaptchaVerifyResponse {
        success: false,
        error: Some(error.to_string()),
        error_codes,
        ..Default::default()
    };
    (status, Json(body)).into_response()
}
