//! License routes: verify, activate, increment

use crate::license::LicenseError;
use crate::routes::{status_for, AppState};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parley_common::{ActivateRequest, ErrorResponse, IncrementRequest, IncrementResponse, VerifyRequest};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/license/verify", post(verify))
        .route("/license/activate", post(activate))
        .route("/license/increment", post(increment))
}

/// Report the caller's entitlement snapshot
async fn verify(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let result = match payload {
        Ok(Json(request)) => state.licenses.verify(&request).await,
        Err(rejection) => Err(malformed(rejection)),
    };

    match result {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            let body = ErrorResponse {
                valid: Some(false),
                error: e.to_string(),
            };
            (status_for(&e), Json(body)).into_response()
        }
    }
}

/// Redeem a license key; the abuse gate runs before anything is read
async fn activate(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return malformed(rejection).into_response(),
    };

    if let Err(e) = state
        .abuse
        .check_activation(request.device_id.as_deref(), request.captcha_token.as_deref())
        .await
    {
        return e.into_response();
    }

    match state.licenses.activate(&request).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Count one sent message
async fn increment(
    State(state): State<AppState>,
    payload: Result<Json<IncrementRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return malformed(rejection).into_response(),
    };

    match state.licenses.increment_usage(&request).await {
        Ok(usage) => Json(IncrementResponse {
            success: true,
            message_count: usage.message_count,
            message_limit: usage.message_limit,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

fn malformed(rejection: JsonRejection) -> LicenseError {
    tracing::debug!("Rejected request body: {}", rejection.body_text());
    LicenseError::InvalidRequest("Invalid request body".to_string())
}
