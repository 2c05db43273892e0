//! Admin routes: key issuance, maintenance flag and store stats
//!
//! Every route requires `Authorization: Bearer $ADMIN_TOKEN` and the whole
//! surface answers 401 while `ADMIN_TOKEN` is unset.

use crate::routes::AppState;
use crate::store::{NewLicenseKey, StoreError, StoreResult};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use chrono::{DateTime, Utc};
use parley_common::{constants, normalize_key, ErrorResponse};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Characters used for generated keys (no 0/O or 1/I)
const KEY_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const KEY_GROUPS: usize = 4;
const KEY_GROUP_LEN: usize = 4;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/stats", get(get_stats))
        .route("/api/admin/keys", post(create_key))
        .route("/api/admin/maintenance", put(set_maintenance))
}

/// Validate the admin bearer token
fn validate_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(admin_token) = state.config.admin_token.as_deref() else {
        return false;
    };

    headers
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| constant_time_eq(auth.token().as_bytes(), admin_token.as_bytes()))
        .unwrap_or(false)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn error(status: StatusCode, message: &str) -> Response {
    let body = ErrorResponse {
        valid: None,
        error: message.to_string(),
    };
    (status, Json(body)).into_response()
}

fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "Unauthorized")
}

async fn bounded<T, F>(state: &AppState, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let limit = state.config.store_timeout;
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Stats {
    backend: &'static str,
    accounts: i64,
    active_keys: i64,
    bound_keys: i64,
    maintenance_mode: bool,
}

async fn get_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    let stats = match bounded(&state, state.store.stats()).await {
        Ok(stats) => stats,
        Err(e) => {
            tracing::error!("Failed to load store stats: {}", e);
            return error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load stats");
        }
    };

    Json(Stats {
        backend: state.store.backend(),
        accounts: stats.accounts,
        active_keys: stats.active_keys,
        bound_keys: stats.bound_keys,
        maintenance_mode: state.licenses.maintenance_mode().await,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    plan: String,
    message_limit: i64,
    #[serde(default)]
    valid_days: Option<i32>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    /// Explicit key; generated when absent
    #[serde(default)]
    key: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyResponse {
    /// Stored (normalized) key
    key: String,
    /// Key as handed to the customer
    display_key: String,
    plan: String,
    message_limit: i64,
    valid_days: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
}

/// Issue a new license key
async fn create_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    let Ok(Json(request)) = payload else {
        return error(StatusCode::BAD_REQUEST, "Invalid request body");
    };

    let plan = request.plan.trim();
    if plan.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Plan is required");
    }
    if request.message_limit <= 0 || request.message_limit > constants::MAX_MESSAGE_LIMIT {
        return error(
            StatusCode::BAD_REQUEST,
            &format!("Message limit must be between 1 and {}", constants::MAX_MESSAGE_LIMIT),
        );
    }
    if request
        .valid_days
        .is_some_and(|days| days <= 0 || i64::from(days) > constants::MAX_VALIDITY_DAYS)
    {
        return error(
            StatusCode::BAD_REQUEST,
            &format!("Valid days must be between 1 and {}", constants::MAX_VALIDITY_DAYS),
        );
    }

    let display_key = match request.key.as_deref() {
        Some(raw) => raw.trim().to_string(),
        None => generate_key(),
    };
    let key = normalize_key(&display_key);
    if key.is_empty() {
        return error(StatusCode::BAD_REQUEST, "License key must contain letters or digits");
    }

    let new_key = NewLicenseKey {
        key,
        plan: plan.to_string(),
        message_limit: request.message_limit,
        valid_days: request.valid_days,
        expires_at: request.expires_at,
    };

    match bounded(&state, state.store.insert_key(new_key)).await {
        Ok(record) => {
            tracing::info!("Issued {} license key (limit {})", record.plan, record.message_limit);
            (
                StatusCode::CREATED,
                Json(CreateKeyResponse {
                    key: record.key,
                    display_key,
                    plan: record.plan,
                    message_limit: record.message_limit,
                    valid_days: record.valid_days,
                    expires_at: record.expires_at,
                }),
            )
                .into_response()
        }
        Err(StoreError::DuplicateKey(_)) => {
            error(StatusCode::CONFLICT, "License key already exists")
        }
        Err(e) => {
            tracing::error!("Failed to insert license key: {}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create license key")
        }
    }
}

/// Random key in `XXXX-XXXX-XXXX-XXXX` form
fn generate_key() -> String {
    let mut rng = rand::thread_rng();
    let mut key = String::with_capacity(KEY_GROUPS * (KEY_GROUP_LEN + 1));

    for group in 0..KEY_GROUPS {
        if group > 0 {
            key.push('-');
        }
        for _ in 0..KEY_GROUP_LEN {
            let idx = rng.gen_range(0..KEY_ALPHABET.len());
            key.push(KEY_ALPHABET[idx] as char);
        }
    }

    key
}

#[derive(Debug, Deserialize)]
struct MaintenanceRequest {
    enabled: bool,
}

/// Toggle the global maintenance flag
async fn set_maintenance(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<MaintenanceRequest>, JsonRejection>,
) -> Response {
    if !validate_admin(&state, &headers) {
        return unauthorized();
    }

    let Ok(Json(request)) = payload else {
        return error(StatusCode::BAD_REQUEST, "Invalid request body");
    };

    match bounded(&state, state.store.set_maintenance_mode(request.enabled)).await {
        Ok(()) => {
            tracing::info!("Maintenance mode set to {}", request.enabled);
            Json(serde_json::json!({ "maintenanceMode": request.enabled })).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to set maintenance mode: {}", e);
            error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update maintenance mode")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{constant_time_eq, generate_key, KEY_ALPHABET};
    use crate::routes::test_support::*;
    use axum::http::StatusCode;
    use parley_common::normalize_key;
    use serde_json::json;

    const AUTH: (&str, &str) = ("authorization", "Bearer admin-secret");

    #[test]
    fn test_generated_key_shape() {
        let key = generate_key();
        let groups: Vec<&str> = key.split('-').collect();

        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.len() == 4));
        assert!(key
            .chars()
            .filter(|c| *c != '-')
            .all(|c| KEY_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"token", b"token"));
        assert!(!constant_time_eq(b"token", b"tokem"));
        assert!(!constant_time_eq(b"token", b"token2"));
    }

    #[tokio::test]
    async fn test_disabled_without_token() {
        let (app, _) = seeded_app(&[]).await;
        let (status, _) = send(&app, "GET", "/api/admin/stats", &[AUTH], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_token() {
        let (app, _) = seeded_app(&[("ADMIN_TOKEN", "admin-secret")]).await;

        let (status, _) = send(&app, "GET", "/api/admin/stats", &[], None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            "GET",
            "/api/admin/stats",
            &[("authorization", "Bearer nope")],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_stats() {
        let (app, _) = seeded_app(&[("ADMIN_TOKEN", "admin-secret")]).await;
        let (status, body) = send(&app, "GET", "/api/admin/stats", &[AUTH], None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accounts"], 2);
        assert_eq!(body["activeKeys"], 1);
        assert_eq!(body["boundKeys"], 0);
        assert_eq!(body["maintenanceMode"], false);
    }

    #[tokio::test]
    async fn test_create_key_then_activate() {
        let (app, store) = seeded_app(&[("ADMIN_TOKEN", "admin-secret")]).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Team", "messageLimit": 5000, "validDays": 30})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let issued = body["key"].as_str().unwrap().to_string();
        assert_eq!(issued.len(), 16);
        assert_eq!(normalize_key(body["displayKey"].as_str().unwrap()), issued);
        assert_eq!(store.key(&issued).unwrap().valid_days, Some(30));

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Team", "messageLimit": 5000, "key": "team-0001"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["key"], "TEAM0001");
        assert!(store.key("TEAM0001").is_some());

        let (status, body) = post(
            &app,
            "/api/license/activate",
            json!({"email": "b@x.com", "licenseKey": "team 0001", "deviceId": "dev-2"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"], "Team");
        assert_eq!(body["messageLimit"], 5000);
    }

    #[tokio::test]
    async fn test_create_key_validation() {
        let (app, _) = seeded_app(&[("ADMIN_TOKEN", "admin-secret")]).await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Pro", "messageLimit": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Pro", "messageLimit": i64::MAX})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Pro", "messageLimit": 10, "validDays": i32::MAX})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Valid days"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/admin/keys",
            &[AUTH],
            Some(json!({"plan": "Pro", "messageLimit": 10, "key": "ab12-cd34"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_maintenance_toggle() {
        let (app, _) = seeded_app(&[("ADMIN_TOKEN", "admin-secret")]).await;

        let (status, body) = send(
            &app,
            "PUT",
            "/api/admin/maintenance",
            &[AUTH],
            Some(json!({"enabled": true})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["maintenanceMode"], true);

        let (status, body) = post(
            &app,
            "/api/license/verify",
            json!({"email": "a@x.com", "deviceId": "dev-1"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["maintenanceMode"], true);
        assert_eq!(body["canSendMessage"], false);
        assert_eq!(body["alerts"][0]["level"], "info");
    }
}
