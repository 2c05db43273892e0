//! License service: verify, activate and usage accounting
//!
//! The service is the only place that interprets license state. It reads
//! accounts and the key registry through [`LicenseStore`], delegates the
//! racy mutations to the store's atomic operations, and composes the
//! entitlement snapshot returned to clients.

use crate::store::{
    Account, BindOutcome, Binding, LicenseState, LicenseStore, StoreError, UsageUpdate,
};
use chrono::{DateTime, Duration, Utc};
use parley_common::{
    constants, normalize_key, ActivateRequest, Alert, AlertLevel, IncrementRequest,
    LicenseSnapshot, VerifyRequest, Warning, WarningCode,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;

/// Failures reported to clients. Messages are safe to return verbatim.
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    Internal(String),
}

/// Side effects of a successful activation
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationPolicy {
    /// Clear the account's ban/suspend flags when a key is bound
    pub clear_moderation_flags: bool,
}

pub struct LicenseService {
    store: Arc<dyn LicenseStore>,
    policy: ActivationPolicy,
    store_timeout: StdDuration,
    quota_reset: Duration,
}

impl LicenseService {
    pub fn new(
        store: Arc<dyn LicenseStore>,
        policy: ActivationPolicy,
        store_timeout: StdDuration,
        quota_reset: Duration,
    ) -> Self {
        Self {
            store,
            policy,
            store_timeout,
            quota_reset,
        }
    }

    /// Current entitlement snapshot. Never mutates state.
    pub async fn verify(&self, request: &VerifyRequest) -> Result<LicenseSnapshot, LicenseError> {
        let (Some(email), Some(_device_id)) =
            (present(&request.email), present(&request.device_id))
        else {
            return Err(LicenseError::InvalidRequest(
                "Email and device ID are required".to_string(),
            ));
        };

        let now = Utc::now();
        let account = self
            .bounded(self.store.find_account(email))
            .await
            .map_err(internal("License verification failed"))?;

        let state = match &account {
            Some(account) => self
                .bounded(self.store.find_license_state(account.id))
                .await
                .map_err(internal("License verification failed"))?,
            None => None,
        };

        let maintenance_mode = self.maintenance_mode().await;
        let supplied_key = present(&request.license_key).map(normalize_key);

        Ok(compose_snapshot(
            account.as_ref(),
            state.as_ref(),
            supplied_key.as_deref(),
            maintenance_mode,
            self.quota_reset,
            now,
        ))
    }

    /// Redeem a license key for an account
    pub async fn activate(&self, request: &ActivateRequest) -> Result<LicenseSnapshot, LicenseError> {
        let (Some(email), Some(raw_key), Some(_device_id)) = (
            present(&request.email),
            present(&request.license_key),
            present(&request.device_id),
        ) else {
            return Err(LicenseError::InvalidRequest(
                "Email, license key, and device ID are required".to_string(),
            ));
        };

        let mut account = self
            .bounded(self.store.find_account(email))
            .await
            .map_err(internal("License activation failed"))?
            .ok_or_else(|| LicenseError::NotFound("User not found".to_string()))?;

        let key = normalize_key(raw_key);
        if key.is_empty() {
            return Err(invalid_key());
        }

        let now = Utc::now();
        let outcome = self
            .bounded(self.store.bind_key(Binding {
                account_id: account.id,
                key: &key,
                now,
                clear_moderation: self.policy.clear_moderation_flags,
            }))
            .await
            .map_err(internal("License activation failed"))?;

        let state = match outcome {
            BindOutcome::Bound(state) => {
                tracing::info!(
                    "License {} bound to {} (plan {}, limit {})",
                    mask_key(&key),
                    account.email,
                    state.plan,
                    state.message_limit
                );
                if self.policy.clear_moderation_flags {
                    account.is_banned = false;
                    account.is_suspended = false;
                }
                state
            }
            BindOutcome::AlreadyBound(state) => {
                tracing::debug!("License {} already bound to {}", mask_key(&key), account.email);
                state
            }
            BindOutcome::KeyNotFound => return Err(invalid_key()),
            BindOutcome::Conflict => {
                tracing::warn!(
                    "Rejected activation of {} by {}: bound to another account",
                    mask_key(&key),
                    account.email
                );
                return Err(LicenseError::Conflict(
                    "This license key is already in use by another account".to_string(),
                ));
            }
        };

        let maintenance_mode = self.maintenance_mode().await;

        Ok(compose_snapshot(
            Some(&account),
            Some(&state),
            Some(&key),
            maintenance_mode,
            self.quota_reset,
            now,
        ))
    }

    /// Record one sent message. The limit is not enforced here.
    pub async fn increment_usage(&self, request: &IncrementRequest) -> Result<UsageUpdate, LicenseError> {
        let Some(email) = present(&request.email) else {
            return Err(LicenseError::InvalidRequest("Email is required".to_string()));
        };

        let account = self
            .bounded(self.store.find_account(email))
            .await
            .map_err(internal("Failed to increment message count"))?
            .ok_or_else(|| LicenseError::NotFound("User not found".to_string()))?;

        let now = Utc::now();
        self.bounded(self.store.increment_usage(account.id, now - self.quota_reset, now))
            .await
            .map_err(internal("Failed to increment message count"))?
            .ok_or_else(|| LicenseError::NotFound("License not found".to_string()))
    }

    /// Global maintenance flag; an unreadable flag is reported as off
    pub async fn maintenance_mode(&self) -> bool {
        match self.bounded(self.store.maintenance_mode()).await {
            Ok(enabled) => enabled,
            Err(e) => {
                tracing::warn!("Failed to read maintenance flag: {}", e);
                false
            }
        }
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, operation)
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))?
    }
}

/// Build the snapshot for an account from its stored state.
///
/// Accounts without a license get the free tier, with their moderation
/// flags applied.
pub fn compose_snapshot(
    account: Option<&Account>,
    state: Option<&LicenseState>,
    supplied_key: Option<&str>,
    maintenance_mode: bool,
    quota_reset: Duration,
    now: DateTime<Utc>,
) -> LicenseSnapshot {
    let is_banned = account.is_some_and(|a| a.is_banned);
    let is_suspended = account.is_some_and(|a| a.is_suspended);

    let Some(state) = state else {
        let mut snapshot = LicenseSnapshot::free_tier(now, maintenance_mode);
        snapshot.is_banned = is_banned;
        snapshot.is_suspended = is_suspended;
        snapshot.alerts.extend(moderation_alerts(is_banned, is_suspended));
        snapshot.can_send_message = snapshot.can_send_message && !is_banned && !is_suspended;
        return snapshot;
    };

    let message_count = if state.last_reset_at + quota_reset < now {
        0
    } else {
        state.message_count
    };
    let expired = state.expires_at <= now;
    let valid = state.is_active && !expired;

    let mut warnings = Vec::new();
    let days_left = (state.expires_at - now).num_days();
    if valid && days_left < constants::EXPIRY_WARNING_DAYS {
        warnings.push(Warning {
            code: WarningCode::ExpiringSoon,
            message: format!("Your license expires in {} day(s)", days_left),
        });
    }
    if message_count >= state.message_limit {
        warnings.push(Warning {
            code: WarningCode::QuotaExhausted,
            message: "You have used all of your messages for this period".to_string(),
        });
    } else if i128::from(message_count) * 100
        >= i128::from(state.message_limit) * i128::from(constants::QUOTA_WARNING_PERCENT)
    {
        warnings.push(Warning {
            code: WarningCode::QuotaNearlyExhausted,
            message: format!(
                "{} of {} messages used",
                message_count, state.message_limit
            ),
        });
    }
    if supplied_key.is_some_and(|key| !key.is_empty() && key != state.license_key) {
        warnings.push(Warning {
            code: WarningCode::KeyMismatch,
            message: "This license key is not the one bound to your account".to_string(),
        });
    }

    let mut alerts = moderation_alerts(is_banned, is_suspended);
    if expired {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            message: "Your license has expired".to_string(),
        });
    } else if !state.is_active {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            message: "Your license has been deactivated".to_string(),
        });
    }
    if maintenance_mode {
        alerts.push(Alert::maintenance());
    }

    let can_send_message = valid
        && !is_banned
        && !is_suspended
        && !maintenance_mode
        && message_count < state.message_limit;

    LicenseSnapshot {
        valid,
        plan: state.plan.clone(),
        message_limit: state.message_limit,
        message_count,
        can_send_message,
        expires_at: state.expires_at,
        warnings,
        is_banned,
        is_suspended,
        alerts,
        maintenance_mode,
    }
}

fn moderation_alerts(is_banned: bool, is_suspended: bool) -> Vec<Alert> {
    let mut alerts = Vec::new();
    if is_banned {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            message: "Your account has been banned".to_string(),
        });
    }
    if is_suspended {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            message: "Your account is suspended".to_string(),
        });
    }
    alerts
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn invalid_key() -> LicenseError {
    LicenseError::NotFound("Invalid or inactive license key".to_string())
}

/// Log the store failure and hide it behind a client-safe message
fn internal(message: &'static str) -> impl FnOnce(StoreError) -> LicenseError {
    move |e| {
        tracing::error!("{}: {}", message, e);
        LicenseError::Internal(message.to_string())
    }
}

/// Keys are credentials; only the last four characters reach the logs
fn mask_key(key: &str) -> String {
    let tail = key.len().saturating_sub(4);
    format!("****{}", &key[tail..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewLicenseKey, StoreResult, StoreStats};
    use async_trait::async_trait;
    use uuid::Uuid;

    const RESET: i64 = constants::QUOTA_RESET_DAYS;

    fn service(store: Arc<MemoryStore>, policy: ActivationPolicy) -> LicenseService {
        LicenseService::new(
            store,
            policy,
            StdDuration::from_secs(5),
            Duration::days(RESET),
        )
    }

    async fn seeded() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.create_account("a@x.com");
        store.create_account("b@x.com");
        store
            .insert_key(NewLicenseKey {
                key: "AB12CD34".to_string(),
                plan: "Pro".to_string(),
                message_limit: 1000,
                valid_days: None,
                expires_at: None,
            })
            .await
            .unwrap();
        store
    }

    fn activate_request(email: &str, key: &str) -> ActivateRequest {
        ActivateRequest {
            email: Some(email.to_string()),
            license_key: Some(key.to_string()),
            device_id: Some("d1".to_string()),
            captcha_token: None,
        }
    }

    fn verify_request(email: &str) -> VerifyRequest {
        VerifyRequest {
            email: Some(email.to_string()),
            license_key: None,
            device_id: Some("d1".to_string()),
        }
    }

    fn increment_request(email: &str) -> IncrementRequest {
        IncrementRequest {
            email: Some(email.to_string()),
        }
    }

    #[tokio::test]
    async fn test_activate_example() {
        let svc = service(seeded().await, ActivationPolicy::default());

        let snapshot = svc.activate(&activate_request("a@x.com", "ab12-cd34")).await.unwrap();

        assert!(snapshot.valid);
        assert_eq!(snapshot.plan, "Pro");
        assert_eq!(snapshot.message_limit, 1000);
        assert_eq!(snapshot.message_count, 0);
        assert!(snapshot.can_send_message);
        assert!(snapshot.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_activate_is_idempotent_for_same_account() {
        let store = seeded().await;
        let svc = service(store.clone(), ActivationPolicy::default());
        let account = store.find_account("a@x.com").await.unwrap().unwrap();

        let first = svc.activate(&activate_request("a@x.com", "ab12-cd34")).await.unwrap();
        let state_after_first = store.find_license_state(account.id).await.unwrap();

        let second = svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        let state_after_second = store.find_license_state(account.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(state_after_first, state_after_second);
    }

    #[tokio::test]
    async fn test_activate_does_not_reset_usage_on_rebind() {
        let store = seeded().await;
        let svc = service(store, ActivationPolicy::default());

        svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        svc.increment_usage(&increment_request("a@x.com")).await.unwrap();

        let again = svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        assert_eq!(again.message_count, 1);
    }

    #[tokio::test]
    async fn test_activate_key_with_extreme_limits() {
        let store = seeded().await;
        store
            .insert_key(NewLicenseKey {
                key: "HUGE0001".to_string(),
                plan: "Unlimited".to_string(),
                message_limit: i64::MAX,
                valid_days: Some(i32::MAX),
                expires_at: None,
            })
            .await
            .unwrap();
        let svc = service(store, ActivationPolicy::default());

        let before = Utc::now();
        let snapshot = svc.activate(&activate_request("a@x.com", "huge-0001")).await.unwrap();

        assert!(snapshot.valid);
        assert_eq!(snapshot.message_limit, i64::MAX);
        assert!(snapshot.warnings.is_empty());
        assert!(snapshot.expires_at <= Utc::now() + Duration::days(constants::MAX_VALIDITY_DAYS));
        assert!(snapshot.expires_at >= before + Duration::days(constants::MAX_VALIDITY_DAYS));

        let verified = svc.verify(&verify_request("a@x.com")).await.unwrap();
        assert!(verified.can_send_message);
    }

    #[tokio::test]
    async fn test_activate_by_second_account_conflicts() {
        let svc = service(seeded().await, ActivationPolicy::default());

        svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        let err = svc.activate(&activate_request("b@x.com", "ab12-cd34")).await.unwrap_err();

        assert!(matches!(err, LicenseError::Conflict(_)));
        assert_eq!(err.to_string(), "This license key is already in use by another account");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_activation_has_one_winner() {
        for _ in 0..25 {
            let store = seeded().await;
            let svc = Arc::new(service(store.clone(), ActivationPolicy::default()));

            let a = {
                let svc = svc.clone();
                tokio::spawn(async move { svc.activate(&activate_request("a@x.com", "AB12-CD34")).await })
            };
            let b = {
                let svc = svc.clone();
                tokio::spawn(async move { svc.activate(&activate_request("b@x.com", "ab12cd34")).await })
            };

            let results = [a.await.unwrap(), b.await.unwrap()];
            let winners = results.iter().filter(|r| r.is_ok()).count();
            let conflicts = results
                .iter()
                .filter(|r| matches!(r, Err(LicenseError::Conflict(_))))
                .count();
            assert_eq!(winners, 1);
            assert_eq!(conflicts, 1);

            let owner = store.key("AB12CD34").unwrap().used_by.unwrap();
            let winner_email = if results[0].is_ok() { "a@x.com" } else { "b@x.com" };
            let winner = store.find_account(winner_email).await.unwrap().unwrap();
            assert_eq!(owner, winner.id);
        }
    }

    #[tokio::test]
    async fn test_activate_missing_fields() {
        let svc = service(seeded().await, ActivationPolicy::default());
        let mut request = activate_request("a@x.com", "AB12CD34");
        request.device_id = Some("   ".to_string());

        let err = svc.activate(&request).await.unwrap_err();
        assert!(matches!(err, LicenseError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_activate_unknown_user() {
        let svc = service(seeded().await, ActivationPolicy::default());
        let err = svc.activate(&activate_request("nobody@x.com", "AB12CD34")).await.unwrap_err();
        assert!(matches!(err, LicenseError::NotFound(m) if m == "User not found"));
    }

    #[tokio::test]
    async fn test_activate_unknown_or_blank_key() {
        let svc = service(seeded().await, ActivationPolicy::default());

        for key in ["ZZZZ-9999", "----"] {
            let err = svc.activate(&activate_request("a@x.com", key)).await.unwrap_err();
            assert!(matches!(err, LicenseError::NotFound(m) if m == "Invalid or inactive license key"));
        }
    }

    #[tokio::test]
    async fn test_activation_keeps_moderation_flags_by_default() {
        let store = seeded().await;
        store.set_moderation("a@x.com", true, true);
        let svc = service(store.clone(), ActivationPolicy::default());

        let snapshot = svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();

        assert!(snapshot.is_banned);
        assert!(snapshot.is_suspended);
        assert!(!snapshot.can_send_message);
        let account = store.find_account("a@x.com").await.unwrap().unwrap();
        assert!(account.is_banned && account.is_suspended);
    }

    #[tokio::test]
    async fn test_activation_policy_clears_moderation_flags() {
        let store = seeded().await;
        store.set_moderation("a@x.com", true, true);
        let policy = ActivationPolicy {
            clear_moderation_flags: true,
        };
        let svc = service(store.clone(), policy);

        let snapshot = svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();

        assert!(!snapshot.is_banned);
        assert!(!snapshot.is_suspended);
        assert!(snapshot.can_send_message);
        let account = store.find_account("a@x.com").await.unwrap().unwrap();
        assert!(!account.is_banned && !account.is_suspended);
    }

    #[tokio::test]
    async fn test_activation_reports_maintenance() {
        let store = seeded().await;
        store.set_maintenance_mode(true).await.unwrap();
        let svc = service(store, ActivationPolicy::default());

        let snapshot = svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        assert!(snapshot.maintenance_mode);
        assert!(!snapshot.can_send_message);
    }

    #[tokio::test]
    async fn test_verify_without_license_returns_free_tier() {
        let svc = service(seeded().await, ActivationPolicy::default());

        for email in ["a@x.com", "unknown@x.com"] {
            let snapshot = svc.verify(&verify_request(email)).await.unwrap();
            assert!(snapshot.valid);
            assert!(snapshot.can_send_message);
            assert_eq!(snapshot.plan, constants::FREE_PLAN);
            assert_eq!(snapshot.message_limit, constants::FREE_MESSAGE_LIMIT);
            assert_eq!(snapshot.message_count, 0);
            assert!(!snapshot.is_banned);
        }
    }

    #[tokio::test]
    async fn test_verify_requires_email_and_device() {
        let svc = service(seeded().await, ActivationPolicy::default());
        let mut request = verify_request("a@x.com");
        request.device_id = None;

        let err = svc.verify(&request).await.unwrap_err();
        assert!(matches!(err, LicenseError::InvalidRequest(m) if m == "Email and device ID are required"));
    }

    #[tokio::test]
    async fn test_verify_reflects_bound_license_without_mutating() {
        let store = seeded().await;
        let svc = service(store.clone(), ActivationPolicy::default());
        svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();
        svc.increment_usage(&increment_request("a@x.com")).await.unwrap();

        let account = store.find_account("a@x.com").await.unwrap().unwrap();
        let before = store.find_license_state(account.id).await.unwrap();
        let snapshot = svc.verify(&verify_request("a@x.com")).await.unwrap();
        let after = store.find_license_state(account.id).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(snapshot.plan, "Pro");
        assert_eq!(snapshot.message_count, 1);
        assert!(snapshot.can_send_message);
    }

    #[tokio::test]
    async fn test_increment_requires_license() {
        let svc = service(seeded().await, ActivationPolicy::default());

        let err = svc.increment_usage(&increment_request("a@x.com")).await.unwrap_err();
        assert!(matches!(err, LicenseError::NotFound(m) if m == "License not found"));

        let err = svc.increment_usage(&increment_request("ghost@x.com")).await.unwrap_err();
        assert!(matches!(err, LicenseError::NotFound(m) if m == "User not found"));

        let err = svc.increment_usage(&IncrementRequest::default()).await.unwrap_err();
        assert!(matches!(err, LicenseError::InvalidRequest(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_count_exactly() {
        let store = seeded().await;
        let svc = Arc::new(service(store.clone(), ActivationPolicy::default()));
        svc.activate(&activate_request("a@x.com", "AB12CD34")).await.unwrap();

        let tasks: Vec<_> = (0..100)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.increment_usage(&increment_request("a@x.com")).await })
            })
            .collect();
        let results = futures_util::future::join_all(tasks).await;
        assert!(results.into_iter().all(|r| r.unwrap().is_ok()));

        let account = store.find_account("a@x.com").await.unwrap().unwrap();
        let state = store.find_license_state(account.id).await.unwrap().unwrap();
        assert_eq!(state.message_count, 100);
    }

    fn state(now: DateTime<Utc>) -> LicenseState {
        LicenseState {
            account_id: Uuid::new_v4(),
            plan: "Pro".to_string(),
            license_key: "AB12CD34".to_string(),
            expires_at: now + Duration::days(100),
            message_count: 0,
            message_limit: 10,
            last_reset_at: now,
            is_active: true,
        }
    }

    fn codes(snapshot: &LicenseSnapshot) -> Vec<WarningCode> {
        snapshot.warnings.iter().map(|w| w.code).collect()
    }

    #[test]
    fn test_snapshot_quota_warnings() {
        let now = Utc::now();
        let reset = Duration::days(RESET);

        let mut s = state(now);
        s.message_count = 8;
        let snapshot = compose_snapshot(None, Some(&s), None, false, reset, now);
        assert_eq!(codes(&snapshot), vec![WarningCode::QuotaNearlyExhausted]);
        assert!(snapshot.can_send_message);

        s.message_count = 10;
        let snapshot = compose_snapshot(None, Some(&s), None, false, reset, now);
        assert_eq!(codes(&snapshot), vec![WarningCode::QuotaExhausted]);
        assert!(!snapshot.can_send_message);
    }

    #[test]
    fn test_snapshot_quota_warning_with_huge_limit() {
        let now = Utc::now();
        let mut s = state(now);
        s.message_limit = i64::MAX;
        s.message_count = i64::MAX / 10;
        let snapshot = compose_snapshot(None, Some(&s), None, false, Duration::days(RESET), now);
        assert!(snapshot.warnings.is_empty());

        s.message_count = i64::MAX - 1;
        let snapshot = compose_snapshot(None, Some(&s), None, false, Duration::days(RESET), now);
        assert_eq!(codes(&snapshot), vec![WarningCode::QuotaNearlyExhausted]);
    }

    #[test]
    fn test_snapshot_applies_pending_reset() {
        let now = Utc::now();
        let mut s = state(now);
        s.message_count = 10;
        s.last_reset_at = now - Duration::days(RESET + 1);

        let snapshot = compose_snapshot(None, Some(&s), None, false, Duration::days(RESET), now);
        assert_eq!(snapshot.message_count, 0);
        assert!(snapshot.can_send_message);
    }

    #[test]
    fn test_snapshot_expired_license() {
        let now = Utc::now();
        let mut s = state(now);
        s.expires_at = now - Duration::hours(1);

        let snapshot = compose_snapshot(None, Some(&s), None, false, Duration::days(RESET), now);
        assert!(!snapshot.valid);
        assert!(!snapshot.can_send_message);
        assert!(snapshot.alerts.iter().any(|a| a.level == AlertLevel::Critical));
        assert!(snapshot.warnings.is_empty());
    }

    #[test]
    fn test_snapshot_expiring_soon_and_key_mismatch() {
        let now = Utc::now();
        let mut s = state(now);
        s.expires_at = now + Duration::days(3);

        let snapshot =
            compose_snapshot(None, Some(&s), Some("OTHERKEY"), false, Duration::days(RESET), now);
        assert_eq!(
            codes(&snapshot),
            vec![WarningCode::ExpiringSoon, WarningCode::KeyMismatch]
        );
        assert!(snapshot.can_send_message);
    }

    #[test]
    fn test_free_tier_snapshot_for_banned_account() {
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            email: "a@x.com".to_string(),
            is_banned: true,
            is_suspended: false,
            created_at: now,
        };

        let snapshot = compose_snapshot(Some(&account), None, None, false, Duration::days(RESET), now);
        assert!(snapshot.is_banned);
        assert!(!snapshot.can_send_message);
        assert_eq!(snapshot.alerts.len(), 1);
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("AB12CD34"), "****CD34");
        assert_eq!(mask_key("AB"), "****AB");
    }

    /// Store whose operations never complete
    struct StalledStore;

    #[async_trait]
    impl LicenseStore for StalledStore {
        fn backend(&self) -> &'static str {
            "stalled"
        }
        async fn ping(&self) -> StoreResult<()> {
            std::future::pending().await
        }
        async fn find_account(&self, _: &str) -> StoreResult<Option<Account>> {
            std::future::pending().await
        }
        async fn find_license_state(&self, _: Uuid) -> StoreResult<Option<LicenseState>> {
            std::future::pending().await
        }
        async fn bind_key(&self, _: Binding<'_>) -> StoreResult<BindOutcome> {
            std::future::pending().await
        }
        async fn increment_usage(
            &self,
            _: Uuid,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> StoreResult<Option<UsageUpdate>> {
            std::future::pending().await
        }
        async fn maintenance_mode(&self) -> StoreResult<bool> {
            std::future::pending().await
        }
        async fn set_maintenance_mode(&self, _: bool) -> StoreResult<()> {
            std::future::pending().await
        }
        async fn insert_key(&self, _: NewLicenseKey) -> StoreResult<crate::store::LicenseKey> {
            std::future::pending().await
        }
        async fn stats(&self) -> StoreResult<StoreStats> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let svc = LicenseService::new(
            Arc::new(StalledStore),
            ActivationPolicy::default(),
            StdDuration::from_millis(20),
            Duration::days(RESET),
        );

        let err = svc.verify(&verify_request("a@x.com")).await.unwrap_err();
        assert!(matches!(err, LicenseError::Internal(m) if m == "License verification failed"));

        let err = svc.increment_usage(&increment_request("a@x.com")).await.unwrap_err();
        assert!(matches!(err, LicenseError::Internal(_)));

        assert!(!svc.maintenance_mode().await);
    }
}
