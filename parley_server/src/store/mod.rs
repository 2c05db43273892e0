//! License store: accounts, key registry, quota ledger and maintenance flag
//!
//! All shared state lives behind [`LicenseStore`]. The two mutations that
//! race across sessions (key binding and usage increment) are single store
//! operations so each backend can make them atomic.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parley_common::constants;
use std::time::Duration as StdDuration;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store operation timed out after {0:?}")]
    Timeout(StdDuration),

    #[error("license key already exists: {0}")]
    DuplicateKey(String),
}

/// Account record, keyed by identity (email)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub is_banned: bool,
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
}

/// Key registry entry
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LicenseKey {
    /// Normalized key string
    pub key: String,
    pub plan: String,
    pub message_limit: i64,
    pub is_active: bool,
    /// Account the key is bound to
    pub used_by: Option<Uuid>,
    /// Absolute expiry, takes precedence over `valid_days`
    pub expires_at: Option<DateTime<Utc>>,
    /// Validity counted from the moment of binding
    pub valid_days: Option<i32>,
    pub bound_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LicenseKey {
    /// Expiry of a license bound at `now`
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match (self.expires_at, self.valid_days) {
            (Some(at), _) => at,
            (None, Some(days)) => {
                let days = i64::from(days).clamp(0, constants::MAX_VALIDITY_DAYS);
                now.checked_add_signed(Duration::days(days)).unwrap_or(now)
            }
            (None, None) => now
                .checked_add_signed(Duration::days(constants::DEFAULT_VALIDITY_DAYS))
                .unwrap_or(now),
        }
    }
}

/// Per-account license state and quota ledger
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct LicenseState {
    pub account_id: Uuid,
    pub plan: String,
    pub license_key: String,
    pub expires_at: DateTime<Utc>,
    pub message_count: i64,
    pub message_limit: i64,
    pub last_reset_at: DateTime<Utc>,
    pub is_active: bool,
}

impl LicenseState {
    /// Fresh state for `key` bound at `now`
    pub fn bound(account_id: Uuid, key: &LicenseKey, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            plan: key.plan.clone(),
            license_key: key.key.clone(),
            expires_at: key.expiry_from(now),
            message_count: 0,
            message_limit: key.message_limit,
            last_reset_at: now,
            is_active: true,
        }
    }
}

/// Key to be added to the registry
#[derive(Debug, Clone)]
pub struct NewLicenseKey {
    pub key: String,
    pub plan: String,
    pub message_limit: i64,
    pub valid_days: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Compare-and-set binding of a key to an account
#[derive(Debug, Clone, Copy)]
pub struct Binding<'a> {
    pub account_id: Uuid,
    /// Normalized key
    pub key: &'a str,
    pub now: DateTime<Utc>,
    /// Clear the account's ban/suspend flags in the same transaction
    pub clear_moderation: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The key was bound and a fresh license state written
    Bound(LicenseState),
    /// The key was already bound to this account; nothing changed
    AlreadyBound(LicenseState),
    /// No active key with that value
    KeyNotFound,
    /// The key is bound to another account
    Conflict,
}

/// Quota ledger after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct UsageUpdate {
    pub message_count: i64,
    pub message_limit: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub accounts: i64,
    pub active_keys: i64,
    pub bound_keys: i64,
}

#[async_trait]
pub trait LicenseStore: Send + Sync {
    /// Name used in logs and health output
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    async fn find_account(&self, email: &str) -> StoreResult<Option<Account>>;

    async fn find_license_state(&self, account_id: Uuid) -> StoreResult<Option<LicenseState>>;

    /// Look up the active key and bind it to the account, atomically with
    /// the ownership check
    async fn bind_key(&self, binding: Binding<'_>) -> StoreResult<BindOutcome>;

    /// Add one message to the account's ledger.
    ///
    /// A ledger last reset before `reset_before` restarts at one and is
    /// stamped with `now`. Returns `None` when the account has no license.
    async fn increment_usage(
        &self,
        account_id: Uuid,
        reset_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UsageUpdate>>;

    async fn maintenance_mode(&self) -> StoreResult<bool>;

    async fn set_maintenance_mode(&self, enabled: bool) -> StoreResult<()>;

    async fn insert_key(&self, key: NewLicenseKey) -> StoreResult<LicenseKey>;

    async fn stats(&self) -> StoreResult<StoreStats>;
}
