//! Postgres-backed license store

use super::{
    Account, BindOutcome, Binding, LicenseKey, LicenseState, LicenseStore, NewLicenseKey,
    StoreError, StoreResult, StoreStats, UsageUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

/// Unique-violation SQLSTATE
const UNIQUE_VIOLATION: &str = "23505";

/// Initialize the database connection pool
pub async fn init_pool(database_url: &str, acquire_timeout: Duration) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

const LICENSE_KEY_COLUMNS: &str =
    "key, plan, message_limit, is_active, used_by, expires_at, valid_days, bound_at, created_at";

const LICENSE_STATE_COLUMNS: &str =
    "account_id, plan, license_key, expires_at, message_count, message_limit, last_reset_at, is_active";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LicenseStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find_account(&self, email: &str) -> StoreResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, is_banned, is_suspended, created_at FROM accounts WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn find_license_state(&self, account_id: Uuid) -> StoreResult<Option<LicenseState>> {
        let state = sqlx::query_as::<_, LicenseState>(&format!(
            "SELECT {} FROM license_states WHERE account_id = $1",
            LICENSE_STATE_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state)
    }

    async fn bind_key(&self, binding: Binding<'_>) -> StoreResult<BindOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent activations of the same key; the
        // loser re-reads `used_by` after the winner commits.
        let key = sqlx::query_as::<_, LicenseKey>(&format!(
            "SELECT {} FROM license_keys WHERE key = $1 AND is_active = TRUE FOR UPDATE",
            LICENSE_KEY_COLUMNS
        ))
        .bind(binding.key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(key) = key else {
            return Ok(BindOutcome::KeyNotFound);
        };

        match key.used_by {
            Some(owner) if owner != binding.account_id => return Ok(BindOutcome::Conflict),
            Some(_) => {
                let current = sqlx::query_as::<_, LicenseState>(&format!(
                    "SELECT {} FROM license_states WHERE account_id = $1 AND license_key = $2",
                    LICENSE_STATE_COLUMNS
                ))
                .bind(binding.account_id)
                .bind(&key.key)
                .fetch_optional(&mut *tx)
                .await?;

                if let Some(state) = current {
                    tx.commit().await?;
                    return Ok(BindOutcome::AlreadyBound(state));
                }
            }
            None => {}
        }

        sqlx::query("UPDATE license_keys SET used_by = $1, bound_at = $2 WHERE key = $3")
            .bind(binding.account_id)
            .bind(binding.now)
            .bind(&key.key)
            .execute(&mut *tx)
            .await?;

        let fresh = LicenseState::bound(binding.account_id, &key, binding.now);
        let state = sqlx::query_as::<_, LicenseState>(&format!(
            r#"
            INSERT INTO license_states
                (account_id, plan, license_key, expires_at, message_count, message_limit, last_reset_at, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (account_id) DO UPDATE SET
                plan = EXCLUDED.plan,
                license_key = EXCLUDED.license_key,
                expires_at = EXCLUDED.expires_at,
                message_count = EXCLUDED.message_count,
                message_limit = EXCLUDED.message_limit,
                last_reset_at = EXCLUDED.last_reset_at,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            RETURNING {}
            "#,
            LICENSE_STATE_COLUMNS
        ))
        .bind(fresh.account_id)
        .bind(&fresh.plan)
        .bind(&fresh.license_key)
        .bind(fresh.expires_at)
        .bind(fresh.message_count)
        .bind(fresh.message_limit)
        .bind(fresh.last_reset_at)
        .bind(fresh.is_active)
        .fetch_one(&mut *tx)
        .await?;

        if binding.clear_moderation {
            sqlx::query("UPDATE accounts SET is_banned = FALSE, is_suspended = FALSE WHERE id = $1")
                .bind(binding.account_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(BindOutcome::Bound(state))
    }

    async fn increment_usage(
        &self,
        account_id: Uuid,
        reset_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UsageUpdate>> {
        // Both CASE arms read the pre-update row, so the reset and the
        // increment happen in one statement.
        let update = sqlx::query_as::<_, UsageUpdate>(
            r#"
            UPDATE license_states SET
                message_count = CASE WHEN last_reset_at < $2 THEN 1 ELSE message_count + 1 END,
                last_reset_at = CASE WHEN last_reset_at < $2 THEN $3 ELSE last_reset_at END,
                updated_at = NOW()
            WHERE account_id = $1
            RETURNING message_count, message_limit
            "#,
        )
        .bind(account_id)
        .bind(reset_before)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(update)
    }

    async fn maintenance_mode(&self) -> StoreResult<bool> {
        let enabled: Option<bool> =
            sqlx::query_scalar("SELECT enabled FROM app_config WHERE name = 'maintenance'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(enabled.unwrap_or(false))
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_config (name, enabled) VALUES ('maintenance', $1)
            ON CONFLICT (name) DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            "#,
        )
        .bind(enabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_key(&self, key: NewLicenseKey) -> StoreResult<LicenseKey> {
        let result = sqlx::query_as::<_, LicenseKey>(&format!(
            r#"
            INSERT INTO license_keys (key, plan, message_limit, valid_days, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            LICENSE_KEY_COLUMNS
        ))
        .bind(&key.key)
        .bind(&key.plan)
        .bind(key.message_limit)
        .bind(key.valid_days)
        .bind(key.expires_at)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(record) => Ok(record),
            Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                Err(StoreError::DuplicateKey(key.key))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let (accounts, active_keys, bound_keys): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM accounts),
                (SELECT COUNT(*) FROM license_keys WHERE is_active = TRUE),
                (SELECT COUNT(*) FROM license_keys WHERE used_by IS NOT NULL)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            accounts,
            active_keys,
            bound_keys,
        })
    }
}
