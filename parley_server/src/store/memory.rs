//! In-memory license store
//!
//! Backs `DATABASE_URL=memory://` development runs and the test suite.
//! Key binding holds the key's shard lock for the whole compare-and-set and
//! usage increments mutate the ledger under its entry lock, which gives the
//! same atomicity as the Postgres transactions.

use super::{
    Account, BindOutcome, Binding, LicenseKey, LicenseState, LicenseStore, NewLicenseKey,
    StoreError, StoreResult, StoreStats, UsageUpdate,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    /// email -> account
    accounts: DashMap<String, Account>,
    /// normalized key -> record
    keys: DashMap<String, LicenseKey>,
    /// account id -> license state
    states: DashMap<Uuid, LicenseState>,
    maintenance: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account as the identity provider would
    pub fn create_account(&self, email: &str) -> Account {
        self.accounts
            .entry(email.to_string())
            .or_insert_with(|| Account {
                id: Uuid::new_v4(),
                email: email.to_string(),
                is_banned: false,
                is_suspended: false,
                created_at: Utc::now(),
            })
            .clone()
    }

    /// Set moderation flags as the external moderation path would
    #[cfg(test)]
    pub fn set_moderation(&self, email: &str, is_banned: bool, is_suspended: bool) {
        if let Some(mut account) = self.accounts.get_mut(email) {
            account.is_banned = is_banned;
            account.is_suspended = is_suspended;
        }
    }

    #[cfg(test)]
    pub fn key(&self, key: &str) -> Option<LicenseKey> {
        self.keys.get(key).map(|record| record.clone())
    }

    #[cfg(test)]
    pub fn put_license_state(&self, state: LicenseState) {
        self.states.insert(state.account_id, state);
    }

    fn clear_moderation(&self, account_id: Uuid) {
        for mut account in self.accounts.iter_mut() {
            if account.id == account_id {
                account.is_banned = false;
                account.is_suspended = false;
            }
        }
    }
}

#[async_trait]
impl LicenseStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_account(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self.accounts.get(email).map(|account| account.clone()))
    }

    async fn find_license_state(&self, account_id: Uuid) -> StoreResult<Option<LicenseState>> {
        Ok(self.states.get(&account_id).map(|state| state.clone()))
    }

    async fn bind_key(&self, binding: Binding<'_>) -> StoreResult<BindOutcome> {
        // Lock order: keys, then states, then accounts.
        let mut key = match self.keys.get_mut(binding.key) {
            Some(key) if key.is_active => key,
            _ => return Ok(BindOutcome::KeyNotFound),
        };

        match key.used_by {
            Some(owner) if owner != binding.account_id => return Ok(BindOutcome::Conflict),
            Some(_) => {
                if let Some(state) = self.states.get(&binding.account_id) {
                    if state.license_key == key.key {
                        return Ok(BindOutcome::AlreadyBound(state.clone()));
                    }
                }
            }
            None => {}
        }

        key.used_by = Some(binding.account_id);
        key.bound_at = Some(binding.now);

        let state = LicenseState::bound(binding.account_id, &key, binding.now);
        self.states.insert(binding.account_id, state.clone());

        if binding.clear_moderation {
            self.clear_moderation(binding.account_id);
        }

        Ok(BindOutcome::Bound(state))
    }

    async fn increment_usage(
        &self,
        account_id: Uuid,
        reset_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<UsageUpdate>> {
        let Some(mut state) = self.states.get_mut(&account_id) else {
            return Ok(None);
        };

        if state.last_reset_at < reset_before {
            state.message_count = 1;
            state.last_reset_at = now;
        } else {
            state.message_count += 1;
        }

        Ok(Some(UsageUpdate {
            message_count: state.message_count,
            message_limit: state.message_limit,
        }))
    }

    async fn maintenance_mode(&self) -> StoreResult<bool> {
        Ok(self.maintenance.load(Ordering::SeqCst))
    }

    async fn set_maintenance_mode(&self, enabled: bool) -> StoreResult<()> {
        self.maintenance.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_key(&self, key: NewLicenseKey) -> StoreResult<LicenseKey> {
        match self.keys.entry(key.key.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateKey(key.key)),
            Entry::Vacant(slot) => {
                let record = LicenseKey {
                    key: key.key,
                    plan: key.plan,
                    message_limit: key.message_limit,
                    is_active: true,
                    used_by: None,
                    expires_at: key.expires_at,
                    valid_days: key.valid_days,
                    bound_at: None,
                    created_at: Utc::now(),
                };
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        Ok(StoreStats {
            accounts: self.accounts.len() as i64,
            active_keys: self.keys.iter().filter(|k| k.is_active).count() as i64,
            bound_keys: self.keys.iter().filter(|k| k.used_by.is_some()).count() as i64,
        })
    }
}
