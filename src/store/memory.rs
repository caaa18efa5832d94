use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::account::Account;
use crate::auth::refresh_token::prune_membership;
use crate::auth::{LockState, LockoutPolicy, RefreshTokenRecord};
use crate::error::StoreError;
use crate::store::CredentialStore;

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    by_email: HashMap<String, Uuid>,
    by_refresh: HashMap<String, Uuid>,
}

impl Inner {
    fn account_mut(&mut self, id: Uuid) -> Result<&mut Account, StoreError> {
        self.accounts.get_mut(&id).ok_or(StoreError::NotFound)
    }

    /// Re-sync the digest index with an account's membership after a change.
    fn reindex(&mut self, id: Uuid, before: &[RefreshTokenRecord]) {
        for record in before {
            self.by_refresh.remove(&record.token_hash);
        }
        if let Some(account) = self.accounts.get(&id) {
            for record in &account.refresh_tokens {
                self.by_refresh.insert(record.token_hash.clone(), id);
            }
        }
    }
}

/// Process-local credential store.
///
/// One write lock guards every account, so each mutation is atomic with
/// respect to every other.
pub struct InMemoryCredentialStore {
    inner: RwLock<Inner>,
    max_refresh_tokens: usize,
}

impl InMemoryCredentialStore {
    pub fn new(max_refresh_tokens: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            max_refresh_tokens: max_refresh_tokens.max(1),
        }
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("credential store lock poisoned".to_string())
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let email = account.email.to_lowercase();
        if inner.by_email.contains_key(&email) {
            return Err(StoreError::DuplicateEmail);
        }
        let mut account = account.clone();
        account.email = email.clone();
        let id = account.id;
        inner.by_email.insert(email, id);
        inner.accounts.insert(id, account);
        inner.reindex(id, &[]);
        Ok(())
    }

    async fn save(&self, account: &Account) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let email = account.email.to_lowercase();
        if let Some(owner) = inner.by_email.get(&email) {
            if *owner != account.id {
                return Err(StoreError::DuplicateEmail);
            }
        }
        let stored = inner.account_mut(account.id)?;
        let old_email = std::mem::replace(&mut stored.email, email.clone());
        stored.password_hash = account.password_hash.clone();
        stored.role = account.role;
        stored.is_active = account.is_active;
        stored.last_login_at = account.last_login_at;
        stored.failed_login_attempts = account.failed_login_attempts;
        stored.locked_until = account.locked_until;
        if old_email != email {
            inner.by_email.remove(&old_email);
            inner.by_email.insert(email, account.id);
        }
        Ok(())
    }

    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<Account, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        account.is_active = active;
        Ok(account.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Account, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.accounts.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn find_by_email(&self, email: &str) -> Result<Account, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .by_email
            .get(&email.to_lowercase())
            .and_then(|id| inner.accounts.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Account, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner
            .by_refresh
            .get(token_hash)
            .and_then(|id| inner.accounts.get(id))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn add_refresh_token(
        &self,
        account_id: Uuid,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let limit = self.max_refresh_tokens;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        let before = account.refresh_tokens.clone();
        let newest = record.token_hash.clone();
        account.refresh_tokens.push(record);
        prune_membership(&mut account.refresh_tokens, &newest, limit, now);
        inner.reindex(account_id, &before);
        Ok(())
    }

    async fn remove_refresh_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        let len = account.refresh_tokens.len();
        account.refresh_tokens.retain(|r| r.token_hash != token_hash);
        let removed = account.refresh_tokens.len() != len;
        if removed {
            inner.by_refresh.remove(token_hash);
        }
        Ok(removed)
    }

    async fn rotate_refresh_token(
        &self,
        account_id: Uuid,
        old_hash: &str,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let limit = self.max_refresh_tokens;
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        if !account.has_refresh_token(old_hash) {
            return Err(StoreError::NotFound);
        }
        let before = account.refresh_tokens.clone();
        account.refresh_tokens.retain(|r| r.token_hash != old_hash);
        let newest = record.token_hash.clone();
        account.refresh_tokens.push(record);
        prune_membership(&mut account.refresh_tokens, &newest, limit, now);
        inner.reindex(account_id, &before);
        Ok(())
    }

    async fn clear_refresh_tokens(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        let cleared = std::mem::take(&mut account.refresh_tokens);
        for record in &cleared {
            inner.by_refresh.remove(&record.token_hash);
        }
        Ok(cleared)
    }

    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        let transition =
            policy.register_failure(account.failed_login_attempts, account.locked_until, now);
        account.failed_login_attempts = transition.failed_attempts;
        account.locked_until = transition.locked_until;
        Ok(account.clone())
    }

    async fn record_login_success(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LockState, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let account = inner.account_mut(account_id)?;
        if let Some(until) = account.locked_until.filter(|until| *until > now) {
            return Ok(LockState::Locked { until });
        }
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);
        Ok(LockState::Open { failed_attempts: 0 })
    }
}
