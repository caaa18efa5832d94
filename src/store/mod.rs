/// Credential Store
///
/// Persistence contract for accounts and their refresh-token membership.
/// The storage layer owns serialization of its own writes: membership
/// changes and lockout counters are updated with atomic primitives, never
/// by loading the whole record, mutating it and writing it back.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryCredentialStore;
pub use postgres::{PgCredentialStore, PgRevocationRegistry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::account::Account;
use crate::auth::{LockState, LockoutPolicy, RefreshTokenRecord};
use crate::error::StoreError;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// # Errors
    /// `DuplicateEmail` if the (lower-cased) email is taken
    async fn create(&self, account: &Account) -> Result<(), StoreError>;

    /// Full-record update of the scalar account fields, last write wins.
    /// Membership is left alone; it only changes through the set primitives
    /// below.
    async fn save(&self, account: &Account) -> Result<(), StoreError>;

    /// Flip the active flag alone, leaving lockout state and membership to
    /// their own primitives. Returns the updated account.
    async fn set_active(&self, account_id: Uuid, active: bool) -> Result<Account, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Account, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Account, StoreError>;

    /// Owner of a live refresh token, looked up by token digest.
    async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Account, StoreError>;

    /// Add a membership entry, pruning expired ones and evicting the oldest
    /// beyond the configured cap.
    async fn add_refresh_token(
        &self,
        account_id: Uuid,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Returns whether the token was a member.
    async fn remove_refresh_token(
        &self,
        account_id: Uuid,
        token_hash: &str,
    ) -> Result<bool, StoreError>;

    /// Atomically remove `old_hash` and add `record`.
    ///
    /// # Errors
    /// `NotFound` if `old_hash` is no longer a member; nothing is added then.
    async fn rotate_refresh_token(
        &self,
        account_id: Uuid,
        old_hash: &str,
        record: RefreshTokenRecord,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Empty the membership set in one update, returning what was removed.
    async fn clear_refresh_tokens(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Apply one failed login under the store's per-account serialization.
    async fn record_login_failure(
        &self,
        account_id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Account, StoreError>;

    /// Reset counter and lock, stamp last login.
    ///
    /// The lock is re-checked under the same serialization as
    /// `record_login_failure`: if a lock is in force at `now` nothing is
    /// written and `LockState::Locked` comes back.
    async fn record_login_success(
        &self,
        account_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<LockState, StoreError>;
}
