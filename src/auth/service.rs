/// Session Orchestrator
///
/// The externally visible operations: signup, login, refresh, logout,
/// logout-all, and the revocation hook for administrative actions. All
/// shared state lives behind the credential store and the revocation
/// registry, which serialize their own writes; this type holds no locks.
///
/// A token is only handed back once the store has acknowledged the
/// membership write that makes it valid.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::account::{Account, AccountProfile, AuthenticatedIdentity, Role};
use crate::auth::claims::TokenClass;
use crate::auth::jwt::{IssuedToken, TokenIssuer, TokenKeys};
use crate::auth::lockout::LockoutPolicy;
use crate::auth::password::{validate_password_strength, PasswordVerifier};
use crate::auth::refresh_token::{hash_token, RefreshTokenRecord};
use crate::auth::revocation::{RevocationEntry, RevocationReason, RevocationRegistry};
use crate::auth::validator::TokenValidator;
use crate::clock::Clock;
use crate::configuration::Settings;
use crate::error::{AppError, AuthError, StoreError};
use crate::store::CredentialStore;
use crate::validators::{is_valid_email, normalize_email};

/// An access/refresh pair plus the public view of the account it belongs to.
#[derive(Debug, Clone)]
pub struct Session {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    pub account: AccountProfile,
}

pub struct AuthService {
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RevocationRegistry>,
    clock: Arc<dyn Clock>,
    issuer: TokenIssuer,
    validator: TokenValidator,
    passwords: PasswordVerifier,
    lockout: LockoutPolicy,
}

impl AuthService {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RevocationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let keys = Arc::new(TokenKeys::new(&settings.jwt)?);
        let passwords = PasswordVerifier::new(settings.password.cost)?;

        Ok(Self {
            validator: TokenValidator::new(
                keys.clone(),
                store.clone(),
                registry.clone(),
                clock.clone(),
            ),
            issuer: TokenIssuer::new(keys),
            store,
            registry,
            clock,
            passwords,
            lockout: LockoutPolicy::from(&settings.lockout),
        })
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    /// Self-service signup, always with the `user` role.
    pub async fn signup(&self, email: &str, password: &str) -> Result<AccountProfile, AppError> {
        self.create_account(email, password, Role::User).await
    }

    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<AccountProfile, AppError> {
        let email = is_valid_email(email)?;
        validate_password_strength(password)?;

        let password_hash = self.hash_password(password).await?;
        let account = Account::new(&email, password_hash, role, self.clock.now());
        self.store.create(&account).await?;

        tracing::info!(account_id = %account.id, role = %role, "Account created");
        Ok(account.profile())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AppError> {
        let email = normalize_email(email);
        let now = self.clock.now();

        let account = match self.store.find_by_email(&email).await {
            Ok(account) => account,
            Err(StoreError::NotFound) => {
                self.burn_verification(password).await?;
                tracing::info!("Login rejected: unknown email");
                return Err(AuthError::InvalidCredentials.into());
            }
            Err(e) => return Err(e.into()),
        };

        if !account.is_active {
            self.burn_verification(password).await?;
            tracing::info!(account_id = %account.id, "Login rejected: account inactive");
            return Err(AuthError::InvalidCredentials.into());
        }

        // Rejected before the password is looked at, so the lock window is
        // not an oracle.
        if let Err(locked) = account.ensure_usable(now) {
            tracing::warn!(account_id = %account.id, "Login rejected: account locked");
            return Err(locked.into());
        }

        if !self.verify_password(password, &account.password_hash).await? {
            let updated = self
                .store
                .record_login_failure(account.id, &self.lockout, now)
                .await?;

            if updated.is_locked(now) {
                tracing::warn!(
                    account_id = %updated.id,
                    failed_attempts = updated.failed_login_attempts,
                    locked_until = ?updated.locked_until,
                    "Account locked after repeated failed logins"
                );
            } else {
                tracing::info!(
                    account_id = %updated.id,
                    failed_attempts = updated.failed_login_attempts,
                    "Login failed: wrong password"
                );
            }
            return Err(AuthError::InvalidCredentials.into());
        }

        // Concurrent failures may have engaged the lock during verification.
        let state = self.store.record_login_success(account.id, now).await?;
        if let Some(retry_after) = state.retry_after(now) {
            tracing::warn!(
                account_id = %account.id,
                "Login rejected: account locked during verification"
            );
            return Err(AuthError::AccountLocked { retry_after }.into());
        }

        let mut account = account;
        account.failed_login_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);

        let session = self.open_session(&account, now).await?;
        tracing::info!(account_id = %account.id, "Login succeeded");
        Ok(session)
    }

    /// Rotate a refresh token into a fresh pair. The presented token is
    /// single-use: when two refreshes race on it, the store's rotation
    /// primitive lets exactly one through and the other sees `TokenRevoked`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Session, AppError> {
        let validated = self
            .validator
            .validate_token(refresh_token, TokenClass::Refresh)
            .await?;
        let account = validated.account;
        let now = self.clock.now();

        let access = self.issuer.issue_access(&account, now)?;
        let refresh = self.issuer.issue_refresh(&account, now)?;
        let record = RefreshTokenRecord::new(&refresh.token, refresh.issued_at, refresh.expires_at);

        match self
            .store
            .rotate_refresh_token(account.id, &validated.digest, record, now)
            .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound) => {
                tracing::warn!(
                    account_id = %account.id,
                    "Refresh rejected: token already rotated"
                );
                return Err(AuthError::TokenRevoked.into());
            }
            Err(e) => return Err(e.into()),
        }

        // Membership removal already blocks replay; the registry entry also
        // makes the old token fail before its signature is even parsed.
        let entry = RevocationEntry::for_token(
            refresh_token,
            account.id,
            TokenClass::Refresh,
            validated.claims.expires_at(),
            RevocationReason::Refresh,
            now,
        );
        if let Err(e) = self.registry.record(entry).await {
            tracing::warn!(
                account_id = %account.id,
                error = %e,
                "Could not record rotated refresh token"
            );
        }

        tracing::info!(account_id = %account.id, "Refresh token rotated");
        Ok(Session {
            access,
            refresh,
            account: account.profile(),
        })
    }

    /// Best-effort: revoke whichever tokens are presented and still worth
    /// revoking. Absent, forged or expired tokens are skipped silently.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<(), AppError> {
        let now = self.clock.now();
        let mut entries = Vec::new();

        if let Some(token) = access_token {
            if let Some(entry) = self.logout_entry(token, TokenClass::Access, now) {
                entries.push(entry);
            }
        }

        if let Some(token) = refresh_token {
            if let Some(entry) = self.logout_entry(token, TokenClass::Refresh, now) {
                match self
                    .store
                    .remove_refresh_token(entry.account_id, &entry.token_hash)
                    .await
                {
                    Ok(_) | Err(StoreError::NotFound) => {}
                    Err(e) => return Err(e.into()),
                }
                entries.push(entry);
            } else if let Some(claims) = self.validator.peek(token, TokenClass::Refresh) {
                // Expired: nothing to revoke, but drop the stale membership.
                if let Ok(account_id) = claims.account_id() {
                    match self
                        .store
                        .remove_refresh_token(account_id, &hash_token(token))
                        .await
                    {
                        Ok(_) | Err(StoreError::NotFound) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        if let Some(first) = entries.first() {
            tracing::info!(account_id = %first.account_id, revoked = entries.len(), "Logout");
            self.registry.record_many(entries).await?;
        }
        Ok(())
    }

    /// Sign out everywhere: empty the membership set in one update.
    pub async fn logout_all(&self, account_id: Uuid) -> Result<usize, AppError> {
        let cleared = self.store.clear_refresh_tokens(account_id).await?;
        tracing::info!(account_id = %account_id, sessions = cleared.len(), "Logged out of all sessions");
        Ok(cleared.len())
    }

    /// Revocation hook for collaborators making security-sensitive changes:
    /// clears membership and records every outstanding refresh token.
    pub async fn revoke_account_sessions(
        &self,
        account_id: Uuid,
        reason: RevocationReason,
    ) -> Result<usize, AppError> {
        let now = self.clock.now();
        let cleared = self.store.clear_refresh_tokens(account_id).await?;
        let count = cleared.len();

        let entries = cleared
            .iter()
            .map(|record| RevocationEntry::for_membership(record, account_id, reason, now))
            .collect();
        self.registry.record_many(entries).await?;

        tracing::warn!(
            account_id = %account_id,
            reason = %reason,
            revoked = count,
            "Account sessions revoked"
        );
        Ok(count)
    }

    /// Administrative enable/disable. Disabling also revokes every session.
    pub async fn set_account_active(
        &self,
        account_id: Uuid,
        active: bool,
    ) -> Result<AccountProfile, AppError> {
        let account = self.store.set_active(account_id, active).await?;

        tracing::info!(account_id = %account_id, active, "Account activity changed");

        if !active {
            self.revoke_account_sessions(account_id, RevocationReason::Admin)
                .await?;
        }
        Ok(account.profile())
    }

    /// Resolve an access token into the identity downstream handlers read.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthenticatedIdentity, AppError> {
        let account = self.validator.validate(access_token, TokenClass::Access).await?;
        Ok(AuthenticatedIdentity::from_account(&account, self.clock.now()))
    }

    pub async fn profile(&self, account_id: Uuid) -> Result<AccountProfile, AppError> {
        match self.store.find_by_id(account_id).await {
            Ok(account) => Ok(account.profile()),
            Err(StoreError::NotFound) => Err(AuthError::AccountNotFound.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn sweep_revocations(&self) -> Result<u64, AppError> {
        Ok(self.registry.sweep_expired(self.clock.now()).await?)
    }

    async fn open_session(&self, account: &Account, now: DateTime<Utc>) -> Result<Session, AppError> {
        let access = self.issuer.issue_access(account, now)?;
        let refresh = self.issuer.issue_refresh(account, now)?;

        self.store
            .add_refresh_token(
                account.id,
                RefreshTokenRecord::new(&refresh.token, refresh.issued_at, refresh.expires_at),
                now,
            )
            .await?;

        Ok(Session {
            access,
            refresh,
            account: account.profile(),
        })
    }

    fn logout_entry(&self, token: &str, class: TokenClass, now: DateTime<Utc>) -> Option<RevocationEntry> {
        let claims = self.validator.peek(token, class)?;
        if claims.is_expired(now) {
            return None;
        }
        let account_id = claims.account_id().ok()?;
        Some(RevocationEntry::for_token(
            token,
            account_id,
            class,
            claims.expires_at(),
            RevocationReason::Logout,
            now,
        ))
    }

    async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || passwords.hash(&password)).await?
    }

    async fn verify_password(&self, password: &str, digest: &str) -> Result<bool, AppError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        let digest = digest.to_string();
        Ok(tokio::task::spawn_blocking(move || passwords.verify(&password, &digest)).await?)
    }

    async fn burn_verification(&self, password: &str) -> Result<(), AppError> {
        let passwords = self.passwords.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || passwords.verify_dummy(&password)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::lockout::LockState;
    use crate::auth::revocation::InMemoryRevocationRegistry;
    use crate::clock::ManualClock;
    use crate::configuration::JwtSettings;
    use crate::store::InMemoryCredentialStore;
    use chrono::Duration;

    struct Harness {
        service: Arc<AuthService>,
        store: Arc<InMemoryCredentialStore>,
        registry: Arc<InMemoryRevocationRegistry>,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let mut settings = Settings::with_jwt(JwtSettings::new(
            "access-secret-for-service-tests-00001",
            "refresh-secret-for-service-tests-0001",
        ));
        settings.password.cost = 4;
        settings.sessions.max_refresh_tokens = 3;

        let store = Arc::new(InMemoryCredentialStore::new(settings.sessions.max_refresh_tokens));
        let registry = Arc::new(InMemoryRevocationRegistry::new(Duration::seconds(60)));
        let clock = Arc::new(ManualClock::default());
        let service = AuthService::new(&settings, store.clone(), registry.clone(), clock.clone())
            .expect("valid settings");

        Harness {
            service: Arc::new(service),
            store,
            registry,
            clock,
        }
    }

    fn auth_err<T: std::fmt::Debug>(result: Result<T, AppError>) -> AuthError {
        match result {
            Err(AppError::Auth(e)) => e,
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signup_validates_input() {
        let h = harness();

        assert!(matches!(
            h.service.signup("not-an-email", "Secret123").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            h.service.signup("a@x.com", "weak").await,
            Err(AppError::Validation(_))
        ));

        let profile = h.service.signup(" A@X.com ", "Secret123").await.unwrap();
        assert_eq!(profile.email, "a@x.com");
        assert_eq!(profile.role, Role::User);

        assert!(matches!(
            h.service.signup("a@x.com", "Secret123").await,
            Err(AppError::Storage(StoreError::DuplicateEmail))
        ));
    }

    #[tokio::test]
    async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();

        let unknown = auth_err(h.service.login("nobody@x.com", "Secret123").await);
        let wrong = auth_err(h.service.login("a@x.com", "Wrong1234").await);
        let garbage = auth_err(h.service.login("", "").await);

        assert_eq!(unknown, AuthError::InvalidCredentials);
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(garbage, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_inactive_account_login_is_invalid_credentials() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();
        h.service.set_account_active(profile.id, false).await.unwrap();

        let err = auth_err(h.service.login("a@x.com", "Secret123").await);
        assert_eq!(err, AuthError::InvalidCredentials);

        h.service.set_account_active(profile.id, true).await.unwrap();
        assert!(h.service.login("a@x.com", "Secret123").await.is_ok());
    }

    #[tokio::test]
    async fn test_login_is_case_insensitive_and_stamps_last_login() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();

        let session = h.service.login("  A@X.COM", "Secret123").await.unwrap();

        assert_eq!(session.account.id, profile.id);
        assert_eq!(session.account.last_login_at, Some(h.clock.now()));
        assert_eq!(session.access.class, TokenClass::Access);
        assert_eq!(session.refresh.class, TokenClass::Refresh);
    }

    #[tokio::test]
    async fn test_failed_login_counter_resets_on_success() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();

        for _ in 0..3 {
            let _ = h.service.login("a@x.com", "Wrong1234").await;
        }
        assert_eq!(
            h.store.find_by_id(profile.id).await.unwrap().failed_login_attempts,
            3
        );

        h.service.login("a@x.com", "Secret123").await.unwrap();
        assert_eq!(
            h.store.find_by_id(profile.id).await.unwrap().failed_login_attempts,
            0
        );
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();
        let session = h.service.login("a@x.com", "Secret123").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = h.service.clone();
            let token = session.refresh.token.clone();
            handles.push(tokio::spawn(async move { service.refresh(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AppError::Auth(AuthError::TokenRevoked)) => {}
                Err(e) => panic!("unexpected error: {:?}", e),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_logout_revokes_presented_tokens() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();
        let session = h.service.login("a@x.com", "Secret123").await.unwrap();

        h.service
            .logout(Some(&session.access.token), Some(&session.refresh.token))
            .await
            .unwrap();

        let err = auth_err(h.service.authenticate(&session.access.token).await);
        assert_eq!(err, AuthError::TokenRevoked);
        let err = auth_err(h.service.refresh(&session.refresh.token).await);
        assert_eq!(err, AuthError::TokenRevoked);
        assert_eq!(h.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_logout_tolerates_missing_and_bogus_tokens() {
        let h = harness();

        assert!(h.service.logout(None, None).await.is_ok());
        assert!(h.service.logout(Some("garbage"), Some("also.garbage")).await.is_ok());
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_logout_skips_expired_access_token() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();
        let session = h.service.login("a@x.com", "Secret123").await.unwrap();
        h.clock.advance(Duration::hours(1));

        h.service.logout(Some(&session.access.token), None).await.unwrap();

        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_session_cap_evicts_oldest() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();

        let first = h.service.login("a@x.com", "Secret123").await.unwrap();
        for _ in 0..3 {
            h.clock.advance(Duration::seconds(1));
            h.service.login("a@x.com", "Secret123").await.unwrap();
        }

        let err = auth_err(h.service.refresh(&first.refresh.token).await);
        assert_eq!(err, AuthError::TokenRevoked);
    }

    #[tokio::test]
    async fn test_deactivation_revokes_every_session() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();
        let one = h.service.login("a@x.com", "Secret123").await.unwrap();
        let two = h.service.login("a@x.com", "Secret123").await.unwrap();

        let updated = h.service.set_account_active(profile.id, false).await.unwrap();
        assert!(!updated.is_active);

        assert!(h.registry.is_revoked(&one.refresh.digest()).await.unwrap());
        assert!(h.registry.is_revoked(&two.refresh.digest()).await.unwrap());
        let err = auth_err(h.service.authenticate(&one.access.token).await);
        assert_eq!(err, AuthError::AccountInactive);
    }

    #[tokio::test]
    async fn test_reactivation_keeps_lockout_state() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();
        for _ in 0..5 {
            let _ = h.service.login("a@x.com", "Wrong1234").await;
        }

        h.service.set_account_active(profile.id, false).await.unwrap();
        let updated = h.service.set_account_active(profile.id, true).await.unwrap();
        assert!(updated.is_active);

        let stored = h.store.find_by_id(profile.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.is_locked(h.clock.now()));
        assert!(matches!(
            auth_err(h.service.login("a@x.com", "Secret123").await),
            AuthError::AccountLocked { .. }
        ));
    }

    #[tokio::test]
    async fn test_authenticate_builds_identity() {
        let h = harness();
        let profile = h
            .service
            .create_account("root@x.com", "Secret123", Role::Admin)
            .await
            .unwrap();
        let session = h.service.login("root@x.com", "Secret123").await.unwrap();

        let identity = h.service.authenticate(&session.access.token).await.unwrap();

        assert_eq!(identity.account_id, profile.id);
        assert_eq!(identity.role, Role::Admin);
        assert!(identity.is_active);
        assert!(!identity.is_locked);
        assert!(identity.require_role(Role::Admin).is_ok());
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_revocations() {
        let h = harness();
        h.service.signup("a@x.com", "Secret123").await.unwrap();
        let session = h.service.login("a@x.com", "Secret123").await.unwrap();
        h.service.logout(Some(&session.access.token), None).await.unwrap();
        assert_eq!(h.registry.len(), 1);

        h.clock.advance(Duration::minutes(30));

        assert_eq!(h.service.sweep_revocations().await.unwrap(), 1);
        assert!(h.registry.is_empty());
    }

    /// Credential store where five failed logins from other requests land
    /// while the password is being verified.
    struct FailuresDuringVerification {
        inner: Arc<InMemoryCredentialStore>,
        policy: LockoutPolicy,
    }

    #[async_trait::async_trait]
    impl CredentialStore for FailuresDuringVerification {
        async fn create(&self, account: &Account) -> Result<(), StoreError> {
            self.inner.create(account).await
        }

        async fn save(&self, account: &Account) -> Result<(), StoreError> {
            self.inner.save(account).await
        }

        async fn set_active(&self, account_id: Uuid, active: bool) -> Result<Account, StoreError> {
            self.inner.set_active(account_id, active).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Account, StoreError> {
            self.inner.find_by_id(id).await
        }

        async fn find_by_email(&self, email: &str) -> Result<Account, StoreError> {
            self.inner.find_by_email(email).await
        }

        async fn find_by_refresh_token(&self, token_hash: &str) -> Result<Account, StoreError> {
            self.inner.find_by_refresh_token(token_hash).await
        }

        async fn add_refresh_token(
            &self,
            account_id: Uuid,
            record: RefreshTokenRecord,
            now: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.add_refresh_token(account_id, record, now).await
        }

        async fn remove_refresh_token(
            &self,
            account_id: Uuid,
            token_hash: &str,
        ) -> Result<bool, StoreError> {
            self.inner.remove_refresh_token(account_id, token_hash).await
        }

        async fn rotate_refresh_token(
            &self,
            account_id: Uuid,
            old_hash: &str,
            record: RefreshTokenRecord,
            now: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner
                .rotate_refresh_token(account_id, old_hash, record, now)
                .await
        }

        async fn clear_refresh_tokens(
            &self,
            account_id: Uuid,
        ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
            self.inner.clear_refresh_tokens(account_id).await
        }

        async fn record_login_failure(
            &self,
            account_id: Uuid,
            policy: &LockoutPolicy,
            now: DateTime<Utc>,
        ) -> Result<Account, StoreError> {
            self.inner.record_login_failure(account_id, policy, now).await
        }

        async fn record_login_success(
            &self,
            account_id: Uuid,
            now: DateTime<Utc>,
        ) -> Result<LockState, StoreError> {
            for _ in 0..self.policy.max_failed_attempts {
                self.inner
                    .record_login_failure(account_id, &self.policy, now)
                    .await?;
            }
            self.inner.record_login_success(account_id, now).await
        }
    }

    #[tokio::test]
    async fn test_lock_engaged_during_verification_wins_over_correct_password() {
        let mut settings = Settings::with_jwt(JwtSettings::new(
            "access-secret-for-service-tests-00001",
            "refresh-secret-for-service-tests-0001",
        ));
        settings.password.cost = 4;

        let inner = Arc::new(InMemoryCredentialStore::new(3));
        let store = Arc::new(FailuresDuringVerification {
            inner: inner.clone(),
            policy: LockoutPolicy::from(&settings.lockout),
        });
        let registry = Arc::new(InMemoryRevocationRegistry::new(Duration::seconds(60)));
        let clock = Arc::new(ManualClock::default());
        let service = AuthService::new(&settings, store, registry, clock.clone()).unwrap();
        let profile = service.signup("a@x.com", "Secret123").await.unwrap();

        let err = auth_err(service.login("a@x.com", "Secret123").await);
        assert_eq!(err, AuthError::AccountLocked { retry_after: 900 });

        let stored = inner.find_by_id(profile.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.is_locked(clock.now()));
        assert_eq!(stored.last_login_at, None);
        assert!(stored.refresh_tokens.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_failures_lock_exactly_at_threshold() {
        let h = harness();
        let profile = h.service.signup("a@x.com", "Secret123").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move {
                service.login("a@x.com", "Wrong1234").await
            }));
        }
        for handle in handles {
            let err = auth_err(handle.await.unwrap());
            assert!(matches!(
                err,
                AuthError::InvalidCredentials | AuthError::AccountLocked { .. }
            ));
        }

        let stored = h.store.find_by_id(profile.id).await.unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert!(stored.is_locked(h.clock.now()));

        let err = auth_err(h.service.login("a@x.com", "Secret123").await);
        assert_eq!(err, AuthError::AccountLocked { retry_after: 900 });
    }
}
