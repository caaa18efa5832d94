/// Token Validator
///
/// Turns a presented bearer string into a live account, or a typed failure.
/// Checks run in a fixed order and short-circuit:
///
/// 1. revocation registry (by digest)
/// 2. signature and structure, against the secret for the expected class
/// 3. expiry, against the injected clock
/// 4. class tag
/// 5. account lookup and the usability predicate (active, not locked)
/// 6. refresh class only: membership in the account's live set
///
/// Expiry is only ever read from claims whose signature has verified.

use std::sync::Arc;

use crate::account::Account;
use crate::auth::claims::{Claims, TokenClass};
use crate::auth::jwt::TokenKeys;
use crate::auth::refresh_token::hash_token;
use crate::auth::revocation::RevocationRegistry;
use crate::clock::Clock;
use crate::error::{AppError, AuthError, StoreError};
use crate::store::CredentialStore;

#[derive(Clone)]
pub struct TokenValidator {
    keys: Arc<TokenKeys>,
    store: Arc<dyn CredentialStore>,
    registry: Arc<dyn RevocationRegistry>,
    clock: Arc<dyn Clock>,
}

/// A token that passed every check, with the account it resolved to.
#[derive(Debug, Clone)]
pub struct ValidatedToken {
    pub account: Account,
    pub claims: Claims,
    pub digest: String,
}

impl TokenValidator {
    pub fn new(
        keys: Arc<TokenKeys>,
        store: Arc<dyn CredentialStore>,
        registry: Arc<dyn RevocationRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            keys,
            store,
            registry,
            clock,
        }
    }

    pub async fn validate(&self, token: &str, expected: TokenClass) -> Result<Account, AppError> {
        self.validate_token(token, expected).await.map(|v| v.account)
    }

    pub async fn validate_token(
        &self,
        token: &str,
        expected: TokenClass,
    ) -> Result<ValidatedToken, AppError> {
        let digest = hash_token(token);

        if self.registry.is_revoked(&digest).await? {
            return Err(AuthError::TokenRevoked.into());
        }

        let claims = self.keys.decode(token, expected)?;

        let now = self.clock.now();
        if claims.is_expired(now) {
            return Err(AuthError::TokenExpired.into());
        }

        if claims.class != expected {
            return Err(AuthError::TokenWrongClass.into());
        }

        let account_id = claims.account_id()?;
        let account = match self.store.find_by_id(account_id).await {
            Ok(account) => account,
            Err(StoreError::NotFound) => return Err(AuthError::AccountNotFound.into()),
            Err(e) => return Err(e.into()),
        };
        account.ensure_usable(now)?;

        // Rotation and logout-all remove membership without necessarily
        // touching the registry.
        if expected == TokenClass::Refresh && !account.has_refresh_token(&digest) {
            return Err(AuthError::TokenRevoked.into());
        }

        Ok(ValidatedToken {
            account,
            claims,
            digest,
        })
    }

    /// Signature-only decode for best-effort paths such as logout, where an
    /// expired or revoked token is simply ignored.
    pub fn peek(&self, token: &str, class: TokenClass) -> Option<Claims> {
        self.keys
            .decode(token, class)
            .ok()
            .filter(|claims| claims.class == class)
    }
}
