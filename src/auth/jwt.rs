/// JWT Token Issuance and Decoding
///
/// Access and refresh tokens are HS256 JWTs signed with distinct secrets, so
/// a leaked access secret cannot mint refresh tokens and vice versa.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;

use crate::account::Account;
use crate::auth::claims::{Claims, TokenClass};
use crate::auth::refresh_token::hash_token;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};

struct ClassKey {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_seconds: i64,
}

impl ClassKey {
    fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }
}

/// Signing material for both token classes, built once from configuration.
pub struct TokenKeys {
    access: ClassKey,
    refresh: ClassKey,
    issuer: String,
}

impl TokenKeys {
    pub fn new(config: &JwtSettings) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            access: ClassKey::new(&config.access_secret, config.access_token_expiry),
            refresh: ClassKey::new(&config.refresh_secret, config.refresh_token_expiry),
            issuer: config.issuer.clone(),
        })
    }

    fn key(&self, class: TokenClass) -> &ClassKey {
        match class {
            TokenClass::Access => &self.access,
            TokenClass::Refresh => &self.refresh,
        }
    }

    pub fn ttl(&self, class: TokenClass) -> Duration {
        Duration::seconds(self.key(class).ttl_seconds)
    }

    /// Verify structure, signature and issuer against the secret for `class`.
    ///
    /// Expiry is deliberately left to the caller so that it is compared
    /// against the injected clock, and only after the signature checked out.
    pub fn decode(&self, token: &str, class: TokenClass) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.set_issuer(&[&self.issuer]);

        decode::<Claims>(token, &self.key(class).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(class = %class, "JWT decoding failed: {}", e);
                AuthError::TokenMalformed
            })
    }
}

/// A freshly signed token together with what the stores need to know about it.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub class: TokenClass,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    pub fn digest(&self) -> String {
        hash_token(&self.token)
    }
}

/// Mints access and refresh tokens. Never touches storage: persisting a
/// refresh token is the session orchestrator's job.
#[derive(Clone)]
pub struct TokenIssuer {
    keys: Arc<TokenKeys>,
}

impl TokenIssuer {
    pub fn new(keys: Arc<TokenKeys>) -> Self {
        Self { keys }
    }

    pub fn issue_access(&self, account: &Account, now: DateTime<Utc>) -> Result<IssuedToken, AppError> {
        self.issue(account, TokenClass::Access, now)
    }

    pub fn issue_refresh(&self, account: &Account, now: DateTime<Utc>) -> Result<IssuedToken, AppError> {
        self.issue(account, TokenClass::Refresh, now)
    }

    fn issue(
        &self,
        account: &Account,
        class: TokenClass,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let key = self.keys.key(class);
        let role = match class {
            TokenClass::Access => Some(account.role),
            TokenClass::Refresh => None,
        };
        let claims = Claims::new(
            account.id,
            role,
            class,
            now,
            key.ttl_seconds,
            self.keys.issuer.clone(),
        );

        let token = encode(&Header::new(Algorithm::HS256), &claims, &key.encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(IssuedToken {
            token,
            class,
            issued_at: claims.issued_at(),
            expires_at: claims.expires_at(),
        })
    }
}
