/// Account entity
///
/// One record per registered user. The password hash never leaves this type:
/// everything serialized outward goes through `AccountProfile`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::auth::RefreshTokenRecord;
use crate::error::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct Account {
    pub id: Uuid,
    /// Lower-cased at write time.
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    /// Live refresh tokens, oldest first.
    pub refresh_tokens: Vec<RefreshTokenRecord>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(email: &str, password_hash: String, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.to_lowercase(),
            password_hash,
            role,
            is_active: true,
            last_login_at: None,
            failed_login_attempts: 0,
            locked_until: None,
            refresh_tokens: Vec::new(),
            created_at: now,
        }
    }

    /// Locked exactly when `locked_until` is set and still in the future.
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.locked_until, Some(until) if until > now)
    }

    /// The single usability predicate every validation path goes through.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if !self.is_active {
            return Err(AuthError::AccountInactive);
        }
        if let Some(until) = self.locked_until.filter(|until| *until > now) {
            let retry_after = (until - now).num_seconds().max(1) as u64;
            return Err(AuthError::AccountLocked { retry_after });
        }
        Ok(())
    }

    pub fn has_refresh_token(&self, digest: &str) -> bool {
        self.refresh_tokens.iter().any(|r| r.token_hash == digest)
    }

    pub fn profile(&self) -> AccountProfile {
        AccountProfile {
            id: self.id,
            email: self.email.clone(),
            role: self.role,
            is_active: self.is_active,
            last_login_at: self.last_login_at,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("is_active", &self.is_active)
            .field("failed_login_attempts", &self.failed_login_attempts)
            .field("locked_until", &self.locked_until)
            .field("refresh_tokens", &self.refresh_tokens.len())
            .finish_non_exhaustive()
    }
}

/// Public account fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountProfile {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Identity attached to a request after its access token validated.
/// Downstream handlers read this and never re-derive it.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedIdentity {
    pub account_id: Uuid,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_locked: bool,
}

impl AuthenticatedIdentity {
    pub fn from_account(account: &Account, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account.id,
            email: account.email.clone(),
            role: account.role,
            is_active: account.is_active,
            is_locked: account.is_locked(now),
        }
    }

    pub fn require_role(&self, role: Role) -> Result<(), AuthError> {
        if self.role == role {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}
