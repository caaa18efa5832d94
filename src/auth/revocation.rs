/// Revocation Registry
///
/// Append-only record of explicitly invalidated tokens, keyed by the SHA-256
/// digest of the raw token. Consulted before any otherwise-valid token is
/// trusted.
///
/// An entry is only useful until the token it names would have expired on
/// its own; after that (plus a small retention margin) the sweep may drop
/// it. Sweeping reclaims storage and nothing else: an expired token already
/// fails the validator's expiry check.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::auth::claims::TokenClass;
use crate::auth::refresh_token::{hash_token, RefreshTokenRecord};
use crate::clock::Clock;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Logout,
    Refresh,
    Security,
    Admin,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::Logout => "logout",
            RevocationReason::Refresh => "refresh",
            RevocationReason::Security => "security",
            RevocationReason::Admin => "admin",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RevocationReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logout" => Ok(RevocationReason::Logout),
            "refresh" => Ok(RevocationReason::Refresh),
            "security" => Ok(RevocationReason::Security),
            "admin" => Ok(RevocationReason::Admin),
            other => Err(format!("unknown revocation reason: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevocationEntry {
    /// SHA-256 hex digest of the revoked token
    pub token_hash: String,
    pub account_id: Uuid,
    pub class: TokenClass,
    /// The token's own expiry
    pub expires_at: DateTime<Utc>,
    pub reason: RevocationReason,
    pub revoked_at: DateTime<Utc>,
}

impl RevocationEntry {
    pub fn for_token(
        token: &str,
        account_id: Uuid,
        class: TokenClass,
        expires_at: DateTime<Utc>,
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_hash: hash_token(token),
            account_id,
            class,
            expires_at,
            reason,
            revoked_at,
        }
    }

    /// Entry for a refresh token known only through its membership record.
    pub fn for_membership(
        record: &RefreshTokenRecord,
        account_id: Uuid,
        reason: RevocationReason,
        revoked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token_hash: record.token_hash.clone(),
            account_id,
            class: TokenClass::Refresh,
            expires_at: record.expires_at,
            reason,
            revoked_at,
        }
    }

    /// Past the point where keeping the entry adds anything.
    pub fn is_redundant(&self, now: DateTime<Utc>, retention_margin: Duration) -> bool {
        self.expires_at + retention_margin <= now
    }
}

#[async_trait]
pub trait RevocationRegistry: Send + Sync {
    /// Idempotent: recording an already-revoked token is a no-op.
    async fn record(&self, entry: RevocationEntry) -> Result<(), StoreError>;

    async fn record_many(&self, entries: Vec<RevocationEntry>) -> Result<(), StoreError> {
        for entry in entries {
            self.record(entry).await?;
        }
        Ok(())
    }

    /// Direct lookup by digest; called on every authenticated request.
    async fn is_revoked(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Remove redundant entries, returning how many were dropped.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

pub struct InMemoryRevocationRegistry {
    entries: RwLock<HashMap<String, RevocationEntry>>,
    retention_margin: Duration,
}

impl InMemoryRevocationRegistry {
    pub fn new(retention_margin: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention_margin,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("revocation registry lock poisoned".to_string())
}

#[async_trait]
impl RevocationRegistry for InMemoryRevocationRegistry {
    async fn record(&self, entry: RevocationEntry) -> Result<(), StoreError> {
        // Passive check-before-insert: a token already past its own expiry
        // needs no entry.
        if entry.is_redundant(entry.revoked_at, self.retention_margin) {
            return Ok(());
        }
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.entry(entry.token_hash.clone()).or_insert(entry);
        Ok(())
    }

    async fn record_many(&self, batch: Vec<RevocationEntry>) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        for entry in batch {
            if entry.is_redundant(entry.revoked_at, self.retention_margin) {
                continue;
            }
            entries.entry(entry.token_hash.clone()).or_insert(entry);
        }
        Ok(())
    }

    async fn is_revoked(&self, token_hash: &str) -> Result<bool, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.contains_key(token_hash))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_redundant(now, self.retention_margin));
        Ok((before - entries.len()) as u64)
    }
}

/// Periodically sweep the registry until the runtime shuts down.
pub fn spawn_revocation_sweeper(
    registry: Arc<dyn RevocationRegistry>,
    clock: Arc<dyn Clock>,
    every: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match registry.sweep_expired(clock.now()).await {
                Ok(0) => tracing::debug!("Revocation sweep found nothing to purge"),
                Ok(purged) => tracing::info!(purged, "Revocation sweep purged entries"),
                Err(e) => tracing::warn!(error = %e, "Revocation sweep failed"),
            }
        }
    })
}
