/// Refresh Token Membership
///
/// Each account owns a small ordered set of live refresh tokens (one per
/// device session). Tokens are:
/// - Hashed with SHA-256 before storage (never store plaintext)
/// - Single-use: rotation removes the presented token and adds its successor
/// - Honored only while present in the owner's set, so clearing the set
///   signs the account out everywhere

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// One live refresh token in an account's membership set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    /// SHA-256 hex digest of the signed token
    pub token_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(token: &str, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token_hash: hash_token(token),
            issued_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Hash a token using SHA-256
///
/// Both the membership set and the revocation registry are keyed by this
/// digest.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Drop expired records, then evict the oldest until at most `limit` remain.
///
/// `issued_at` has one-second precision, so ties are common; `newest` (the
/// digest just added) sorts after every record it ties with and is never the
/// one evicted.
pub(crate) fn prune_membership(
    records: &mut Vec<RefreshTokenRecord>,
    newest: &str,
    limit: usize,
    now: DateTime<Utc>,
) {
    records.retain(|r| !r.is_expired(now));
    records.sort_by_key(|r| (r.issued_at, r.token_hash == newest));
    if records.len() > limit {
        let excess = records.len() - limit;
        records.drain(..excess);
    }
}
