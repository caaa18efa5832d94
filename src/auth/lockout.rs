/// Lockout Controller
///
/// Failed-login state machine, derived entirely from two account fields
/// (`failed_login_attempts`, `locked_until`):
///
/// - Open: counter below threshold
/// - Locked: `locked_until` in the future; attempts are rejected before the
///   password is looked at
///
/// An expired lock resets the counter implicitly: the next failure counts
/// from zero.

use chrono::{DateTime, Duration, Utc};

use crate::configuration::LockoutSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Open { failed_attempts: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockState {
    /// Whole seconds until the lock lifts, never less than one.
    pub fn retry_after(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            LockState::Locked { until } => Some((*until - now).num_seconds().max(1) as u64),
            LockState::Open { .. } => None,
        }
    }
}

/// Counter and lock timestamp after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutTransition {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_failed_attempts: u32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lock_duration: Duration::minutes(15),
        }
    }
}

impl From<&LockoutSettings> for LockoutPolicy {
    fn from(settings: &LockoutSettings) -> Self {
        Self {
            max_failed_attempts: settings.max_failed_attempts.max(1),
            lock_duration: Duration::seconds(settings.lock_duration),
        }
    }
}

impl LockoutPolicy {
    pub fn state(
        &self,
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LockState {
        match locked_until {
            Some(until) if until > now => LockState::Locked { until },
            Some(_) => LockState::Open { failed_attempts: 0 },
            None => LockState::Open { failed_attempts },
        }
    }

    /// Apply one failed login. Must not be called while locked; the caller
    /// rejects locked accounts before verifying the password.
    pub fn register_failure(
        &self,
        failed_attempts: u32,
        locked_until: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> LockoutTransition {
        let current = match self.state(failed_attempts, locked_until, now) {
            LockState::Open { failed_attempts } => failed_attempts,
            // Defensive only: a failure while locked keeps the lock as is.
            LockState::Locked { until } => {
                return LockoutTransition {
                    failed_attempts,
                    locked_until: Some(until),
                }
            }
        };

        let failed_attempts = current.saturating_add(1);
        let locked_until = if failed_attempts >= self.max_failed_attempts {
            Some(now + self.lock_duration)
        } else {
            None
        };

        LockoutTransition {
            failed_attempts,
            locked_until,
        }
    }
}
