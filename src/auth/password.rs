/// Password Hashing and Verification
///
/// bcrypt digests embed their own salt and cost, so verification needs no
/// externally stored parameters. Verification fails closed: a malformed
/// digest reads exactly like a wrong password.

use bcrypt::{hash, verify};

use crate::error::{AppError, ConfigError, ValidationError};

const MIN_PASSWORD_LENGTH: usize = 8;
/// bcrypt ignores every byte past the 72nd, so longer passwords would
/// collide with their own prefix.
const MAX_PASSWORD_LENGTH: usize = 72;

const MIN_COST: u32 = 4;
const MAX_COST: u32 = 31;

/// Compared against when the account does not exist, so an unknown email
/// costs the same bcrypt work as a wrong password.
const DUMMY_PASSWORD: &str = "keyward-timing-equaliser-0";

#[derive(Clone)]
pub struct PasswordVerifier {
    cost: u32,
    dummy_digest: String,
}

impl PasswordVerifier {
    /// # Errors
    /// Returns error if the cost is outside bcrypt's 4..=31 range
    pub fn new(cost: u32) -> Result<Self, ConfigError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(ConfigError::InvalidValue(format!(
                "password.cost must be between {} and {}",
                MIN_COST,
                MAX_COST
            )));
        }
        let dummy_digest = hash(DUMMY_PASSWORD, cost)
            .map_err(|e| ConfigError::InvalidValue(format!("bcrypt unavailable: {}", e)))?;
        Ok(Self { cost, dummy_digest })
    }

    /// Hash a password using bcrypt
    ///
    /// # Errors
    /// Returns error if bcrypt hashing fails
    pub fn hash(&self, password: &str) -> Result<String, AppError> {
        hash(password, self.cost)
            .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
    }

    pub fn verify(&self, password: &str, digest: &str) -> bool {
        match verify(password, digest) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!("Stored password digest could not be parsed: {}", e);
                false
            }
        }
    }

    /// Burn one verification's worth of work and report failure.
    pub fn verify_dummy(&self, password: &str) -> bool {
        let _ = verify(password, &self.dummy_digest);
        false
    }
}

/// Validate password strength requirements
///
/// Requirements:
/// - Minimum 8 characters
/// - Maximum 72 bytes
/// - At least one digit
/// - At least one lowercase letter
/// - At least one uppercase letter
pub fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    if password.is_empty() {
        return Err(ValidationError::EmptyField("password".to_string()));
    }

    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        ));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        ));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        ));
    }

    Ok(())
}
