/// Authentication module
///
/// Password hashing, token issuance and validation, refresh-token
/// membership, lockout, revocation, and the session orchestrator that ties
/// them together.

pub mod claims;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod refresh_token;
pub mod revocation;
pub mod service;
pub mod validator;

pub use claims::{Claims, TokenClass};
pub use jwt::{IssuedToken, TokenIssuer, TokenKeys};
pub use lockout::{LockState, LockoutPolicy};
pub use password::{validate_password_strength, PasswordVerifier};
pub use refresh_token::{hash_token, RefreshTokenRecord};
pub use revocation::{
    spawn_revocation_sweeper, InMemoryRevocationRegistry, RevocationEntry, RevocationReason,
    RevocationRegistry,
};
pub use service::{AuthService, Session};
pub use validator::{TokenValidator, ValidatedToken};
