mod admin;
mod auth;
mod health_check;

pub use admin::{activate, deactivate, revoke_sessions};
pub use auth::{
    current_account, login, logout, logout_all, refresh, register, AuthResponse,
    LogoutAllResponse,
};
pub use health_check::health_check;
