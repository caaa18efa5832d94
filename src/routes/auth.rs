/// Authentication Routes
///
/// Signup, login, token refresh, logout and the caller's own account.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::account::{AccountProfile, AuthenticatedIdentity};
use crate::auth::{AuthService, Session};
use crate::error::{AppError, ErrorContext};
use crate::middleware::bearer_token;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

/// Token pair returned by login and refresh
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
    pub refresh_expires_in: i64,
    pub account: AccountProfile,
}

impl From<Session> for AuthResponse {
    fn from(session: Session) -> Self {
        Self {
            expires_in: (session.access.expires_at - session.access.issued_at).num_seconds(),
            refresh_expires_in: (session.refresh.expires_at - session.refresh.issued_at)
                .num_seconds(),
            access_token: session.access.token,
            refresh_token: session.refresh.token,
            token_type: "Bearer".to_string(),
            account: session.account,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LogoutAllResponse {
    pub revoked_sessions: usize,
}

/// POST /auth/register
///
/// # Errors
/// - 400: invalid email or weak password
/// - 409: email already registered
pub async fn register(
    req: HttpRequest,
    form: web::Json<RegisterRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "account_registration");

    let profile = auth.signup(&form.email, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        account_id = %profile.id,
        "Account registered"
    );
    Ok(HttpResponse::Created().json(profile))
}

/// POST /auth/login
///
/// Unknown email, inactive account and wrong password all answer 401
/// `INVALID_CREDENTIALS`. A locked account answers 423 with `Retry-After`.
pub async fn login(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "login");

    let session = auth.login(&form.email, &form.password).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        account_id = %session.account.id,
        "Session opened"
    );
    Ok(HttpResponse::Ok().json(AuthResponse::from(session)))
}

/// POST /auth/refresh
///
/// Single-use rotation: the presented refresh token is revoked and a new
/// pair is returned.
pub async fn refresh(
    req: HttpRequest,
    form: web::Json<RefreshRequest>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "token_refresh");

    let session = auth.refresh(&form.refresh_token).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        account_id = %session.account.id,
        "Session refreshed"
    );
    Ok(HttpResponse::Ok().json(AuthResponse::from(session)))
}

/// POST /auth/logout
///
/// Best-effort: revokes the bearer access token and the body's refresh
/// token when present. Always 204 unless storage fails.
pub async fn logout(
    req: HttpRequest,
    body: Option<web::Json<LogoutRequest>>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let access_token = bearer_token(req.headers());
    let refresh_token = body.and_then(|b| b.into_inner().refresh_token);

    auth.logout(access_token.as_deref(), refresh_token.as_deref())
        .await?;

    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/me
pub async fn current_account(
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let profile = auth.profile(identity.account_id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// POST /api/logout-all
pub async fn logout_all(
    req: HttpRequest,
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::for_request(&req, "logout_all")
        .with_account_id(identity.account_id.to_string());

    let revoked_sessions = auth.logout_all(identity.account_id).await?;

    tracing::info!(
        request_id = %context.request_id,
        operation = %context.operation,
        account_id = ?context.account_id,
        revoked_sessions,
        "Signed out everywhere"
    );
    Ok(HttpResponse::Ok().json(LogoutAllResponse { revoked_sessions }))
}
