/// Administrative account actions. Every handler requires the `admin` role.

use actix_web::{web, HttpRequest, HttpResponse};
use uuid::Uuid;

use crate::account::{AuthenticatedIdentity, Role};
use crate::auth::{AuthService, RevocationReason};
use crate::error::{AppError, ErrorContext};
use crate::routes::auth::LogoutAllResponse;

/// POST /api/admin/accounts/{id}/revoke-sessions
pub async fn revoke_sessions(
    req: HttpRequest,
    path: web::Path<Uuid>,
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    identity.require_role(Role::Admin)?;
    let target = path.into_inner();
    let context = ErrorContext::for_request(&req, "admin_revoke_sessions");

    let revoked_sessions = auth
        .revoke_account_sessions(target, RevocationReason::Security)
        .await?;

    tracing::warn!(
        request_id = %context.request_id,
        operation = %context.operation,
        admin_id = %identity.account_id,
        account_id = %target,
        revoked_sessions,
        "Sessions revoked by administrator"
    );
    Ok(HttpResponse::Ok().json(LogoutAllResponse { revoked_sessions }))
}

/// POST /api/admin/accounts/{id}/deactivate
pub async fn deactivate(
    req: HttpRequest,
    path: web::Path<Uuid>,
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    set_active(req, path.into_inner(), identity, auth, false).await
}

/// POST /api/admin/accounts/{id}/activate
pub async fn activate(
    req: HttpRequest,
    path: web::Path<Uuid>,
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
) -> Result<HttpResponse, AppError> {
    set_active(req, path.into_inner(), identity, auth, true).await
}

async fn set_active(
    req: HttpRequest,
    target: Uuid,
    identity: web::ReqData<AuthenticatedIdentity>,
    auth: web::Data<AuthService>,
    active: bool,
) -> Result<HttpResponse, AppError> {
    identity.require_role(Role::Admin)?;
    let context = ErrorContext::for_request(&req, "admin_set_active");

    let profile = auth.set_account_active(target, active).await?;

    tracing::warn!(
        request_id = %context.request_id,
        operation = %context.operation,
        admin_id = %identity.account_id,
        account_id = %target,
        active,
        "Account activity changed by administrator"
    );
    Ok(HttpResponse::Ok().json(profile))
}
