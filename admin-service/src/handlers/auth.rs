//! Authentication handlers: registration, login, logout and the
//! password-reset flow.
//!
//! Login carries the dual responsibility from the error-handling design:
//! the caller gets a taxonomy error, and failed attempts are also written
//! to the activity log so the brute-force detector sees them. The two
//! paths are deliberately separate statements - an early return must never
//! skip the audit write.

use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
};
use chrono::{Duration, Utc};
use serde_json::json;
use validator::Validate;

use service_core::error::AppError;
use service_core::middleware::request_context::RequestContext;

use crate::dtos::auth::{
    AuthResponse, LoginRequest, PasswordResetConfirm, PasswordResetRequest, RegisterRequest,
};
use crate::dtos::MessageResponse;
use crate::middleware::auth::AuthUser;
use crate::models::{
    ActivityAction, ActivityOutcome, ActivityRecord, SecurityLevel, User, UserResponse,
};
use crate::services::error::ServiceError;
use crate::utils::password;
use crate::AppState;

/// How long a password-reset token stays valid.
const RESET_TOKEN_TTL_MINUTES: i64 = 10;

/// Register a new account.
///
/// The account is only created when the configured default role resolves;
/// a subject without a role is invalid by definition.
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 409, description = "Username or email already taken"),
        (status = 422, description = "Validation error"),
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    req.validate()?;

    if state.store.find_user_by_email(&req.email).await?.is_some()
        || state
            .store
            .find_user_by_username(&req.username)
            .await?
            .is_some()
    {
        return Err(ServiceError::UserAlreadyExists.into());
    }

    let default_role = state
        .store
        .find_role_by_name(&state.config.security.default_role)
        .await?
        .ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Default role '{}' does not exist; seed roles before accepting registrations",
                state.config.security.default_role
            ))
        })?;

    let password_hash = password::hash_password(&req.password)?;
    let user = User::new(req.username, req.email, password_hash, default_role.id);
    state.store.insert_user(&user).await?;

    state
        .activity
        .record(ActivityRecord::for_subject(
            &user.id,
            ActivityAction::Create,
            "users",
            json!({ "username": user.username }),
            &ctx.source_ip,
            &ctx.user_agent,
            SecurityLevel::Info,
            ActivityOutcome::Success,
            &ctx.request_id,
        ))
        .await;

    let token = state.jwt.issue(&user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: user.sanitized(),
            token,
        }),
    ))
}

/// Authenticate with email and password; returns a 30-day session token.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = AuthResponse),
        (status = 401, description = "Invalid email or password"),
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    req.validate()?;

    let user = match state.store.find_user_by_email(&req.email).await? {
        Some(user) => user,
        None => {
            // Unknown subject: the failure is still audited, anonymously.
            state
                .activity
                .record(ActivityRecord::anonymous(
                    ActivityAction::FailedLogin,
                    "auth",
                    json!({ "email": req.email }),
                    &ctx.source_ip,
                    &ctx.user_agent,
                    SecurityLevel::Warning,
                    ActivityOutcome::Failed,
                    &ctx.request_id,
                ))
                .await;
            return Err(ServiceError::InvalidCredentials.into());
        }
    };

    if !password::verify_password(&req.password, &user.password_hash) {
        state
            .activity
            .record(ActivityRecord::for_subject(
                &user.id,
                ActivityAction::FailedLogin,
                "auth",
                json!({ "email": user.email }),
                &ctx.source_ip,
                &ctx.user_agent,
                SecurityLevel::Warning,
                ActivityOutcome::Failed,
                &ctx.request_id,
            ))
            .await;
        return Err(ServiceError::InvalidCredentials.into());
    }

    state
        .activity
        .record(ActivityRecord::for_subject(
            &user.id,
            ActivityAction::Login,
            "auth",
            json!({ "username": user.username }),
            &ctx.source_ip,
            &ctx.user_agent,
            SecurityLevel::Info,
            ActivityOutcome::Success,
            &ctx.request_id,
        ))
        .await;

    let token = state.jwt.issue(&user.id)?;
    Ok(Json(AuthResponse {
        user: user.sanitized(),
        token,
    }))
}

/// End the session from the subject's point of view.
///
/// Tokens are stateless, so this only records the logout; the token
/// itself dies at expiry or client discard.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 200, description = "Logout recorded", body = MessageResponse)),
    security(("bearer_auth" = [])),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
) -> Result<Json<MessageResponse>, AppError> {
    state
        .activity
        .record(ActivityRecord::for_subject(
            &current.user.id,
            ActivityAction::Logout,
            "auth",
            json!({ "username": current.user.username }),
            &ctx.source_ip,
            &ctx.user_agent,
            SecurityLevel::Info,
            ActivityOutcome::Success,
            &ctx.request_id,
        ))
        .await;

    Ok(Json(MessageResponse::new("Logged out")))
}

/// The authenticated subject, sanitized.
#[utoipa::path(
    get,
    path = "/users/me",
    responses((status = 200, description = "Current account", body = UserResponse)),
    security(("bearer_auth" = [])),
    tag = "Authentication"
)]
pub async fn me(AuthUser(current): AuthUser) -> Json<UserResponse> {
    Json(current.user.sanitized())
}

/// Request a password reset.
///
/// Always acknowledges with the same body whether or not the email maps
/// to an account - the endpoint leaks nothing about which accounts exist.
#[utoipa::path(
    post,
    path = "/auth/password-reset/request",
    request_body = PasswordResetRequest,
    responses((status = 200, description = "Acknowledged", body = MessageResponse)),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(req): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    req.validate()?;

    if let Some(user) = state.store.find_user_by_email(&req.email).await? {
        let (token, digest) = password::generate_reset_token();
        let expires = Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        state
            .store
            .set_password_reset_token(&user.id, &digest, expires)
            .await?;

        if let Err(e) = state
            .email
            .send_password_reset_email(&user.email, &token, &state.config.public_base_url)
            .await
        {
            // The token is stored either way; the subject can retry the
            // request if the mail never arrives.
            tracing::error!(error = %e, user_id = %user.id, "Password reset email failed");
        }
    }

    Ok(Json(MessageResponse::new(
        "If that email address is registered, a reset link has been sent",
    )))
}

/// Complete a password reset with a previously mailed token.
///
/// Expired and fabricated tokens fail identically.
#[utoipa::path(
    post,
    path = "/auth/password-reset/confirm",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired reset token"),
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(req): Json<PasswordResetConfirm>,
) -> Result<Json<MessageResponse>, AppError> {
    req.validate()?;

    let digest = password::digest_reset_token(&req.token);
    let user = state
        .store
        .find_user_by_reset_token(&digest, Utc::now())
        .await?
        .ok_or(ServiceError::InvalidOrExpiredResetToken)?;

    let password_hash = password::hash_password(&req.new_password)?;
    state.store.reset_password(&user.id, &password_hash).await?;

    state
        .activity
        .record(ActivityRecord::for_subject(
            &user.id,
            ActivityAction::ResetPassword,
            "auth",
            json!({ "username": user.username }),
            &ctx.source_ip,
            &ctx.user_agent,
            SecurityLevel::Warning,
            ActivityOutcome::Success,
            &ctx.request_id,
        ))
        .await;

    Ok(Json(MessageResponse::new("Password has been reset")))
}
