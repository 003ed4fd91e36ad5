//! Security-settings handlers: two-factor enrollment lifecycle and the
//! per-account IP allow-list.
//!
//! The allow-list is default-open: an empty list disables the check, and
//! removing the last entry returns the account to that open state. This
//! differs from a typical default-deny allow-list - operators enabling
//! the feature do so implicitly by adding the first address.

use axum::extract::{Extension, Json, State};
use serde_json::json;
use validator::Validate;

use service_core::error::AppError;
use service_core::middleware::request_context::RequestContext;

use crate::dtos::security::{
    EnableTwoFactorRequest, IpWhitelistRequest, IpWhitelistResponse, RecoveryCodeRequest,
    RecoveryCodeResponse, TwoFactorEnabledResponse, TwoFactorSetupResponse,
    TwoFactorStatusResponse,
};
use crate::middleware::auth::AuthUser;
use crate::models::{ActivityAction, ActivityOutcome, ActivityRecord, SecurityLevel, User};
use crate::services::error::ServiceError;
use crate::AppState;

async fn record_security_change(
    state: &AppState,
    ctx: &RequestContext,
    user: &User,
    action: ActivityAction,
    details: serde_json::Value,
) {
    state
        .activity
        .record(ActivityRecord::for_subject(
            &user.id,
            action,
            "security_settings",
            details,
            &ctx.source_ip,
            &ctx.user_agent,
            SecurityLevel::Warning,
            ActivityOutcome::Success,
            &ctx.request_id,
        ))
        .await;
}

/// Generate a fresh two-factor enrollment secret.
///
/// Enrollment stays inactive until the first code is confirmed; calling
/// this again replaces any unconfirmed secret.
#[utoipa::path(
    post,
    path = "/security/2fa/setup",
    responses((status = 200, description = "Enrollment secret generated", body = TwoFactorSetupResponse)),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn setup_two_factor(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
) -> Result<Json<TwoFactorSetupResponse>, AppError> {
    let enrollment = state.two_factor.generate_enrollment(&current.user).await?;

    Ok(Json(TwoFactorSetupResponse {
        secret: enrollment.secret,
        provisioning_uri: enrollment.provisioning_uri,
    }))
}

/// Activate two-factor auth by confirming a current code.
///
/// The response is the only time the recovery codes are readable.
#[utoipa::path(
    post,
    path = "/security/2fa/enable",
    request_body = EnableTwoFactorRequest,
    responses(
        (status = 200, description = "Two-factor auth enabled", body = TwoFactorEnabledResponse),
        (status = 401, description = "Invalid two-factor code"),
    ),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn enable_two_factor(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
    Json(req): Json<EnableTwoFactorRequest>,
) -> Result<Json<TwoFactorEnabledResponse>, AppError> {
    req.validate()?;

    let recovery_codes = state.two_factor.enable(&current.user, &req.code).await?;

    record_security_change(
        &state,
        &ctx,
        &current.user,
        ActivityAction::TwoFactorAuthChange,
        json!({ "two_factor_enabled": true }),
    )
    .await;

    Ok(Json(TwoFactorEnabledResponse {
        two_factor_enabled: true,
        recovery_codes,
    }))
}

/// Disable two-factor auth, destroying the secret and every recovery
/// code. Idempotent.
#[utoipa::path(
    post,
    path = "/security/2fa/disable",
    responses((status = 200, description = "Two-factor auth disabled", body = TwoFactorStatusResponse)),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn disable_two_factor(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
) -> Result<Json<TwoFactorStatusResponse>, AppError> {
    state.two_factor.disable(&current.user.id).await?;

    record_security_change(
        &state,
        &ctx,
        &current.user,
        ActivityAction::TwoFactorAuthChange,
        json!({ "two_factor_enabled": false }),
    )
    .await;

    Ok(Json(TwoFactorStatusResponse {
        two_factor_enabled: false,
    }))
}

/// Verify (and consume) a single-use recovery code.
#[utoipa::path(
    post,
    path = "/security/2fa/recovery-code",
    request_body = RecoveryCodeRequest,
    responses(
        (status = 200, description = "Recovery code accepted", body = RecoveryCodeResponse),
        (status = 401, description = "Invalid recovery code"),
    ),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn verify_recovery_code(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
    Json(req): Json<RecoveryCodeRequest>,
) -> Result<Json<RecoveryCodeResponse>, AppError> {
    req.validate()?;

    let valid = state
        .two_factor
        .verify_recovery_code(&current.user, &req.code)
        .await?;
    if !valid {
        return Err(ServiceError::InvalidTwoFactorCode.into());
    }

    let remaining = state
        .store
        .find_user_by_id(&current.user.id)
        .await?
        .map(|user| user.recovery_codes.len())
        .unwrap_or(0);

    Ok(Json(RecoveryCodeResponse {
        valid: true,
        remaining_recovery_codes: remaining,
    }))
}

/// The account's current allow-list.
#[utoipa::path(
    get,
    path = "/security/ip-whitelist",
    responses((status = 200, description = "Current allow-list", body = IpWhitelistResponse)),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn list_ip_whitelist(
    State(state): State<AppState>,
    AuthUser(current): AuthUser,
) -> Result<Json<IpWhitelistResponse>, AppError> {
    let user = state
        .store
        .find_user_by_id(&current.user.id)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

    Ok(Json(IpWhitelistResponse {
        whitelisted_ips: user.whitelisted_ips,
    }))
}

/// Add a source address to the allow-list. Adding the first address is
/// what turns enforcement on.
#[utoipa::path(
    post,
    path = "/security/ip-whitelist",
    request_body = IpWhitelistRequest,
    responses(
        (status = 200, description = "Address added", body = IpWhitelistResponse),
        (status = 400, description = "Not a valid IP address"),
    ),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn add_ip_to_whitelist(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
    Json(req): Json<IpWhitelistRequest>,
) -> Result<Json<IpWhitelistResponse>, AppError> {
    req.validate()?;
    let ip = parse_ip(&req.ip)?;

    state
        .store
        .add_whitelisted_ip(&current.user.id, &ip)
        .await?;

    record_security_change(
        &state,
        &ctx,
        &current.user,
        ActivityAction::IpWhitelistChange,
        json!({ "added": ip }),
    )
    .await;

    reload_whitelist(&state, &current.user.id).await
}

/// Remove one address. Removing the last entry returns the account to
/// the default-open state.
#[utoipa::path(
    delete,
    path = "/security/ip-whitelist",
    request_body = IpWhitelistRequest,
    responses((status = 200, description = "Address removed", body = IpWhitelistResponse)),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn remove_ip_from_whitelist(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
    Json(req): Json<IpWhitelistRequest>,
) -> Result<Json<IpWhitelistResponse>, AppError> {
    req.validate()?;
    let ip = parse_ip(&req.ip)?;

    state
        .store
        .remove_whitelisted_ip(&current.user.id, &ip)
        .await?;

    record_security_change(
        &state,
        &ctx,
        &current.user,
        ActivityAction::IpWhitelistChange,
        json!({ "removed": ip }),
    )
    .await;

    reload_whitelist(&state, &current.user.id).await
}

/// Clear the allow-list entirely (back to default-open).
#[utoipa::path(
    delete,
    path = "/security/ip-whitelist/all",
    responses((status = 200, description = "Allow-list cleared", body = IpWhitelistResponse)),
    security(("bearer_auth" = [])),
    tag = "Security"
)]
pub async fn clear_ip_whitelist(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    AuthUser(current): AuthUser,
) -> Result<Json<IpWhitelistResponse>, AppError> {
    state.store.clear_whitelisted_ips(&current.user.id).await?;

    record_security_change(
        &state,
        &ctx,
        &current.user,
        ActivityAction::IpWhitelistChange,
        json!({ "cleared": true }),
    )
    .await;

    reload_whitelist(&state, &current.user.id).await
}

fn parse_ip(raw: &str) -> Result<String, AppError> {
    raw.parse::<std::net::IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("'{}' is not a valid IP address", raw)))
}

async fn reload_whitelist(
    state: &AppState,
    user_id: &str,
) -> Result<Json<IpWhitelistResponse>, AppError> {
    let user = state
        .store
        .find_user_by_id(user_id)
        .await?
        .ok_or(ServiceError::UserNotFound)?;

    Ok(Json(IpWhitelistResponse {
        whitelisted_ips: user.whitelisted_ips,
    }))
}
