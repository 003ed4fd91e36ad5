//! The authentication gate.
//!
//! Every protected request passes through a fixed pipeline:
//!
//! token verify -> subject fetch -> two-factor check -> allow-list check
//!
//! The order is a security invariant - the permission layer runs strictly
//! after this gate, and no stage may be evaluated before the one ahead of
//! it. Each failure keeps its own taxonomy code so clients can react
//! correctly (ask for a 2FA code vs. force a re-login).
//!
//! Failure policy: if the credential store cannot be reached the gate
//! fails closed with `NOT_AUTHENTICATED`; it never admits a request it
//! could not verify. The allow-list stage is default-open by design: an
//! account with an empty allow-list accepts any source address, and the
//! feature only engages once the first address is added.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use service_core::middleware::request_context::RequestContext;

use crate::models::{Role, User};
use crate::services::error::ServiceError;
use crate::AppState;

/// Header carrying the current TOTP code when the gate demands one.
pub const TWO_FACTOR_HEADER: &str = "x-2fa-code";

/// The authenticated subject attached to the request after the gate.
///
/// The role is populated best-effort; a consumer that needs it (the
/// permission layer) re-fetches by id when it is absent rather than
/// failing.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub role: Option<Role>,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Stage 1: bearer token present and valid.
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let token = match token {
        Some(token) => token,
        None => return Err(gate_failure(ServiceError::NotAuthenticated)),
    };

    let subject_id = state
        .jwt
        .verify(token)
        .map_err(gate_failure)?;

    // Stage 2: the subject must still exist. A dead store fails closed -
    // the gate never guesses.
    let user = match state.store.find_user_by_id(&subject_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(gate_failure(ServiceError::InvalidToken)),
        Err(e) => {
            tracing::error!(
                error = %e,
                "Credential store unreachable during token verification; failing closed"
            );
            return Err(gate_failure(ServiceError::NotAuthenticated));
        }
    };

    // Stage 3: two-factor challenge, when the account demands it.
    if user.two_factor_enabled {
        let code = req
            .headers()
            .get(TWO_FACTOR_HEADER)
            .and_then(|value| value.to_str().ok());

        match code {
            None => return Err(gate_failure(ServiceError::TwoFactorRequired)),
            Some(code) => {
                let valid = state
                    .two_factor
                    .verify_code(&user, code)
                    .map_err(gate_failure)?;
                if !valid {
                    return Err(gate_failure(ServiceError::InvalidTwoFactorCode));
                }
            }
        }
    }

    // Stage 4: source-address allow-list. Empty list = feature off.
    let source_ip = req
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.source_ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    if !user.ip_allowed(&source_ip) {
        tracing::warn!(
            user_id = %user.id,
            source_ip = %source_ip,
            "Request from address outside the account allow-list"
        );
        return Err(gate_failure(ServiceError::IpNotAllowed));
    }

    // Authenticated. Attach the subject with the role populated
    // best-effort; downstream permission checks re-fetch when this lookup
    // came back empty.
    let role = match state.store.find_role_by_id(&user.role_id).await {
        Ok(role) => role,
        Err(e) => {
            tracing::warn!(error = %e, user_id = %user.id, "Role lookup deferred");
            None
        }
    };

    req.extensions_mut().insert(CurrentUser { user, role });

    Ok(next.run(req).await)
}

fn gate_failure(err: ServiceError) -> AppError {
    let code = match &err {
        ServiceError::NotAuthenticated => "NOT_AUTHENTICATED",
        ServiceError::InvalidToken => "INVALID_TOKEN",
        ServiceError::TwoFactorRequired => "TWO_FACTOR_REQUIRED",
        ServiceError::InvalidTwoFactorCode => "INVALID_TWO_FACTOR_CODE",
        ServiceError::IpNotAllowed => "IP_NOT_ALLOWED",
        _ => "GATE_ERROR",
    };
    crate::services::metrics::record_auth_failure(code);
    AppError::from(err)
}

/// Extractor for the authenticated subject in handlers.
pub struct AuthUser(pub CurrentUser);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let current = parts.extensions.get::<CurrentUser>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Authenticated subject missing from request extensions"
            ))
        })?;

        Ok(AuthUser(current.clone()))
    }
}
