//! Fine-grained permission and role-restriction layers.
//!
//! These run strictly after the authentication gate. When the gate
//! attached only a role reference (the lookup was deferred), the checker
//! resolves the role by id before evaluating - "role may require a fetch"
//! is part of the contract here, not a hidden side effect.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::sync::Arc;

use crate::middleware::auth::CurrentUser;
use crate::models::{PermissionRequirement, Role};
use crate::services::error::ServiceError;
use crate::services::permissions;
use crate::AppState;

/// State for a `permission_middleware` layer: the requirements every
/// request through it must satisfy (AND semantics).
#[derive(Clone)]
pub struct PermissionLayerState {
    pub state: AppState,
    pub requirements: Arc<Vec<PermissionRequirement>>,
}

impl PermissionLayerState {
    pub fn new(state: AppState, requirements: Vec<PermissionRequirement>) -> Self {
        Self {
            state,
            requirements: Arc::new(requirements),
        }
    }
}

pub async fn permission_middleware(
    State(layer): State<PermissionLayerState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = authenticated_subject(&req)?;
    let role = resolve_role(&layer.state, &current).await?;

    let satisfied =
        permissions::role_satisfies(&role, &layer.requirements).map_err(AppError::from)?;

    if !satisfied {
        tracing::info!(
            user_id = %current.user.id,
            role = %role.name,
            requirements = ?layer.requirements,
            "Permission check failed"
        );
        crate::services::metrics::record_auth_failure("FORBIDDEN");
        return Err(ServiceError::Forbidden.into());
    }

    req.extensions_mut().insert(CurrentUser {
        user: current.user,
        role: Some(role),
    });

    Ok(next.run(req).await)
}

/// State for a `restrict_to_middleware` layer: the role names admitted.
#[derive(Clone)]
pub struct RoleRestrictionState {
    pub state: AppState,
    pub allowed: Arc<Vec<String>>,
}

impl RoleRestrictionState {
    pub fn new(state: AppState, allowed: Vec<String>) -> Self {
        Self {
            state,
            allowed: Arc::new(allowed),
        }
    }
}

pub async fn restrict_to_middleware(
    State(layer): State<RoleRestrictionState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let current = authenticated_subject(&req)?;
    let role = resolve_role(&layer.state, &current).await?;

    if !permissions::role_name_allowed(&role.name, &layer.allowed) {
        tracing::info!(
            user_id = %current.user.id,
            role = %role.name,
            allowed = ?layer.allowed,
            "Role restriction check failed"
        );
        crate::services::metrics::record_auth_failure("FORBIDDEN");
        return Err(ServiceError::Forbidden.into());
    }

    req.extensions_mut().insert(CurrentUser {
        user: current.user,
        role: Some(role),
    });

    Ok(next.run(req).await)
}

/// A permission layer without an upstream gate is a wiring defect, not an
/// authorization outcome.
fn authenticated_subject(req: &Request) -> Result<CurrentUser, AppError> {
    req.extensions().get::<CurrentUser>().cloned().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Permission layer reached without an authenticated subject - check middleware order"
        ))
    })
}

/// Cache-or-fetch role resolution.
async fn resolve_role(state: &AppState, current: &CurrentUser) -> Result<Role, AppError> {
    if let Some(role) = &current.role {
        return Ok(role.clone());
    }

    match state.store.find_role_by_id(&current.user.role_id).await {
        Ok(Some(role)) => Ok(role),
        Ok(None) => {
            // An account whose role no longer resolves cannot be
            // authorized for anything.
            tracing::error!(
                user_id = %current.user.id,
                role_id = %current.user.role_id,
                "Account references a role that does not exist"
            );
            Err(ServiceError::Forbidden.into())
        }
        Err(e) => Err(AppError::from(e)),
    }
}
