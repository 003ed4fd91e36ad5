pub mod auth;
pub mod metrics;
pub mod permission;

pub use auth::{auth_middleware, AuthUser, CurrentUser};
pub use metrics::metrics_middleware;
pub use permission::{
    permission_middleware, restrict_to_middleware, PermissionLayerState, RoleRestrictionState,
};
