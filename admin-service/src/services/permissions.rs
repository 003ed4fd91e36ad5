//! Permission model: evaluating requirement sets against a role.
//!
//! A check with several requirements is an AND - every requirement must be
//! satisfied by some permission of the role. There is no OR-combination.

use crate::models::{PermissionRequirement, Role};
use crate::services::error::ServiceError;

/// True iff the role satisfies every requirement.
///
/// Legacy requirements match any permission's `name`; structured
/// requirements match a permission's `module` and `action` together. A
/// structured requirement with an empty module or action is a caller bug
/// and fails with `MalformedRequirement` rather than `Forbidden`.
pub fn role_satisfies(
    role: &Role,
    requirements: &[PermissionRequirement],
) -> Result<bool, ServiceError> {
    for requirement in requirements {
        if !satisfies_one(role, requirement)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn satisfies_one(role: &Role, requirement: &PermissionRequirement) -> Result<bool, ServiceError> {
    match requirement {
        PermissionRequirement::Legacy(name) => {
            if name.is_empty() {
                return Err(ServiceError::MalformedRequirement(
                    "legacy requirement with empty name".to_string(),
                ));
            }
            Ok(role.permissions.iter().any(|p| p.name == *name))
        }
        PermissionRequirement::Structured { module, action } => {
            if module.is_empty() || action.is_empty() {
                return Err(ServiceError::MalformedRequirement(format!(
                    "structured requirement missing module or action: '{}:{}'",
                    module, action
                )));
            }
            Ok(role
                .permissions
                .iter()
                .any(|p| p.module == *module && p.action == *action))
        }
    }
}

/// True iff the subject's role name is a member of the allowed set.
/// Comparison is exact and case-sensitive.
pub fn role_name_allowed(role_name: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|name| name == role_name)
}
