//! Role model - named permission bundles and the requirement shapes
//! checked against them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A fine-grained permission descriptor. `module` and `action` are the
/// structured identity; `name` is a legacy freeform identifier kept for
/// backward-compatible checks.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub module: String,
    pub action: String,
}

/// Role document. Role names are globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: String, description: Option<String>, permissions: Vec<Permission>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description,
            permissions,
            created_at: Utc::now(),
        }
    }
}

/// A single requirement checked against a role.
///
/// Callers either name a permission by its legacy freeform identifier or
/// by the structured module+action pair; the two shapes are evaluated by
/// different rules, so they are distinct variants rather than one string
/// inspected at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionRequirement {
    Legacy(String),
    Structured { module: String, action: String },
}

impl PermissionRequirement {
    pub fn legacy(name: impl Into<String>) -> Self {
        PermissionRequirement::Legacy(name.into())
    }

    pub fn structured(module: impl Into<String>, action: impl Into<String>) -> Self {
        PermissionRequirement::Structured {
            module: module.into(),
            action: action.into(),
        }
    }
}

impl std::fmt::Display for PermissionRequirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionRequirement::Legacy(name) => write!(f, "{}", name),
            PermissionRequirement::Structured { module, action } => {
                write!(f, "{}:{}", module, action)
            }
        }
    }
}
