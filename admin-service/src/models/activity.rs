//! Activity log model - the immutable, append-only security audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Closed set of auditable actions. New kinds of activity get a new
/// variant here, never a freeform string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Login,
    Logout,
    Create,
    Update,
    Delete,
    ResetPassword,
    ChangePassword,
    AccessResource,
    FailedLogin,
    SuspiciousActivity,
    DataExport,
    PermissionChange,
    SecuritySettingsChange,
    TwoFactorAuthChange,
    IpWhitelistChange,
}

impl ActivityAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Login => "login",
            ActivityAction::Logout => "logout",
            ActivityAction::Create => "create",
            ActivityAction::Update => "update",
            ActivityAction::Delete => "delete",
            ActivityAction::ResetPassword => "reset_password",
            ActivityAction::ChangePassword => "change_password",
            ActivityAction::AccessResource => "access_resource",
            ActivityAction::FailedLogin => "failed_login",
            ActivityAction::SuspiciousActivity => "suspicious_activity",
            ActivityAction::DataExport => "data_export",
            ActivityAction::PermissionChange => "permission_change",
            ActivityAction::SecuritySettingsChange => "security_settings_change",
            ActivityAction::TwoFactorAuthChange => "two_factor_auth_change",
            ActivityAction::IpWhitelistChange => "ip_whitelist_change",
        }
    }
}

/// Severity attached to an activity entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    Info,
    Warning,
    Critical,
}

impl SecurityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityLevel::Info => "info",
            SecurityLevel::Warning => "warning",
            SecurityLevel::Critical => "critical",
        }
    }

    /// Operator-facing severity label used in alert mail subjects.
    pub fn label(&self) -> &'static str {
        match self {
            SecurityLevel::Info => "low",
            SecurityLevel::Warning => "medium",
            SecurityLevel::Critical => "high",
        }
    }
}

/// Whether the recorded operation succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivityOutcome {
    Success,
    Failed,
}

/// One append-only audit entry. Entries are created by the recorder and
/// never updated or deleted afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ActivityRecord {
    #[serde(rename = "_id")]
    pub id: String,
    /// None for system or anonymous events (e.g. a failed login against
    /// an unknown email).
    pub user_id: Option<String>,
    pub action: ActivityAction,
    pub resource: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub ip_address: String,
    pub user_agent: String,
    pub security_level: SecurityLevel,
    pub outcome: ActivityOutcome,
    /// Request correlation id.
    pub session_id: String,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    /// Entry attributed to a subject.
    #[allow(clippy::too_many_arguments)]
    pub fn for_subject(
        user_id: impl Into<String>,
        action: ActivityAction,
        resource: impl Into<String>,
        details: serde_json::Value,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        security_level: SecurityLevel,
        outcome: ActivityOutcome,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: Some(user_id.into()),
            action,
            resource: resource.into(),
            details,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            security_level,
            outcome,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Entry with no known subject (anonymous or system-originated).
    pub fn anonymous(
        action: ActivityAction,
        resource: impl Into<String>,
        details: serde_json::Value,
        ip_address: impl Into<String>,
        user_agent: impl Into<String>,
        security_level: SecurityLevel,
        outcome: ActivityOutcome,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: None,
            action,
            resource: resource.into(),
            details,
            ip_address: ip_address.into(),
            user_agent: user_agent.into(),
            security_level,
            outcome,
            session_id: session_id.into(),
            timestamp: Utc::now(),
        }
    }
}
