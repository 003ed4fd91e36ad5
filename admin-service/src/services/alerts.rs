//! Tiered security alerting.
//!
//! Every alert writes an activity record before any notification is
//! attempted, so the durable trail survives a dead mail relay. Delivery
//! is best-effort: failures are logged and swallowed, never propagated to
//! the operation that raised the alert. Alerts are not deduplicated -
//! rapid repeat triggers produce repeat alerts (a documented gap; stricter
//! deployments would key on (subject, type, time bucket)).

use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::models::{
    ActivityAction, ActivityOutcome, ActivityRecord, SecurityLevel,
};
use crate::services::email::EmailProvider;
use crate::services::store::{ActivityStore, CredentialStore};

/// Kinds of alert the core raises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertType {
    SuspiciousActivity,
    BruteForceAttempt,
    AnomalousLogin,
    UnusualDataExport,
    PermissionEscalation,
    SecuritySettingsChange,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::SuspiciousActivity => "suspicious_activity",
            AlertType::BruteForceAttempt => "brute_force_attempt",
            AlertType::AnomalousLogin => "anomalous_login",
            AlertType::UnusualDataExport => "unusual_data_export",
            AlertType::PermissionEscalation => "permission_escalation",
            AlertType::SecuritySettingsChange => "security_settings_change",
        }
    }

    /// Human-readable name used in notifications.
    pub fn display_name(&self) -> &'static str {
        match self {
            AlertType::SuspiciousActivity => "Suspicious activity",
            AlertType::BruteForceAttempt => "Brute-force attempt",
            AlertType::AnomalousLogin => "Anomalous login",
            AlertType::UnusualDataExport => "Unusual data export",
            AlertType::PermissionEscalation => "Permission escalation",
            AlertType::SecuritySettingsChange => "Security settings change",
        }
    }
}

/// Context carried by an alert into the audit record and notification.
#[derive(Debug, Clone, Default)]
pub struct AlertDetails {
    pub action: Option<String>,
    pub resource: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// An alert in flight. Ephemeral: it exists only long enough to be logged
/// and (maybe) delivered.
#[derive(Debug, Clone)]
pub struct SecurityAlert {
    pub alert_type: AlertType,
    pub user_id: Option<String>,
    pub details: AlertDetails,
    pub level: SecurityLevel,
}

/// Rendered view of an alert handed to the email provider.
#[derive(Debug, Clone)]
pub struct AlertEmail {
    pub severity: SecurityLevel,
    pub type_name: String,
    pub subject_identity: Option<String>,
    pub details: AlertDetails,
    pub timestamp: DateTime<Utc>,
}

impl AlertEmail {
    /// Label/value rows for the notification body, skipping absent fields.
    pub fn detail_rows(&self) -> Vec<(&'static str, String)> {
        let mut rows = Vec::new();
        if let Some(action) = &self.details.action {
            rows.push(("Action", action.clone()));
        }
        if let Some(resource) = &self.details.resource {
            rows.push(("Resource", resource.clone()));
        }
        if let Some(ip) = &self.details.ip_address {
            rows.push(("Source address", ip.clone()));
        }
        if let Some(agent) = &self.details.user_agent {
            rows.push(("User agent", agent.clone()));
        }
        rows.push(("Timestamp", self.timestamp.to_rfc3339()));
        rows
    }
}

#[derive(Clone)]
pub struct AlertDispatcher {
    activity: Arc<dyn ActivityStore>,
    credentials: Arc<dyn CredentialStore>,
    email: Arc<dyn EmailProvider>,
    admin_email: String,
}

impl AlertDispatcher {
    pub fn new(
        activity: Arc<dyn ActivityStore>,
        credentials: Arc<dyn CredentialStore>,
        email: Arc<dyn EmailProvider>,
        admin_email: String,
    ) -> Self {
        Self {
            activity,
            credentials,
            email,
            admin_email,
        }
    }

    /// Record and (per tier) deliver an alert.
    ///
    /// info: record only. warning: record + notify the affected subject.
    /// critical: record + notify the operator channel. Never returns an
    /// error - the triggering operation has already completed and must not
    /// be failed retroactively by its own alarm.
    pub async fn send_alert(&self, alert: SecurityAlert) {
        let record = ActivityRecord {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: alert.user_id.clone(),
            action: ActivityAction::SuspiciousActivity,
            resource: "security_alert".to_string(),
            details: json!({
                "alert_type": alert.alert_type.as_str(),
                "action": alert.details.action,
                "resource": alert.details.resource,
            }),
            ip_address: alert
                .details
                .ip_address
                .clone()
                .unwrap_or_else(|| "system".to_string()),
            user_agent: alert
                .details
                .user_agent
                .clone()
                .unwrap_or_else(|| "system".to_string()),
            security_level: alert.level,
            outcome: ActivityOutcome::Success,
            session_id: "system".to_string(),
            timestamp: Utc::now(),
        };

        // Durable trail first; a failed write means there is nothing to
        // anchor the notification to, so stop here.
        if let Err(e) = self.activity.insert(&record).await {
            tracing::error!(
                error = %e,
                alert_type = %alert.alert_type.as_str(),
                "Failed to write security alert activity record"
            );
            return;
        }

        tracing::warn!(
            alert_type = %alert.alert_type.as_str(),
            severity = %alert.level.as_str(),
            user_id = ?alert.user_id,
            "Security alert recorded"
        );
        crate::services::metrics::record_security_alert(alert.level.as_str());

        let recipient = match alert.level {
            SecurityLevel::Info => return,
            SecurityLevel::Warning => match self.subject_email(&alert).await {
                Some(email) => email,
                // No reachable subject; route to the operator instead of
                // dropping the notification.
                None => self.admin_email.clone(),
            },
            SecurityLevel::Critical => self.admin_email.clone(),
        };

        let subject_identity = self.subject_identity(&alert).await;
        let email_view = AlertEmail {
            severity: alert.level,
            type_name: alert.alert_type.display_name().to_string(),
            subject_identity,
            details: alert.details.clone(),
            timestamp: record.timestamp,
        };

        if let Err(e) = self
            .email
            .send_security_alert_email(&recipient, &email_view)
            .await
        {
            tracing::error!(
                error = %e,
                alert_type = %alert.alert_type.as_str(),
                "Security alert notification failed; alert remains recorded"
            );
        }
    }

    async fn subject_email(&self, alert: &SecurityAlert) -> Option<String> {
        let user_id = alert.user_id.as_deref()?;
        match self.credentials.find_user_by_id(user_id).await {
            Ok(Some(user)) => Some(user.email),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "Failed to resolve alert subject email");
                None
            }
        }
    }

    async fn subject_identity(&self, alert: &SecurityAlert) -> Option<String> {
        let user_id = alert.user_id.as_deref()?;
        match self.credentials.find_user_by_id(user_id).await {
            Ok(Some(user)) => Some(format!("{} ({})", user.username, user.email)),
            _ => Some(user_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::services::email::{MockEmailService, SentEmailKind};
    use crate::services::store::{MemoryActivityStore, MemoryCredentialStore};

    struct Fixture {
        dispatcher: AlertDispatcher,
        activity: Arc<MemoryActivityStore>,
        email: Arc<MockEmailService>,
        user: User,
    }

    async fn fixture(email: Arc<MockEmailService>) -> Fixture {
        let activity = Arc::new(MemoryActivityStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
            "role-1".to_string(),
        );
        credentials.insert_user(&user).await.unwrap();

        let dispatcher = AlertDispatcher::new(
            activity.clone(),
            credentials,
            email.clone(),
            "ops@example.com".to_string(),
        );
        Fixture {
            dispatcher,
            activity,
            email,
            user,
        }
    }

    fn alert(user_id: &str, alert_type: AlertType, level: SecurityLevel) -> SecurityAlert {
        SecurityAlert {
            alert_type,
            user_id: Some(user_id.to_string()),
            details: AlertDetails {
                action: Some("failed_login".to_string()),
                resource: Some("auth".to_string()),
                ip_address: Some("203.0.113.9".to_string()),
                user_agent: Some("curl/8".to_string()),
            },
            level,
        }
    }

    #[tokio::test]
    async fn info_alert_records_without_notifying() {
        let f = fixture(Arc::new(MockEmailService::new())).await;
        f.dispatcher
            .send_alert(alert(
                &f.user.id,
                AlertType::SuspiciousActivity,
                SecurityLevel::Info,
            ))
            .await;

        let records = f.activity.all();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, ActivityAction::SuspiciousActivity);
        assert!(f.email.sent().is_empty());
    }

    #[tokio::test]
    async fn warning_alert_notifies_the_subject() {
        let f = fixture(Arc::new(MockEmailService::new())).await;
        f.dispatcher
            .send_alert(alert(
                &f.user.id,
                AlertType::AnomalousLogin,
                SecurityLevel::Warning,
            ))
            .await;

        let sent = f.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.com");
    }

    #[tokio::test]
    async fn critical_alert_notifies_the_operator() {
        let f = fixture(Arc::new(MockEmailService::new())).await;
        f.dispatcher
            .send_alert(alert(
                &f.user.id,
                AlertType::BruteForceAttempt,
                SecurityLevel::Critical,
            ))
            .await;

        let sent = f.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.com");
        assert!(matches!(
            &sent[0].kind,
            SentEmailKind::SecurityAlert { severity: SecurityLevel::Critical, .. }
        ));
    }

    #[tokio::test]
    async fn notification_failure_is_swallowed_and_record_survives() {
        let f = fixture(Arc::new(MockEmailService::failing())).await;
        f.dispatcher
            .send_alert(alert(
                &f.user.id,
                AlertType::BruteForceAttempt,
                SecurityLevel::Critical,
            ))
            .await;

        // The activity record is the durable trail; it must exist even
        // though delivery failed.
        assert_eq!(f.activity.all().len(), 1);
    }

    #[tokio::test]
    async fn alert_email_rows_skip_absent_fields() {
        let email = AlertEmail {
            severity: SecurityLevel::Warning,
            type_name: "Anomalous login".to_string(),
            subject_identity: None,
            details: AlertDetails {
                action: Some("login".to_string()),
                resource: None,
                ip_address: None,
                user_agent: None,
            },
            timestamp: Utc::now(),
        };
        let rows = email.detail_rows();
        assert_eq!(rows.len(), 2); // action + timestamp
        assert_eq!(rows[0].0, "Action");
    }
}
