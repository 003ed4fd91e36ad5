//! The record -> detect -> alert pipeline.
//!
//! Handlers record security-relevant activity through this pipeline; the
//! pipeline appends the audit entry, asks the anomaly detector about it,
//! and raises a tiered alert when the detector flags it. Audit-trail
//! failures are logged and do not abort the calling operation.

use std::sync::Arc;

use crate::models::{ActivityAction, ActivityRecord, SecurityLevel};
use crate::services::alerts::{AlertDetails, AlertDispatcher, AlertType, SecurityAlert};
use crate::services::detector::SuspiciousActivityDetector;
use crate::services::store::ActivityStore;

#[derive(Clone)]
pub struct ActivityPipeline {
    store: Arc<dyn ActivityStore>,
    detector: SuspiciousActivityDetector,
    alerts: AlertDispatcher,
}

impl ActivityPipeline {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        detector: SuspiciousActivityDetector,
        alerts: AlertDispatcher,
    ) -> Self {
        Self {
            store,
            detector,
            alerts,
        }
    }

    /// Append an audit entry, then evaluate it for anomalies.
    ///
    /// The entry is written before detection runs, so the triggering
    /// event itself counts toward any threshold.
    pub async fn record(&self, record: ActivityRecord) {
        if let Err(e) = self.store.insert(&record).await {
            tracing::error!(
                error = %e,
                action = %record.action.as_str(),
                "Failed to write activity record"
            );
        }

        let Some(user_id) = record.user_id.clone() else {
            return;
        };

        let flagged = self
            .detector
            .detect(&user_id, record.action, &record.ip_address)
            .await;
        if !flagged {
            return;
        }

        let (alert_type, level) = match record.action {
            ActivityAction::FailedLogin => (AlertType::BruteForceAttempt, SecurityLevel::Critical),
            ActivityAction::Login => (AlertType::AnomalousLogin, SecurityLevel::Warning),
            ActivityAction::DataExport => (AlertType::UnusualDataExport, SecurityLevel::Warning),
            _ => (AlertType::SuspiciousActivity, SecurityLevel::Warning),
        };

        self.alerts
            .send_alert(SecurityAlert {
                alert_type,
                user_id: Some(user_id),
                details: AlertDetails {
                    action: Some(record.action.as_str().to_string()),
                    resource: Some(record.resource.clone()),
                    ip_address: Some(record.ip_address.clone()),
                    user_agent: Some(record.user_agent.clone()),
                },
                level,
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityOutcome, User};
    use crate::services::detector::{ConservativeLoginHeuristic, DetectorConfig};
    use crate::services::email::{MockEmailService, SentEmailKind};
    use crate::services::store::{CredentialStore, MemoryActivityStore, MemoryCredentialStore};
    use serde_json::json;

    struct Fixture {
        pipeline: ActivityPipeline,
        activity: Arc<MemoryActivityStore>,
        email: Arc<MockEmailService>,
        user: User,
    }

    async fn fixture() -> Fixture {
        let activity = Arc::new(MemoryActivityStore::new());
        let credentials = Arc::new(MemoryCredentialStore::new());
        let email = Arc::new(MockEmailService::new());

        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
            "role-1".to_string(),
        );
        credentials.insert_user(&user).await.unwrap();

        let detector = SuspiciousActivityDetector::new(
            activity.clone(),
            Arc::new(ConservativeLoginHeuristic),
            DetectorConfig::default(),
        );
        let alerts = AlertDispatcher::new(
            activity.clone(),
            credentials,
            email.clone(),
            "ops@example.com".to_string(),
        );
        let pipeline = ActivityPipeline::new(activity.clone(), detector, alerts);

        Fixture {
            pipeline,
            activity,
            email,
            user,
        }
    }

    fn failed_login(user_id: &str) -> ActivityRecord {
        ActivityRecord::for_subject(
            user_id,
            ActivityAction::FailedLogin,
            "auth",
            json!({"email": "alice@example.com"}),
            "203.0.113.9",
            "curl/8",
            SecurityLevel::Warning,
            ActivityOutcome::Failed,
            "session-1",
        )
    }

    #[tokio::test]
    async fn threshold_burst_raises_critical_alert() {
        let f = fixture().await;
        for _ in 0..5 {
            f.pipeline.record(failed_login(&f.user.id)).await;
        }

        // 5 failed logins + 1 suspicious_activity record from the alert.
        let records = f.activity.all();
        assert_eq!(
            records
                .iter()
                .filter(|r| r.action == ActivityAction::SuspiciousActivity)
                .count(),
            1
        );

        let sent = f.email.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ops@example.com");
        assert!(matches!(
            &sent[0].kind,
            SentEmailKind::SecurityAlert { severity: SecurityLevel::Critical, .. }
        ));
    }

    #[tokio::test]
    async fn below_threshold_burst_stays_quiet() {
        let f = fixture().await;
        for _ in 0..4 {
            f.pipeline.record(failed_login(&f.user.id)).await;
        }

        assert!(f
            .activity
            .all()
            .iter()
            .all(|r| r.action != ActivityAction::SuspiciousActivity));
        assert!(f.email.sent().is_empty());
    }

    #[tokio::test]
    async fn anonymous_records_skip_detection() {
        let f = fixture().await;
        let record = ActivityRecord::anonymous(
            ActivityAction::FailedLogin,
            "auth",
            json!({"email": "unknown@example.com"}),
            "203.0.113.9",
            "curl/8",
            SecurityLevel::Warning,
            ActivityOutcome::Failed,
            "session-1",
        );
        for _ in 0..10 {
            f.pipeline.record(record.clone()).await;
        }
        assert!(f.email.sent().is_empty());
    }
}
