//! Suspicious-activity detection over recent audit records.
//!
//! The detector is intentionally narrow: it understands logins, failed
//! logins and data exports, and answers "not suspicious" for everything
//! else. It must never block the operation that triggered it - when the
//! activity log is unreachable it logs the failure and degrades to false.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::models::{ActivityAction, ActivityRecord};
use crate::services::store::ActivityStore;

/// Detection thresholds and windows. All windows slide, anchored at the
/// evaluation instant - never fixed buckets.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Failed logins within the window that trip the brute-force flag.
    pub max_failed_logins: u64,
    /// Brute-force lookback window.
    pub failed_login_window_minutes: i64,
    /// Exports within one hour beyond which the volume is flagged.
    pub max_hourly_exports: u64,
    /// How far back login history is considered for the login heuristic.
    pub login_lookback_hours: i64,
    /// How many recent logins the heuristic sees.
    pub login_history_limit: i64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_failed_logins: 5,
            failed_login_window_minutes: 15,
            max_hourly_exports: 5,
            login_lookback_hours: 24,
            login_history_limit: 5,
        }
    }
}

/// Pluggable policy for judging a login against the subject's recent
/// login history (geo-distance, time-of-day, whatever the deployment
/// supplies).
pub trait LoginHeuristic: Send + Sync {
    fn is_anomalous(&self, recent_logins: &[ActivityRecord], source_ip: &str) -> bool;
}

/// Default policy: never flags. A deployment that wants anomalous-login
/// detection swaps in a real heuristic; the hook exists either way.
pub struct ConservativeLoginHeuristic;

impl LoginHeuristic for ConservativeLoginHeuristic {
    fn is_anomalous(&self, _recent_logins: &[ActivityRecord], _source_ip: &str) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct SuspiciousActivityDetector {
    store: Arc<dyn ActivityStore>,
    heuristic: Arc<dyn LoginHeuristic>,
    config: DetectorConfig,
}

impl SuspiciousActivityDetector {
    pub fn new(
        store: Arc<dyn ActivityStore>,
        heuristic: Arc<dyn LoginHeuristic>,
        config: DetectorConfig,
    ) -> Self {
        Self {
            store,
            heuristic,
            config,
        }
    }

    /// Classify an event as suspicious or not. Infallible by contract:
    /// store errors degrade to `false` after logging.
    pub async fn detect(&self, user_id: &str, action: ActivityAction, source_ip: &str) -> bool {
        self.detect_at(user_id, action, source_ip, Utc::now()).await
    }

    /// Classification anchored at an explicit instant (window-boundary
    /// tests).
    pub async fn detect_at(
        &self,
        user_id: &str,
        action: ActivityAction,
        source_ip: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let verdict = match action {
            ActivityAction::Login => self.anomalous_login(user_id, source_ip, now).await,
            ActivityAction::FailedLogin => self.brute_force(user_id, now).await,
            ActivityAction::DataExport => self.unusual_export_volume(user_id, now).await,
            _ => Ok(false),
        };

        match verdict {
            Ok(flagged) => flagged,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user_id = %user_id,
                    action = %action.as_str(),
                    "Suspicious-activity detection failed; treating event as not suspicious"
                );
                false
            }
        }
    }

    async fn anomalous_login(
        &self,
        user_id: &str,
        source_ip: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::services::error::ServiceError> {
        let since = now - Duration::hours(self.config.login_lookback_hours);
        let recent = self
            .store
            .recent_by_action(
                user_id,
                ActivityAction::Login,
                since,
                self.config.login_history_limit,
            )
            .await?;
        Ok(self.heuristic.is_anomalous(&recent, source_ip))
    }

    async fn brute_force(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::services::error::ServiceError> {
        let since = now - Duration::minutes(self.config.failed_login_window_minutes);
        let failed = self
            .store
            .count_since(user_id, ActivityAction::FailedLogin, since)
            .await?;
        Ok(failed >= self.config.max_failed_logins)
    }

    async fn unusual_export_volume(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, crate::services::error::ServiceError> {
        let since = now - Duration::hours(1);
        let exports = self
            .store
            .count_since(user_id, ActivityAction::DataExport, since)
            .await?;
        Ok(exports > self.config.max_hourly_exports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityOutcome, SecurityLevel};
    use crate::services::store::{MemoryActivityStore, UnavailableActivityStore};
    use serde_json::json;

    fn record_at(
        action: ActivityAction,
        timestamp: DateTime<Utc>,
        ip: &str,
    ) -> ActivityRecord {
        let mut record = ActivityRecord::for_subject(
            "u1",
            action,
            "auth",
            json!({}),
            ip,
            "test-agent",
            SecurityLevel::Warning,
            ActivityOutcome::Failed,
            "session",
        );
        record.timestamp = timestamp;
        record
    }

    fn detector_with(store: Arc<dyn ActivityStore>) -> SuspiciousActivityDetector {
        SuspiciousActivityDetector::new(
            store,
            Arc::new(ConservativeLoginHeuristic),
            DetectorConfig::default(),
        )
    }

    #[tokio::test]
    async fn below_threshold_failed_logins_do_not_flag() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        for i in 0..4 {
            store
                .insert(&record_at(
                    ActivityAction::FailedLogin,
                    now - Duration::minutes(i),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }

        let detector = detector_with(store);
        assert!(
            !detector
                .detect_at("u1", ActivityAction::FailedLogin, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn threshold_failed_logins_flag() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        for i in 0..5 {
            store
                .insert(&record_at(
                    ActivityAction::FailedLogin,
                    now - Duration::minutes(i),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }

        let detector = detector_with(store);
        assert!(
            detector
                .detect_at("u1", ActivityAction::FailedLogin, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn failed_login_outside_window_does_not_count() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        // Four in-window, one just past the 15-minute boundary.
        for i in 0..4 {
            store
                .insert(&record_at(
                    ActivityAction::FailedLogin,
                    now - Duration::minutes(i),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }
        store
            .insert(&record_at(
                ActivityAction::FailedLogin,
                now - Duration::minutes(15) - Duration::seconds(1),
                "10.0.0.1",
            ))
            .await
            .unwrap();

        let detector = detector_with(store);
        assert!(
            !detector
                .detect_at("u1", ActivityAction::FailedLogin, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn sliding_window_catches_bursts_spanning_bucket_boundaries() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        // Spread across what would be two fixed 15-minute buckets but
        // inside one sliding window.
        for offset in [14, 12, 8, 4, 1] {
            store
                .insert(&record_at(
                    ActivityAction::FailedLogin,
                    now - Duration::minutes(offset),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }

        let detector = detector_with(store);
        assert!(
            detector
                .detect_at("u1", ActivityAction::FailedLogin, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn export_volume_over_threshold_flags() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        for i in 0..6 {
            store
                .insert(&record_at(
                    ActivityAction::DataExport,
                    now - Duration::minutes(i * 5),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }

        let detector = detector_with(store.clone());
        assert!(
            detector
                .detect_at("u1", ActivityAction::DataExport, "10.0.0.1", now)
                .await
        );

        // Exactly at the threshold is still acceptable volume.
        let store = Arc::new(MemoryActivityStore::new());
        for i in 0..5 {
            store
                .insert(&record_at(
                    ActivityAction::DataExport,
                    now - Duration::minutes(i * 5),
                    "10.0.0.1",
                ))
                .await
                .unwrap();
        }
        let detector = detector_with(store);
        assert!(
            !detector
                .detect_at("u1", ActivityAction::DataExport, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn other_actions_are_never_suspicious() {
        let store = Arc::new(MemoryActivityStore::new());
        let detector = detector_with(store);
        for action in [
            ActivityAction::Logout,
            ActivityAction::Update,
            ActivityAction::PermissionChange,
        ] {
            assert!(!detector.detect("u1", action, "10.0.0.1").await);
        }
    }

    #[tokio::test]
    async fn default_login_heuristic_never_flags() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        store
            .insert(&record_at(ActivityAction::Login, now, "203.0.113.50"))
            .await
            .unwrap();

        let detector = detector_with(store);
        assert!(
            !detector
                .detect_at("u1", ActivityAction::Login, "8.8.8.8", now)
                .await
        );
    }

    #[tokio::test]
    async fn custom_login_heuristic_is_consulted_with_history() {
        struct NewAddressHeuristic;
        impl LoginHeuristic for NewAddressHeuristic {
            fn is_anomalous(&self, recent: &[ActivityRecord], source_ip: &str) -> bool {
                !recent.is_empty() && recent.iter().all(|r| r.ip_address != source_ip)
            }
        }

        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        store
            .insert(&record_at(
                ActivityAction::Login,
                now - Duration::hours(2),
                "10.0.0.1",
            ))
            .await
            .unwrap();

        let detector = SuspiciousActivityDetector::new(
            store,
            Arc::new(NewAddressHeuristic),
            DetectorConfig::default(),
        );
        assert!(
            detector
                .detect_at("u1", ActivityAction::Login, "203.0.113.9", now)
                .await
        );
        assert!(
            !detector
                .detect_at("u1", ActivityAction::Login, "10.0.0.1", now)
                .await
        );
    }

    #[tokio::test]
    async fn store_failure_degrades_to_not_suspicious() {
        let detector = detector_with(Arc::new(UnavailableActivityStore));
        assert!(
            !detector
                .detect("u1", ActivityAction::FailedLogin, "10.0.0.1")
                .await
        );
        assert!(!detector.detect("u1", ActivityAction::Login, "10.0.0.1").await);
        assert!(
            !detector
                .detect("u1", ActivityAction::DataExport, "10.0.0.1")
                .await
        );
    }
}
