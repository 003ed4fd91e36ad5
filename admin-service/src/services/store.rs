//! Store traits for the credential and activity collections, plus
//! in-memory implementations used by tests.
//!
//! Mutations that race between requests on the same account (recovery-code
//! consumption, allow-list edits) are expressed as single atomic
//! operations on the trait so no implementation can fall back to
//! read-modify-write semantics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::{ActivityAction, ActivityRecord, Role, User};
use crate::services::error::ServiceError;

/// Subject and role persistence.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Liveness probe for the backing store.
    async fn health_check(&self) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ServiceError>;
    async fn insert_user(&self, user: &User) -> Result<(), ServiceError>;

    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError>;
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError>;
    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError>;

    /// Store a fresh (not yet confirmed) two-factor secret, overwriting
    /// any previous unconfirmed one. Leaves the enabled flag untouched.
    async fn set_two_factor_secret(&self, user_id: &str, secret: &str)
        -> Result<(), ServiceError>;

    /// Activate two-factor auth and store the freshly generated recovery
    /// codes in one update.
    async fn enable_two_factor(
        &self,
        user_id: &str,
        recovery_codes: &[String],
    ) -> Result<(), ServiceError>;

    /// Clear the enabled flag, the secret and all recovery codes.
    /// Idempotent.
    async fn disable_two_factor(&self, user_id: &str) -> Result<(), ServiceError>;

    /// Atomically remove one recovery code. Returns true iff the code was
    /// present and is now gone - two concurrent calls with the same code
    /// cannot both return true.
    async fn consume_recovery_code(&self, user_id: &str, code: &str)
        -> Result<bool, ServiceError>;

    /// Add a source address to the allow-list (set semantics).
    async fn add_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError>;

    /// Remove a source address from the allow-list.
    async fn remove_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError>;

    /// Drop every allow-list entry, returning the subject to the
    /// default-open state.
    async fn clear_whitelisted_ips(&self, user_id: &str) -> Result<(), ServiceError>;

    /// Store a reset-token digest with its expiry.
    async fn set_password_reset_token(
        &self,
        user_id: &str,
        token_digest: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), ServiceError>;

    /// Look up a subject by an unexpired reset-token digest. Expired and
    /// unknown digests are both `None` - callers cannot tell them apart.
    async fn find_user_by_reset_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, ServiceError>;

    /// Set a new secret hash and clear the reset-token state.
    async fn reset_password(&self, user_id: &str, password_hash: &str)
        -> Result<(), ServiceError>;
}

/// Append-only activity log persistence.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    async fn insert(&self, record: &ActivityRecord) -> Result<(), ServiceError>;

    /// Count a subject's records of one action kind since `since`
    /// (sliding window anchored by the caller).
    async fn count_since(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError>;

    /// A subject's most recent records of one action kind since `since`,
    /// newest first, capped at `limit`.
    async fn recent_by_action(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, ServiceError>;

    /// Most recent records overall, newest first.
    async fn recent(&self, limit: i64) -> Result<Vec<ActivityRecord>, ServiceError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations (tests and local development)
// ---------------------------------------------------------------------------

/// In-memory credential store. A single mutex stands in for the
/// per-document atomicity the MongoDB implementation gets from
/// `$pull`/`$addToSet`.
#[derive(Default)]
pub struct MemoryCredentialStore {
    users: Mutex<HashMap<String, User>>,
    roles: Mutex<HashMap<String, Role>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<User>, ServiceError> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), ServiceError> {
        self.users
            .lock()
            .unwrap()
            .insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_role_by_id(&self, role_id: &str) -> Result<Option<Role>, ServiceError> {
        Ok(self.roles.lock().unwrap().get(role_id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, ServiceError> {
        Ok(self
            .roles
            .lock()
            .unwrap()
            .values()
            .find(|r| r.name == name)
            .cloned())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), ServiceError> {
        self.roles
            .lock()
            .unwrap()
            .insert(role.id.clone(), role.clone());
        Ok(())
    }

    async fn set_two_factor_secret(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.two_factor_secret = Some(secret.to_string());
        Ok(())
    }

    async fn enable_two_factor(
        &self,
        user_id: &str,
        recovery_codes: &[String],
    ) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.two_factor_enabled = true;
        user.recovery_codes = recovery_codes.to_vec();
        Ok(())
    }

    async fn disable_two_factor(&self, user_id: &str) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.two_factor_enabled = false;
        user.two_factor_secret = None;
        user.recovery_codes.clear();
        Ok(())
    }

    async fn consume_recovery_code(
        &self,
        user_id: &str,
        code: &str,
    ) -> Result<bool, ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        let before = user.recovery_codes.len();
        user.recovery_codes.retain(|c| c != code);
        Ok(user.recovery_codes.len() < before)
    }

    async fn add_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        if !user.whitelisted_ips.iter().any(|existing| existing == ip) {
            user.whitelisted_ips.push(ip.to_string());
        }
        Ok(())
    }

    async fn remove_whitelisted_ip(&self, user_id: &str, ip: &str) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.whitelisted_ips.retain(|existing| existing != ip);
        Ok(())
    }

    async fn clear_whitelisted_ips(&self, user_id: &str) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.whitelisted_ips.clear();
        Ok(())
    }

    async fn set_password_reset_token(
        &self,
        user_id: &str,
        token_digest: &str,
        expires: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.password_reset_token = Some(token_digest.to_string());
        user.password_reset_expires = Some(mongodb::bson::DateTime::from_chrono(expires));
        Ok(())
    }

    async fn find_user_by_reset_token(
        &self,
        token_digest: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, ServiceError> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .find(|u| {
                u.password_reset_token.as_deref() == Some(token_digest)
                    && u
                        .password_reset_expires
                        .is_some_and(|exp| exp.to_chrono() > now)
            })
            .cloned())
    }

    async fn reset_password(
        &self,
        user_id: &str,
        password_hash: &str,
    ) -> Result<(), ServiceError> {
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(user_id).ok_or(ServiceError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        user.password_reset_token = None;
        user.password_reset_expires = None;
        Ok(())
    }
}

/// In-memory activity store.
#[derive(Default)]
pub struct MemoryActivityStore {
    records: Mutex<Vec<ActivityRecord>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far (test assertions).
    pub fn all(&self) -> Vec<ActivityRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn insert(&self, record: &ActivityRecord) -> Result<(), ServiceError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn count_since(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.user_id.as_deref() == Some(user_id) && r.action == action && r.timestamp >= since
            })
            .count() as u64)
    }

    async fn recent_by_action(
        &self,
        user_id: &str,
        action: ActivityAction,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ActivityRecord>, ServiceError> {
        let mut matching: Vec<ActivityRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                r.user_id.as_deref() == Some(user_id) && r.action == action && r.timestamp >= since
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit as usize);
        Ok(matching)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<ActivityRecord>, ServiceError> {
        let mut records = self.records.lock().unwrap().clone();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit as usize);
        Ok(records)
    }
}

/// Credential store that always fails - exercises the gate's fail-closed
/// path.
pub struct UnavailableCredentialStore;

impl UnavailableCredentialStore {
    fn unavailable<T>() -> Result<T, ServiceError> {
        Err(ServiceError::UpstreamUnavailable(
            "credential store offline".to_string(),
        ))
    }
}

#[async_trait]
impl CredentialStore for UnavailableCredentialStore {
    async fn health_check(&self) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn find_user_by_id(&self, _user_id: &str) -> Result<Option<User>, ServiceError> {
        Self::unavailable()
    }

    async fn find_user_by_email(&self, _email: &str) -> Result<Option<User>, ServiceError> {
        Self::unavailable()
    }

    async fn find_user_by_username(&self, _username: &str) -> Result<Option<User>, ServiceError> {
        Self::unavailable()
    }

    async fn insert_user(&self, _user: &User) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn find_role_by_id(&self, _role_id: &str) -> Result<Option<Role>, ServiceError> {
        Self::unavailable()
    }

    async fn find_role_by_name(&self, _name: &str) -> Result<Option<Role>, ServiceError> {
        Self::unavailable()
    }

    async fn insert_role(&self, _role: &Role) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn set_two_factor_secret(
        &self,
        _user_id: &str,
        _secret: &str,
    ) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn enable_two_factor(
        &self,
        _user_id: &str,
        _recovery_codes: &[String],
    ) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn disable_two_factor(&self, _user_id: &str) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn consume_recovery_code(
        &self,
        _user_id: &str,
        _code: &str,
    ) -> Result<bool, ServiceError> {
        Self::unavailable()
    }

    async fn add_whitelisted_ip(&self, _user_id: &str, _ip: &str) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn remove_whitelisted_ip(&self, _user_id: &str, _ip: &str) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn clear_whitelisted_ips(&self, _user_id: &str) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn set_password_reset_token(
        &self,
        _user_id: &str,
        _token_digest: &str,
        _expires: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        Self::unavailable()
    }

    async fn find_user_by_reset_token(
        &self,
        _token_digest: &str,
        _now: DateTime<Utc>,
    ) -> Result<Option<User>, ServiceError> {
        Self::unavailable()
    }

    async fn reset_password(
        &self,
        _user_id: &str,
        _password_hash: &str,
    ) -> Result<(), ServiceError> {
        Self::unavailable()
    }
}

/// Activity store that always fails - exercises the detector's
/// degrade-to-not-suspicious path.
pub struct UnavailableActivityStore;

#[async_trait]
impl ActivityStore for UnavailableActivityStore {
    async fn insert(&self, _record: &ActivityRecord) -> Result<(), ServiceError> {
        Err(ServiceError::UpstreamUnavailable(
            "activity store offline".to_string(),
        ))
    }

    async fn count_since(
        &self,
        _user_id: &str,
        _action: ActivityAction,
        _since: DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        Err(ServiceError::UpstreamUnavailable(
            "activity store offline".to_string(),
        ))
    }

    async fn recent_by_action(
        &self,
        _user_id: &str,
        _action: ActivityAction,
        _since: DateTime<Utc>,
        _limit: i64,
    ) -> Result<Vec<ActivityRecord>, ServiceError> {
        Err(ServiceError::UpstreamUnavailable(
            "activity store offline".to_string(),
        ))
    }

    async fn recent(&self, _limit: i64) -> Result<Vec<ActivityRecord>, ServiceError> {
        Err(ServiceError::UpstreamUnavailable(
            "activity store offline".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActivityOutcome, SecurityLevel};
    use serde_json::json;

    fn seeded_user() -> User {
        let mut user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
            "role-1".to_string(),
        );
        user.recovery_codes = vec!["AAAA-1111".to_string(), "BBBB-2222".to_string()];
        user
    }

    #[tokio::test]
    async fn consume_recovery_code_is_single_use() {
        let store = MemoryCredentialStore::new();
        let user = seeded_user();
        store.insert_user(&user).await.unwrap();

        assert!(store
            .consume_recovery_code(&user.id, "AAAA-1111")
            .await
            .unwrap());
        // Second attempt with the same code fails and mutates nothing.
        assert!(!store
            .consume_recovery_code(&user.id, "AAAA-1111")
            .await
            .unwrap());

        let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.recovery_codes, vec!["BBBB-2222".to_string()]);
    }

    #[tokio::test]
    async fn whitelist_ops_are_set_semantics() {
        let store = MemoryCredentialStore::new();
        let user = seeded_user();
        store.insert_user(&user).await.unwrap();

        store.add_whitelisted_ip(&user.id, "10.0.0.1").await.unwrap();
        store.add_whitelisted_ip(&user.id, "10.0.0.1").await.unwrap();
        let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(reloaded.whitelisted_ips.len(), 1);

        store
            .remove_whitelisted_ip(&user.id, "10.0.0.1")
            .await
            .unwrap();
        let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(reloaded.whitelisted_ips.is_empty());
    }

    #[tokio::test]
    async fn count_since_filters_by_window() {
        let store = MemoryActivityStore::new();
        let mut old = ActivityRecord::for_subject(
            "u1",
            ActivityAction::FailedLogin,
            "auth",
            json!({}),
            "10.0.0.1",
            "test",
            SecurityLevel::Warning,
            ActivityOutcome::Failed,
            "s1",
        );
        old.timestamp = Utc::now() - chrono::Duration::minutes(20);
        store.insert(&old).await.unwrap();

        let fresh = ActivityRecord::for_subject(
            "u1",
            ActivityAction::FailedLogin,
            "auth",
            json!({}),
            "10.0.0.1",
            "test",
            SecurityLevel::Warning,
            ActivityOutcome::Failed,
            "s1",
        );
        store.insert(&fresh).await.unwrap();

        let since = Utc::now() - chrono::Duration::minutes(15);
        assert_eq!(
            store
                .count_since("u1", ActivityAction::FailedLogin, since)
                .await
                .unwrap(),
            1
        );
    }
}
