//! Account model - the authenticated subject.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Account document.
///
/// The secret hash, two-factor secret, recovery codes and reset-token
/// digest are only ever serialized towards the store; API responses go
/// through [`UserResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    /// Every account references exactly one role. An account whose role
    /// cannot be resolved is invalid and rejected at creation.
    pub role_id: String,
    #[serde(default)]
    pub two_factor_enabled: bool,
    #[serde(default)]
    pub two_factor_secret: Option<String>,
    /// Unused single-use recovery codes. Consumed codes are removed with
    /// an atomic pull, never by rewriting the whole list.
    #[serde(default)]
    pub recovery_codes: Vec<String>,
    /// Allow-listed source addresses. An empty list means the check is
    /// off entirely (default-open) - adding the first address turns the
    /// feature on.
    #[serde(default)]
    pub whitelisted_ips: Vec<String>,
    #[serde(default)]
    pub password_reset_token: Option<String>,
    #[serde(default)]
    pub password_reset_expires: Option<mongodb::bson::DateTime>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: String, email: String, password_hash: String, role_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username,
            email,
            password_hash,
            role_id,
            two_factor_enabled: false,
            two_factor_secret: None,
            recovery_codes: Vec::new(),
            whitelisted_ips: Vec::new(),
            password_reset_token: None,
            password_reset_expires: None,
            created_at: Utc::now(),
        }
    }

    /// True when the source address passes the allow-list: an empty list
    /// admits everything by design.
    pub fn ip_allowed(&self, source_ip: &str) -> bool {
        self.whitelisted_ips.is_empty() || self.whitelisted_ips.iter().any(|ip| ip == source_ip)
    }

    /// Convert to a sanitized response (no secret material).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            role_id: self.role_id.clone(),
            two_factor_enabled: self.two_factor_enabled,
            whitelisted_ips: self.whitelisted_ips.clone(),
            created_at: self.created_at,
        }
    }
}

/// Account response for the API - secret hash, two-factor secret,
/// recovery codes and reset-token state are deliberately absent.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role_id: String,
    pub two_factor_enabled: bool,
    pub whitelisted_ips: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user() -> User {
        User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "$argon2id$fake".to_string(),
            "role-1".to_string(),
        )
    }

    #[test]
    fn empty_allow_list_admits_any_address() {
        let user = test_user();
        assert!(user.ip_allowed("203.0.113.7"));
        assert!(user.ip_allowed("10.0.0.1"));
    }

    #[test]
    fn non_empty_allow_list_admits_only_listed() {
        let mut user = test_user();
        user.whitelisted_ips = vec!["10.0.0.1".to_string()];
        assert!(user.ip_allowed("10.0.0.1"));
        assert!(!user.ip_allowed("203.0.113.7"));
    }

    #[test]
    fn sanitized_response_has_no_secret_material() {
        let mut user = test_user();
        user.two_factor_secret = Some("JBSWY3DPEHPK3PXP".to_string());
        user.recovery_codes = vec!["AAAA-BBBB".to_string()];
        let body = serde_json::to_string(&user.sanitized()).unwrap();
        assert!(!body.contains("argon2"));
        assert!(!body.contains("JBSWY3DPEHPK3PXP"));
        assert!(!body.contains("AAAA-BBBB"));
    }
}
