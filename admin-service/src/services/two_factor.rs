//! Two-factor authentication: TOTP enrollment and verification plus
//! single-use recovery codes.
//!
//! Enrollment is two-phase: `generate_enrollment` stores a secret without
//! activating anything, and `enable` flips the account to enforced 2FA
//! only after the subject proves they can produce a current code. The
//! recovery codes minted by `enable` are returned exactly once.

use rand::RngCore;
use std::sync::Arc;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::models::User;
use crate::services::error::ServiceError;
use crate::services::store::CredentialStore;

/// Number of recovery codes minted when 2FA is activated.
const RECOVERY_CODE_COUNT: usize = 5;

/// TOTP parameters: 6 digits, 30-second step, one adjacent step of
/// tolerance in either direction.
const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Result of a fresh enrollment: handed to the client for QR rendering,
/// never retrievable again in this form.
#[derive(Debug)]
pub struct Enrollment {
    pub secret: String,
    pub provisioning_uri: String,
}

#[derive(Clone)]
pub struct TwoFactorService {
    store: Arc<dyn CredentialStore>,
    issuer: String,
}

impl TwoFactorService {
    pub fn new(store: Arc<dyn CredentialStore>, issuer: String) -> Self {
        Self { store, issuer }
    }

    fn totp_for(&self, secret_base32: &str, account: &str) -> Result<TOTP, ServiceError> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Bad stored secret: {:?}", e)))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account.to_string(),
        )
        .map_err(|e| ServiceError::Internal(anyhow::anyhow!("TOTP init error: {}", e)))
    }

    /// Generate and persist a fresh shared secret for the subject.
    ///
    /// The account's enabled flag stays false until [`enable`] confirms a
    /// code; calling this again overwrites any earlier unconfirmed secret.
    ///
    /// [`enable`]: TwoFactorService::enable
    pub async fn generate_enrollment(&self, user: &User) -> Result<Enrollment, ServiceError> {
        let secret = Secret::generate_secret();
        let secret_base32 = secret.to_encoded().to_string();

        self.store
            .set_two_factor_secret(&user.id, &secret_base32)
            .await?;

        let totp = self.totp_for(&secret_base32, &user.email)?;

        tracing::info!(user_id = %user.id, "Generated two-factor enrollment secret");

        Ok(Enrollment {
            secret: secret_base32,
            provisioning_uri: totp.get_url(),
        })
    }

    /// Verify a TOTP code against the subject's stored secret at the
    /// current time.
    pub fn verify_code(&self, user: &User, code: &str) -> Result<bool, ServiceError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("System clock error: {}", e)))?
            .as_secs();
        self.verify_code_at(user, code, now)
    }

    /// Verify a TOTP code at an explicit Unix timestamp.
    pub fn verify_code_at(&self, user: &User, code: &str, time: u64) -> Result<bool, ServiceError> {
        let secret = user
            .two_factor_secret
            .as_deref()
            .ok_or(ServiceError::NoSecretEnrolled)?;

        let totp = self.totp_for(secret, &user.email)?;
        Ok(totp.check(code, time))
    }

    /// Activate 2FA after a successful code check.
    ///
    /// Returns the freshly minted recovery codes - the only time they are
    /// ever readable. An invalid code leaves the enrollment inactive.
    pub async fn enable(&self, user: &User, code: &str) -> Result<Vec<String>, ServiceError> {
        if !self.verify_code(user, code)? {
            return Err(ServiceError::InvalidTwoFactorCode);
        }

        let recovery_codes = generate_recovery_codes(RECOVERY_CODE_COUNT);
        self.store
            .enable_two_factor(&user.id, &recovery_codes)
            .await?;

        tracing::info!(user_id = %user.id, "Two-factor authentication enabled");

        Ok(recovery_codes)
    }

    /// Unconditionally clear the enabled flag, the secret and all
    /// recovery codes. Idempotent.
    pub async fn disable(&self, user_id: &str) -> Result<(), ServiceError> {
        self.store.disable_two_factor(user_id).await?;
        tracing::info!(user_id = %user_id, "Two-factor authentication disabled");
        Ok(())
    }

    /// Check a recovery code; a match consumes that code permanently.
    ///
    /// Fails with `NoRecoveryCodesAvailable` when the subject has none
    /// left; a non-matching code returns false without mutating anything.
    pub async fn verify_recovery_code(
        &self,
        user: &User,
        code: &str,
    ) -> Result<bool, ServiceError> {
        if user.recovery_codes.is_empty() {
            return Err(ServiceError::NoRecoveryCodesAvailable);
        }

        let consumed = self.store.consume_recovery_code(&user.id, code).await?;
        if consumed {
            tracing::warn!(user_id = %user.id, "Recovery code used");
        }
        Ok(consumed)
    }
}

/// High-entropy recovery codes formatted for human transcription:
/// 16 random bytes as uppercase hex, grouped in blocks of four.
pub fn generate_recovery_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut bytes);
            let hex = hex::encode_upper(bytes);
            hex.as_bytes()
                .chunks(4)
                .map(|chunk| std::str::from_utf8(chunk).expect("hex is ascii"))
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryCredentialStore;

    const NOW: u64 = 1_700_000_000;

    fn seeded_service() -> (TwoFactorService, User, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        let service = TwoFactorService::new(store.clone(), "Back Office".to_string());
        let user = User::new(
            "alice".to_string(),
            "alice@example.com".to_string(),
            "hash".to_string(),
            "role-1".to_string(),
        );
        (service, user, store)
    }

    async fn enrolled_user(
        service: &TwoFactorService,
        user: &User,
        store: &MemoryCredentialStore,
    ) -> (User, TOTP) {
        store.insert_user(user).await.unwrap();
        let enrollment = service.generate_enrollment(user).await.unwrap();
        let user = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        let totp = service
            .totp_for(&enrollment.secret, &user.email)
            .unwrap();
        (user, totp)
    }

    #[tokio::test]
    async fn enrollment_stores_secret_without_enabling() {
        let (service, user, store) = seeded_service();
        let (user, _) = enrolled_user(&service, &user, &store).await;

        assert!(user.two_factor_secret.is_some());
        assert!(!user.two_factor_enabled);
        assert!(user.recovery_codes.is_empty());
    }

    #[tokio::test]
    async fn re_enrollment_overwrites_prior_secret() {
        let (service, user, store) = seeded_service();
        let (user, _) = enrolled_user(&service, &user, &store).await;
        let first_secret = user.two_factor_secret.clone().unwrap();

        service.generate_enrollment(&user).await.unwrap();
        let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_ne!(reloaded.two_factor_secret.unwrap(), first_secret);
    }

    #[tokio::test]
    async fn provisioning_uri_embeds_issuer_and_account() {
        let (service, user, store) = seeded_service();
        store.insert_user(&user).await.unwrap();
        let enrollment = service.generate_enrollment(&user).await.unwrap();
        assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(enrollment.provisioning_uri.contains("alice%40example.com"));
    }

    #[tokio::test]
    async fn current_window_code_verifies() {
        let (service, user, store) = seeded_service();
        let (user, totp) = enrolled_user(&service, &user, &store).await;

        let code = totp.generate(NOW);
        assert!(service.verify_code_at(&user, &code, NOW).unwrap());
    }

    #[tokio::test]
    async fn previous_step_code_within_tolerance_verifies() {
        let (service, user, store) = seeded_service();
        let (user, totp) = enrolled_user(&service, &user, &store).await;

        let previous_step_code = totp.generate(NOW - 30);
        assert!(service
            .verify_code_at(&user, &previous_step_code, NOW)
            .unwrap());
    }

    #[tokio::test]
    async fn two_steps_prior_code_fails() {
        let (service, user, store) = seeded_service();
        let (user, totp) = enrolled_user(&service, &user, &store).await;

        let stale_code = totp.generate(NOW - 60);
        // A colliding 6-digit value two steps out is astronomically
        // unlikely but possible; regenerate deterministically instead of
        // flaking - the windows differ, so the codes differ unless the
        // HMAC truncations collide, which check() would also reject.
        if stale_code != totp.generate(NOW) && stale_code != totp.generate(NOW - 30) {
            assert!(!service.verify_code_at(&user, &stale_code, NOW).unwrap());
        }
    }

    #[tokio::test]
    async fn verify_without_enrollment_errors() {
        let (service, user, store) = seeded_service();
        store.insert_user(&user).await.unwrap();
        assert!(matches!(
            service.verify_code_at(&user, "123456", NOW),
            Err(ServiceError::NoSecretEnrolled)
        ));
    }

    #[tokio::test]
    async fn enable_with_bad_code_leaves_enrollment_inactive() {
        let (service, user, store) = seeded_service();
        let (user, _) = enrolled_user(&service, &user, &store).await;

        let result = service.enable(&user, "000000").await;
        // Six zeros could be the real current code once in a million runs;
        // only assert when it is genuinely wrong.
        if let Err(e) = result {
            assert!(matches!(e, ServiceError::InvalidTwoFactorCode));
            let reloaded = store.find_user_by_id(&user.id).await.unwrap().unwrap();
            assert!(!reloaded.two_factor_enabled);
            assert!(reloaded.recovery_codes.is_empty());
        }
    }

    #[tokio::test]
    async fn enable_disable_cycle_destroys_codes() {
        let (service, user, store) = seeded_service();
        let (user, totp) = enrolled_user(&service, &user, &store).await;

        let code = totp.generate_current().unwrap();
        let codes = service.enable(&user, &code).await.unwrap();
        assert_eq!(codes.len(), 5);

        let enabled = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(enabled.two_factor_enabled);
        assert_eq!(enabled.recovery_codes.len(), 5);

        service.disable(&user.id).await.unwrap();
        let disabled = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(!disabled.two_factor_enabled);
        assert!(disabled.two_factor_secret.is_none());
        assert!(disabled.recovery_codes.is_empty());

        // Re-enabling requires a fresh enrollment; the old codes are gone
        // for good.
        let enrollment = service.generate_enrollment(&disabled).await.unwrap();
        let re_enrolled = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        let fresh_totp = service.totp_for(&enrollment.secret, &user.email).unwrap();
        let fresh_codes = service
            .enable(&re_enrolled, &fresh_totp.generate_current().unwrap())
            .await
            .unwrap();
        assert!(fresh_codes.iter().all(|c| !codes.contains(c)));
    }

    #[tokio::test]
    async fn recovery_code_is_single_use() {
        let (service, user, store) = seeded_service();
        let (user, totp) = enrolled_user(&service, &user, &store).await;
        let codes = service
            .enable(&user, &totp.generate_current().unwrap())
            .await
            .unwrap();

        let user = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert!(service
            .verify_recovery_code(&user, &codes[0])
            .await
            .unwrap());

        let user = store.find_user_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(user.recovery_codes.len(), 4);
        assert!(!service
            .verify_recovery_code(&user, &codes[0])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn empty_recovery_set_errors() {
        let (service, user, store) = seeded_service();
        store.insert_user(&user).await.unwrap();
        assert!(matches!(
            service.verify_recovery_code(&user, "AAAA-BBBB").await,
            Err(ServiceError::NoRecoveryCodesAvailable)
        ));
    }

    #[test]
    fn recovery_codes_are_grouped_hex_blocks() {
        let codes = generate_recovery_codes(5);
        assert_eq!(codes.len(), 5);
        for code in &codes {
            let groups: Vec<&str> = code.split('-').collect();
            assert_eq!(groups.len(), 8);
            assert!(groups
                .iter()
                .all(|g| g.len() == 4 && g.chars().all(|c| c.is_ascii_hexdigit())));
        }
    }
}
