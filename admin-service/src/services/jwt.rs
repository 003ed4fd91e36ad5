//! Session token service.
//!
//! Tokens are stateless: verification never touches the store, and there
//! is no revocation list - a compromised token lives until its expiry, and
//! rotating the signing secret is the only early kill switch. That trade
//! was made deliberately to keep the gate free of a revocation-store
//! dependency.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::services::error::ServiceError;

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry_days: i64,
}

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (account id)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            token_expiry_days: config.token_expiry_days,
        }
    }

    /// Issue a session token for a subject, expiring `token_expiry_days`
    /// from now.
    pub fn issue(&self, subject_id: &str) -> Result<String, ServiceError> {
        self.issue_at(subject_id, Utc::now())
    }

    /// Issue a token anchored at an explicit issuance instant. The expiry
    /// is relative to `issued_at`, not the wall date.
    pub fn issue_at(
        &self,
        subject_id: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, ServiceError> {
        let exp = issued_at + Duration::days(self.token_expiry_days);

        let claims = Claims {
            sub: subject_id.to_string(),
            iat: issued_at.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode token: {}", e)))
    }

    /// Verify a token and return the subject id.
    ///
    /// Any failure - bad signature, malformed payload, expiry passed -
    /// collapses into `InvalidToken`.
    pub fn verify(&self, token: &str) -> Result<String, ServiceError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims.sub)
            .map_err(|_| ServiceError::InvalidToken)
    }
}
