use service_core::error::AppError;
use thiserror::Error;

/// Service-level error taxonomy.
///
/// Authentication outcomes stay distinct all the way to the response so
/// clients can react correctly (prompt for a 2FA code vs. force a
/// re-login); upstream failures are kept apart from "not found" so the
/// gate can fail closed without lying about why.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    #[error("Store unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("You are not logged in")]
    NotAuthenticated,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("A two-factor code is required for this account")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    InvalidTwoFactorCode,

    #[error("Source address is not on the account allow-list")]
    IpNotAllowed,

    #[error("You do not have permission to perform this action")]
    Forbidden,

    #[error("Malformed permission requirement: {0}")]
    MalformedRequirement(String),

    #[error("Two-factor authentication is not enrolled")]
    NoSecretEnrolled,

    #[error("No recovery codes available")]
    NoRecoveryCodesAvailable,

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired reset token")]
    InvalidOrExpiredResetToken,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("User not found")]
    UserNotFound,

    #[error("Role not found")]
    RoleNotFound,

    #[error("Email error: {0}")]
    Email(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::UpstreamUnavailable(msg) => {
                tracing::error!(error = %msg, "upstream store unavailable");
                AppError::ServiceUnavailable
            }
            ServiceError::NotAuthenticated => AppError::AuthFailure(
                "NOT_AUTHENTICATED",
                anyhow::anyhow!("You are not logged in"),
            ),
            ServiceError::InvalidToken => {
                AppError::AuthFailure("INVALID_TOKEN", anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::TwoFactorRequired => AppError::AuthFailure(
                "TWO_FACTOR_REQUIRED",
                anyhow::anyhow!("A two-factor code is required for this account"),
            ),
            ServiceError::InvalidTwoFactorCode => AppError::AuthFailure(
                "INVALID_TWO_FACTOR_CODE",
                anyhow::anyhow!("Invalid two-factor code"),
            ),
            ServiceError::IpNotAllowed => AppError::AccessDenied(
                "IP_NOT_ALLOWED",
                anyhow::anyhow!("Source address is not on the account allow-list"),
            ),
            ServiceError::Forbidden => AppError::AccessDenied(
                "FORBIDDEN",
                anyhow::anyhow!("You do not have permission to perform this action"),
            ),
            // A malformed requirement is a caller bug, not an authorization
            // outcome: logged and surfaced as an internal error, never as
            // FORBIDDEN.
            ServiceError::MalformedRequirement(msg) => {
                tracing::error!(requirement = %msg, "malformed permission requirement");
                crate::services::metrics::record_malformed_requirement();
                AppError::InternalError(anyhow::anyhow!("Malformed permission requirement"))
            }
            ServiceError::NoSecretEnrolled => AppError::BadRequest(anyhow::anyhow!(
                "Two-factor authentication is not enrolled"
            )),
            ServiceError::NoRecoveryCodesAvailable => {
                AppError::BadRequest(anyhow::anyhow!("No recovery codes available"))
            }
            ServiceError::InvalidCredentials => AppError::AuthFailure(
                "INVALID_CREDENTIALS",
                anyhow::anyhow!("Invalid email or password"),
            ),
            // Expired and fabricated tokens are deliberately identical to
            // the client.
            ServiceError::InvalidOrExpiredResetToken => AppError::BadRequest(anyhow::anyhow!(
                "Password reset token is invalid or has expired"
            )),
            ServiceError::UserAlreadyExists => {
                AppError::Conflict(anyhow::anyhow!("User already exists"))
            }
            ServiceError::UserNotFound => AppError::NotFound(anyhow::anyhow!("User not found")),
            ServiceError::RoleNotFound => AppError::NotFound(anyhow::anyhow!("Role not found")),
            ServiceError::Email(e) => AppError::EmailError(e),
            ServiceError::Internal(e) => AppError::InternalError(e),
        }
    }
}
