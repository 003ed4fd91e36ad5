use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct EnableTwoFactorRequest {
    #[validate(length(min = 6, max = 8))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RecoveryCodeRequest {
    #[validate(length(min = 1))]
    pub code: String,
}

/// Enrollment material for client-side QR rendering. The secret is never
/// retrievable again through the API.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorSetupResponse {
    pub secret: String,
    pub provisioning_uri: String,
}

/// Returned exactly once, at activation: the recovery codes are not
/// readable afterwards.
#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorEnabledResponse {
    pub two_factor_enabled: bool,
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TwoFactorStatusResponse {
    pub two_factor_enabled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecoveryCodeResponse {
    pub valid: bool,
    pub remaining_recovery_codes: usize,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct IpWhitelistRequest {
    #[validate(length(min = 1))]
    pub ip: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IpWhitelistResponse {
    pub whitelisted_ips: Vec<String>,
}
