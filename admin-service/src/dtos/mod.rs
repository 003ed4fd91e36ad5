pub mod auth;
pub mod security;

use serde::Serialize;
use utoipa::ToSchema;

/// Generic acknowledgment body.
#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
