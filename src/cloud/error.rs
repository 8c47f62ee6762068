//! Error types for the cloud backup client.

use thiserror::Error;

/// Errors raised while talking to the remote storage or auth endpoints.
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-success response from the remote API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Consent was refused, or the token is missing, expired or revoked
    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Cloud backup is not configured: {0}")]
    NotConfigured(String),

    #[error("Not signed in to cloud backup")]
    NotSignedIn,
}

impl CloudError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Failures that invalidate the current sign-in and require new consent.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Api { status, .. } => *status == 401,
            Self::Auth(_) | Self::NotSignedIn => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_classification() {
        assert!(CloudError::api(401, "expired").is_auth_failure());
        assert!(!CloudError::api(403, "quota").is_auth_failure());
        assert!(!CloudError::api(500, "boom").is_auth_failure());
        assert!(CloudError::auth("denied").is_auth_failure());
        assert!(!CloudError::NotConfigured("x".into()).is_auth_failure());
    }
}
