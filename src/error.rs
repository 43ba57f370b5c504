//! Error types for the sync engine.
//!
//! Fatal errors inside a sync pass are caught at the orchestrator boundary and
//! converted into a failed `SyncRun`; callers always receive a structured
//! outcome, never a raw error.

use thiserror::Error;

/// Errors produced by the sync engine and its collaborators.
#[derive(Debug, Error)]
pub enum SyncError {
    /// No stored credential, missing refresh token, or a failed token exchange.
    /// Fatal for the whole run; no project work is attempted.
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Non-2xx, non-429 response from the GitLab API. Fatal for the current
    /// project and the run.
    #[error("GitLab API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
        endpoint: Option<String>,
    },

    /// 429 responses exhausted the configured retry budget.
    #[error("Rate limited: gave up on {endpoint} after {attempts} attempts")]
    RateLimitTimeout { endpoint: String, attempts: u32 },

    /// Persisted-store operation failed. Fatal for the run.
    #[error("Database error: {message}")]
    Database {
        message: String,
        operation: Option<String>,
    },

    /// Token encryption or decryption failed.
    #[error("Secret error: {message}")]
    Secret { message: String },

    /// Requested record does not exist.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        id: Option<String>,
    },

    /// Another sync pass already holds this account.
    #[error("Sync already in progress for account {account_id}")]
    SyncInProgress { account_id: i64 },

    /// Invalid or missing configuration.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Network-level failure (connect, timeout).
    #[error("Network error: {message}")]
    Network { message: String },

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SyncError {
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// API error with status code and endpoint context.
    pub fn api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::Api {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    pub fn secret(message: impl Into<String>) -> Self {
        Self::Secret {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// True for errors that should fail the whole run before any project work.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Status code of the underlying API response, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status_code, .. } => *status_code,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for SyncError {
    fn from(err: sqlx::Error) -> Self {
        Self::database(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::network("Request timed out")
        } else if err.is_connect() {
            Self::network("Failed to connect to server")
        } else {
            Self::network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_context() {
        let err = SyncError::api_full("Not Found", 404, "/projects/1/issues");
        assert_eq!(err.status_code(), Some(404));
        assert_eq!(format!("{}", err), "GitLab API error: Not Found");
    }

    #[test]
    fn test_is_auth() {
        assert!(SyncError::auth("no credential").is_auth());
        assert!(!SyncError::database("boom").is_auth());
    }

    #[test]
    fn test_rate_limit_timeout_display() {
        let err = SyncError::RateLimitTimeout {
            endpoint: "/projects".into(),
            attempts: 5,
        };
        assert_eq!(
            format!("{}", err),
            "Rate limited: gave up on /projects after 5 attempts"
        );
    }

    #[test]
    fn test_sync_in_progress_display() {
        let err = SyncError::SyncInProgress { account_id: 7 };
        assert_eq!(format!("{}", err), "Sync already in progress for account 7");
    }
}
