//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// One variant per failure kind a public operation can report. Credential
/// lifecycle, mailbox and calendar errors are kept distinct so callers can
/// tell "re-authorize" apart from "retry later".
#[derive(Debug, Clone, Error)]
pub enum AppError {
    /// No credential set in memory or on disk
    #[error("no credentials: {0}")]
    NoCredentials(String),
    /// Authorization-code exchange rejected or malformed
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    /// Refresh-token exchange rejected, malformed, or impossible
    #[error("token refresh failed: {0}")]
    TokenRefresh(String),
    /// Transport failure (TCP, TLS, HTTP, timeout, dropped session)
    #[error("connection error: {0}")]
    Connection(String),
    /// Server rejected the bearer credential
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Folder, message, or attachment does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// Requested calendar id is not among the discovered collections
    #[error("calendar not found: {0}")]
    CalendarNotFound(String),
    /// Date value does not match a supported fixed-width format
    #[error("invalid date format: {0}")]
    DateFormat(String),
    /// Invalid user input (validation failed, malformed request)
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Internal error (local I/O, serialization, unexpected failure)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error leaves a protocol session in an unusable state
    ///
    /// Sessions that fail with a connection-level error are torn down and
    /// re-established lazily by the next operation.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Authentication(_))
    }

    /// Whether this error comes from the credential lifecycle
    ///
    /// Credential errors always propagate; batch operations never swallow them.
    pub fn is_credential(&self) -> bool {
        matches!(
            self,
            Self::NoCredentials(_) | Self::TokenExchange(_) | Self::TokenRefresh(_)
        )
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput`, `DateFormat` → `invalid_params`
    /// - `NotFound`, `CalendarNotFound` → `resource_not_found`
    /// - `NoCredentials`, `TokenExchange`, `TokenRefresh`, `Authentication` → `invalid_request`
    /// - `Connection`, `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        let msg = self.to_string();
        match self {
            Self::InvalidInput(_) => {
                ErrorData::invalid_params(msg, Some(json!({ "code": "invalid_input" })))
            }
            Self::DateFormat(_) => {
                ErrorData::invalid_params(msg, Some(json!({ "code": "date_format" })))
            }
            Self::NotFound(_) => {
                ErrorData::resource_not_found(msg, Some(json!({ "code": "not_found" })))
            }
            Self::CalendarNotFound(_) => {
                ErrorData::resource_not_found(msg, Some(json!({ "code": "calendar_not_found" })))
            }
            Self::NoCredentials(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "no_credentials" })))
            }
            Self::TokenExchange(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "token_exchange" })))
            }
            Self::TokenRefresh(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "token_refresh" })))
            }
            Self::Authentication(_) => {
                ErrorData::invalid_request(msg, Some(json!({ "code": "auth_failed" })))
            }
            Self::Connection(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "connection" })))
            }
            Self::Internal(_) => {
                ErrorData::internal_error(msg, Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
///
/// Use this for all internal functions that can fail. Provides a consistent
/// error type throughout the codebase.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn only_transport_and_auth_errors_are_connection_level() {
        assert!(AppError::Connection("eof".to_owned()).is_connection_level());
        assert!(AppError::Authentication("rejected".to_owned()).is_connection_level());
        assert!(!AppError::NotFound("INBOX/x".to_owned()).is_connection_level());
        assert!(!AppError::TokenRefresh("invalid_grant".to_owned()).is_connection_level());
    }

    #[test]
    fn credential_errors_are_classified() {
        assert!(AppError::NoCredentials("none".to_owned()).is_credential());
        assert!(AppError::TokenRefresh("invalid_grant".to_owned()).is_credential());
        assert!(!AppError::Connection("eof".to_owned()).is_credential());
    }

    #[test]
    fn error_data_carries_stable_code() {
        let data = AppError::CalendarNotFound("work".to_owned()).to_error_data();
        let code = data
            .data
            .as_ref()
            .and_then(|d| d.get("code"))
            .and_then(|c| c.as_str());
        assert_eq!(code, Some("calendar_not_found"));
    }
}
