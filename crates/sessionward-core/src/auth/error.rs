use thiserror::Error;

use crate::api::{ApiError, ErrorBody, FieldErrors};

const INVALID_CREDENTIALS_FALLBACK: &str = "Invalid email or password";
const VALIDATION_FALLBACK: &str = "Some fields need attention";
const SERVER_FALLBACK: &str = "Something went wrong. Please try again.";

/// Failure of a Session API call. Cheap to clone so one refresh outcome
/// can be handed to every request waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{message}")]
    ValidationFailed { message: String, fields: FieldErrors },

    #[error("Unable to connect to server: {0}")]
    NetworkUnavailable(String),

    #[error("{0}")]
    ServerError(String),

    #[error("No refresh token available - please sign in again")]
    NoRefreshToken,

    #[error("Not signed in")]
    NotAuthenticated,
}

/// Refresh failures share the Session API taxonomy
pub type RefreshError = AuthError;

impl AuthError {
    /// Only a missing refresh token cannot be recovered without signing in
    pub fn is_fatal(&self) -> bool {
        matches!(self, AuthError::NoRefreshToken)
    }

    /// Worth retrying the same call later
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::NetworkUnavailable(_) | AuthError::ServerError(_))
    }

    /// A validation failure produced before any request was sent
    pub fn local_validation(message: &str, fields: FieldErrors) -> Self {
        AuthError::ValidationFailed {
            message: message.to_string(),
            fields,
        }
    }

    /// Field-level messages, if any
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            AuthError::ValidationFailed { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

impl From<ApiError> for AuthError {
    fn from(err: ApiError) -> Self {
        let parsed = err.body().map(ErrorBody::parse).unwrap_or_default();
        match err {
            ApiError::Unauthorized(_) | ApiError::AccessDenied(_) => AuthError::InvalidCredentials(
                parsed
                    .message
                    .unwrap_or_else(|| INVALID_CREDENTIALS_FALLBACK.to_string()),
            ),
            ApiError::BadRequest(_) => AuthError::ValidationFailed {
                message: parsed
                    .message
                    .unwrap_or_else(|| VALIDATION_FALLBACK.to_string()),
                fields: parsed.fields,
            },
            ApiError::NetworkError(msg) => AuthError::NetworkUnavailable(msg),
            ApiError::Timeout => AuthError::NetworkUnavailable("request timed out".to_string()),
            ApiError::RateLimited => {
                AuthError::ServerError("Too many requests. Please wait and try again.".to_string())
            }
            ApiError::NotFound(_) | ApiError::ServerError(_) | ApiError::InvalidResponse(_) => {
                AuthError::ServerError(parsed.message.unwrap_or_else(|| SERVER_FALLBACK.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_uses_server_message() {
        let err = AuthError::from(ApiError::Unauthorized(r#"{"message":"Account locked"}"#.to_string()));
        assert_eq!(err, AuthError::InvalidCredentials("Account locked".to_string()));
    }

    #[test]
    fn test_unauthorized_without_body_uses_fallback() {
        let err = AuthError::from(ApiError::Unauthorized(String::new()));
        assert_eq!(err.to_string(), INVALID_CREDENTIALS_FALLBACK);
    }

    #[test]
    fn test_bad_request_forwards_field_errors_verbatim() {
        let err = AuthError::from(ApiError::BadRequest(
            r#"{"message":"Validation failed","errors":{"email":["Email already registered"]}}"#.to_string(),
        ));
        let fields = err.field_errors().unwrap();
        assert_eq!(fields["email"], vec!["Email already registered"]);
        assert_eq!(err.to_string(), "Validation failed");
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        let err = AuthError::from(ApiError::Timeout);
        assert!(matches!(err, AuthError::NetworkUnavailable(_)));
        assert!(err.is_retryable());

        let err = AuthError::from(ApiError::ServerError("<html>".to_string()));
        assert_eq!(err, AuthError::ServerError(SERVER_FALLBACK.to_string()));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_only_missing_refresh_token_is_fatal() {
        assert!(AuthError::NoRefreshToken.is_fatal());
        assert!(!AuthError::InvalidCredentials("x".to_string()).is_fatal());
        assert!(!AuthError::NotAuthenticated.is_fatal());
    }
}
