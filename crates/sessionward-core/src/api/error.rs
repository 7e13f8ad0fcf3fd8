use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

/// Field name to the messages the server reported for it
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Status-derived variants carry the full response body; `Display`
/// truncates it.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("Access denied: {}", truncate_body(.0))]
    AccessDenied(String),

    #[error("Unauthorized - token may be expired")]
    Unauthorized(String),

    #[error("Request rejected: {}", truncate_body(.0))]
    BadRequest(String),

    #[error("Resource not found: {}", truncate_body(.0))]
    NotFound(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error: {}", truncate_body(.0))]
    ServerError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}

impl ApiError {
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let body = body.to_string();
        match status.as_u16() {
            400 | 409 | 422 => ApiError::BadRequest(body),
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(body),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncate_body(&body))),
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_))
    }

    /// The full response body carried by status-derived errors
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::AccessDenied(body)
            | ApiError::Unauthorized(body)
            | ApiError::BadRequest(body)
            | ApiError::NotFound(body)
            | ApiError::ServerError(body) => Some(body),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::NetworkError(err.to_string())
        }
    }
}

/// The useful parts of an error response body.
///
/// Accepts `{"message": "...", "errors": {"field": "msg" | ["msg", ...]}}`
/// and `{"error": "...", "errors": [{"field": "...", "message": "..."}]}`.
/// Anything unparseable yields an empty body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody {
    pub message: Option<String>,
    pub fields: FieldErrors,
}

impl ErrorBody {
    pub fn parse(body: &str) -> Self {
        let value: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(_) => return Self::default(),
        };

        let message = ["message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        let mut fields = FieldErrors::new();
        match value.get("errors") {
            Some(Value::Object(map)) => {
                for (field, messages) in map {
                    let collected = collect_messages(messages);
                    if !collected.is_empty() {
                        fields.entry(field.clone()).or_default().extend(collected);
                    }
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    let field = item.get("field").and_then(Value::as_str);
                    let msg = item.get("message").and_then(Value::as_str);
                    if let (Some(field), Some(msg)) = (field, msg) {
                        fields.entry(field.to_string()).or_default().push(msg.to_string());
                    }
                }
            }
            _ => {}
        }

        Self { message, fields }
    }
}

fn collect_messages(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
