//! API client for the remote auth endpoints.
//!
//! This module provides the `ApiClient` struct, which sends requests through
//! a `Transport`, maps non-success statuses to `ApiError`, and backs off on
//! rate limiting. Endpoint helpers cover the unauthenticated half of the
//! auth contract (login, register, refresh, logout notification); profile
//! calls go through `SessionManager` so they get transparent refresh.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::{CredentialPair, RegistrationForm, UserProfile};
use crate::config::Config;

use super::{ApiError, ApiRequest, HttpResponse, ReqwestTransport, Transport};

// ============================================================================
// Constants
// ============================================================================

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
pub struct LoginResponse {
    #[serde(flatten)]
    pub credentials: CredentialPair,
    pub user: UserProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    /// Present only when the server rotates refresh tokens
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl RefreshResponse {
    /// Build the new pair, keeping the old refresh token unless it was rotated
    pub fn into_parts(self, previous_refresh_token: &str) -> (CredentialPair, Option<UserProfile>) {
        let refresh_token = self
            .refresh_token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| previous_refresh_token.to_string());
        (CredentialPair::new(self.access_token, refresh_token), self.user)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileResponse {
    pub user: UserProfile,
}

// ============================================================================
// Client
// ============================================================================

/// How rate-limited requests are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RATE_LIMIT_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.max_rate_limit_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// Clone is cheap - the transport is shared behind an Arc.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Create a client over HTTP using the configured base URL and timeout
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(
            &config.api_base_url,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::with_transport(Arc::new(transport)).with_retry_policy(RetryPolicy::from_config(config)))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Send a request, retrying on 429 with exponential backoff.
    /// Any other non-success status becomes an `ApiError`.
    pub async fn execute(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<HttpResponse, ApiError> {
        let mut retries = 0;
        let mut backoff = self.retry.initial_backoff;

        loop {
            let response = self.transport.send(request, bearer).await?;

            if response.status.is_success() {
                return Ok(response);
            }
            if response.status.as_u16() != 429 {
                return Err(ApiError::from_status(response.status, &response.body));
            }

            retries += 1;
            if retries > self.retry.max_retries {
                return Err(ApiError::RateLimited);
            }
            warn!(
                path = %request.path,
                retry = retries,
                backoff_ms = backoff.as_millis() as u64,
                "Rate limited, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        let response = self.execute(&request, None).await?;
        response.json()
    }

    pub async fn register(&self, form: &RegistrationForm) -> Result<(), ApiError> {
        let request = ApiRequest::post(REGISTER_PATH).json(form)?;
        self.execute(&request, None).await?;
        debug!("Registration accepted");
        Ok(())
    }

    /// Exchange a refresh token for a new access token.
    /// The refresh token is the only credential sent on this call.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH);
        let response = self.execute(&request, Some(refresh_token)).await?;
        response.json()
    }

    /// Tell the server the session is over
    pub async fn logout(&self, access_token: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(LOGOUT_PATH);
        self.execute(&request, Some(access_token)).await?;
        Ok(())
    }
}
