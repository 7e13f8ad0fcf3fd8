//! Core library for sessionward.
//!
//! Establishes, persists, renews and invalidates an authenticated API
//! session on the client side:
//!
//! - `api`: HTTP transport, auth endpoint calls, and error mapping
//! - `auth`: credential storage, session state, request authentication,
//!   the single-flight refresh coordinator, and the `SessionManager`
//!   that ties them together
//! - `config`: on-disk configuration with environment overrides

pub mod api;
pub mod auth;
pub mod config;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{ApiClient, ApiError, ApiRequest, HttpResponse, ReqwestTransport, Transport};
pub use auth::{
    AuthError, CredentialPair, CredentialStore, ProfileUpdate, RefreshError, RegistrationForm,
    Session, SessionManager, SessionPhase, SignOutReason, UserProfile,
};
pub use config::{Config, StorageBackend};
