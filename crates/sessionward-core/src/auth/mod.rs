//! Session and token lifecycle.
//!
//! This module provides:
//! - `SessionManager`: the Session API (bootstrap, login, register, logout,
//!   profile update, refresh) and authenticated requests with transparent
//!   token refresh
//! - `CredentialStore`: durable storage for the token pair, backed by the
//!   OS keychain, an encrypted file, or memory
//! - `SessionState`: the observable `Session` snapshot
//! - `RequestAuthenticator`: the credentials attached to outgoing requests
//! - `RefreshCoordinator`: at most one refresh in flight, shared by every
//!   request that needs it

pub mod authenticator;
pub mod credentials;
pub mod encrypted;
pub mod error;
pub mod manager;
pub mod profile;
pub mod refresh;
pub mod session;


pub use authenticator::RequestAuthenticator;
pub use credentials::{
    open_credential_store, CredentialPair, CredentialStore, KeyringCredentialStore,
    MemoryCredentialStore, StorageError,
};
pub use encrypted::EncryptedFileStore;
pub use error::{AuthError, RefreshError};
pub use manager::{CredentialView, SessionManager};
pub use profile::{ProfileUpdate, RegistrationForm, UserProfile};
pub use refresh::RefreshCoordinator;
pub use session::{Session, SessionPhase, SessionState, SignOutReason};
