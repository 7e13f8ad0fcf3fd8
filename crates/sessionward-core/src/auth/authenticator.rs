use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::CredentialPair;

/// Holds the credentials attached to outgoing requests.
///
/// `install` and `dispose` are the only writers. Only the access token is
/// ever handed out for a request; the refresh token stays here for the
/// refresh exchange.
#[derive(Default)]
pub struct RequestAuthenticator {
    installed: RwLock<Option<CredentialPair>>,
}

impl RequestAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<CredentialPair>> {
        self.installed.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<CredentialPair>> {
        self.installed.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn install(&self, pair: CredentialPair) {
        *self.write() = Some(pair);
    }

    /// Remove the installed credentials, returning them
    pub fn dispose(&self) -> Option<CredentialPair> {
        self.write().take()
    }

    /// Bearer token for the next outgoing request
    pub fn access_token(&self) -> Option<String> {
        self.read().as_ref().map(|p| p.access_token.clone())
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().as_ref().map(|p| p.refresh_token.clone())
    }

    pub fn pair(&self) -> Option<CredentialPair> {
        self.read().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.read().is_some()
    }
}
