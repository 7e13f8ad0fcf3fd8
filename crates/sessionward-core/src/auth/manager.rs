//! The Session API.
//!
//! `SessionManager` is the one object the rest of an application talks to.
//! It owns the session state, the credential store, and the request
//! authenticator, and is the only writer of any of them. Clone it freely;
//! clones share state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use anyhow::Context;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::client::PROFILE_PATH;
use crate::api::{ApiClient, ApiError, ApiRequest, FieldErrors, HttpResponse, ProfileResponse};
use crate::config::Config;

use super::credentials::open_credential_store;
use super::refresh::{RefreshOutcome, SharedRefresh};
use super::{
    AuthError, CredentialPair, CredentialStore, ProfileUpdate, RefreshCoordinator, RefreshError,
    RegistrationForm, RequestAuthenticator, Session, SessionState, SignOutReason, UserProfile,
};

/// What a credential commit does to the session
enum Commit {
    /// A fresh login: starts a new session epoch
    SignIn(UserProfile),
    /// A refresh started in `epoch`; discarded if the session has moved on
    Refresh {
        epoch: u64,
        user: Option<UserProfile>,
    },
}

struct Inner {
    api: ApiClient,
    store: Arc<dyn CredentialStore>,
    authenticator: RequestAuthenticator,
    state: SessionState,
    refresh: RefreshCoordinator,
    /// Held for every store and authenticator write, and by `credentials()`
    commit_lock: Mutex<()>,
    /// Bumped on every login and logout
    epoch: AtomicU64,
}

/// Consistent view of both credential holders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialView {
    pub stored: Option<CredentialPair>,
    pub installed: Option<CredentialPair>,
}

impl CredentialView {
    /// Store and header agree. False after a failed save, where the session
    /// lives on in memory only.
    pub fn is_consistent(&self) -> bool {
        self.stored == self.installed
    }
}

#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(api: ApiClient, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                authenticator: RequestAuthenticator::new(),
                state: SessionState::new(),
                refresh: RefreshCoordinator::new(),
                commit_lock: Mutex::new(()),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Build the HTTP client and credential store named by `config`
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let api = ApiClient::new(config).context("Failed to create API client")?;
        let store = open_credential_store(config).context("Failed to open credential store")?;
        Ok(Self::new(api, store))
    }

    /// Current session snapshot
    pub fn session(&self) -> Session {
        self.inner.state.snapshot()
    }

    /// Receiver that observes every session transition
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.state.subscribe()
    }

    pub fn authenticator(&self) -> &RequestAuthenticator {
        &self.inner.authenticator
    }

    /// Stored and installed credentials read under the commit lock, so both
    /// come from the same side of any login, refresh or logout.
    pub async fn credentials(&self) -> CredentialView {
        let _guard = self.inner.commit_lock.lock().await;
        let stored = match self.inner.store.load().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                None
            }
        };
        CredentialView {
            stored,
            installed: self.inner.authenticator.pair(),
        }
    }

    pub fn refresh_in_flight(&self) -> bool {
        self.inner.refresh.is_pending()
    }

    /// Number of refresh exchanges started by this manager
    pub fn refreshes_started(&self) -> u64 {
        self.inner.refresh.refreshes_started()
    }

    fn current_epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Restore a session from stored credentials, if there are any.
    ///
    /// Any failure to confirm the stored pair with the server clears it.
    /// Always leaves the session with `is_loading() == false`.
    pub async fn bootstrap(&self) {
        self.inner.state.begin_restore();

        let stored = match self.inner.store.load().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials");
                None
            }
        };
        let Some(pair) = stored else {
            debug!("No stored credentials");
            self.inner.state.finish_restore(None);
            return;
        };

        let epoch = self.current_epoch();
        self.inner.authenticator.install(pair);

        match self.get_json::<ProfileResponse>(PROFILE_PATH).await {
            Ok(profile) if self.current_epoch() == epoch => {
                info!(user = %profile.user.username, "Session restored");
                self.inner.state.finish_restore(Some(profile.user));
            }
            Ok(_) => {
                debug!("Session changed while restoring, keeping the newer one");
                self.inner.state.set_loading(false);
            }
            Err(e) => {
                warn!(error = %e, "Stored session could not be restored");
                self.discard_restored(epoch).await;
            }
        }
    }

    async fn discard_restored(&self, epoch: u64) {
        let _guard = self.inner.commit_lock.lock().await;
        if self.current_epoch() != epoch {
            // already signed out by a failed refresh, or replaced by a login
            self.inner.state.set_loading(false);
            return;
        }
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.authenticator.dispose();
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        let reason = self
            .inner
            .state
            .snapshot()
            .signed_out_reason()
            .or(Some(SignOutReason::RestoreFailed));
        self.inner.state.sign_out(reason);
    }

    // =========================================================================
    // Session API
    // =========================================================================

    /// Sign in with email and password.
    ///
    /// The exchange runs on its own task: if the caller stops waiting, the
    /// result is still applied.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            let mut fields = FieldErrors::new();
            if email.is_empty() {
                fields.insert("email".to_string(), vec!["Email is required".to_string()]);
            }
            if password.is_empty() {
                fields.insert("password".to_string(), vec!["Password is required".to_string()]);
            }
            return Err(AuthError::local_validation("Email and password required", fields));
        }

        self.inner.state.set_loading(true);
        let manager = self.clone();
        let email = email.to_string();
        let password = password.to_string();
        let task = tokio::spawn(async move { manager.run_login(&email, &password).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.inner.state.set_loading(false);
                Err(AuthError::ServerError(format!("Login task failed: {}", e)))
            }
        }
    }

    async fn run_login(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let result = match self.inner.api.login(email, password).await {
            Ok(response) => {
                let username = response.user.username.clone();
                self.commit(response.credentials, Commit::SignIn(response.user))
                    .await;
                info!(user = %username, "Login successful");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                Err(AuthError::from(e))
            }
        };
        self.inner.state.set_loading(false);
        result
    }

    /// Create an account. Does not sign in.
    pub async fn register(&self, form: &RegistrationForm) -> Result<(), AuthError> {
        let fields = form.validate();
        if !fields.is_empty() {
            return Err(AuthError::local_validation("Some fields need attention", fields));
        }

        self.inner.api.register(form).await.map_err(|e| {
            warn!(error = %e, "Registration failed");
            AuthError::from(e)
        })
    }

    /// End the session locally and tell the server, best effort.
    /// Calling it again is harmless.
    pub async fn logout(&self) {
        self.sign_out(None).await;
    }

    async fn sign_out(&self, reason: Option<SignOutReason>) {
        let previous = {
            let _guard = self.inner.commit_lock.lock().await;
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            let previous = self.inner.authenticator.dispose();
            if let Err(e) = self.inner.store.clear().await {
                warn!(error = %e, "Failed to clear stored credentials");
            }
            self.inner.state.sign_out(reason);
            previous
        };

        if let Some(pair) = previous {
            info!(?reason, "Signed out");
            let api = self.inner.api.clone();
            tokio::spawn(async move {
                if let Err(e) = api.logout(&pair.access_token).await {
                    debug!(error = %e, "Server logout notification failed");
                }
            });
        }
    }

    /// Send a partial profile update. On success the server's copy of the
    /// profile replaces the local one.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), AuthError> {
        if !self.session().is_authenticated() {
            return Err(AuthError::NotAuthenticated);
        }

        let request = ApiRequest::put(PROFILE_PATH).json(update)?;
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(e) if e.is_unauthorized() && !self.session().is_authenticated() => {
                return Err(AuthError::NotAuthenticated)
            }
            Err(e) => {
                warn!(error = %e, "Profile update failed");
                return Err(e.into());
            }
        };

        let profile: ProfileResponse = response.json()?;
        if !self.inner.state.replace_user(profile.user) {
            return Err(AuthError::NotAuthenticated);
        }
        debug!("Profile updated");
        Ok(())
    }

    /// Exchange the refresh token now, joining a refresh already in flight
    pub async fn refresh(&self) -> Result<(), RefreshError> {
        self.shared_refresh().await.map(|_| ())
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    fn shared_refresh(&self) -> SharedRefresh {
        let manager = self.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        self.inner.refresh.join_or_start(move |id| {
            let task = tokio::spawn(async move { manager.run_refresh(id).await });
            async move {
                match task.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if let Some(inner) = weak.upgrade() {
                            inner.refresh.finish(id);
                        }
                        Err(AuthError::ServerError(format!("Refresh task failed: {}", e)))
                    }
                }
            }
            .boxed()
        })
    }

    async fn run_refresh(&self, id: u64) -> RefreshOutcome {
        let epoch = self.current_epoch();
        let Some(refresh_token) = self.inner.authenticator.refresh_token() else {
            // nothing installed: no session to renew or end
            debug!("Refresh requested without an installed session");
            self.inner.refresh.finish(id);
            return Err(AuthError::NoRefreshToken);
        };
        let outcome = self.exchange_refresh_token(&refresh_token, epoch).await;

        if let Err(ref e) = outcome {
            if self.current_epoch() == epoch {
                warn!(error = %e, "Token refresh failed, signing out");
                self.sign_out(Some(SignOutReason::SessionExpired)).await;
            }
        }
        self.inner.refresh.finish(id);
        outcome
    }

    async fn exchange_refresh_token(&self, refresh_token: &str, epoch: u64) -> RefreshOutcome {
        debug!("Refreshing access token");
        let response = self.inner.api.refresh(refresh_token).await?;
        let (pair, user) = response.into_parts(refresh_token);

        if !self.commit(pair.clone(), Commit::Refresh { epoch, user }).await {
            debug!("Session ended during refresh, discarding new credentials");
            return Err(AuthError::NotAuthenticated);
        }
        info!("Access token refreshed");
        Ok(pair)
    }

    /// Persist `pair` and install it on the authenticator under the commit
    /// lock. Storage failures are logged; the session carries on in memory.
    async fn commit(&self, pair: CredentialPair, commit: Commit) -> bool {
        let _guard = self.inner.commit_lock.lock().await;

        match commit {
            Commit::Refresh { epoch, .. } if epoch != self.current_epoch() => return false,
            Commit::SignIn(_) => {
                self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            }
            Commit::Refresh { .. } => {}
        }

        if let Err(e) = self.inner.store.save(&pair).await {
            warn!(error = %e, "Failed to persist credentials, session will not survive a restart");
        }
        self.inner.authenticator.install(pair);

        match commit {
            Commit::SignIn(user) => self.inner.state.sign_in(user),
            Commit::Refresh { user: Some(user), .. } => {
                self.inner.state.replace_user(user);
            }
            Commit::Refresh { user: None, .. } => {}
        }
        true
    }

    // =========================================================================
    // Authenticated requests
    // =========================================================================

    /// Send a request with the current access token.
    ///
    /// A 401 triggers (or joins) a refresh and the request is replayed once
    /// with the new token. A 401 on the replay is returned as-is. If the
    /// refresh fails the session is signed out and the original 401 is
    /// returned.
    pub async fn send(&self, request: ApiRequest) -> Result<HttpResponse, ApiError> {
        let used = self.inner.authenticator.access_token();
        let original = match self.inner.api.execute(&request, used.as_deref()).await {
            Err(e) if e.is_unauthorized() => e,
            other => return other,
        };
        let Some(used) = used else {
            return Err(original);
        };

        let replay_token = match self.inner.authenticator.access_token() {
            Some(current) if current != used => {
                debug!(path = %request.path, "Credential changed while request was in flight");
                current
            }
            Some(_) => match self.shared_refresh().await {
                Ok(pair) => pair.access_token,
                Err(e) => {
                    debug!(path = %request.path, error = %e, "Refresh failed, rejecting request");
                    return Err(original);
                }
            },
            None => return Err(original),
        };

        debug!(path = %request.path, "Replaying request with refreshed credential");
        self.inner.api.execute(&request, Some(&replay_token)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(ApiRequest::get(path)).await?.json()
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?).await?.json()
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?).await?.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(ApiRequest::delete(path)).await?;
        Ok(())
    }
}
