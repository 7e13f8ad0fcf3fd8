use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::UserProfile;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    Anonymous,
    /// Stored credentials found; checking them with the server
    Restoring,
    Authenticated,
}

/// Why the session ended without the user asking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum SignOutReason {
    /// The refresh token was rejected or could not be exchanged
    SessionExpired,
    /// Stored credentials did not survive the startup check
    RestoreFailed,
}

impl SignOutReason {
    /// Message a view can show on the signed-out screen
    pub fn message(&self) -> &'static str {
        match self {
            SignOutReason::SessionExpired => "Your session has expired. Please sign in again.",
            SignOutReason::RestoreFailed => "Please sign in again.",
        }
    }
}

/// Snapshot of the client's belief about who is signed in.
///
/// Fields are private so `is_authenticated()` always agrees with `user()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    user: Option<UserProfile>,
    is_authenticated: bool,
    is_loading: bool,
    phase: SessionPhase,
    authenticated_at: Option<DateTime<Utc>>,
    signed_out_reason: Option<SignOutReason>,
}

impl Session {
    /// State at process start, before stored credentials have been checked
    pub fn initial() -> Self {
        Self {
            user: None,
            is_authenticated: false,
            is_loading: true,
            phase: SessionPhase::Anonymous,
            authenticated_at: None,
            signed_out_reason: None,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn authenticated_at(&self) -> Option<DateTime<Utc>> {
        self.authenticated_at
    }

    pub fn signed_out_reason(&self) -> Option<SignOutReason> {
        self.signed_out_reason
    }

    fn sign_in(&mut self, user: UserProfile) {
        if self.phase != SessionPhase::Authenticated {
            self.authenticated_at = Some(Utc::now());
        }
        self.user = Some(user);
        self.is_authenticated = true;
        self.phase = SessionPhase::Authenticated;
        self.signed_out_reason = None;
    }

    fn sign_out(&mut self, reason: Option<SignOutReason>) {
        self.user = None;
        self.is_authenticated = false;
        self.phase = SessionPhase::Anonymous;
        self.authenticated_at = None;
        self.signed_out_reason = reason;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::initial()
    }
}

/// Owner of the current `Session`. Every transition is published to
/// subscribers.
pub struct SessionState {
    tx: watch::Sender<Session>,
}

impl SessionState {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Session::initial());
        Self { tx }
    }

    pub fn snapshot(&self) -> Session {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.tx.subscribe()
    }

    pub(crate) fn begin_restore(&self) {
        self.tx.send_modify(|s| {
            s.phase = SessionPhase::Restoring;
            s.is_loading = true;
        });
    }

    pub(crate) fn set_loading(&self, loading: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.is_loading != loading;
            s.is_loading = loading;
            changed
        });
    }

    /// Enter or stay in `Authenticated` with a server-supplied profile
    pub(crate) fn sign_in(&self, user: UserProfile) {
        self.tx.send_modify(|s| s.sign_in(user));
    }

    /// Replace the profile only if still signed in
    pub(crate) fn replace_user(&self, user: UserProfile) -> bool {
        self.tx.send_if_modified(|s| {
            if s.is_authenticated {
                s.user = Some(user);
                true
            } else {
                false
            }
        })
    }

    /// Drop to `Anonymous` and stop loading
    pub(crate) fn sign_out(&self, reason: Option<SignOutReason>) {
        self.tx.send_modify(|s| {
            s.sign_out(reason);
            s.is_loading = false;
        });
    }

    pub(crate) fn finish_restore(&self, user: Option<UserProfile>) {
        self.tx.send_modify(|s| {
            match user {
                Some(user) => s.sign_in(user),
                None => {
                    let reason = s.signed_out_reason;
                    s.sign_out(reason);
                }
            }
            s.is_loading = false;
        });
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
