//! Connection lifecycle of the single chat session.
//!
//! ```text
//! Disconnected -> Initializing -> Authenticated -> Ready
//!                      |
//!                      +-> AuthFailed        (any) -> Disconnected
//! ```
//!
//! State lives in a `watch` channel: every transition is one atomic
//! `send_if_modified`, and readers take a cheap borrow of the latest value.

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{info, warn};

use netzap_types::api::SessionStatus;
use netzap_types::models::SessionState;

use crate::qr;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Present only while initializing and not yet authenticated.
    pub qr_challenge: Option<String>,
    /// `qr_challenge` rendered as a PNG `data:` URL.
    pub qr_code: Option<String>,
    /// Reason given by the last auth failure or disconnect.
    pub last_reason: Option<String>,
    pub since: DateTime<Utc>,
}

impl SessionSnapshot {
    fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            qr_challenge: None,
            qr_code: None,
            last_reason: None,
            since: Utc::now(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Messages are accepted once the transport has authenticated us.
    pub fn accepts_messages(&self) -> bool {
        matches!(self.state, SessionState::Authenticated | SessionState::Ready)
    }

    /// True from `initialize()` until the session is ready or fails.
    pub fn is_initializing(&self) -> bool {
        matches!(self.state, SessionState::Initializing | SessionState::Authenticated)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            is_ready: self.is_ready(),
            is_initializing: self.is_initializing(),
            qr_challenge: self.qr_challenge.clone(),
            qr_code: self.qr_code.clone(),
            since: self.since,
        }
    }

    fn clear_qr(&mut self) {
        self.qr_challenge = None;
        self.qr_code = None;
    }
}

pub struct Session {
    state: watch::Sender<SessionSnapshot>,
    /// Held by `initialize`/`logout` so commands never interleave.
    lifecycle: Mutex<()>,
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::new());
        Self {
            state,
            lifecycle: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    pub fn is_initializing(&self) -> bool {
        self.state.borrow().is_initializing()
    }

    pub fn qr_challenge(&self) -> Option<String> {
        self.state.borrow().qr_challenge.clone()
    }

    pub fn qr_code(&self) -> Option<String> {
        self.state.borrow().qr_code.clone()
    }

    pub fn accepts_messages(&self) -> bool {
        self.state.borrow().accepts_messages()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    pub(crate) async fn lock_lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    /// Move to `Initializing` unless a connect is already underway or done.
    /// Returns `false` for the no-op case.
    pub(crate) fn begin_initialize(&self) -> bool {
        self.transition(|s| {
            if matches!(
                s.state,
                SessionState::Initializing | SessionState::Authenticated | SessionState::Ready
            ) {
                return false;
            }
            s.state = SessionState::Initializing;
            s.clear_qr();
            s.last_reason = None;
            true
        })
    }

    /// Revert a failed connect. Events that already moved the session on win.
    pub(crate) fn fail_initialize(&self, reason: &str) -> bool {
        self.transition(|s| {
            if s.state != SessionState::Initializing {
                return false;
            }
            s.state = SessionState::Disconnected;
            s.clear_qr();
            s.last_reason = Some(reason.to_string());
            true
        })
    }

    /// Store a login challenge along with its rendered image. A challenge
    /// that cannot be rendered is still kept, without the image.
    pub(crate) fn on_qr(&self, payload: String) -> bool {
        {
            let current = self.state.borrow();
            if current.state != SessionState::Initializing {
                warn!("Ignoring QR challenge while {}", current.state);
                return false;
            }
            if current.qr_challenge.as_deref() == Some(payload.as_str()) {
                return false;
            }
        }

        let qr_code = match qr::to_data_url(&payload) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!("Could not render QR challenge: {}", e);
                None
            }
        };

        self.transition(|s| {
            if s.state != SessionState::Initializing
                || s.qr_challenge.as_deref() == Some(payload.as_str())
            {
                return false;
            }
            s.qr_challenge = Some(payload);
            s.qr_code = qr_code;
            true
        })
    }

    pub(crate) fn on_authenticated(&self) -> bool {
        self.transition(|s| {
            if matches!(s.state, SessionState::Authenticated | SessionState::Ready) {
                return false;
            }
            s.state = SessionState::Authenticated;
            s.clear_qr();
            true
        })
    }

    /// Returns `true` only on the transition into `Ready`.
    pub(crate) fn on_ready(&self) -> bool {
        self.transition(|s| {
            if s.state == SessionState::Ready {
                return false;
            }
            s.state = SessionState::Ready;
            s.clear_qr();
            s.last_reason = None;
            true
        })
    }

    /// Lands in `AuthFailed`, which gates everything exactly like
    /// `Disconnected` until the next `initialize`.
    pub(crate) fn on_auth_failure(&self, reason: &str) -> bool {
        self.transition(|s| {
            s.state = SessionState::AuthFailed;
            s.clear_qr();
            s.last_reason = Some(reason.to_string());
            true
        })
    }

    pub(crate) fn on_disconnected(&self, reason: Option<&str>) -> bool {
        self.transition(|s| {
            if s.state == SessionState::Disconnected && s.qr_challenge.is_none() {
                return false;
            }
            s.state = SessionState::Disconnected;
            s.clear_qr();
            s.last_reason = reason.map(str::to_string);
            true
        })
    }

    fn transition<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut SessionSnapshot) -> bool,
    {
        let mut from = None;
        let changed = self.state.send_if_modified(|s| {
            let before = s.state;
            let changed = f(s);
            if changed {
                from = Some(before);
                s.since = Utc::now();
            }
            changed
        });

        if let Some(from) = from {
            let to = self.state();
            if from != to {
                info!("Session {} -> {}", from, to);
            }
        }
        changed
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let session = Session::new();
        assert_eq!(session.state(), SessionState::Disconnected);

        assert!(session.begin_initialize());
        assert!(session.is_initializing());
        assert!(session.on_qr("2@challenge".into()));
        assert_eq!(session.qr_challenge().as_deref(), Some("2@challenge"));
        assert!(session.qr_code().unwrap().starts_with("data:image/png;base64,"));

        assert!(session.on_authenticated());
        assert!(session.qr_challenge().is_none());
        assert!(session.qr_code().is_none());
        assert!(session.is_initializing());

        assert!(session.on_ready());
        assert!(session.is_ready());
        assert!(!session.is_initializing());
        assert!(!session.on_ready());
    }

    #[test]
    fn initialize_is_noop_when_underway() {
        let session = Session::new();
        assert!(session.begin_initialize());
        assert!(!session.begin_initialize());

        session.on_ready();
        assert!(!session.begin_initialize());
        assert!(session.is_ready());
    }

    #[test]
    fn failed_connect_reverts_only_from_initializing() {
        let session = Session::new();
        session.begin_initialize();
        assert!(session.fail_initialize("browser crashed"));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(session.snapshot().last_reason.as_deref(), Some("browser crashed"));

        session.begin_initialize();
        session.on_authenticated();
        assert!(!session.fail_initialize("late"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[test]
    fn qr_ignored_outside_initializing() {
        let session = Session::new();
        assert!(!session.on_qr("stale".into()));
        assert!(session.qr_challenge().is_none());
    }

    #[test]
    fn auth_failure_clears_qr_and_allows_retry() {
        let session = Session::new();
        session.begin_initialize();
        session.on_qr("qr".into());

        assert!(session.on_auth_failure("bad credentials"));
        let snap = session.snapshot();
        assert_eq!(snap.state, SessionState::AuthFailed);
        assert!(snap.qr_challenge.is_none());
        assert!(!snap.is_ready());
        assert!(!snap.is_initializing());
        assert!(!session.accepts_messages());

        assert!(session.begin_initialize());
    }

    #[test]
    fn disconnect_from_any_state() {
        let session = Session::new();
        assert!(!session.on_disconnected(None));

        session.begin_initialize();
        session.on_qr("qr".into());
        assert!(session.on_disconnected(Some("NAVIGATION")));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.qr_challenge().is_none());

        session.begin_initialize();
        session.on_ready();
        assert!(session.on_disconnected(Some("LOGOUT")));
        assert!(!session.is_ready());
    }

    #[tokio::test]
    async fn watchers_see_transitions() {
        let session = Session::new();
        let mut rx = session.subscribe();

        session.begin_initialize();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().state, SessionState::Initializing);
    }
}
