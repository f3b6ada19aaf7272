//! Supervisory session state
//!
//! A [`Session`] is one supervisory call: the dialed target, the action, the
//! live call it was started from, the endpoint call handle, and the audio
//! binding of its remote media.
//!
//! ```text
//! Dialing ──► Active ──► Ended
//!    │           │
//!    └───────────┴─────► Failed
//! ```
//!
//! `Ended` and `Failed` are terminal. Reaching either detaches the audio
//! before the manager lets go of the session.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::SupervisoryAction;
use crate::audio::AudioSink;
use crate::endpoint::CallHandle;
use crate::livecalls::LiveCall;

/// Lifecycle of a supervisory session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// The call has been placed, not yet answered
    Dialing,
    /// The exchange answered and media is flowing
    Active,
    /// The call ended normally or was hung up
    Ended,
    /// The call could not be established or broke
    Failed,
}

impl SessionState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Ended | SessionState::Failed)
    }

    fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Dialing, Active) | (Dialing, Ended) | (Dialing, Failed) | (Active, Ended) | (Active, Failed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Dialing => "dialing",
            SessionState::Active => "active",
            SessionState::Ended => "ended",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One supervisory call
pub struct Session {
    id: String,
    action: SupervisoryAction,
    target: String,
    extension: String,
    call: LiveCall,
    created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    handle: Arc<dyn CallHandle>,
    audio: AudioSink,
}

impl Session {
    pub(crate) fn new(
        id: String,
        action: SupervisoryAction,
        target: String,
        extension: String,
        call: LiveCall,
        handle: Arc<dyn CallHandle>,
        audio: AudioSink,
    ) -> Self {
        Self {
            id,
            action,
            target,
            extension,
            call,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Dialing),
            handle,
            audio,
        }
    }

    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Action kind
    pub fn action(&self) -> SupervisoryAction {
        self.action
    }

    /// Dialed target (`sip:*92205@pbx.example.com`)
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Agent extension the target was built from
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Live call the session was started from
    pub fn call(&self) -> &LiveCall {
        &self.call
    }

    /// Endpoint-level call identifier
    pub fn call_id(&self) -> String {
        self.handle.id()
    }

    /// When the session was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Audio binding of the session
    pub fn audio(&self) -> &AudioSink {
        &self.audio
    }

    /// Hang up; harmless on a session that already ended
    pub fn terminate(&self) {
        if self.handle.is_ended() {
            return;
        }
        self.handle.terminate();
    }

    /// Apply a transition, returning the previous state if it was allowed
    pub(crate) fn transition(&self, next: SessionState) -> Option<SessionState> {
        let mut state = self.state.write();
        let previous = *state;
        if !previous.can_move_to(next) {
            return None;
        }
        *state = next;
        Some(previous)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("action", &self.action)
            .field("target", &self.target)
            .field("state", &self.state())
            .finish()
    }
}
