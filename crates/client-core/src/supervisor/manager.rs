//! The supervisory call manager

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::extension::{derive_extension, dial_target};
use super::session::{Session, SessionState};
use super::SupervisoryAction;
use crate::audio::AudioSink;
use crate::endpoint::{CallEvent, CallOptions};
use crate::error::{ClientError, ClientResult, DialError};
use crate::events::{ClientEvent, EventEmitter, SessionStatusInfo};
use crate::livecalls::LiveCall;
use crate::media::AudioOutput;
use crate::registration::RegistrationController;

/// Provides the audio output a new session of the given kind plays into
pub type OutputFactory = Arc<dyn Fn(SupervisoryAction) -> Arc<dyn AudioOutput> + Send + Sync>;

/// What to do when an action kind is invoked while its session is live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// Refuse with [`DialError::SessionActive`]
    #[default]
    Reject,
    /// Hang up the live session, then dial the new one
    Replace,
}

type SessionMap = DashMap<SupervisoryAction, Arc<Session>>;

/// Places supervisory calls and tracks one session per action kind
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use switchboard_client_core::livecalls::{AgentRef, LiveCall};
/// use switchboard_client_core::registration::RegistrationController;
/// use switchboard_client_core::supervisor::{OutputFactory, SupervisoryAction, SupervisoryCallManager};
///
/// # async fn run(registration: Arc<RegistrationController>, outputs: OutputFactory) -> Result<(), Box<dyn std::error::Error>> {
/// let manager = SupervisoryCallManager::new(registration, outputs);
/// let call = LiveCall::new("PJSIP/205-0000001a", "").with_agent(AgentRef::Text("205".into()));
///
/// let session = manager.invoke(SupervisoryAction::Monitor, &call).await?;
/// println!("dialing {}", session.target());
///
/// manager.terminate(SupervisoryAction::Monitor);
/// # Ok(())
/// # }
/// ```
pub struct SupervisoryCallManager {
    registration: Arc<RegistrationController>,
    sessions: Arc<SessionMap>,
    outputs: OutputFactory,
    events: EventEmitter,
    policy: DuplicatePolicy,
    invoke_lock: tokio::sync::Mutex<()>,
}

impl SupervisoryCallManager {
    /// Create a manager that dials through `registration`
    ///
    /// Session events are published on the registration controller's bus.
    pub fn new(registration: Arc<RegistrationController>, outputs: OutputFactory) -> Self {
        let events = registration.events().clone();
        Self {
            registration,
            sessions: Arc::new(DashMap::new()),
            outputs,
            events,
            policy: DuplicatePolicy::default(),
            invoke_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Set the duplicate-invocation policy
    pub fn with_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The duplicate-invocation policy in effect
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Start a supervisory session on a live call
    ///
    /// Refused with a [`DialError`] (and nothing dialed) when the endpoint is
    /// not registered, no agent extension can be derived, or a session of the
    /// same kind is live under [`DuplicatePolicy::Reject`]. The returned
    /// session is in `dialing`; later transitions arrive as events.
    pub async fn invoke(&self, action: SupervisoryAction, call: &LiveCall) -> ClientResult<Arc<Session>> {
        let _serial = self.invoke_lock.lock().await;

        let state = self.registration.status();
        if !state.can_place_calls() {
            warn!("Refusing {} on {}: endpoint is {}", action, call.channel, state);
            return Err(DialError::NotRegistered {
                state: state.to_string(),
            }
            .into());
        }

        let extension = derive_extension(call).ok_or_else(|| {
            warn!("Refusing {} on {}: no agent extension", action, call.channel);
            DialError::ExtensionUnavailable {
                channel: call.channel.clone(),
            }
        })?;

        if let Some(existing) = self.active_session(action) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    warn!("Refusing {}: session {} is still live", action, existing.id());
                    return Err(DialError::SessionActive { action }.into());
                }
                DuplicatePolicy::Replace => {
                    info!("Replacing {} session {}", action, existing.id());
                    existing.terminate();
                    finish_session(&existing, SessionState::Ended, Some("replaced".into()), &self.sessions, &self.events);
                }
            }
        }

        let target = dial_target(action, &extension, self.registration.domain().as_deref());
        info!("🎧 {} {} via {}", action, call.channel, target);

        let options = CallOptions::audio_only(self.registration.ice_servers());
        let placed = self
            .registration
            .place_call(&target, options)
            .await
            .map_err(|e| match e {
                ClientError::Dial(dial) => ClientError::Dial(dial),
                other => DialError::PlacementFailed {
                    target: target.clone(),
                    reason: other.to_string(),
                }
                .into(),
            })?;

        let session_id = Uuid::new_v4().to_string();
        let audio = AudioSink::attach(session_id.clone(), placed.handle.media(), (self.outputs)(action));
        let session = Arc::new(Session::new(
            session_id,
            action,
            target,
            extension,
            call.clone(),
            placed.handle,
            audio,
        ));

        self.sessions.insert(action, session.clone());
        emit_transition(&self.events, &session, None, None);

        tokio::spawn(pump_call_events(
            session.clone(),
            placed.events,
            self.sessions.clone(),
            self.events.clone(),
        ));

        Ok(session)
    }

    /// Hang up the session of `action`, if any
    ///
    /// Returns whether a session was tracked. Tolerates sessions the
    /// endpoint already ended.
    pub fn terminate(&self, action: SupervisoryAction) -> bool {
        let Some(session) = self.sessions.get(&action).map(|entry| entry.value().clone()) else {
            debug!("No {} session to terminate", action);
            return false;
        };
        session.terminate();
        finish_session(
            &session,
            SessionState::Ended,
            Some("terminated by supervisor".into()),
            &self.sessions,
            &self.events,
        );
        true
    }

    /// Hang up every tracked session
    pub fn terminate_all(&self) {
        for action in SupervisoryAction::ALL {
            self.terminate(action);
        }
    }

    /// The live session of `action`, if any
    pub fn active_session(&self, action: SupervisoryAction) -> Option<Arc<Session>> {
        self.sessions
            .get(&action)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.state().is_terminal())
    }

    /// All live sessions
    pub fn active_sessions(&self) -> Vec<Arc<Session>> {
        SupervisoryAction::ALL
            .iter()
            .filter_map(|action| self.active_session(*action))
            .collect()
    }
}

impl Drop for SupervisoryCallManager {
    fn drop(&mut self) {
        self.terminate_all();
    }
}

async fn pump_call_events(
    session: Arc<Session>,
    mut events: mpsc::UnboundedReceiver<CallEvent>,
    sessions: Arc<SessionMap>,
    emitter: EventEmitter,
) {
    while let Some(event) = events.recv().await {
        match event {
            CallEvent::Progress { status } => {
                debug!("Session {} progress {}", session.id(), status);
            }
            CallEvent::Confirmed => {
                if let Some(previous) = session.transition(SessionState::Active) {
                    session.audio().rebind();
                    info!("Session {} ({}) is active", session.id(), session.action());
                    emit_transition(&emitter, &session, Some(previous), None);
                }
            }
            CallEvent::Ended { cause } => {
                finish_session(&session, SessionState::Ended, Some(cause), &sessions, &emitter);
                break;
            }
            CallEvent::Failed { cause } => {
                finish_session(&session, SessionState::Failed, Some(cause), &sessions, &emitter);
                break;
            }
        }
    }

    if !session.state().is_terminal() {
        finish_session(
            &session,
            SessionState::Ended,
            Some("call event stream closed".into()),
            &sessions,
            &emitter,
        );
    }
}

/// Move a session to a terminal state: detach audio, release, publish
fn finish_session(
    session: &Arc<Session>,
    state: SessionState,
    reason: Option<String>,
    sessions: &SessionMap,
    emitter: &EventEmitter,
) {
    let Some(previous) = session.transition(state) else {
        return;
    };
    session.audio().detach();
    sessions.remove_if(&session.action(), |_, tracked| Arc::ptr_eq(tracked, session));

    match (&state, &reason) {
        (SessionState::Failed, Some(reason)) => warn!("Session {} failed: {}", session.id(), reason),
        (_, Some(reason)) => info!("Session {} ended: {}", session.id(), reason),
        _ => info!("Session {} ended", session.id()),
    }
    emit_transition(emitter, session, Some(previous), reason);
}

fn emit_transition(
    emitter: &EventEmitter,
    session: &Session,
    previous: Option<SessionState>,
    reason: Option<String>,
) {
    emitter.emit(ClientEvent::SessionStateChanged(SessionStatusInfo {
        session_id: session.id().to_string(),
        action: session.action(),
        target: session.target().to_string(),
        previous,
        state: session.state(),
        reason,
        timestamp: Utc::now(),
    }));
}
