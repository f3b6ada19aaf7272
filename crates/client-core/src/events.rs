//! Event bus for the supervisor client
//!
//! Every component publishes what it observes onto one [`EventEmitter`]:
//! registration transitions, transport selection, live-call snapshots and
//! poll failures, and supervisory session transitions. Any number of
//! subscribers (the CLI, a UI, tests) can listen without the publishers
//! knowing about them.
//!
//! Within one publisher, events are emitted in order. A slow subscriber that
//! falls behind the channel capacity observes a lag error and skips ahead; the
//! publisher is never blocked.
//!
//! # Example
//!
//! ```rust
//! use switchboard_client_core::events::{ClientEvent, EventEmitter};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let emitter = EventEmitter::new(16);
//! let mut rx = emitter.subscribe();
//!
//! emitter.emit(ClientEvent::TransportSelected {
//!     url: "wss://pbx.example.com:8089/ws".into(),
//!     fallback: false,
//! });
//!
//! match rx.recv().await {
//!     Ok(ClientEvent::TransportSelected { fallback, .. }) => assert!(!fallback),
//!     other => panic!("unexpected {:?}", other),
//! }
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::error::PollError;
use crate::livecalls::LiveCall;
use crate::registration::RegistrationState;
use crate::supervisor::{SessionState, SupervisoryAction};

/// A registration state transition
#[derive(Debug, Clone)]
pub struct RegistrationStatusInfo {
    /// State before the transition
    pub previous: RegistrationState,
    /// State after the transition
    pub state: RegistrationState,
    /// Cause reported by the endpoint, if any
    pub reason: Option<String>,
    /// Transport URL in use when the transition happened
    pub transport_url: Option<String>,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

/// A supervisory session transition
#[derive(Debug, Clone)]
pub struct SessionStatusInfo {
    /// Session identifier
    pub session_id: String,
    /// Action kind of the session
    pub action: SupervisoryAction,
    /// Dialed target
    pub target: String,
    /// State before the transition; `None` for the initial `dialing`
    pub previous: Option<SessionState>,
    /// State after the transition
    pub state: SessionState,
    /// Cause for `ended`/`failed`
    pub reason: Option<String>,
    /// When the transition was applied
    pub timestamp: DateTime<Utc>,
}

/// Events published by the supervisor client
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Registration state changed
    RegistrationStateChanged(RegistrationStatusInfo),

    /// The controller chose a transport address for a new endpoint
    TransportSelected { url: String, fallback: bool },

    /// A poll tick replaced the live-call lists
    LiveCallsUpdated {
        live_calls: Arc<Vec<LiveCall>>,
        logical_calls: Arc<Vec<LiveCall>>,
        fetched_at: DateTime<Utc>,
    },

    /// A poll tick failed; the previous snapshot is still exposed
    LiveCallPollFailed { error: PollError },

    /// A supervisory session changed state
    SessionStateChanged(SessionStatusInfo),
}

/// Stream form of a subscription
pub type EventStream = BroadcastStream<ClientEvent>;

/// Broadcast emitter shared by all components of one client
#[derive(Clone)]
pub struct EventEmitter {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventEmitter {
    /// Create an emitter whose subscribers may lag by up to `capacity` events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event
    pub fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a `Stream`
    pub fn stream(&self) -> EventStream {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Number of live subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
