//! Signaling endpoint seam
//!
//! The registration controller never talks to a concrete SIP stack. It asks an
//! [`EndpointFactory`] for a [`SignalingEndpoint`] bound to one transport URL
//! and listens to the [`EndpointEvent`]s the endpoint pushes through an
//! unbounded channel, in the order the endpoint produced them.
//!
//! Calls placed through an endpoint come back as a [`PlacedCall`]: a
//! [`CallHandle`] for hangup and media access, plus a per-call
//! [`CallEvent`] receiver.
//!
//! [`crate::sip::WsEndpointFactory`] is the production implementation; tests
//! provide their own factories.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServer;
use crate::error::ClientResult;
use crate::media::MediaConnection;
use crate::registration::RegistrationConfig;

/// Sender half handed to an endpoint for its lifecycle events
pub type EndpointEventSender = mpsc::UnboundedSender<EndpointEvent>;

/// Sender half an endpoint uses for one call's events
pub type CallEventSender = mpsc::UnboundedSender<CallEvent>;

/// Everything a factory needs to build an endpoint
#[derive(Debug, Clone)]
pub struct EndpointParams {
    /// WebSocket URL the endpoint must connect to
    pub transport_url: String,
    /// `sip:{extension}@{domain}`
    pub identity_uri: String,
    /// The configuration this endpoint was built for
    pub config: RegistrationConfig,
}

/// Transport and registration occurrences reported by an endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointEvent {
    /// The endpoint (re)issued a transport connect
    Connecting,
    /// The transport handshake completed
    Connected,
    /// The transport closed or could not be reached
    Disconnected { reason: Option<String> },
    /// The exchange accepted REGISTER
    Registered,
    /// The registration was removed or expired
    Unregistered { cause: Option<String> },
    /// The exchange rejected REGISTER
    RegistrationFailed { cause: String },
}

/// Media options for an outgoing call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    /// Offer audio
    pub audio: bool,
    /// Offer video
    pub video: bool,
    /// ICE servers for the media layer
    pub ice_servers: Vec<IceServer>,
}

impl CallOptions {
    /// Audio-only media with the given ICE servers
    pub fn audio_only(ice_servers: Vec<IceServer>) -> Self {
        Self {
            audio: true,
            video: false,
            ice_servers,
        }
    }
}

/// Progress of one placed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// Provisional response from the exchange
    Progress { status: u16 },
    /// The call was answered and media is flowing
    Confirmed,
    /// The call ended normally (either side hung up)
    Ended { cause: String },
    /// The call could not be established
    Failed { cause: String },
}

impl CallEvent {
    /// Whether the call is over after this event
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallEvent::Ended { .. } | CallEvent::Failed { .. })
    }
}

/// Handle to one call placed through an endpoint
pub trait CallHandle: Send + Sync {
    /// Endpoint-level call identifier
    fn id(&self) -> String;

    /// Remote-media view of the call
    fn media(&self) -> Arc<dyn MediaConnection>;

    /// Hang up (CANCEL before answer, BYE after); a no-op once ended
    fn terminate(&self);

    /// Whether the call is over
    fn is_ended(&self) -> bool;
}

/// A freshly placed call
pub struct PlacedCall {
    /// Call handle
    pub handle: Arc<dyn CallHandle>,
    /// Ordered call events; closes when the endpoint forgets the call
    pub events: mpsc::UnboundedReceiver<CallEvent>,
}

impl std::fmt::Debug for PlacedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlacedCall")
            .field("call_id", &self.handle.id())
            .finish()
    }
}

/// A registered (or registering) signaling endpoint
#[async_trait]
pub trait SignalingEndpoint: Send + Sync {
    /// Begin connecting and registering
    ///
    /// Returns once the attempt has been issued; progress arrives as
    /// [`EndpointEvent`]s. An error here means the transport could not even
    /// be set up.
    fn start(&self) -> ClientResult<()>;

    /// Unregister and disconnect; must not block and may be called repeatedly
    fn stop(&self);

    /// Dial a target
    async fn place_call(&self, target: &str, options: CallOptions) -> ClientResult<PlacedCall>;
}

/// Builds endpoints for the registration controller
pub trait EndpointFactory: Send + Sync {
    /// Construct an endpoint bound to `params.transport_url`
    ///
    /// Construction must not perform I/O; an error means the transport
    /// address or configuration is unusable.
    fn create(
        &self,
        params: EndpointParams,
        events: EndpointEventSender,
    ) -> ClientResult<Arc<dyn SignalingEndpoint>>;
}
