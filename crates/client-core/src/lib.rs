//! Switchboard client-core: supervisor side of an operator telephony console
//!
//! A supervisor registers a SIP extension with the exchange over WebSocket,
//! watches the live calls reported by the business backend, and joins any of
//! them silently (monitor), speaking to the agent (whisper) or speaking to
//! both parties (barge).
//!
//! ## Layering
//! ```text
//! SupervisoryCallManager ──► RegistrationController ──► EndpointFactory ──► sip::WsSipEndpoint
//!          │                         │
//!          ▼                         ▼
//!      AudioSink                EventEmitter ◄── LiveCallFeed ◄── BackendClient
//! ```
//!
//! The registration controller is the sole owner of the signaling endpoint;
//! everything else observes its state through [`EventEmitter`] or places
//! calls through it.

pub mod audio;
pub mod backend;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod livecalls;
pub mod media;
pub mod registration;
pub mod sip;
pub mod supervisor;
pub mod transport;

// Public API exports
pub use audio::AudioSink;
pub use backend::BackendClient;
pub use config::{BackendConfig, FeedConfig, IceServer, LocalOrigin};
pub use endpoint::{CallEvent, CallHandle, CallOptions, EndpointEvent, EndpointFactory, PlacedCall, SignalingEndpoint};
pub use error::{ClientError, ClientResult, DialError, PollError};
pub use events::{ClientEvent, EventEmitter, RegistrationStatusInfo, SessionStatusInfo};
pub use livecalls::{CallDirection, FeedHandle, LiveCall, LiveCallFeed, LiveCallSnapshot};
pub use media::{AudioOutput, MediaConnection, MediaStream, MediaTrack, PlaybackError};
pub use registration::{RegistrationConfig, RegistrationController, RegistrationState};
pub use sip::WsEndpointFactory;
pub use supervisor::{DuplicatePolicy, Session, SessionState, SupervisoryAction, SupervisoryCallManager};
pub use transport::{TransportAddress, TransportResolver};

/// Client-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
