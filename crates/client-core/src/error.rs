//! Error types for the supervisor client core
//!
//! The taxonomy mirrors the places a supervisor workflow can break down:
//!
//! - **Configuration** - registration was never attempted
//! - **Transport** - the signaling socket could not be built or was lost
//! - **Registration** - the exchange rejected the REGISTER
//! - **Poll** - one live-call fetch failed (transient)
//! - **Dial** - a supervisory action was refused before any call was placed
//! - **Session** - a placed call ended or failed asynchronously
//!
//! Transport and registration problems are normally observed as
//! [`RegistrationState`](crate::registration::RegistrationState) values and
//! events rather than returned errors; the variants exist so that events and
//! logs carry a typed cause.

use thiserror::Error;

use crate::supervisor::SupervisoryAction;

/// Result type for client-core operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors produced by the supervisor client core
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Registration configuration is incomplete or malformed
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Signaling transport could not be constructed or connected
    #[error("Transport error for {url}: {reason}")]
    Transport { url: String, reason: String },

    /// The exchange rejected the registration
    #[error("Registration rejected: {reason}")]
    Registration { reason: String },

    /// A live-call poll failed
    #[error("Live call poll failed: {0}")]
    Poll(#[from] PollError),

    /// A supervisory action was refused before dialing
    #[error("Cannot place supervisory call: {0}")]
    Dial(#[from] DialError),

    /// A supervisory session ended abnormally
    #[error("Session {session_id} failed: {reason}")]
    Session { session_id: String, reason: String },

    /// Unexpected internal condition
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ClientError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a transport error
    pub fn transport(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a registration error
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Create a session error
    pub fn session(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the failure is expected to clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Poll(_) | ClientError::Transport { .. })
    }
}

/// Failures of a single live-call poll tick
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PollError {
    /// The operator's business identifier could not be resolved
    #[error("business identity unavailable: {0}")]
    IdentityUnavailable(String),

    /// The HTTP request itself failed
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with a non-success status
    #[error("backend returned HTTP {status}")]
    Status { status: u16 },

    /// The response body could not be decoded
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Reasons a supervisory action is refused before any call is placed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DialError {
    /// The signaling endpoint is not registered with the exchange
    #[error("endpoint is not registered (current state: {state})")]
    NotRegistered { state: String },

    /// No agent extension could be derived from the live call
    #[error("no agent extension could be derived for channel '{channel}'")]
    ExtensionUnavailable { channel: String },

    /// A session of the same kind is still live
    #[error("a {action} session is already active")]
    SessionActive { action: SupervisoryAction },

    /// The endpoint refused to originate the call
    #[error("endpoint refused call to {target}: {reason}")]
    PlacementFailed { target: String, reason: String },
}
