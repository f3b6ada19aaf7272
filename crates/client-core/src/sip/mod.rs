//! SIP over WebSocket endpoint
//!
//! A small user agent that covers what a supervisor console needs from the
//! exchange, using the RFC 7118 `sip` WebSocket subprotocol:
//!
//! - REGISTER with digest authentication, periodic refresh, un-REGISTER on stop
//! - outgoing INVITE with an SDP offer, ACK, BYE and CANCEL
//! - answering BYE and OPTIONS sent by the exchange
//!
//! # Modules
//!
//! - [`message`] - request/response text codec
//! - [`digest`] - `WWW-Authenticate` parsing and MD5 digest responses
//! - [`sdp`] - the SDP media engine behind each call's media connection
//! - [`ws`] - the endpoint, its factory and the connection driver

pub mod digest;
pub mod message;
pub mod sdp;
pub mod ws;

pub use sdp::{SdpMediaEngine, SdpSession};
pub use ws::{WsEndpointFactory, WsSipEndpoint};

use thiserror::Error;

/// Errors of the SIP layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SipError {
    /// A message could not be parsed
    #[error("SIP parse error: {0}")]
    Parse(String),

    /// An authentication challenge could not be answered
    #[error("SIP authentication error: {0}")]
    Auth(String),

    /// An SDP body could not be used
    #[error("SDP error: {0}")]
    Sdp(String),
}

/// Result type for the SIP layer
pub type SipResult<T> = Result<T, SipError>;
