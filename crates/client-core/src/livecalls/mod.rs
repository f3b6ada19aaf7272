//! Live-call acquisition
//!
//! - [`model`] normalizes the backend's live-call payload into [`LiveCall`]s
//! - [`direction`] classifies a call as inbound or outgoing
//! - [`feed`] polls the backend on an interval and exposes the latest snapshot

pub mod direction;
pub mod feed;
pub mod model;

pub use direction::{classify, CallDirection};
pub use feed::{BusinessIdentity, FeedHandle, LiveCallFeed, LiveCallFetcher};
pub use model::{AgentRef, LiveCall, LiveCallSnapshot};
