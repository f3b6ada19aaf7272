//! Shared configuration structures
//!
//! Registration settings live next to the registration state machine in
//! [`crate::registration`]; this module holds the pieces several components
//! share (ICE servers, the local origin used for same-origin fallback) and
//! the backend/feed settings.
//!
//! All structs deserialize from TOML/JSON with defaults for every optional
//! field, so an operator file only needs the values that differ.
//!
//! ```rust
//! use switchboard_client_core::config::{BackendConfig, FeedConfig};
//! use std::time::Duration;
//!
//! let backend = BackendConfig::new("https://api.example.com")
//!     .with_api_token("secret-token");
//! assert_eq!(backend.user_details_path, "/user/details");
//!
//! let feed = FeedConfig::default();
//! assert_eq!(feed.poll_interval(), Duration::from_millis(5000));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default live-call poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;

/// Default per-request timeout for backend calls in milliseconds
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// A STUN/TURN server handed to the media layer when placing calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// One or more `stun:`/`turn:` URLs
    pub urls: Vec<String>,
    /// TURN username
    #[serde(default)]
    pub username: Option<String>,
    /// TURN credential
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServer {
    /// A single-URL server without credentials
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Attach TURN credentials
    pub fn with_credentials(mut self, username: impl Into<String>, credential: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

/// The origin the operator console itself is served from
///
/// When the exchange's own WebSocket port is unreachable (blocked port,
/// mixed-content policy), registration retries once through a WebSocket
/// proxied on this origin, using `wss` when the origin is secure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalOrigin {
    /// Whether the origin is served over TLS
    pub secure: bool,
    /// Host with optional port, e.g. `console.example.com:8443`
    pub host: String,
}

impl LocalOrigin {
    /// Create an origin description
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            secure,
            host: host.into(),
        }
    }
}

/// Backend REST API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://api.example.com`
    pub base_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// Path of the user-details endpoint carrying the business identifier
    pub user_details_path: String,
    /// Path prefix of the live-call query; the business id is appended
    pub live_calls_path: String,
    /// Hard timeout for one request
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            api_token: None,
            user_details_path: "/user/details".to_string(),
            live_calls_path: "/asterisk/livecalls".to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl BackendConfig {
    /// Backend settings for the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the bearer token
    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set the user-details path
    pub fn with_user_details_path(mut self, path: impl Into<String>) -> Self {
        self.user_details_path = path.into();
        self
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Live-call feed settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Milliseconds between poll ticks
    pub poll_interval_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl FeedConfig {
    /// Poll interval as a `Duration`; zero is clamped to one millisecond
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
