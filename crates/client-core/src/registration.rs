//! Registration management for the supervisor endpoint
//!
//! This module provides the registration configuration, the registration
//! state machine and the [`RegistrationController`] that drives a signaling
//! endpoint through it.
//!
//! # Key Components
//!
//! - **RegistrationConfig** - Exchange domain, extension, credential and transport settings
//! - **RegistrationState** - Current state of the registration
//! - **RegistrationTrigger** - Transport/endpoint occurrences that move the state
//! - **RegistrationController** - Sole owner of the signaling endpoint
//!
//! # State Machine
//!
//! ```text
//!            ConnectIssued          TransportConnected        Registered
//!   Idle ─────────────────► Connecting ─────────────► Connected ─────────► Registered
//!                              │  ▲                      │                   │
//!              TransportLost / │  │ ConnectIssued        │ RegistrationFailed│ Unregistered /
//!              TransportFailed ▼  │                      ▼                   ▼ TransportLost
//!                             Failed ◄───────────────────┘              Unregistered
//! ```
//!
//! Every state returns to `Idle` on `Stopped`. Triggers that have no entry in
//! the table for the current state are ignored, so a late event from a torn
//! down endpoint can never resurrect a registration.
//!
//! # Usage Examples
//!
//! ```rust
//! use switchboard_client_core::registration::RegistrationConfig;
//!
//! let config = RegistrationConfig::new("pbx.example.com", "9001", "s3cret")
//!     .with_secure(true)
//!     .with_refresh_interval_secs(300);
//!
//! assert_eq!(config.identity_uri(), "sip:9001@pbx.example.com");
//! assert_eq!(config.effective_port(), 8089);
//! assert!(config.validate().is_ok());
//! ```

mod controller;

pub use controller::RegistrationController;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{IceServer, LocalOrigin};
use crate::error::{ClientError, ClientResult};

/// Default WebSocket port when the transport is secure (Asterisk `wss`)
pub const DEFAULT_SECURE_PORT: u16 = 8089;

/// Default WebSocket port when the transport is plain (Asterisk `ws`)
pub const DEFAULT_INSECURE_PORT: u16 = 8088;

/// Default WebSocket path on the exchange
pub const DEFAULT_TRANSPORT_PATH: &str = "/ws";

/// Default registration refresh interval in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u32 = 600;

/// Default time to wait for registration before trying the fallback transport
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 5000;

/// Registration configuration for the exchange
///
/// Immutable per registration attempt: handing a different value to
/// [`RegistrationController::start`] tears the current endpoint down and
/// builds a new one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Exchange SIP domain, also the WebSocket host
    pub domain: String,

    /// Extension registered by the supervisor
    pub extension: String,

    /// SIP digest password for the extension
    ///
    /// Never logged; `Debug` output redacts it.
    pub password: String,

    /// Display name placed in the From header
    pub display_name: Option<String>,

    /// WebSocket port; 8089/8088 when unset depending on `secure`
    pub port: Option<u16>,

    /// WebSocket path on the exchange
    pub path: String,

    /// Use `wss` instead of `ws`
    pub secure: bool,

    /// Registration expiry/refresh interval in seconds
    pub refresh_interval_secs: u32,

    /// ICE servers handed to the media layer for every call
    pub ice_servers: Vec<IceServer>,

    /// Milliseconds to wait for `registered` before the fallback attempt
    pub connection_timeout_ms: u64,

    /// Origin used for the same-origin fallback transport
    pub origin: Option<LocalOrigin>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            domain: String::new(),
            extension: String::new(),
            password: String::new(),
            display_name: None,
            port: None,
            path: DEFAULT_TRANSPORT_PATH.to_string(),
            secure: true,
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            ice_servers: Vec::new(),
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            origin: None,
        }
    }
}

impl fmt::Debug for RegistrationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationConfig")
            .field("domain", &self.domain)
            .field("extension", &self.extension)
            .field("password", &"<redacted>")
            .field("display_name", &self.display_name)
            .field("port", &self.port)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("refresh_interval_secs", &self.refresh_interval_secs)
            .field("ice_servers", &self.ice_servers.len())
            .field("connection_timeout_ms", &self.connection_timeout_ms)
            .field("origin", &self.origin)
            .finish()
    }
}

impl RegistrationConfig {
    /// Create a registration configuration with default transport settings
    ///
    /// # Arguments
    ///
    /// * `domain` - Exchange domain (`pbx.example.com`)
    /// * `extension` - Supervisor extension (`9001`)
    /// * `password` - Digest password for the extension
    pub fn new(
        domain: impl Into<String>,
        extension: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            extension: extension.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Select `wss` (true) or `ws` (false)
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Use an explicit WebSocket port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Use an explicit WebSocket path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Set the registration refresh interval
    pub fn with_refresh_interval_secs(mut self, secs: u32) -> Self {
        self.refresh_interval_secs = secs;
        self
    }

    /// Set the ICE servers used for calls
    pub fn with_ice_servers(mut self, servers: Vec<IceServer>) -> Self {
        self.ice_servers = servers;
        self
    }

    /// Set the fallback timeout
    pub fn with_connection_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connection_timeout_ms = timeout_ms;
        self
    }

    /// Set the local origin used for the same-origin fallback
    pub fn with_origin(mut self, origin: LocalOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Check that the fields registration cannot work without are present
    pub fn validate(&self) -> ClientResult<()> {
        if self.domain.trim().is_empty() {
            return Err(ClientError::config("exchange domain is required"));
        }
        if self.extension.trim().is_empty() {
            return Err(ClientError::config("extension is required"));
        }
        if self.password.is_empty() {
            return Err(ClientError::config("credential is required"));
        }
        if self.domain.contains(['/', ' ', '@']) {
            return Err(ClientError::config(format!(
                "exchange domain '{}' is not a host name",
                self.domain
            )));
        }
        Ok(())
    }

    /// `sip:{extension}@{domain}`
    pub fn identity_uri(&self) -> String {
        format!("sip:{}@{}", self.extension.trim(), self.domain.trim())
    }

    /// The configured port or the scheme default
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_INSECURE_PORT
        })
    }

    /// Registration refresh interval as a `Duration`
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.refresh_interval_secs.max(1)))
    }

    /// Fallback timeout as a `Duration`
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// Current state of the supervisor registration
///
/// Owned by [`RegistrationController`]; callers only observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationState {
    /// No endpoint exists
    Idle,
    /// Transport connect has been issued
    Connecting,
    /// Transport is up, REGISTER not yet accepted
    Connected,
    /// The exchange accepted the registration; calls may be placed
    Registered,
    /// The registration was removed or lapsed while the transport lived
    Unregistered,
    /// Transport could not be established or the exchange rejected us
    Failed,
}

impl RegistrationState {
    /// Apply a trigger, returning the next state when the table has an entry
    pub fn on(self, trigger: RegistrationTrigger) -> Option<RegistrationState> {
        use RegistrationState::*;
        use RegistrationTrigger as T;

        match (self, trigger) {
            (Idle, T::Stopped) => None,
            (_, T::Stopped) => Some(Idle),

            (_, T::ConnectIssued) => Some(Connecting),

            (_, T::TransportFailed) => Some(Failed),

            (Connecting | Unregistered, T::TransportConnected) => Some(Connected),

            (Connecting | Connected | Unregistered | Registered, T::Registered) => Some(Registered),

            (Connected | Registered, T::Unregistered) => Some(Unregistered),

            (Connecting | Connected, T::TransportLost) => Some(Failed),
            (Registered | Unregistered, T::TransportLost) => Some(Unregistered),

            (Connecting | Connected | Registered | Unregistered, T::RegistrationFailed) => Some(Failed),

            _ => None,
        }
    }

    /// Whether supervisory calls may be placed in this state
    pub fn can_place_calls(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }

    /// Whether an attempt is under way or established
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            RegistrationState::Connecting | RegistrationState::Connected | RegistrationState::Registered
        )
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistrationState::Idle => "idle",
            RegistrationState::Connecting => "connecting",
            RegistrationState::Connected => "connected",
            RegistrationState::Registered => "registered",
            RegistrationState::Unregistered => "unregistered",
            RegistrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Occurrences that drive [`RegistrationState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistrationTrigger {
    /// The controller (or the endpoint, on reconnect) issued a transport connect
    ConnectIssued,
    /// The WebSocket handshake completed
    TransportConnected,
    /// The transport closed or could not be reached
    TransportLost,
    /// The endpoint or its transport could not be constructed
    TransportFailed,
    /// The exchange accepted REGISTER
    Registered,
    /// The registration was removed
    Unregistered,
    /// The exchange rejected REGISTER
    RegistrationFailed,
    /// The controller tore the endpoint down
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use RegistrationState::*;
    use RegistrationTrigger as T;

    #[test]
    fn test_happy_path_sequence() {
        let mut state = Idle;
        for trigger in [T::ConnectIssued, T::TransportConnected, T::Registered] {
            state = state.on(trigger).expect("transition exists");
        }
        assert_eq!(state, Registered);
        assert!(state.can_place_calls());
    }

    #[test]
    fn test_idle_ignores_endpoint_events() {
        for trigger in [
            T::TransportConnected,
            T::TransportLost,
            T::Registered,
            T::Unregistered,
            T::RegistrationFailed,
            T::Stopped,
        ] {
            assert_eq!(Idle.on(trigger), None, "{:?} must not leave idle", trigger);
        }
    }

    #[test]
    fn test_registration_failure_is_terminal_for_endpoint_events() {
        assert_eq!(Connected.on(T::RegistrationFailed), Some(Failed));
        assert_eq!(Failed.on(T::TransportConnected), None);
        assert_eq!(Failed.on(T::Registered), None);
        assert_eq!(Failed.on(T::ConnectIssued), Some(Connecting));
    }

    #[test]
    fn test_transport_loss_depends_on_progress() {
        assert_eq!(Connecting.on(T::TransportLost), Some(Failed));
        assert_eq!(Connected.on(T::TransportLost), Some(Failed));
        assert_eq!(Registered.on(T::TransportLost), Some(Unregistered));
    }

    #[test]
    fn test_stop_returns_to_idle_from_everywhere() {
        for state in [Connecting, Connected, Registered, Unregistered, Failed] {
            assert_eq!(state.on(T::Stopped), Some(Idle));
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistrationConfig::new("pbx.example.com", "9001", "pw").validate().is_ok());
        assert!(RegistrationConfig::new("", "9001", "pw").validate().is_err());
        assert!(RegistrationConfig::new("pbx.example.com", " ", "pw").validate().is_err());
        assert!(RegistrationConfig::new("pbx.example.com", "9001", "").validate().is_err());
        assert!(RegistrationConfig::new("pbx.example.com/ws", "9001", "pw").validate().is_err());
    }

    #[test]
    fn test_default_ports_follow_security_flag() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw");
        assert_eq!(config.with_secure(false).effective_port(), 8088);
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw").with_port(443);
        assert_eq!(config.effective_port(), 443);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "hunter2");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
