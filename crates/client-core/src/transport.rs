//! Signaling transport address selection
//!
//! The primary transport is the exchange's own WebSocket listener. When that
//! cannot be reached (blocked port, TLS policy of the console's origin) the
//! controller retries once through a WebSocket proxied on the console's own
//! origin, with the scheme matching that origin.

use std::fmt;

use crate::registration::RegistrationConfig;

/// Which transport candidate an address represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// `{ws|wss}://{domain}:{port}{path}`
    Primary,
    /// `{ws|wss}://{origin host}{path}`
    SameOrigin,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Primary => f.write_str("primary"),
            TransportKind::SameOrigin => f.write_str("same-origin"),
        }
    }
}

/// A resolved WebSocket URL for the signaling endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAddress {
    /// Full WebSocket URL
    pub url: String,
    /// Candidate kind
    pub kind: TransportKind,
}

impl TransportAddress {
    /// Whether this is the fallback candidate
    pub fn is_fallback(&self) -> bool {
        self.kind == TransportKind::SameOrigin
    }
}

impl fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}

/// Builds primary and fallback transport addresses from configuration
pub struct TransportResolver;

impl TransportResolver {
    /// The exchange's own WebSocket listener
    ///
    /// ```rust
    /// use switchboard_client_core::registration::RegistrationConfig;
    /// use switchboard_client_core::transport::TransportResolver;
    ///
    /// let config = RegistrationConfig::new("pbx.example.com", "9001", "pw");
    /// let address = TransportResolver::primary(&config);
    /// assert_eq!(address.url, "wss://pbx.example.com:8089/ws");
    /// ```
    pub fn primary(config: &RegistrationConfig) -> TransportAddress {
        let scheme = if config.secure { "wss" } else { "ws" };
        TransportAddress {
            url: format!(
                "{}://{}:{}{}",
                scheme,
                config.domain.trim(),
                config.effective_port(),
                normalize_path(&config.path)
            ),
            kind: TransportKind::Primary,
        }
    }

    /// The same-origin candidate, if an origin is configured
    pub fn fallback(config: &RegistrationConfig) -> Option<TransportAddress> {
        let origin = config.origin.as_ref()?;
        let host = origin.host.trim().trim_end_matches('/');
        if host.is_empty() {
            return None;
        }
        let scheme = if origin.secure { "wss" } else { "ws" };
        Some(TransportAddress {
            url: format!("{}://{}{}", scheme, host, normalize_path(&config.path)),
            kind: TransportKind::SameOrigin,
        })
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() {
        String::new()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalOrigin;

    #[test]
    fn test_primary_uses_scheme_default_ports() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw").with_secure(false);
        assert_eq!(TransportResolver::primary(&config).url, "ws://pbx.example.com:8088/ws");

        let config = config.with_secure(true).with_port(7443).with_path("sip");
        assert_eq!(TransportResolver::primary(&config).url, "wss://pbx.example.com:7443/sip");
    }

    #[test]
    fn test_fallback_follows_origin_scheme() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw")
            .with_secure(false)
            .with_origin(LocalOrigin::new("console.example.com", true));
        let fallback = TransportResolver::fallback(&config).expect("origin configured");
        assert_eq!(fallback.url, "wss://console.example.com/ws");
        assert!(fallback.is_fallback());

        let config = config.with_origin(LocalOrigin::new("localhost:8080", false));
        assert_eq!(
            TransportResolver::fallback(&config).map(|a| a.url),
            Some("ws://localhost:8080/ws".to_string())
        );
    }

    #[test]
    fn test_no_fallback_without_origin() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw");
        assert!(TransportResolver::fallback(&config).is_none());

        let config = config.with_origin(LocalOrigin::new("  ", true));
        assert!(TransportResolver::fallback(&config).is_none());
    }

    #[test]
    fn test_empty_path_is_omitted() {
        let config = RegistrationConfig::new("pbx.example.com", "9001", "pw").with_path("");
        assert_eq!(TransportResolver::primary(&config).url, "wss://pbx.example.com:8089");
    }
}
