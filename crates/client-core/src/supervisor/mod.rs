//! Supervisory call control
//!
//! A supervisor joins a live agent call by dialing a feature code followed by
//! the agent's extension. The exchange's dial plan decides what the code
//! means:
//!
//! | Action  | Code  | Supervisor hears | Agent hears supervisor | Caller hears supervisor |
//! |---------|-------|------------------|------------------------|-------------------------|
//! | monitor | `*90` | both parties     | no                     | no                      |
//! | whisper | `*91` | both parties     | yes                    | no                      |
//! | barge   | `*92` | both parties     | yes                    | yes                     |
//!
//! [`SupervisoryCallManager`] derives the extension, dials through the
//! registered endpoint and tracks at most one [`Session`] per action.

pub mod extension;
mod manager;
mod session;

pub use extension::{derive_extension, dial_target};
pub use manager::{DuplicatePolicy, OutputFactory, SupervisoryCallManager};
pub use session::{Session, SessionState};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of supervisory intervention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisoryAction {
    /// Listen silently
    Monitor,
    /// Speak to the agent only
    Whisper,
    /// Join the call
    Barge,
}

impl SupervisoryAction {
    /// All actions
    pub const ALL: [SupervisoryAction; 3] = [
        SupervisoryAction::Monitor,
        SupervisoryAction::Whisper,
        SupervisoryAction::Barge,
    ];

    /// Dial-plan prefix; a contract with the exchange
    pub fn feature_code(&self) -> &'static str {
        match self {
            SupervisoryAction::Monitor => "*90",
            SupervisoryAction::Whisper => "*91",
            SupervisoryAction::Barge => "*92",
        }
    }
}

impl fmt::Display for SupervisoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisoryAction::Monitor => f.write_str("monitor"),
            SupervisoryAction::Whisper => f.write_str("whisper"),
            SupervisoryAction::Barge => f.write_str("barge"),
        }
    }
}

impl FromStr for SupervisoryAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monitor" | "listen" => Ok(SupervisoryAction::Monitor),
            "whisper" => Ok(SupervisoryAction::Whisper),
            "barge" => Ok(SupervisoryAction::Barge),
            other => Err(format!("unknown supervisory action '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_codes_are_fixed() {
        let codes: Vec<_> = SupervisoryAction::ALL.iter().map(|a| a.feature_code()).collect();
        assert_eq!(codes, vec!["*90", "*91", "*92"]);
    }

    #[test]
    fn test_parse_action() {
        assert_eq!("Barge".parse::<SupervisoryAction>(), Ok(SupervisoryAction::Barge));
        assert!("spy".parse::<SupervisoryAction>().is_err());
    }
}
