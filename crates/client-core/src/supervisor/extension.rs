//! Agent extension derivation
//!
//! The backend reports the assigned agent in several shapes. Three
//! strategies are tried in order and the first that yields an extension wins:
//!
//! 1. [`from_agent_field`] - an extension-like field of an agent object
//! 2. [`from_agent_digits`] - an agent given as a bare digit string or number
//! 3. [`from_embedded_digits`] - a run of 3+ digits inside the channel or agent text

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::SupervisoryAction;
use crate::livecalls::{AgentRef, LiveCall};

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());

/// Agent object keys that carry an extension, in priority order
pub const EXTENSION_KEYS: [&str; 5] = ["extension", "ext", "sipExtension", "sip_extension", "extensionNumber"];

/// A named extraction strategy
pub type Strategy = (&'static str, fn(&LiveCall) -> Option<String>);

/// The strategies in evaluation order
pub const STRATEGIES: [Strategy; 3] = [
    ("agent-field", from_agent_field),
    ("agent-digits", from_agent_digits),
    ("embedded-digits", from_embedded_digits),
];

/// Extension from an agent object's extension-like field
pub fn from_agent_field(call: &LiveCall) -> Option<String> {
    let Some(AgentRef::Object(agent)) = &call.agent else {
        return None;
    };
    EXTENSION_KEYS.iter().find_map(|key| match agent.get(*key)? {
        Value::String(s) => digits_only(s.trim()),
        Value::Number(n) => n.as_u64().map(|n| n.to_string()),
        _ => None,
    })
}

/// Extension from an agent given as digits only
pub fn from_agent_digits(call: &LiveCall) -> Option<String> {
    match call.agent.as_ref()? {
        AgentRef::Text(text) => digits_only(text.trim()),
        AgentRef::Number(n) => Some(n.to_string()),
        AgentRef::Object(_) => None,
    }
}

/// Extension embedded in the channel name, else in the agent text
pub fn from_embedded_digits(call: &LiveCall) -> Option<String> {
    let agent_text = match &call.agent {
        Some(AgentRef::Text(text)) => Some(text.as_str()),
        _ => None,
    };
    std::iter::once(call.channel.as_str())
        .chain(agent_text)
        .find_map(|text| DIGIT_RUN.find(text).map(|m| m.as_str().to_string()))
}

/// Run the strategies in order
pub fn derive_extension(call: &LiveCall) -> Option<String> {
    STRATEGIES.iter().find_map(|(_, strategy)| strategy(call))
}

/// `sip:{code}{extension}@{domain}`, or the bare dial string without a domain
pub fn dial_target(action: SupervisoryAction, extension: &str, domain: Option<&str>) -> String {
    let dial = format!("{}{}", action.feature_code(), extension);
    match domain.map(str::trim).filter(|d| !d.is_empty()) {
        Some(domain) => format!("sip:{}@{}", dial, domain),
        None => dial,
    }
}

fn digits_only(text: &str) -> Option<String> {
    (!text.is_empty() && text.chars().all(|c| c.is_ascii_digit())).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn agent_object(value: Value) -> AgentRef {
        match value {
            Value::Object(map) => AgentRef::Object(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_agent_field_strategy() {
        let call = LiveCall::new("PJSIP/trunk-0001", "").with_agent(agent_object(json!({"name": "Dana", "extension": "205"})));
        assert_eq!(from_agent_field(&call).as_deref(), Some("205"));

        let call = LiveCall::new("x", "").with_agent(agent_object(json!({"sipExtension": 310})));
        assert_eq!(from_agent_field(&call).as_deref(), Some("310"));

        let call = LiveCall::new("x", "").with_agent(agent_object(json!({"extension": "ext-205"})));
        assert_eq!(from_agent_field(&call), None);
    }

    #[test]
    fn test_agent_digits_strategy() {
        let call = LiveCall::new("x", "").with_agent(AgentRef::Text(" 206 ".into()));
        assert_eq!(from_agent_digits(&call).as_deref(), Some("206"));

        let call = LiveCall::new("x", "").with_agent(AgentRef::Number(207));
        assert_eq!(from_agent_digits(&call).as_deref(), Some("207"));

        let call = LiveCall::new("x", "").with_agent(AgentRef::Text("Agent 208".into()));
        assert_eq!(from_agent_digits(&call), None);
    }

    #[test]
    fn test_embedded_digits_strategy() {
        let call = LiveCall::new("PJSIP/209-0000002c", "");
        assert_eq!(from_embedded_digits(&call).as_deref(), Some("209"));

        let call = LiveCall::new("Local/s@queue", "").with_agent(AgentRef::Text("Agent/2101".into()));
        assert_eq!(from_embedded_digits(&call).as_deref(), Some("2101"));

        let call = LiveCall::new("PJSIP/ab-12", "");
        assert_eq!(from_embedded_digits(&call), None);
    }

    #[test]
    fn test_strategy_order() {
        let call = LiveCall::new("PJSIP/999-0001", "").with_agent(agent_object(json!({"ext": "205"})));
        assert_eq!(derive_extension(&call).as_deref(), Some("205"));

        let call = LiveCall::new("Local/queue", "");
        assert_eq!(derive_extension(&call), None);
    }

    #[test]
    fn test_dial_target() {
        assert_eq!(
            dial_target(SupervisoryAction::Barge, "205", Some("pbx.example.com")),
            "sip:*92205@pbx.example.com"
        );
        assert_eq!(dial_target(SupervisoryAction::Monitor, "205", None), "*90205");
        assert_eq!(dial_target(SupervisoryAction::Whisper, "205", Some(" ")), "*91205");
    }
}
