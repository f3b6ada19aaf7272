//! Call direction classification
//!
//! Direction is a pure function of a call's tokens and raw text, evaluated as
//! an ordered rule chain. The first rule that matches decides:
//!
//! | # | Rule             | Evidence                                                  | Result   |
//! |---|------------------|-----------------------------------------------------------|----------|
//! | 1 | `phone-token`    | a token of 7-15 digits, optional leading `+`              | Outgoing |
//! | 2 | `uuid-token`     | a token shaped like a UUID                                | Inbound  |
//! | 3 | `inbound-marker` | raw text mentions `incoming` or an external-origin context | Inbound  |
//! | 4 | `outbound-marker`| raw text mentions `outgoing`, `outbound` or `dial`        | Outgoing |
//!
//! When nothing matches the call is `Inbound`.
//!
//! ```rust
//! use switchboard_client_core::livecalls::{classify, CallDirection, LiveCall};
//!
//! let call = LiveCall::new("PJSIP/trunk-01", "").with_tokens(["14155550100"]);
//! assert_eq!(classify(&call), CallDirection::Outgoing);
//! ```

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::model::LiveCall;

static PHONE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?\d{7,15}$").unwrap());
static UUID_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").unwrap()
});
static INBOUND_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)incoming|from-external|from-trunk|from-pstn").unwrap());
static OUTBOUND_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)outgoing|outbound|dial").unwrap());

/// Direction of a live call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Placed from inside the organization
    Outgoing,
    /// Received from outside
    Inbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Outgoing => f.write_str("outgoing"),
            CallDirection::Inbound => f.write_str("inbound"),
        }
    }
}

/// What the rules look at
#[derive(Debug, Clone, Copy)]
pub struct CallEvidence<'a> {
    /// Token list of the call
    pub tokens: &'a [String],
    /// Raw signaling text
    pub raw: &'a str,
}

impl<'a> CallEvidence<'a> {
    /// Tokens that look like phone numbers
    pub fn phone_tokens(&self) -> impl Iterator<Item = &'a str> + 'a {
        let tokens = self.tokens;
        tokens.iter().map(|t| t.trim()).filter(|t| PHONE_TOKEN.is_match(t))
    }

    /// Tokens that look like UUIDs
    pub fn uuid_tokens(&self) -> impl Iterator<Item = &'a str> + 'a {
        let tokens = self.tokens;
        tokens.iter().map(|t| t.trim()).filter(|t| UUID_TOKEN.is_match(t))
    }
}

/// One link of the classification chain
pub struct DirectionRule {
    /// Rule name, reported by [`explain`]
    pub name: &'static str,
    /// Predicate over the evidence
    pub matches: fn(&CallEvidence<'_>) -> bool,
    /// Direction when the predicate holds
    pub direction: CallDirection,
}

impl fmt::Debug for DirectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectionRule")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .finish()
    }
}

/// The chain, in evaluation order
pub static RULES: [DirectionRule; 4] = [
    DirectionRule {
        name: "phone-token",
        matches: has_phone_token,
        direction: CallDirection::Outgoing,
    },
    DirectionRule {
        name: "uuid-token",
        matches: has_uuid_token,
        direction: CallDirection::Inbound,
    },
    DirectionRule {
        name: "inbound-marker",
        matches: has_inbound_marker,
        direction: CallDirection::Inbound,
    },
    DirectionRule {
        name: "outbound-marker",
        matches: has_outbound_marker,
        direction: CallDirection::Outgoing,
    },
];

fn has_phone_token(evidence: &CallEvidence<'_>) -> bool {
    evidence.phone_tokens().next().is_some()
}

fn has_uuid_token(evidence: &CallEvidence<'_>) -> bool {
    evidence.uuid_tokens().next().is_some()
}

fn has_inbound_marker(evidence: &CallEvidence<'_>) -> bool {
    INBOUND_MARKER.is_match(evidence.raw)
}

fn has_outbound_marker(evidence: &CallEvidence<'_>) -> bool {
    OUTBOUND_MARKER.is_match(evidence.raw)
}

/// Direction when no rule matches
pub const DEFAULT_DIRECTION: CallDirection = CallDirection::Inbound;

/// Classify a live call
pub fn classify(call: &LiveCall) -> CallDirection {
    classify_parts(&call.tokens, &call.raw)
}

/// Classify from tokens and raw text directly
pub fn classify_parts(tokens: &[String], raw: &str) -> CallDirection {
    explain_parts(tokens, raw).0
}

/// Classify a call and report which rule decided (`None` for the default)
pub fn explain(call: &LiveCall) -> (CallDirection, Option<&'static str>) {
    explain_parts(&call.tokens, &call.raw)
}

fn explain_parts(tokens: &[String], raw: &str) -> (CallDirection, Option<&'static str>) {
    let evidence = CallEvidence { tokens, raw };
    RULES
        .iter()
        .find(|rule| (rule.matches)(&evidence))
        .map(|rule| (rule.direction, Some(rule.name)))
        .unwrap_or((DEFAULT_DIRECTION, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_phone_token_is_outgoing() {
        let call = LiveCall::new("c", "").with_tokens(["14155550100"]);
        assert_eq!(explain(&call), (CallDirection::Outgoing, Some("phone-token")));
    }

    #[test]
    fn test_uuid_only_is_inbound() {
        let call = LiveCall::new("c", "").with_tokens(["c56a4180-65aa-42ec-a945-5fd21dec0538"]);
        assert_eq!(explain(&call), (CallDirection::Inbound, Some("uuid-token")));
    }

    #[test]
    fn test_raw_external_marker_is_inbound() {
        let call = LiveCall {
            channel: "c".into(),
            raw: "Local/s@FROM-EXTERNAL-0001".into(),
            ..Default::default()
        };
        assert!(call.tokens.is_empty());
        assert_eq!(explain(&call), (CallDirection::Inbound, Some("inbound-marker")));
    }

    #[test]
    fn test_phone_wins_over_uuid() {
        let call = LiveCall::new("c", "").with_tokens([
            "c56a4180-65aa-42ec-a945-5fd21dec0538",
            "+14155550100",
        ]);
        assert_eq!(classify(&call), CallDirection::Outgoing);
    }

    #[test]
    fn test_tokens_win_over_raw_hints() {
        let t = tokens(&["c56a4180-65aa-42ec-a945-5fd21dec0538"]);
        assert_eq!(classify_parts(&t, "outbound dial"), CallDirection::Inbound);

        let t = tokens(&["5550100123"]);
        assert_eq!(classify_parts(&t, "incoming"), CallDirection::Outgoing);
    }

    #[test]
    fn test_raw_outbound_markers() {
        for raw in ["Outgoing call", "OUTBOUND route", "dial-out"] {
            assert_eq!(classify_parts(&[], raw), CallDirection::Outgoing, "{}", raw);
        }
    }

    #[test]
    fn test_defaults_to_inbound() {
        assert_eq!(explain_parts(&tokens(&["205", "abc"]), "PJSIP/205"), (CallDirection::Inbound, None));
    }

    #[test]
    fn test_phone_pattern_bounds() {
        let short = tokens(&["123456"]);
        let long = tokens(&["1234567890123456"]);
        let plus = tokens(&["+1234567"]);
        assert_eq!(classify_parts(&short, ""), CallDirection::Inbound);
        assert_eq!(classify_parts(&long, ""), CallDirection::Inbound);
        assert_eq!(classify_parts(&plus, ""), CallDirection::Outgoing);
    }
}
