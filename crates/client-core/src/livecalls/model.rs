//! Live-call data model
//!
//! The backend reports calls with loosely typed fields: numbers arrive as
//! strings or integers, the assigned agent is an object, a bare string or a
//! number, and the token list is sometimes missing. [`LiveCall`] accepts all
//! of these and normalizes them so the rest of the crate sees one shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::direction::{self, CallDirection};

/// Reference to the agent assigned to a call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentRef {
    /// Full agent record (`{"name": "...", "extension": "205"}`)
    Object(Map<String, Value>),
    /// Bare string, often just the extension
    Text(String),
    /// Bare number, always an extension
    Number(u64),
}

impl AgentRef {
    /// Human-readable label for tables and logs
    pub fn label(&self) -> String {
        match self {
            AgentRef::Object(map) => ["name", "fullName", "username", "extension"]
                .iter()
                .find_map(|key| map.get(*key).and_then(scalar_to_string))
                .unwrap_or_else(|| "-".to_string()),
            AgentRef::Text(text) => text.clone(),
            AgentRef::Number(n) => n.to_string(),
        }
    }
}

/// One active call as reported by the backend
///
/// Immutable once produced; each poll replaces the whole collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveCall {
    /// Channel identifier (`PJSIP/205-0000001a`)
    #[serde(deserialize_with = "lenient_string", alias = "Channel")]
    pub channel: String,

    /// Group key linking the legs of one call
    #[serde(deserialize_with = "lenient_opt_string", alias = "groupId", alias = "linkedid")]
    pub group: Option<String>,

    /// Status token (`Up`, `Ringing`)
    #[serde(deserialize_with = "lenient_opt_string", alias = "state")]
    pub status: Option<String>,

    /// Duration as reported (`00:01:23` or seconds)
    #[serde(deserialize_with = "lenient_opt_string")]
    pub duration: Option<String>,

    /// Inbound number / DID
    #[serde(deserialize_with = "lenient_opt_string", alias = "inboundNumber", alias = "inbound_number")]
    pub did: Option<String>,

    /// Assigned agent
    #[serde(alias = "assignedAgent", alias = "assigned_agent")]
    pub agent: Option<AgentRef>,

    /// Branch reference, kept opaque
    pub branch: Option<Value>,

    /// Raw signaling text the backend derived the call from
    #[serde(deserialize_with = "lenient_string", alias = "rawText", alias = "raw_text")]
    pub raw: String,

    /// Tokens of the raw text
    #[serde(deserialize_with = "lenient_tokens")]
    pub tokens: Vec<String>,
}

impl LiveCall {
    /// Create a call with a channel and raw text; tokens are derived
    pub fn new(channel: impl Into<String>, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            channel: channel.into(),
            tokens: tokenize(&raw),
            raw,
            ..Default::default()
        }
    }

    /// Set the assigned agent
    pub fn with_agent(mut self, agent: AgentRef) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Replace the token list
    pub fn with_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tokens = tokens.into_iter().map(Into::into).collect();
        self
    }

    /// Key used to render the call in a list: the group when known, else the channel
    pub fn key(&self) -> &str {
        self.group
            .as_deref()
            .filter(|g| !g.is_empty())
            .unwrap_or(&self.channel)
    }

    /// Direction derived from the current fields; never cached
    pub fn direction(&self) -> CallDirection {
        direction::classify(self)
    }

    fn normalized(mut self) -> Self {
        if self.tokens.is_empty() && !self.raw.is_empty() {
            self.tokens = tokenize(&self.raw);
        }
        self
    }
}

/// Split raw signaling text into tokens
///
/// Separators are everything except alphanumerics and `+ - _`, so phone
/// numbers and UUIDs survive as single tokens.
pub fn tokenize(raw: &str) -> Vec<String> {
    raw.split(|c: char| !(c.is_alphanumeric() || matches!(c, '+' | '-' | '_')))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One poll result
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCallSnapshot {
    /// Calls currently in progress
    pub live_calls: Vec<LiveCall>,
    /// Logical call records; carried but not consumed by the supervisory flow
    pub logical_calls: Vec<LiveCall>,
    /// When the snapshot was produced
    pub fetched_at: DateTime<Utc>,
}

impl LiveCallSnapshot {
    /// An empty snapshot stamped now
    pub fn empty() -> Self {
        Self {
            live_calls: Vec::new(),
            logical_calls: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    /// Normalize a `{ liveCalls, logicalCalls }` payload
    ///
    /// Fields that are missing or not arrays become empty lists; entries that
    /// cannot be read as a call are skipped.
    pub fn from_json(payload: &Value) -> Self {
        Self {
            live_calls: call_list(payload, &["liveCalls", "live_calls"]),
            logical_calls: call_list(payload, &["logicalCalls", "logical_calls"]),
            fetched_at: Utc::now(),
        }
    }
}

fn call_list(payload: &Value, keys: &[&str]) -> Vec<LiveCall> {
    let Some(field) = keys.iter().find_map(|key| payload.get(*key)) else {
        return Vec::new();
    };
    let Some(items) = field.as_array() else {
        debug!("Field {} is not an array, treating as empty", keys[0]);
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match LiveCall::deserialize(item) {
            Ok(call) => Some(call.normalized()),
            Err(e) => {
                warn!("Skipping unreadable live call entry: {}", e);
                None
            }
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(scalar_to_string(&Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(scalar_to_string(&Value::deserialize(deserializer)?))
}

fn lenient_tokens<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        Value::String(text) => tokenize(&text),
        _ => Vec::new(),
    })
}
