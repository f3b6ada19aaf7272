//! HTTP client for the operator backend
//!
//! Two calls are needed by the supervisor flow:
//!
//! - `GET {base}{user_details_path}` returns the operator's user record, from
//!   which the business identifier is taken
//! - `GET {base}{live_calls_path}/{businessId}` returns
//!   `{ liveCalls: [...], logicalCalls: [...] }`
//!
//! [`BackendClient`] implements [`BusinessIdentity`] and [`LiveCallFetcher`]
//! so it can be handed straight to a [`LiveCallFeed`](crate::livecalls::LiveCallFeed).

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::config::BackendConfig;
use crate::error::{ClientError, ClientResult, PollError};
use crate::livecalls::{BusinessIdentity, LiveCallFetcher, LiveCallSnapshot};

/// reqwest-based backend client
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: Client,
    base: Url,
    config: BackendConfig,
}

impl BackendClient {
    /// Build a client; fails on an unusable base URL
    pub fn new(config: BackendConfig) -> ClientResult<Self> {
        let base = Url::parse(config.base_url.trim())
            .map_err(|e| ClientError::config(format!("invalid backend URL '{}': {}", config.base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::config(format!(
                "backend URL '{}' cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base, config })
    }

    /// The configuration this client was built from
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn url(&self, path: &str, extra: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty();
            segments.extend(path.split('/').filter(|s| !s.is_empty()));
            segments.extend(extra);
        }
        url
    }

    async fn get_json(&self, url: Url) -> Result<Value, PollError> {
        debug!("GET {}", url);
        let mut request = self.client.get(url);
        if let Some(token) = self.config.api_token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PollError::Request("request timed out".into())
            } else {
                PollError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status {
                status: status.as_u16(),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| PollError::Request(e.to_string()))?;
        trace!("Response body: {}", body);
        serde_json::from_str(&body).map_err(|e| PollError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BusinessIdentity for BackendClient {
    async fn business_id(&self) -> Result<String, PollError> {
        let body = self
            .get_json(self.url(&self.config.user_details_path, &[]))
            .await
            .map_err(|e| PollError::IdentityUnavailable(e.to_string()))?;
        extract_business_id(&body)
            .ok_or_else(|| PollError::IdentityUnavailable("user details carry no business identifier".into()))
    }
}

#[async_trait]
impl LiveCallFetcher for BackendClient {
    async fn fetch(&self, business_id: &str) -> Result<LiveCallSnapshot, PollError> {
        let body = self
            .get_json(self.url(&self.config.live_calls_path, &[business_id]))
            .await?;
        Ok(LiveCallSnapshot::from_json(&body))
    }
}

/// Find the business identifier in a user-details payload
///
/// Looks for `businessId`, `business_id`, or `business` (an id string or an
/// object with `id`/`_id`), first at the top level, then under `data`,
/// `user` and `data.user`.
pub fn extract_business_id(body: &Value) -> Option<String> {
    let data = body.get("data");
    let scopes = [
        Some(body),
        data,
        body.get("user"),
        data.and_then(|d| d.get("user")),
    ];

    scopes.into_iter().flatten().find_map(|scope| {
        ["businessId", "business_id"]
            .iter()
            .find_map(|key| scope.get(*key).and_then(id_string))
            .or_else(|| {
                scope.get("business").and_then(|business| {
                    if business.is_object() {
                        ["id", "_id"]
                            .iter()
                            .find_map(|key| business.get(*key).and_then(id_string))
                    } else {
                        id_string(business)
                    }
                })
            })
    })
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_business_id_locations() {
        assert_eq!(extract_business_id(&json!({"businessId": "b1"})).as_deref(), Some("b1"));
        assert_eq!(extract_business_id(&json!({"business_id": 42})).as_deref(), Some("42"));
        assert_eq!(
            extract_business_id(&json!({"data": {"business": {"_id": "b3"}}})).as_deref(),
            Some("b3")
        );
        assert_eq!(
            extract_business_id(&json!({"data": {"user": {"business": "b4"}}})).as_deref(),
            Some("b4")
        );
        assert_eq!(extract_business_id(&json!({"user": {"businessId": ""}})), None);
        assert_eq!(extract_business_id(&json!({"name": "operator"})), None);
    }

    #[test]
    fn test_url_joins_paths_and_encodes_id() {
        let client = BackendClient::new(BackendConfig::new("https://api.example.com/v1/")).unwrap();
        assert_eq!(
            client.url("/asterisk/livecalls", &["biz 1"]).as_str(),
            "https://api.example.com/v1/asterisk/livecalls/biz%201"
        );
        assert_eq!(
            client.url("/user/details", &[]).as_str(),
            "https://api.example.com/v1/user/details"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(BackendClient::new(BackendConfig::new("not a url")).is_err());
        assert!(BackendClient::new(BackendConfig::new("mailto:ops@example.com")).is_err());
    }
}
