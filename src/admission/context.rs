//! Request context and response message shapes seen by the admission layer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::extension::RATE_LIMIT_RESULT_FIELD;
use crate::ratelimit::UsageSignal;

/// What the admission layer knows about an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Authenticated client identifier, if any
    pub client_id: Option<String>,
    /// Network address of the caller
    pub remote_addr: Option<String>,
    /// End-user identifier, if any
    pub user_id: Option<String>,
    /// Subscription tier used to select a policy
    pub tier: Option<String>,
    /// Extension URIs the caller asked for
    pub requested_extensions: HashSet<String>,
    /// Request metadata (policy overrides live here)
    pub metadata: Map<String, Value>,
    activated_extensions: HashSet<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.tier = Some(tier.into());
        self
    }

    pub fn with_requested_extension(mut self, uri: impl Into<String>) -> Self {
        self.requested_extensions.insert(uri.into());
        self
    }

    /// Request every extension listed in a comma-separated header value.
    pub fn with_extension_header(mut self, header: &str) -> Self {
        self.requested_extensions.extend(
            header
                .split(',')
                .map(str::trim)
                .filter(|uri| !uri.is_empty())
                .map(str::to_string),
        );
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the caller asked for `uri`.
    pub fn is_requested(&self, uri: &str) -> bool {
        self.requested_extensions.contains(uri)
    }

    /// Record that `uri` is active for this request.
    pub fn add_activated_extension(&mut self, uri: impl Into<String>) {
        self.activated_extensions.insert(uri.into());
    }

    pub fn activated_extensions(&self) -> &HashSet<String> {
        &self.activated_extensions
    }
}

/// A message produced for the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub text: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// The usage signal attached to this message, if any.
    pub fn usage_signal(&self) -> Option<UsageSignal> {
        self.metadata
            .get(RATE_LIMIT_RESULT_FIELD)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extension_header_parsing() {
        let context = RequestContext::new().with_extension_header("https://a/v1, https://b/v1 ,,");
        assert!(context.is_requested("https://a/v1"));
        assert!(context.is_requested("https://b/v1"));
        assert_eq!(context.requested_extensions.len(), 2);
    }

    #[test]
    fn test_activation_is_recorded() {
        let mut context = RequestContext::new();
        assert!(context.activated_extensions().is_empty());
        context.add_activated_extension("https://a/v1");
        assert!(context.activated_extensions().contains("https://a/v1"));
    }

    #[test]
    fn test_message_serialization_omits_empty_metadata() {
        let message = Message::text("Hello World");
        assert_eq!(serde_json::to_value(&message).unwrap(), json!({"text": "Hello World"}));
        assert!(message.usage_signal().is_none());
    }
}
