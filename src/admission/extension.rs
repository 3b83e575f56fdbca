//! Capability identifiers and the capability descriptor.
//!
//! Callers discover rate limit signaling through the service's capability
//! descriptor and request it per call by listing [`URI`] in the
//! [`EXTENSION_HEADER`] header.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Capability identifier for usage signaling.
pub const URI: &str = "https://github.com/a2aproject/a2a-samples/extensions/ratelimiter/v1";

/// Metadata field carrying a caller's policy override.
pub const RATE_LIMIT_FIELD: &str = "github.com/a2aproject/a2a-samples/extensions/ratelimiter/v1/limits";

/// Metadata field carrying the serialized result.
pub const RATE_LIMIT_RESULT_FIELD: &str =
    "github.com/a2aproject/a2a-samples/extensions/ratelimiter/v1/result";

/// Header listing the extensions a caller requests.
pub const EXTENSION_HEADER: &str = "X-A2A-Extensions";

/// One advertised extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentExtension {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub extensions: Vec<AgentExtension>,
}

/// Published description of a service's capabilities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

/// The descriptor entry for usage signaling.
pub fn agent_extension() -> AgentExtension {
    AgentExtension {
        uri: URI.to_string(),
        description: Some("Provides rate limiting capabilities for agent requests.".to_string()),
        required: false,
    }
}

/// Advertise usage signaling on `card`. Adding twice is a no-op.
pub fn add_to_card(mut card: AgentCard) -> AgentCard {
    if !card.capabilities.extensions.iter().any(|ext| ext.uri == URI) {
        card.capabilities.extensions.push(agent_extension());
    }
    card
}

/// Whether `card` advertises usage signaling.
pub fn is_supported(card: Option<&AgentCard>) -> bool {
    card.map_or(false, |card| {
        card.capabilities.extensions.iter().any(|ext| ext.uri == URI)
    })
}

/// Add [`URI`] to the outgoing extension header, keeping existing entries.
pub fn request_activation(headers: &mut HashMap<String, String>) {
    let current = headers
        .get(EXTENSION_HEADER)
        .map(|value| value.trim().to_string())
        .unwrap_or_default();

    if current.split(',').any(|uri| uri.trim() == URI) {
        return;
    }

    let value = if current.is_empty() {
        URI.to_string()
    } else {
        format!("{}, {}", current, URI)
    };
    headers.insert(EXTENSION_HEADER.to_string(), value);
}

/// Client side: request usage signals from a service that advertises them.
///
/// Leaves `headers` alone when `card` does not list [`URI`]. Returns whether
/// activation was requested.
pub fn intercept(card: Option<&AgentCard>, headers: &mut HashMap<String, String>) -> bool {
    if !is_supported(card) {
        return false;
    }
    request_activation(headers);
    true
}
