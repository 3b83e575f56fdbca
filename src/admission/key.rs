//! Strategies for deriving a rate limit key from a request.

use super::context::RequestContext;
use crate::error::{GatekeeperError, Result};

/// Key used when no identity can be derived from the request.
///
/// Every unidentified caller shares this one bucket.
pub const FALLBACK_KEY: &str = "global:default";

/// Maps a request context to a stable key.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, context: &RequestContext) -> Result<String>;
}

impl<F> KeyExtractor for F
where
    F: Fn(&RequestContext) -> Result<String> + Send + Sync,
{
    fn extract(&self, context: &RequestContext) -> Result<String> {
        self(context)
    }
}

/// Uses the first identity present, in order: client id, remote address,
/// user id. Keys are prefixed (`client:`, `ip:`, `user:`) so identities of
/// different kinds never collide.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyExtractor;

impl KeyExtractor for DefaultKeyExtractor {
    fn extract(&self, context: &RequestContext) -> Result<String> {
        let present = |value: &Option<String>| value.as_deref().filter(|v| !v.is_empty()).map(str::to_string);

        if let Some(client_id) = present(&context.client_id) {
            return Ok(format!("client:{}", client_id));
        }
        if let Some(remote_addr) = present(&context.remote_addr) {
            return Ok(format!("ip:{}", remote_addr));
        }
        if let Some(user_id) = present(&context.user_id) {
            return Ok(format!("user:{}", user_id));
        }

        Err(GatekeeperError::KeyExtraction(
            "request carries no client id, remote address or user id".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_takes_priority() {
        let context = RequestContext::new()
            .with_client_id("abc")
            .with_remote_addr("10.0.0.1")
            .with_user_id("u1");
        assert_eq!(DefaultKeyExtractor.extract(&context).unwrap(), "client:abc");
    }

    #[test]
    fn test_remote_addr_then_user() {
        let context = RequestContext::new().with_remote_addr("10.0.0.1").with_user_id("u1");
        assert_eq!(DefaultKeyExtractor.extract(&context).unwrap(), "ip:10.0.0.1");

        let context = RequestContext::new().with_user_id("u1");
        assert_eq!(DefaultKeyExtractor.extract(&context).unwrap(), "user:u1");
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let context = RequestContext::new().with_client_id("").with_remote_addr("10.0.0.1");
        assert_eq!(DefaultKeyExtractor.extract(&context).unwrap(), "ip:10.0.0.1");
    }

    #[test]
    fn test_no_identity_is_an_error() {
        let result = DefaultKeyExtractor.extract(&RequestContext::new());
        assert!(matches!(result, Err(GatekeeperError::KeyExtraction(_))));
    }

    #[test]
    fn test_closure_extractor() {
        let by_tier = |context: &RequestContext| -> Result<String> {
            Ok(format!("tier:{}", context.tier.clone().unwrap_or_default()))
        };
        let context = RequestContext::new().with_tier("gold");
        assert_eq!(by_tier.extract(&context).unwrap(), "tier:gold");
    }
}
