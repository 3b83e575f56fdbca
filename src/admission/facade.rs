//! Admission control: key extraction, limiter invocation and usage signals.
//!
//! Enforcement always happens. Communication is opt-in: the result is
//! attached to responses only when the caller requested the capability.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use super::context::{Message, RequestContext};
use super::extension::{RATE_LIMIT_FIELD, RATE_LIMIT_RESULT_FIELD, URI};
use super::handler::{Handler, RateLimited};
use super::key::{DefaultKeyExtractor, KeyExtractor, FALLBACK_KEY};
use crate::error::Result;
use crate::ratelimit::{Policy, PolicyOverride, PolicyTable, RateLimitResult, RateLimiter};

/// The outcome of an admission decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The request may proceed.
    Allowed(RateLimitResult),
    /// The request must not proceed; `message` is the standard refusal text.
    Denied {
        result: RateLimitResult,
        message: String,
    },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed(_))
    }

    pub fn result(&self) -> &RateLimitResult {
        match self {
            Admission::Allowed(result) => result,
            Admission::Denied { result, .. } => result,
        }
    }
}

/// The refusal text shown to callers when a request is denied.
pub fn denial_message(result: &RateLimitResult) -> String {
    let retry_after = result
        .retry_after()
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    format!(
        "Rate limit exceeded. {} requests remaining. Retry after {:.1} seconds.",
        result.remaining(),
        retry_after
    )
}

/// Per-request view of an [`AdmissionControl`] that only touches the
/// limiter when the caller activated usage signaling.
pub struct RateLimitHelper<'a> {
    active: bool,
    admission: &'a AdmissionControl,
    context: &'a RequestContext,
}

impl RateLimitHelper<'_> {
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Check the limit if active.
    pub fn check(&self, policy: &Policy) -> Result<Option<RateLimitResult>> {
        if !self.active {
            return Ok(None);
        }
        self.admission.check(self.context, policy).map(Some)
    }

    /// Check and decide admission if active.
    pub fn enforce(&self, policy: &Policy) -> Result<Option<Admission>> {
        if !self.active {
            return Ok(None);
        }
        self.admission.admit(self.context, policy).map(Some)
    }
}

/// Admission control facade.
///
/// Holds one limiter for the life of the service; share it behind an `Arc`.
pub struct AdmissionControl {
    limiter: Arc<RateLimiter>,
    extractor: Arc<dyn KeyExtractor>,
    policies: PolicyTable,
}

impl AdmissionControl {
    /// Create a facade using the default key extractor and policy.
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            extractor: Arc::new(DefaultKeyExtractor),
            policies: PolicyTable::default(),
        }
    }

    /// Replace the key extraction strategy.
    pub fn with_key_extractor(mut self, extractor: impl KeyExtractor + 'static) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    /// Replace the default and per-tier policies.
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    /// Derive the key for `context`, falling back to [`FALLBACK_KEY`].
    pub fn key_for(&self, context: &RequestContext) -> String {
        match self.extractor.extract(context) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, fallback = FALLBACK_KEY, "Using fallback rate limit key");
                FALLBACK_KEY.to_string()
            }
        }
    }

    /// Whether the caller requested usage signals.
    pub fn is_activated(&self, context: &RequestContext) -> bool {
        context.is_requested(URI)
    }

    /// Mark usage signaling active on `context` if the caller requested it.
    pub fn activate(&self, context: &mut RequestContext) -> bool {
        if self.is_activated(context) {
            context.add_activated_extension(URI);
            true
        } else {
            false
        }
    }

    /// The policy for `context`: its tier's policy (or the default),
    /// overridden field by field by the caller's metadata.
    pub fn policy_for(&self, context: &RequestContext) -> Result<Policy> {
        let base = self.policies.resolve(context.tier.as_deref());
        match context.metadata.get(RATE_LIMIT_FIELD) {
            Some(value) => PolicyOverride::from_value(value)?.apply(base),
            None => Ok(base),
        }
    }

    /// Check the limiter for the key derived from `context`.
    #[instrument(skip(self, context, policy), fields(limit = policy.limit, window = ?policy.window))]
    pub fn check(&self, context: &RequestContext, policy: &Policy) -> Result<RateLimitResult> {
        let key = self.key_for(context);
        let result = self.limiter.check(&key, policy)?;

        if !result.allowed() {
            debug!(
                key = %key,
                limit_type = result.limit_type(),
                retry_after = ?result.retry_after(),
                reset_at = ?result.reset_at(),
                "Rate limit exceeded"
            );
        }

        Ok(result)
    }

    /// Check only when the caller activated usage signaling.
    pub fn check_if_activated(
        &self,
        context: &mut RequestContext,
        policy: &Policy,
    ) -> Result<Option<RateLimitResult>> {
        if self.activate(context) {
            self.check(context, policy).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Activate `context` if requested and hand back a helper bound to it.
    pub fn helper<'a>(&'a self, context: &'a mut RequestContext) -> RateLimitHelper<'a> {
        let active = self.activate(context);
        RateLimitHelper {
            active,
            admission: self,
            context,
        }
    }

    /// Check and turn the result into an admission decision.
    pub fn admit(&self, context: &RequestContext, policy: &Policy) -> Result<Admission> {
        let result = self.check(context, policy)?;
        if result.allowed() {
            Ok(Admission::Allowed(result))
        } else {
            let message = denial_message(&result);
            Ok(Admission::Denied { result, message })
        }
    }

    /// Attach `result` to `message` under the result field.
    pub fn attach(&self, result: &RateLimitResult, message: &mut Message) {
        match serde_json::to_value(result) {
            Ok(value) => {
                message
                    .metadata
                    .insert(RATE_LIMIT_RESULT_FIELD.to_string(), value);
            }
            Err(e) => warn!(error = %e, "Failed to serialize rate limit result"),
        }
    }

    /// Discard limiter state for `key`.
    pub fn reset_limits(&self, key: &str) {
        self.limiter.reset(key);
    }

    /// Put `handler` behind this facade.
    pub fn wrap<H: Handler>(self: &Arc<Self>, handler: H) -> RateLimited<H> {
        RateLimited::new(handler, Arc::clone(self))
    }
}

impl fmt::Debug for AdmissionControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionControl")
            .field("limiter", &self.limiter)
            .field("policies", &self.policies)
            .finish_non_exhaustive()
    }
}
