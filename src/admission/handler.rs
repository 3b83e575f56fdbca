//! Units of work and the rate limiting decorator around them.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::context::{Message, RequestContext};
use super::facade::{Admission, AdmissionControl};
use crate::error::Result;

/// A protected unit of work.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one request and produce the caller's response.
    async fn handle(&self, context: &RequestContext) -> Result<Message>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, context: &RequestContext) -> Result<Message> {
        (**self).handle(context).await
    }
}

/// Wraps a handler with admission control.
///
/// The inner handler runs only when the request is admitted and never sees
/// the rate limiter. Denied requests get the standard refusal message.
/// When the caller requested usage signals, the result is attached to the
/// response either way.
pub struct RateLimited<H> {
    inner: H,
    admission: Arc<AdmissionControl>,
}

impl<H> RateLimited<H> {
    pub fn new(inner: H, admission: Arc<AdmissionControl>) -> Self {
        Self { inner, admission }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn admission(&self) -> &Arc<AdmissionControl> {
        &self.admission
    }
}

#[async_trait]
impl<H: Handler> Handler for RateLimited<H> {
    #[instrument(skip(self, context), fields(tier = ?context.tier))]
    async fn handle(&self, context: &RequestContext) -> Result<Message> {
        let signal = self.admission.is_activated(context);
        let policy = self.admission.policy_for(context)?;

        let (result, mut message) = match self.admission.admit(context, &policy)? {
            Admission::Denied { result, message } => (result, Message::text(message)),
            Admission::Allowed(result) => {
                debug!(remaining = result.remaining(), "Request admitted");
                let message = self.inner.handle(context).await?;
                (result, message)
            }
        };

        if signal {
            self.admission.attach(&result, &mut message);
        }

        Ok(message)
    }
}
