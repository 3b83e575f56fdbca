//! Admission control around the rate limiters.

mod context;
pub mod extension;
mod facade;
mod handler;
mod key;

pub use context::{Message, RequestContext};
pub use extension::{
    AgentCapabilities, AgentCard, AgentExtension, EXTENSION_HEADER, RATE_LIMIT_FIELD,
    RATE_LIMIT_RESULT_FIELD, URI,
};
pub use facade::{denial_message, Admission, AdmissionControl, RateLimitHelper};
pub use handler::{Handler, RateLimited};
pub use key::{DefaultKeyExtractor, KeyExtractor, FALLBACK_KEY};
