//! Rate limiting algorithms and per-key state management.

mod clock;
mod composite;
mod fixed_window;
mod limiter;
mod policy;
mod result;
mod sliding_window;
mod store;
mod sweeper;
mod token_bucket;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use composite::{CompositeLimiter, CompositeMember};
pub use fixed_window::{FixedWindowLimiter, FIXED_WINDOW};
pub use limiter::RateLimiter;
pub use policy::{
    Policy, PolicyOverride, PolicyTable, DEFAULT_REQUESTS, DEFAULT_WINDOW_SECS, FREE_TIER,
};
pub use result::{RateLimitResult, UsageSignal};
pub use sliding_window::{SlidingWindowLimiter, DEFAULT_MAX_ENTRIES_PER_KEY, SLIDING_WINDOW};
pub use sweeper::{spawn_sweeper, SweeperHandle};
pub use token_bucket::{TokenBucketLimiter, DEFAULT_CAPACITY_MULTIPLIER, TOKEN_BUCKET};
