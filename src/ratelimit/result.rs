//! The outcome of a single admission check.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one admission check.
///
/// Immutable once built. `retry_after` is present exactly when the request
/// was denied.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitResult {
    allowed: bool,
    remaining: u64,
    limit: u64,
    reset_time: Duration,
    retry_after: Option<Duration>,
    limit_type: String,
}

impl RateLimitResult {
    /// An allowing result.
    pub fn allow(
        limit_type: impl Into<String>,
        limit: u64,
        remaining: u64,
        reset_time: Duration,
    ) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_time,
            retry_after: None,
            limit_type: limit_type.into(),
        }
    }

    /// A denying result. Remaining quota is zero by construction.
    pub fn deny(
        limit_type: impl Into<String>,
        limit: u64,
        reset_time: Duration,
        retry_after: Duration,
    ) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_time,
            retry_after: Some(retry_after),
            limit_type: limit_type.into(),
        }
    }

    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Requests left before the next denial.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// The limit that produced this result.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// When the quota is fully replenished, as an offset from the Unix epoch.
    pub fn reset_time(&self) -> Duration {
        self.reset_time
    }

    /// `reset_time` as a calendar timestamp, `None` past chrono's range.
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        let secs = i64::try_from(self.reset_time.as_secs()).ok()?;
        DateTime::from_timestamp(secs, self.reset_time.subsec_nanos())
    }

    /// How long to wait before retrying. `None` when allowed.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    /// Which algorithm (or composite members) produced this result.
    pub fn limit_type(&self) -> &str {
        &self.limit_type
    }

    /// The serializable usage signal for this result.
    pub fn to_signal(&self) -> UsageSignal {
        UsageSignal {
            allowed: self.allowed,
            remaining: self.remaining,
            reset_time: self.reset_time.as_secs_f64(),
            retry_after: self.retry_after.map(|d| d.as_secs_f64()),
            limit_type: self.limit_type.clone(),
        }
    }
}

impl Serialize for RateLimitResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_signal().serialize(serializer)
    }
}

/// Wire form of a [`RateLimitResult`], as attached to responses.
///
/// Times are seconds: `reset_time` is Unix time, `retry_after` a delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSignal {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<f64>,
    pub limit_type: String,
}
