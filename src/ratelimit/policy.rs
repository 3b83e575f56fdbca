//! Limit/window policies and their sources.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{GatekeeperError, Result};

/// Requests allowed per window when the caller supplies nothing.
pub const DEFAULT_REQUESTS: u64 = 100;
/// Window length in seconds when the caller supplies nothing.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Tier used when a requested tier is unknown.
pub const FREE_TIER: &str = "free";

/// A limit over a time window, supplied on every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Maximum requests per window
    pub limit: u64,
    /// Length of the window
    pub window: Duration,
}

impl Policy {
    /// Create a policy. Validation happens at check time.
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Create a policy with a window given in whole seconds.
    pub fn from_secs(limit: u64, window_secs: u64) -> Self {
        Self::new(limit, Duration::from_secs(window_secs))
    }

    /// Reject zero limits and zero windows.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(GatekeeperError::Policy("limit must be positive".to_string()));
        }
        if self.window.is_zero() {
            return Err(GatekeeperError::Policy("window must be positive".to_string()));
        }
        Ok(())
    }

    /// Steady-state rate in requests per second.
    pub fn rate(&self) -> f64 {
        self.limit as f64 / self.window.as_secs_f64()
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::from_secs(DEFAULT_REQUESTS, DEFAULT_WINDOW_SECS)
    }
}

/// Caller-supplied override carried in request metadata.
///
/// Wire shape: `{"requests": <integer>, "window": <integer seconds>}`.
/// Either field may be omitted and falls back to the base policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<i64>,
}

impl PolicyOverride {
    /// Parse an override from a metadata value.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| GatekeeperError::Policy(format!("malformed policy override: {}", e)))
    }

    /// Merge this override onto `base`, failing on non-positive values.
    pub fn apply(&self, base: Policy) -> Result<Policy> {
        let limit = match self.requests {
            Some(requests) if requests <= 0 => {
                return Err(GatekeeperError::Policy(format!(
                    "requests must be positive, got {}",
                    requests
                )))
            }
            Some(requests) => requests as u64,
            None => base.limit,
        };
        let window = match self.window {
            Some(window) if window <= 0 => {
                return Err(GatekeeperError::Policy(format!(
                    "window must be positive, got {}",
                    window
                )))
            }
            Some(window) => Duration::from_secs(window as u64),
            None => base.window,
        };
        Ok(Policy::new(limit, window))
    }
}

/// Per-tier policies with a default for untiered callers.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    default: Policy,
    tiers: HashMap<String, Policy>,
    fallback_tier: Option<String>,
}

impl PolicyTable {
    /// A table with no tiers; every caller gets `default`.
    pub fn new(default: Policy) -> Self {
        Self {
            default,
            tiers: HashMap::new(),
            fallback_tier: None,
        }
    }

    /// The conventional free/premium/enterprise table (per minute).
    ///
    /// Unknown tiers resolve to the free tier.
    pub fn standard() -> Self {
        Self::new(Policy::default())
            .with_tier("free", Policy::from_secs(10, 60))
            .with_tier("premium", Policy::from_secs(100, 60))
            .with_tier("enterprise", Policy::from_secs(1000, 60))
            .with_fallback_tier(FREE_TIER)
    }

    /// Add or replace a tier.
    pub fn with_tier(mut self, name: impl Into<String>, policy: Policy) -> Self {
        self.tiers.insert(name.into(), policy);
        self
    }

    /// Tier used for unknown tier names.
    pub fn with_fallback_tier(mut self, name: impl Into<String>) -> Self {
        self.fallback_tier = Some(name.into());
        self
    }

    /// Resolve a tier name to its policy.
    pub fn resolve(&self, tier: Option<&str>) -> Policy {
        let Some(tier) = tier else {
            return self.default;
        };

        self.tiers
            .get(tier)
            .or_else(|| {
                self.fallback_tier
                    .as_deref()
                    .and_then(|fallback| self.tiers.get(fallback))
            })
            .copied()
            .unwrap_or(self.default)
    }

    /// Validate every policy in the table.
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for (name, policy) in &self.tiers {
            policy
                .validate()
                .map_err(|e| GatekeeperError::Config(format!("tier '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::new(Policy::default())
    }
}
