//! Configuration management for Gatekeeper.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{
    CompositeLimiter, FixedWindowLimiter, Policy, PolicyTable, RateLimiter, SlidingWindowLimiter,
    TokenBucketLimiter, DEFAULT_CAPACITY_MULTIPLIER, DEFAULT_MAX_ENTRIES_PER_KEY,
    DEFAULT_REQUESTS, DEFAULT_WINDOW_SECS,
};

/// Prefix for environment variable overrides, e.g. `GATEKEEPER__POLICY__REQUESTS`.
const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Limiter algorithm configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Default and per-tier policies
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Idle key eviction
    #[serde(default)]
    pub eviction: EvictionConfig,
}

/// Supported limiting algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
    Composite,
}

/// Limiter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Which algorithm to run
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Token bucket capacity relative to the limit
    #[serde(default = "default_capacity_multiplier")]
    pub capacity_multiplier: f64,

    /// Sliding window per-key timestamp bound
    #[serde(default = "default_max_entries_per_key")]
    pub max_entries_per_key: usize,

    /// Members of a composite limiter
    #[serde(default)]
    pub members: Vec<MemberConfig>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            capacity_multiplier: default_capacity_multiplier(),
            max_entries_per_key: default_max_entries_per_key(),
            members: Vec::new(),
        }
    }
}

fn default_capacity_multiplier() -> f64 {
    DEFAULT_CAPACITY_MULTIPLIER
}

fn default_max_entries_per_key() -> usize {
    DEFAULT_MAX_ENTRIES_PER_KEY
}

/// One member of a composite limiter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// Name reported in `limit_type`
    pub name: String,
    /// Member algorithm (not `composite`)
    pub algorithm: Algorithm,
    /// Member-specific limit; the request policy applies when unset
    #[serde(default)]
    pub requests: Option<u64>,
    /// Member-specific window in seconds
    #[serde(default)]
    pub window_secs: Option<u64>,
}

/// A limit over a window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierConfig {
    pub requests: u64,
    pub window_secs: u64,
}

/// Policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests per window for callers without a tier
    #[serde(default = "default_requests")]
    pub requests: u64,

    /// Window length in seconds for callers without a tier
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Per-tier policies
    #[serde(default)]
    pub tiers: HashMap<String, TierConfig>,

    /// Tier applied to callers naming an unknown tier
    #[serde(default)]
    pub fallback_tier: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            requests: default_requests(),
            window_secs: default_window_secs(),
            tiers: HashMap::new(),
            fallback_tier: None,
        }
    }
}

fn default_requests() -> u64 {
    DEFAULT_REQUESTS
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW_SECS
}

/// Idle key eviction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    /// Whether to run the background sweeper
    #[serde(default = "default_eviction_enabled")]
    pub enabled: bool,

    /// Keys unchecked for this long are dropped
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_secs: u64,

    /// How often the sweeper runs
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            enabled: default_eviction_enabled(),
            idle_ttl_secs: default_idle_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_eviction_enabled() -> bool {
    true
}

fn default_idle_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

impl EvictionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl GatekeeperConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        info!(path = %path, "Loading configuration");
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load layered configuration: defaults, then the optional file, then
    /// `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration");
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GatekeeperConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would fail at check time.
    pub fn validate(&self) -> Result<()> {
        self.policy_table()?;

        if !self.limiter.capacity_multiplier.is_finite() || self.limiter.capacity_multiplier <= 0.0 {
            return Err(GatekeeperError::Config(format!(
                "capacity_multiplier must be positive, got {}",
                self.limiter.capacity_multiplier
            )));
        }
        if self.limiter.max_entries_per_key == 0 {
            return Err(GatekeeperError::Config(
                "max_entries_per_key must be positive".to_string(),
            ));
        }
        if self.eviction.enabled && self.eviction.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.limiter.algorithm == Algorithm::Composite {
            if self.limiter.members.is_empty() {
                return Err(GatekeeperError::Config(
                    "composite limiter requires at least one member".to_string(),
                ));
            }
            for member in &self.limiter.members {
                if member.algorithm == Algorithm::Composite {
                    return Err(GatekeeperError::Config(format!(
                        "composite member '{}' cannot itself be composite",
                        member.name
                    )));
                }
                if let Some(policy) = member_policy(member)? {
                    policy.validate().map_err(|e| {
                        GatekeeperError::Config(format!("member '{}': {}", member.name, e))
                    })?;
                }
            }
        }

        Ok(())
    }

    /// Policy for callers without a tier.
    pub fn default_policy(&self) -> Policy {
        Policy::from_secs(self.policy.requests, self.policy.window_secs)
    }

    /// Build the policy table from the default policy and tiers.
    pub fn policy_table(&self) -> Result<PolicyTable> {
        let mut table = PolicyTable::new(self.default_policy());
        for (name, tier) in &self.policy.tiers {
            table = table.with_tier(name.clone(), Policy::from_secs(tier.requests, tier.window_secs));
        }
        if let Some(fallback) = &self.policy.fallback_tier {
            if !self.policy.tiers.contains_key(fallback) {
                return Err(GatekeeperError::Config(format!(
                    "fallback tier '{}' is not defined",
                    fallback
                )));
            }
            table = table.with_fallback_tier(fallback.clone());
        }
        table.validate()?;
        Ok(table)
    }

    /// Construct the configured limiter.
    pub fn build_limiter(&self) -> Result<RateLimiter> {
        let limiter = match self.limiter.algorithm {
            Algorithm::Composite => {
                let mut composite = CompositeLimiter::new();
                for member in &self.limiter.members {
                    let limiter = self.build_single(member.algorithm)?;
                    composite = match member_policy(member)? {
                        Some(policy) => composite.with_member_policy(member.name.clone(), limiter, policy),
                        None => composite.with_member(member.name.clone(), limiter),
                    };
                }
                RateLimiter::Composite(composite)
            }
            algorithm => self.build_single(algorithm)?,
        };

        info!(algorithm = limiter.algorithm(), "Rate limiter configured");
        Ok(limiter)
    }

    fn build_single(&self, algorithm: Algorithm) -> Result<RateLimiter> {
        match algorithm {
            Algorithm::TokenBucket => Ok(TokenBucketLimiter::with_capacity_multiplier(
                self.limiter.capacity_multiplier,
            )?
            .into()),
            Algorithm::SlidingWindow => {
                Ok(SlidingWindowLimiter::with_max_entries(self.limiter.max_entries_per_key)?.into())
            }
            Algorithm::FixedWindow => Ok(FixedWindowLimiter::new().into()),
            Algorithm::Composite => Err(GatekeeperError::Config(
                "nested composite limiters are not supported".to_string(),
            )),
        }
    }
}

/// A member's own policy; both fields or neither must be set.
fn member_policy(member: &MemberConfig) -> Result<Option<Policy>> {
    match (member.requests, member.window_secs) {
        (Some(requests), Some(window_secs)) => Ok(Some(Policy::from_secs(requests, window_secs))),
        (None, None) => Ok(None),
        _ => Err(GatekeeperError::Config(format!(
            "member '{}' must set both requests and window_secs, or neither",
            member.name
        ))),
    }
}
