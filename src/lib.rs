//! Gatekeeper - Pluggable Request Admission Control
//!
//! This crate decides, per logical client, whether a unit of work may
//! proceed. Enforcement is always on and server-controlled; callers may
//! additionally opt in to receiving their quota state with each response.
//!
//! The rate limiting engine ([`ratelimit`]) offers token bucket, sliding
//! window, fixed window and composite limiters behind one interface. The
//! [`admission`] layer derives client keys, resolves policies, and can wrap
//! an existing handler so the handler never deals with rate limiting.

pub mod admission;
pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{GatekeeperError, Result};
