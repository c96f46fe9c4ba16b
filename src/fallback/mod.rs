//! Fallback chain.
//!
//! # Data Flow
//! ```text
//! route_from(start) = [start, next, ..., last]
//!     → tier 0 ─fail→ tier 1 ─fail→ ... ─fail→ FallbackExhausted{failures}
//!         │success      │success
//!         ▼             ▼
//!     FallbackOutcome{value, used_fallback, model_id, failed_models}
//! ```
//!
//! # Design Decisions
//! - Tiers are tried one at a time, never raced
//! - Any tier failure moves on, including circuit-open rejections
//! - Cancellation and deadline stop the chain

pub mod chain;

pub use crate::config::schema::FallbackTier;
pub use chain::{FallbackChain, FallbackOutcome};
