//! Resilient invoker: the fixed composition of every layer.
//!
//! # Design Decisions
//! - Layer order is fixed: admission → fallback → breaker → retry → call
//! - One `CallContext` per invocation, cloned per tier and per attempt
//! - Config is an immutable snapshot; `reload()` swaps it everywhere
//! - The raw value is returned untouched next to the metadata

pub mod options;
pub mod resilient;
pub mod status;

pub use options::{Invocation, InvocationMetadata, InvokeOptions};
pub use resilient::ResilientInvoker;
pub use status::ResilienceStatus;
