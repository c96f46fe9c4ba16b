//! Admission control ("bottleneck").
//!
//! # Data Flow
//! ```text
//! invoke()
//!     → controller.rs: running < max_concurrent?  ─yes→ run now (Permit)
//!                      queue < max_queue?         ─yes→ wait FIFO (Ticket) → run
//!                      otherwise                  ──→  QueueFull + retry_after
//!     → on completion: slot handed to next waiter, else released
//! ```
//!
//! # Design Decisions
//! - One global gate; it sits outside fallback so a call holds one slot
//!   while it walks the chain
//! - Slot ownership is RAII: dropping the caller's future releases it
//! - `retry_after` is derived from observed execution time

pub mod controller;
pub mod stats;

pub use controller::{AdmissionController, Permit};
pub use stats::AdmissionStats;
