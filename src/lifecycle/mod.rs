//! Lifecycle management.
//!
//! # Shutdown Sequence
//! ```text
//! Ctrl+C
//!     → Shutdown::trigger() (admin server, watcher, load driver stop)
//!     → invoker.drain(timeout) (queued + running calls finish)
//!     → log outcome, exit
//! ```

pub mod shutdown;

pub use shutdown::{shutdown_and_drain, Shutdown};
