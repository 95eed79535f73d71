//! Redis-backed infrastructure for mediashelf.
//!
//! - **Signal queue**: per-recipient delivery signals shared by every
//!   server instance, so a stream connection on one node sees mutations
//!   made on another.

pub mod signal_queue;

pub use signal_queue::{RedisSignalQueue, connect};
