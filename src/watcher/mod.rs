//! Debounced change aggregation over the include and script trees.
//!
//! # Architecture
//!
//! ```text
//! notify (include tree) --+
//!                         +--> mpsc --> event loop (one task)
//! notify (script tree) ---+               |  resolver: path -> id(s)
//! suppress_next() --------+               |  scanner.scan(id)
//!                                         |  aggregator.record_change
//!                                         v
//!                             quiet period elapsed -> on_batch(Batch)
//! ```
//!
//! All state lives in the event loop task, so handlers never interleave
//! and at most one flush is scheduled at a time.

mod aggregator;
mod debouncer;
mod error;
pub mod resolver;
mod session;

pub use aggregator::{Batch, ChangeAggregator, FlushOutcome};
pub use debouncer::DebounceTimer;
pub use error::WatchError;
pub use session::{BatchCallback, WatchSession, WatchSessionBuilder, WatchTree};
