//! View-event batching.
//!
//! View reports are fire-and-forget analytics: each content id is reported
//! at most once per session, ids are coalesced into batches, and delivery
//! failures retry a bounded number of times before the id is dropped. Lost
//! view data is acceptable; duplicated view data is not.

mod aggregator;
mod config;

pub use aggregator::ViewAggregator;
pub use config::ViewConfig;
