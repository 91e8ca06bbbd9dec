//!
//! Utility module for the sync core.
//!
//! Re-exports id/timestamp helpers and the cancellable ticker used by every periodic job.
/// Identifier and timestamp helpers
pub mod index;
/// Cancellable fixed-period loops
pub mod ticker;

pub use index::{env_or, generate_id, short_wallet};
pub use ticker::Ticker;
