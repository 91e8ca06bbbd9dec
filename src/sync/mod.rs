//! Chain-to-store synchronization.
//!
//! Three paths keep the projection consistent with the chain: the event processor applies pushed
//! chain events, the synchronizer periodically overwrites stale rows, and the reconciler classifies
//! and repairs conflicts with cascades.

/// Row/snapshot mapping shared by synchronizer and reconciler
mod canonical;
/// Queued event dispatch with retries
pub mod events;
/// Per-event-kind store mutations
mod handlers;
/// Conflict detection and repair
pub mod reconciliation;
/// Periodic full-state synchronization
pub mod state;

pub use events::{EventProcessor, ProcessingStatistics};
pub use reconciliation::{
	ConflictSummary, ReconciliationReport, ReconciliationStats, StateReconciler,
};
pub use state::{ConsistencyReport, PassReport, StateSynchronizer, SynchronizerStatus};
