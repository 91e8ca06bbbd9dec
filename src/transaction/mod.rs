//! Outbound transaction queue.
//!
//! Application code enqueues typed requests with a priority; the queue manager submits them to the
//! chain one at a time and keeps terminal records queryable.

/// Request to chain payload translation and submission
pub mod executor;
/// Priority heap, pump and retry policy
pub mod queue;
/// Terminal record persistence
pub mod repository;
/// Requests, records and status types
pub mod types;

pub use queue::TransactionQueueManager;
pub use repository::{FileTransactionRepository, TransactionRecordRepository};
pub use types::{Priority, QueuedTransaction, TransactionRequest, TransactionStatus, TransactionSummary};
