use crate::chain::ChainError;
use crate::store::StoreError;

/// Error types for the sync core
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
	#[error("Chain error: {0}")]
	ChainError(#[from] ChainError),

	#[error("Store error: {0}")]
	StoreError(#[from] StoreError),

	#[error("No handler for event type: {0}")]
	UnknownEvent(String),

	#[error("No handler for task type: {0}")]
	UnknownTask(String),

	#[error("Invalid payload: {0}")]
	InvalidPayload(String),

	#[error("Missing parent: {0}")]
	MissingParent(String),

	#[error("Queue full: {0}")]
	QueueFull(String),

	#[error("Worker error: {0}")]
	WorkerError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}
