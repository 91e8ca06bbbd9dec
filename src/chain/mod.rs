//! Chain boundary.
//!
//! The sync core consumes the chain only through `ChainClient`: a push subscription for program
//! events, canonical snapshot reads, and transaction submission. Transport retries live below this
//! trait; everything above it sees typed `ChainError`s.

/// JSON-RPC and websocket client
mod client;
/// Keys, snapshots, events and errors
mod types;

pub use client::RpcChainClient;
pub use types::*;

use async_trait::async_trait;
use tokio::sync::mpsc;

#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Check that the client targets `network` and that its node answers. Construction does no
	/// I/O, so this is the first call made against a new client.
	async fn connect(&self, network: &str) -> Result<ChainConnection, ChainError>;

	/// Start forwarding program events into `sink`. Events keep flowing until `unsubscribe` is
	/// called with the returned id or the receiver is dropped.
	async fn subscribe_account_changes(
		&self,
		program_id: &str,
		sink: mpsc::Sender<ChainEvent>,
	) -> Result<SubscriptionId, ChainError>;

	/// Stop a subscription. Unknown ids are ignored.
	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChainError>;

	/// Canonical state for `key`, or `None` when the entity does not exist on chain.
	async fn get_entity_snapshot(
		&self,
		key: &EntityKey,
	) -> Result<Option<EntitySnapshot>, ChainError>;

	async fn submit_transaction(
		&self,
		payload: &TransactionPayload,
	) -> Result<Submission, ChainError>;

	async fn get_latest_blockhash(&self) -> Result<String, ChainError>;
}
