//! Types exchanged with the chain client: entity keys, canonical snapshots, pushed events and
//! transaction payloads.

use crate::store::{EntityStatus, MemberRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub type SubscriptionId = u64;

/// Address of one on-chain entity.
///
/// Join entities (membership, vote) have no address of their own and are located by their two
/// parent addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
	Community { address: String },
	Membership { community: String, member: String },
	Question { address: String },
	Vote { question: String, voter: String },
	Account { address: String },
}

impl fmt::Display for EntityKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntityKey::Community { address } => write!(f, "community:{}", address),
			EntityKey::Membership { community, member } => {
				write!(f, "membership:{}:{}", community, member)
			}
			EntityKey::Question { address } => write!(f, "question:{}", address),
			EntityKey::Vote { question, voter } => write!(f, "vote:{}:{}", question, voter),
			EntityKey::Account { address } => write!(f, "account:{}", address),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunitySnapshot {
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipSnapshot {
	pub role: MemberRole,
	pub status: EntityStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSnapshot {
	pub title: String,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub options: Value,
	pub deadline: DateTime<Utc>,
	pub status: EntityStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSnapshot {
	pub vote_data: Value,
	#[serde(default)]
	pub signature: Option<String>,
}

/// A plain wallet account. Only its existence is tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
	pub lamports: u64,
}

/// Canonical state of one entity as read from the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntitySnapshot {
	Community(CommunitySnapshot),
	Membership(MembershipSnapshot),
	Question(QuestionSnapshot),
	Vote(VoteSnapshot),
	Account(AccountSnapshot),
}

/// A notification pushed by the chain client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
	#[serde(rename = "type")]
	pub event_type: String,
	#[serde(alias = "data")]
	pub payload: Value,
	#[serde(default)]
	pub network: String,
	#[serde(default)]
	pub tx_id: Option<String>,
	#[serde(default)]
	pub block_number: Option<u64>,
	#[serde(default = "Utc::now")]
	pub received_at: DateTime<Utc>,
	#[serde(default)]
	pub retry_count: u32,
}

impl ChainEvent {
	pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
		Self {
			event_type: event_type.into(),
			payload,
			network: String::new(),
			tx_id: None,
			block_number: None,
			received_at: Utc::now(),
			retry_count: 0,
		}
	}

	pub fn on_network(mut self, network: impl Into<String>) -> Self {
		self.network = network.into();
		self
	}

	pub fn with_tx(mut self, tx_id: impl Into<String>, block_number: u64) -> Self {
		self.tx_id = Some(tx_id.into());
		self.block_number = Some(block_number);
		self
	}
}

/// Payload handed to `ChainClient::submit_transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum TransactionPayload {
	/// A fully signed, base64 encoded transaction
	Signed { transaction: String },
	/// A program instruction the relay signs and sends
	Program {
		instruction: String,
		accounts: Vec<String>,
		args: Value,
		recent_blockhash: String,
	},
}

/// Node a client has verified it can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConnection {
	pub network: String,
	pub node_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
	pub signature: String,
}

/// Errors raised at the chain boundary.
///
/// The variant is assigned where the error is raised; callers decide on retries with
/// `is_retryable` and never by inspecting the message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
	#[error("Blockhash expired: {0}")]
	BlockhashExpired(String),

	#[error("Request timed out: {0}")]
	Timeout(String),

	#[error("Insufficient funds: {0}")]
	InsufficientFunds(String),

	#[error("Network error: {0}")]
	Network(String),

	#[error("Invalid signature: {0}")]
	InvalidSignature(String),

	#[error("Transaction rejected: {0}")]
	Rejected(String),

	#[error("Decode error: {0}")]
	Decode(String),

	#[error("Unsupported operation: {0}")]
	Unsupported(String),
}

impl ChainError {
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			ChainError::BlockhashExpired(_)
				| ChainError::Timeout(_)
				| ChainError::InsufficientFunds(_)
				| ChainError::Network(_)
		)
	}
}

impl From<reqwest::Error> for ChainError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			ChainError::Timeout(e.to_string())
		} else if e.is_decode() {
			ChainError::Decode(e.to_string())
		} else {
			ChainError::Network(e.to_string())
		}
	}
}

impl From<serde_json::Error> for ChainError {
	fn from(e: serde_json::Error) -> Self {
		ChainError::Decode(e.to_string())
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for ChainError {
	fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
		ChainError::Network(e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn retry_classification_is_closed() {
		assert!(ChainError::BlockhashExpired("x".into()).is_retryable());
		assert!(ChainError::Timeout("x".into()).is_retryable());
		assert!(ChainError::InsufficientFunds("x".into()).is_retryable());
		assert!(ChainError::Network("x".into()).is_retryable());
		assert!(!ChainError::InvalidSignature("x".into()).is_retryable());
		assert!(!ChainError::Rejected("x".into()).is_retryable());
		assert!(!ChainError::Decode("x".into()).is_retryable());
		assert!(!ChainError::Unsupported("x".into()).is_retryable());
	}

	#[test]
	fn chain_event_accepts_pushed_shape() {
		let event: ChainEvent = serde_json::from_value(json!({
			"type": "CommunityCreated",
			"data": { "communityId": "C1", "name": "Alpha", "creator": "W1" },
			"txId": "sig1",
			"blockNumber": 42
		}))
		.unwrap();
		assert_eq!(event.event_type, "CommunityCreated");
		assert_eq!(event.payload["communityId"], "C1");
		assert_eq!(event.block_number, Some(42));
		assert_eq!(event.retry_count, 0);
	}
}
