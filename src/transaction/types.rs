use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Dequeue priority. Higher variants are served first.
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	Low,
	#[default]
	Normal,
	High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	Queued,
	Processing,
	Retrying,
	Completed,
	Failed,
}

impl TransactionStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
	}
}

/// Outbound write requested by application code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "type",
	content = "data",
	rename_all = "snake_case",
	rename_all_fields = "camelCase"
)]
pub enum TransactionRequest {
	CreateCommunity {
		admin_wallet: String,
		name: String,
		#[serde(default)]
		description: Option<String>,
		#[serde(default)]
		config: Value,
	},
	JoinCommunity {
		user_wallet: String,
		community_address: String,
	},
	CreateQuestion {
		admin_wallet: String,
		community_address: String,
		title: String,
		#[serde(default)]
		description: Option<String>,
		options: Vec<String>,
		deadline: DateTime<Utc>,
	},
	CastVote {
		user_wallet: String,
		question_address: String,
		vote_data: Value,
	},
	/// Pre-signed, base64 encoded transaction sent as is
	Custom { transaction: String },
}

impl TransactionRequest {
	pub fn kind(&self) -> &'static str {
		match self {
			TransactionRequest::CreateCommunity { .. } => "create_community",
			TransactionRequest::JoinCommunity { .. } => "join_community",
			TransactionRequest::CreateQuestion { .. } => "create_question",
			TransactionRequest::CastVote { .. } => "cast_vote",
			TransactionRequest::Custom { .. } => "custom",
		}
	}
}

impl fmt::Display for TransactionRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind())
	}
}

/// A request tracked through the queue until it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTransaction {
	pub id: String,
	pub request: TransactionRequest,
	pub status: TransactionStatus,
	pub priority: Priority,
	/// Failed attempts so far
	pub retries: u32,
	pub last_error: Option<String>,
	pub signature: Option<String>,
	pub created_at: DateTime<Utc>,
	pub processing_at: Option<DateTime<Utc>>,
	pub last_attempt_at: Option<DateTime<Utc>>,
	pub completed_at: Option<DateTime<Utc>>,
	pub failed_at: Option<DateTime<Utc>>,
}

impl QueuedTransaction {
	pub fn new(id: String, request: TransactionRequest, priority: Priority) -> Self {
		Self {
			id,
			request,
			status: TransactionStatus::Queued,
			priority,
			retries: 0,
			last_error: None,
			signature: None,
			created_at: Utc::now(),
			processing_at: None,
			last_attempt_at: None,
			completed_at: None,
			failed_at: None,
		}
	}

	/// When the record reached its terminal state, if it has.
	pub fn finished_at(&self) -> Option<DateTime<Utc>> {
		self.completed_at.or(self.failed_at)
	}
}

/// Counts per status plus a per-request-type breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSummary {
	pub queued: usize,
	pub processing: usize,
	pub retrying: usize,
	pub completed: usize,
	pub failed: usize,
	pub total: usize,
	pub by_type: std::collections::BTreeMap<&'static str, usize>,
}
