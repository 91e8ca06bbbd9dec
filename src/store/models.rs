//! Projection rows mirrored from on-chain state.
//!
//! Rows are plain data; the repository assigns `id`, `created_at` and `updated_at` on create.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RowId = i64;

/// Lifecycle status shared by every tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
	Active,
	Inactive,
	Pending,
	Ended,
}

impl EntityStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			EntityStatus::Active => "active",
			EntityStatus::Inactive => "inactive",
			EntityStatus::Pending => "pending",
			EntityStatus::Ended => "ended",
		}
	}
}

impl fmt::Display for EntityStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
	Admin,
	Moderator,
	Member,
}

/// The five entity types the sync core keeps consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
	Community,
	Membership,
	Question,
	Vote,
	User,
}

impl EntityKind {
	pub const ALL: [EntityKind; 5] = [
		EntityKind::Community,
		EntityKind::Membership,
		EntityKind::Question,
		EntityKind::Vote,
		EntityKind::User,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			EntityKind::Community => "community",
			EntityKind::Membership => "membership",
			EntityKind::Question => "question",
			EntityKind::Vote => "vote",
			EntityKind::User => "user",
		}
	}
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EntityKind {
	type Err = String;

	/// Accepts both the singular kind and the plural data-type names used by `force_sync`.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"community" | "communities" => Ok(EntityKind::Community),
			"membership" | "memberships" => Ok(EntityKind::Membership),
			"question" | "questions" => Ok(EntityKind::Question),
			"vote" | "votes" => Ok(EntityKind::Vote),
			"user" | "users" => Ok(EntityKind::User),
			other => Err(format!("unknown entity kind: {}", other)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: RowId,
	pub wallet_address: String,
	pub username: String,
	pub status: EntityStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
	pub id: RowId,
	pub on_chain_id: String,
	pub name: String,
	pub description: Option<String>,
	pub config: serde_json::Value,
	pub created_by: RowId,
	pub network: String,
	pub transaction_id: Option<String>,
	pub block_number: Option<u64>,
	pub status: EntityStatus,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
	pub id: RowId,
	pub community_id: RowId,
	pub user_id: RowId,
	pub role: MemberRole,
	pub status: EntityStatus,
	pub joined_at: DateTime<Utc>,
	pub network: String,
	pub transaction_id: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingQuestion {
	pub id: RowId,
	pub on_chain_id: String,
	pub community_id: RowId,
	pub title: String,
	pub description: Option<String>,
	pub options: serde_json::Value,
	pub deadline: DateTime<Utc>,
	pub created_by: RowId,
	pub status: EntityStatus,
	pub network: String,
	pub transaction_id: Option<String>,
	pub block_number: Option<u64>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
	pub id: RowId,
	pub question_id: RowId,
	pub user_id: RowId,
	pub vote_data: serde_json::Value,
	pub signature: Option<String>,
	pub status: EntityStatus,
	pub network: String,
	pub transaction_id: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl User {
	/// Unsaved row; `id` and timestamps are assigned on create.
	pub fn draft(wallet_address: &str, username: String) -> Self {
		let now = Utc::now();
		Self {
			id: 0,
			wallet_address: wallet_address.to_string(),
			username,
			status: EntityStatus::Active,
			created_at: now,
			updated_at: now,
		}
	}
}
