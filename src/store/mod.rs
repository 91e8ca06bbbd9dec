//! Persistence boundary for the relational projection.
//!
//! The sync core never talks to a database directly. It consumes the `Store` trait: entity
//! repositories plus explicit transactions for atomic multi-row changes. `InMemoryStore` is the
//! in-process implementation used by the binary and the tests.

/// In-memory transactional store
mod memory;
/// Row types
pub mod models;

pub use memory::InMemoryStore;
pub use models::*;

use async_trait::async_trait;

/// Error types for the persistence boundary
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
	#[error("Row not found: {kind} #{id}")]
	NotFound { kind: EntityKind, id: RowId },

	#[error("Unique constraint violated: {0}")]
	Duplicate(String),

	#[error("Write rejected for {0}")]
	WriteRejected(EntityKind),
}

/// Lookup for rows that carry an on-chain id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
	Id(RowId),
	OnChainId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserLookup {
	Id(RowId),
	Wallet(String),
}

/// Lookup for join rows (membership, vote) identified by their two parents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairLookup {
	Id(RowId),
	Pair(RowId, RowId),
}

/// Filter for `list_*` queries. `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowFilter {
	pub status: Option<EntityStatus>,
	pub parent_id: Option<RowId>,
}

impl RowFilter {
	pub fn status(status: EntityStatus) -> Self {
		Self {
			status: Some(status),
			parent_id: None,
		}
	}

	pub fn with_parent(mut self, parent_id: RowId) -> Self {
		self.parent_id = Some(parent_id);
		self
	}
}

/// Entity repositories.
///
/// `create_*` ignores the incoming `id` and timestamps and returns the stored row.
/// `update_*` replaces the row with the same `id` as given (callers stamp `updated_at`) and fails
/// with `NotFound` for unknown ids.
#[async_trait]
pub trait Repository: Send + Sync {
	async fn find_user(&self, by: UserLookup) -> Result<Option<User>, StoreError>;
	async fn list_users(&self, filter: RowFilter) -> Result<Vec<User>, StoreError>;
	async fn create_user(&self, user: User) -> Result<User, StoreError>;
	async fn update_user(&self, user: &User) -> Result<(), StoreError>;

	async fn find_community(&self, by: Lookup) -> Result<Option<Community>, StoreError>;
	async fn list_communities(&self, filter: RowFilter) -> Result<Vec<Community>, StoreError>;
	async fn create_community(&self, community: Community) -> Result<Community, StoreError>;
	async fn update_community(&self, community: &Community) -> Result<(), StoreError>;

	/// `PairLookup::Pair(community_id, user_id)`
	async fn find_member(&self, by: PairLookup) -> Result<Option<Member>, StoreError>;
	/// `RowFilter::parent_id` matches `community_id`
	async fn list_members(&self, filter: RowFilter) -> Result<Vec<Member>, StoreError>;
	async fn create_member(&self, member: Member) -> Result<Member, StoreError>;
	async fn update_member(&self, member: &Member) -> Result<(), StoreError>;

	async fn find_question(&self, by: Lookup) -> Result<Option<VotingQuestion>, StoreError>;
	/// `RowFilter::parent_id` matches `community_id`
	async fn list_questions(&self, filter: RowFilter) -> Result<Vec<VotingQuestion>, StoreError>;
	async fn create_question(&self, question: VotingQuestion)
	-> Result<VotingQuestion, StoreError>;
	async fn update_question(&self, question: &VotingQuestion) -> Result<(), StoreError>;

	/// `PairLookup::Pair(question_id, user_id)`
	async fn find_vote(&self, by: PairLookup) -> Result<Option<Vote>, StoreError>;
	/// `RowFilter::parent_id` matches `question_id`
	async fn list_votes(&self, filter: RowFilter) -> Result<Vec<Vote>, StoreError>;
	async fn create_vote(&self, vote: Vote) -> Result<Vote, StoreError>;
	async fn update_vote(&self, vote: &Vote) -> Result<(), StoreError>;
}

/// A repository whose writes land only on `commit`.
#[async_trait]
pub trait StoreTransaction: Repository {
	async fn commit(self: Box<Self>) -> Result<(), StoreError>;
	async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Auto-committing repository that can open transactions.
#[async_trait]
pub trait Store: Repository {
	async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}
