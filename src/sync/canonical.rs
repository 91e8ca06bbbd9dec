//! Mapping between projection rows and their canonical chain snapshots.
//!
//! Shared by the synchronizer (overwrite pass) and the reconciler (conflict detection), so both
//! locate entities, judge staleness and persist repairs the same way.

use crate::chain::*;
use crate::error::SyncError;
use crate::store::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A projection row with a canonical on-chain counterpart.
#[async_trait]
pub(crate) trait Canonical: Sized + Clone + Send + Sync + serde::Serialize {
	type Snapshot: serde::Serialize + serde::de::DeserializeOwned + Send + Sync;

	const KIND: EntityKind;

	fn row_id(&self) -> RowId;

	fn on_chain_id(&self) -> Option<&str>;

	fn set_status(&mut self, status: EntityStatus);

	fn touch(&mut self, at: DateTime<Utc>);

	/// Pull the matching variant out of a generic snapshot.
	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError>;

	/// Whether any canonical field differs from `snapshot`.
	fn differs(&self, snapshot: &Self::Snapshot) -> bool;

	/// Overwrite canonical fields from `snapshot`. Timestamps are left to the caller.
	fn apply(&mut self, snapshot: &Self::Snapshot);

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError>;

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError>;

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError>;

	/// Chain address of this row. Join rows resolve their parents through `repo`.
	async fn key<R: Repository + ?Sized>(&self, repo: &R) -> Result<EntityKey, SyncError>;

	/// Deactivate active dependents of this row. Returns how many rows changed.
	async fn deactivate_dependents<R: Repository + ?Sized>(
		&self,
		_repo: &R,
		_at: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		Ok(0)
	}
}

fn wrong_variant(kind: EntityKind, snapshot: &EntitySnapshot) -> SyncError {
	SyncError::ChainError(ChainError::Decode(format!(
		"expected {} snapshot, got {:?}",
		kind, snapshot
	)))
}

async fn wallet_of<R>(repo: &R, user_id: RowId) -> Result<String, SyncError>
where
	R: Repository + ?Sized,
{
	repo.find_user(UserLookup::Id(user_id))
		.await?
		.map(|u| u.wallet_address)
		.ok_or_else(|| SyncError::MissingParent(format!("user #{}", user_id)))
}

#[async_trait]
impl Canonical for Community {
	type Snapshot = CommunitySnapshot;

	const KIND: EntityKind = EntityKind::Community;

	fn row_id(&self) -> RowId {
		self.id
	}

	fn on_chain_id(&self) -> Option<&str> {
		Some(&self.on_chain_id)
	}

	fn set_status(&mut self, status: EntityStatus) {
		self.status = status;
	}

	fn touch(&mut self, at: DateTime<Utc>) {
		self.updated_at = at;
	}

	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError> {
		match snapshot {
			EntitySnapshot::Community(s) => Ok(s),
			other => Err(wrong_variant(Self::KIND, &other)),
		}
	}

	fn differs(&self, s: &CommunitySnapshot) -> bool {
		self.name != s.name || self.description != s.description || self.config != s.config
	}

	fn apply(&mut self, s: &CommunitySnapshot) {
		self.name = s.name.clone();
		self.description = s.description.clone();
		self.config = s.config.clone();
	}

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError> {
		repo.list_communities(RowFilter::status(EntityStatus::Active)).await
	}

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError> {
		repo.find_community(Lookup::Id(id)).await
	}

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError> {
		repo.update_community(self).await
	}

	async fn key<R: Repository + ?Sized>(&self, _repo: &R) -> Result<EntityKey, SyncError> {
		Ok(EntityKey::Community {
			address: self.on_chain_id.clone(),
		})
	}

	async fn deactivate_dependents<R: Repository + ?Sized>(
		&self,
		repo: &R,
		at: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		let members = repo
			.list_members(RowFilter::status(EntityStatus::Active).with_parent(self.id))
			.await?;
		let count = members.len();
		for mut member in members {
			member.status = EntityStatus::Inactive;
			member.updated_at = at;
			repo.update_member(&member).await?;
		}
		Ok(count)
	}
}

#[async_trait]
impl Canonical for Member {
	type Snapshot = MembershipSnapshot;

	const KIND: EntityKind = EntityKind::Membership;

	fn row_id(&self) -> RowId {
		self.id
	}

	fn on_chain_id(&self) -> Option<&str> {
		None
	}

	fn set_status(&mut self, status: EntityStatus) {
		self.status = status;
	}

	fn touch(&mut self, at: DateTime<Utc>) {
		self.updated_at = at;
	}

	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError> {
		match snapshot {
			EntitySnapshot::Membership(s) => Ok(s),
			other => Err(wrong_variant(Self::KIND, &other)),
		}
	}

	fn differs(&self, s: &MembershipSnapshot) -> bool {
		self.role != s.role || self.status != s.status
	}

	fn apply(&mut self, s: &MembershipSnapshot) {
		self.role = s.role;
		self.status = s.status;
	}

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError> {
		repo.list_members(RowFilter::status(EntityStatus::Active)).await
	}

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError> {
		repo.find_member(PairLookup::Id(id)).await
	}

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError> {
		repo.update_member(self).await
	}

	async fn key<R: Repository + ?Sized>(&self, repo: &R) -> Result<EntityKey, SyncError> {
		let community = repo
			.find_community(Lookup::Id(self.community_id))
			.await?
			.ok_or_else(|| SyncError::MissingParent(format!("community #{}", self.community_id)))?;
		Ok(EntityKey::Membership {
			community: community.on_chain_id,
			member: wallet_of(repo, self.user_id).await?,
		})
	}
}

#[async_trait]
impl Canonical for VotingQuestion {
	type Snapshot = QuestionSnapshot;

	const KIND: EntityKind = EntityKind::Question;

	fn row_id(&self) -> RowId {
		self.id
	}

	fn on_chain_id(&self) -> Option<&str> {
		Some(&self.on_chain_id)
	}

	fn set_status(&mut self, status: EntityStatus) {
		self.status = status;
	}

	fn touch(&mut self, at: DateTime<Utc>) {
		self.updated_at = at;
	}

	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError> {
		match snapshot {
			EntitySnapshot::Question(s) => Ok(s),
			other => Err(wrong_variant(Self::KIND, &other)),
		}
	}

	/// Deadlines compare at millisecond precision, the resolution the chain stores.
	fn differs(&self, s: &QuestionSnapshot) -> bool {
		self.title != s.title
			|| self.description != s.description
			|| self.options != s.options
			|| self.deadline.timestamp_millis() != s.deadline.timestamp_millis()
			|| self.status != s.status
	}

	fn apply(&mut self, s: &QuestionSnapshot) {
		self.title = s.title.clone();
		self.description = s.description.clone();
		self.options = s.options.clone();
		self.deadline = s.deadline;
		self.status = s.status;
	}

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError> {
		repo.list_questions(RowFilter::status(EntityStatus::Active)).await
	}

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError> {
		repo.find_question(Lookup::Id(id)).await
	}

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError> {
		repo.update_question(self).await
	}

	async fn key<R: Repository + ?Sized>(&self, _repo: &R) -> Result<EntityKey, SyncError> {
		Ok(EntityKey::Question {
			address: self.on_chain_id.clone(),
		})
	}

	async fn deactivate_dependents<R: Repository + ?Sized>(
		&self,
		repo: &R,
		at: DateTime<Utc>,
	) -> Result<usize, StoreError> {
		let votes = repo
			.list_votes(RowFilter::status(EntityStatus::Active).with_parent(self.id))
			.await?;
		let count = votes.len();
		for mut vote in votes {
			vote.status = EntityStatus::Inactive;
			vote.updated_at = at;
			repo.update_vote(&vote).await?;
		}
		Ok(count)
	}
}

#[async_trait]
impl Canonical for Vote {
	type Snapshot = VoteSnapshot;

	const KIND: EntityKind = EntityKind::Vote;

	fn row_id(&self) -> RowId {
		self.id
	}

	fn on_chain_id(&self) -> Option<&str> {
		None
	}

	fn set_status(&mut self, status: EntityStatus) {
		self.status = status;
	}

	fn touch(&mut self, at: DateTime<Utc>) {
		self.updated_at = at;
	}

	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError> {
		match snapshot {
			EntitySnapshot::Vote(s) => Ok(s),
			other => Err(wrong_variant(Self::KIND, &other)),
		}
	}

	fn differs(&self, s: &VoteSnapshot) -> bool {
		self.vote_data != s.vote_data || self.signature != s.signature
	}

	fn apply(&mut self, s: &VoteSnapshot) {
		self.vote_data = s.vote_data.clone();
		self.signature = s.signature.clone();
	}

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError> {
		repo.list_votes(RowFilter::status(EntityStatus::Active)).await
	}

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError> {
		repo.find_vote(PairLookup::Id(id)).await
	}

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError> {
		repo.update_vote(self).await
	}

	async fn key<R: Repository + ?Sized>(&self, repo: &R) -> Result<EntityKey, SyncError> {
		let question = repo
			.find_question(Lookup::Id(self.question_id))
			.await?
			.ok_or_else(|| SyncError::MissingParent(format!("question #{}", self.question_id)))?;
		Ok(EntityKey::Vote {
			question: question.on_chain_id,
			voter: wallet_of(repo, self.user_id).await?,
		})
	}
}

/// Users only track account existence; there are no canonical fields to compare.
#[async_trait]
impl Canonical for User {
	type Snapshot = AccountSnapshot;

	const KIND: EntityKind = EntityKind::User;

	fn row_id(&self) -> RowId {
		self.id
	}

	fn on_chain_id(&self) -> Option<&str> {
		Some(&self.wallet_address)
	}

	fn set_status(&mut self, status: EntityStatus) {
		self.status = status;
	}

	fn touch(&mut self, at: DateTime<Utc>) {
		self.updated_at = at;
	}

	fn extract(snapshot: EntitySnapshot) -> Result<Self::Snapshot, SyncError> {
		match snapshot {
			EntitySnapshot::Account(s) => Ok(s),
			other => Err(wrong_variant(Self::KIND, &other)),
		}
	}

	fn differs(&self, _: &AccountSnapshot) -> bool {
		false
	}

	fn apply(&mut self, _: &AccountSnapshot) {}

	async fn list_active<R: Repository + ?Sized>(repo: &R) -> Result<Vec<Self>, StoreError> {
		repo.list_users(RowFilter::status(EntityStatus::Active)).await
	}

	async fn reload<R: Repository + ?Sized>(repo: &R, id: RowId) -> Result<Option<Self>, StoreError> {
		repo.find_user(UserLookup::Id(id)).await
	}

	async fn save<R: Repository + ?Sized>(&self, repo: &R) -> Result<(), StoreError> {
		repo.update_user(self).await
	}

	async fn key<R: Repository + ?Sized>(&self, _repo: &R) -> Result<EntityKey, SyncError> {
		Ok(EntityKey::Account {
			address: self.wallet_address.clone(),
		})
	}
}

/// Fetch and type the canonical snapshot for `key`.
pub(crate) async fn fetch<T: Canonical>(
	chain: &dyn ChainClient,
	key: &EntityKey,
) -> Result<Option<T::Snapshot>, SyncError> {
	match chain.get_entity_snapshot(key).await? {
		Some(snapshot) => Ok(Some(T::extract(snapshot)?)),
		None => Ok(None),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, Utc};
	use serde_json::json;

	fn question() -> VotingQuestion {
		let now = Utc::now();
		VotingQuestion {
			id: 1,
			on_chain_id: "Q1".into(),
			community_id: 1,
			title: "Budget".into(),
			description: None,
			options: json!(["yes", "no"]),
			deadline: now,
			created_by: 1,
			status: EntityStatus::Active,
			network: "devnet".into(),
			transaction_id: None,
			block_number: None,
			created_at: now,
			updated_at: now,
		}
	}

	#[test]
	fn deadline_compares_at_millisecond_precision() {
		let mut row = question();
		row.deadline = chrono::DateTime::from_timestamp_millis(1_900_000_000_000).unwrap();
		let mut snapshot = QuestionSnapshot {
			title: row.title.clone(),
			description: None,
			options: row.options.clone(),
			deadline: row.deadline + Duration::microseconds(300),
			status: EntityStatus::Active,
		};
		assert!(!row.differs(&snapshot));

		snapshot.deadline = row.deadline + Duration::seconds(1);
		assert!(row.differs(&snapshot));
	}

	#[test]
	fn apply_overwrites_canonical_fields() {
		let mut row = question();
		let snapshot = QuestionSnapshot {
			title: "Budget 2031".into(),
			description: Some("Annual".into()),
			options: json!(["a", "b", "c"]),
			deadline: row.deadline,
			status: EntityStatus::Ended,
		};
		assert!(row.differs(&snapshot));
		row.apply(&snapshot);
		assert!(!row.differs(&snapshot));
		assert_eq!(row.status, EntityStatus::Ended);
	}

	#[test]
	fn extract_rejects_other_variants() {
		let snapshot = EntitySnapshot::Account(AccountSnapshot { lamports: 1 });
		assert!(Community::extract(snapshot).is_err());
	}
}
