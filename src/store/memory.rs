//! In-memory implementation of the store.
//!
//! All tables live behind one async mutex. A transaction takes ownership of that mutex for its
//! whole lifetime and works on a staged copy of the tables; `commit` swaps the staged copy in,
//! `rollback` (or dropping the transaction) discards it. Transactions are therefore serialized,
//! which keeps multi-row changes atomic without any cross-entity locking in the callers.

use super::*;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Tables {
	next_id: RowId,
	users: BTreeMap<RowId, User>,
	communities: BTreeMap<RowId, Community>,
	members: BTreeMap<RowId, Member>,
	questions: BTreeMap<RowId, VotingQuestion>,
	votes: BTreeMap<RowId, Vote>,
	/// Entity kinds whose writes fail, for fault injection
	rejected: HashSet<EntityKind>,
}

fn matches(filter: &RowFilter, status: EntityStatus, parent: Option<RowId>) -> bool {
	filter.status.is_none_or(|s| s == status)
		&& filter.parent_id.is_none_or(|p| parent == Some(p))
}

impl Tables {
	fn allocate(&mut self) -> RowId {
		self.next_id += 1;
		self.next_id
	}

	fn writable(&self, kind: EntityKind) -> Result<(), StoreError> {
		if self.rejected.contains(&kind) {
			return Err(StoreError::WriteRejected(kind));
		}
		Ok(())
	}

	fn find_user(&self, by: &UserLookup) -> Option<User> {
		match by {
			UserLookup::Id(id) => self.users.get(id).cloned(),
			UserLookup::Wallet(wallet) => self
				.users
				.values()
				.find(|u| &u.wallet_address == wallet)
				.cloned(),
		}
	}

	fn list_users(&self, filter: &RowFilter) -> Vec<User> {
		self.users
			.values()
			.filter(|u| matches(filter, u.status, None))
			.cloned()
			.collect()
	}

	fn create_user(&mut self, mut user: User) -> Result<User, StoreError> {
		self.writable(EntityKind::User)?;
		if self.find_user(&UserLookup::Wallet(user.wallet_address.clone())).is_some() {
			return Err(StoreError::Duplicate(format!(
				"user wallet {}",
				user.wallet_address
			)));
		}
		let now = Utc::now();
		user.id = self.allocate();
		user.created_at = now;
		user.updated_at = now;
		self.users.insert(user.id, user.clone());
		Ok(user)
	}

	fn update_user(&mut self, user: &User) -> Result<(), StoreError> {
		self.writable(EntityKind::User)?;
		let slot = self.users.get_mut(&user.id).ok_or(StoreError::NotFound {
			kind: EntityKind::User,
			id: user.id,
		})?;
		*slot = user.clone();
		Ok(())
	}

	fn find_community(&self, by: &Lookup) -> Option<Community> {
		match by {
			Lookup::Id(id) => self.communities.get(id).cloned(),
			Lookup::OnChainId(on_chain_id) => self
				.communities
				.values()
				.find(|c| &c.on_chain_id == on_chain_id)
				.cloned(),
		}
	}

	fn list_communities(&self, filter: &RowFilter) -> Vec<Community> {
		self.communities
			.values()
			.filter(|c| matches(filter, c.status, None))
			.cloned()
			.collect()
	}

	fn create_community(&mut self, mut community: Community) -> Result<Community, StoreError> {
		self.writable(EntityKind::Community)?;
		if self
			.find_community(&Lookup::OnChainId(community.on_chain_id.clone()))
			.is_some()
		{
			return Err(StoreError::Duplicate(format!(
				"community {}",
				community.on_chain_id
			)));
		}
		let now = Utc::now();
		community.id = self.allocate();
		community.created_at = now;
		community.updated_at = now;
		self.communities.insert(community.id, community.clone());
		Ok(community)
	}

	fn update_community(&mut self, community: &Community) -> Result<(), StoreError> {
		self.writable(EntityKind::Community)?;
		let slot = self
			.communities
			.get_mut(&community.id)
			.ok_or(StoreError::NotFound {
				kind: EntityKind::Community,
				id: community.id,
			})?;
		*slot = community.clone();
		Ok(())
	}

	fn find_member(&self, by: &PairLookup) -> Option<Member> {
		match by {
			PairLookup::Id(id) => self.members.get(id).cloned(),
			PairLookup::Pair(community_id, user_id) => self
				.members
				.values()
				.find(|m| m.community_id == *community_id && m.user_id == *user_id)
				.cloned(),
		}
	}

	fn list_members(&self, filter: &RowFilter) -> Vec<Member> {
		self.members
			.values()
			.filter(|m| matches(filter, m.status, Some(m.community_id)))
			.cloned()
			.collect()
	}

	fn create_member(&mut self, mut member: Member) -> Result<Member, StoreError> {
		self.writable(EntityKind::Membership)?;
		if self
			.find_member(&PairLookup::Pair(member.community_id, member.user_id))
			.is_some()
		{
			return Err(StoreError::Duplicate(format!(
				"membership of user #{} in community #{}",
				member.user_id, member.community_id
			)));
		}
		let now = Utc::now();
		member.id = self.allocate();
		member.created_at = now;
		member.updated_at = now;
		self.members.insert(member.id, member.clone());
		Ok(member)
	}

	fn update_member(&mut self, member: &Member) -> Result<(), StoreError> {
		self.writable(EntityKind::Membership)?;
		let slot = self.members.get_mut(&member.id).ok_or(StoreError::NotFound {
			kind: EntityKind::Membership,
			id: member.id,
		})?;
		*slot = member.clone();
		Ok(())
	}

	fn find_question(&self, by: &Lookup) -> Option<VotingQuestion> {
		match by {
			Lookup::Id(id) => self.questions.get(id).cloned(),
			Lookup::OnChainId(on_chain_id) => self
				.questions
				.values()
				.find(|q| &q.on_chain_id == on_chain_id)
				.cloned(),
		}
	}

	fn list_questions(&self, filter: &RowFilter) -> Vec<VotingQuestion> {
		self.questions
			.values()
			.filter(|q| matches(filter, q.status, Some(q.community_id)))
			.cloned()
			.collect()
	}

	fn create_question(
		&mut self,
		mut question: VotingQuestion,
	) -> Result<VotingQuestion, StoreError> {
		self.writable(EntityKind::Question)?;
		if self
			.find_question(&Lookup::OnChainId(question.on_chain_id.clone()))
			.is_some()
		{
			return Err(StoreError::Duplicate(format!(
				"question {}",
				question.on_chain_id
			)));
		}
		let now = Utc::now();
		question.id = self.allocate();
		question.created_at = now;
		question.updated_at = now;
		self.questions.insert(question.id, question.clone());
		Ok(question)
	}

	fn update_question(&mut self, question: &VotingQuestion) -> Result<(), StoreError> {
		self.writable(EntityKind::Question)?;
		let slot = self
			.questions
			.get_mut(&question.id)
			.ok_or(StoreError::NotFound {
				kind: EntityKind::Question,
				id: question.id,
			})?;
		*slot = question.clone();
		Ok(())
	}

	fn find_vote(&self, by: &PairLookup) -> Option<Vote> {
		match by {
			PairLookup::Id(id) => self.votes.get(id).cloned(),
			PairLookup::Pair(question_id, user_id) => self
				.votes
				.values()
				.find(|v| v.question_id == *question_id && v.user_id == *user_id)
				.cloned(),
		}
	}

	fn list_votes(&self, filter: &RowFilter) -> Vec<Vote> {
		self.votes
			.values()
			.filter(|v| matches(filter, v.status, Some(v.question_id)))
			.cloned()
			.collect()
	}

	fn create_vote(&mut self, mut vote: Vote) -> Result<Vote, StoreError> {
		self.writable(EntityKind::Vote)?;
		if self
			.find_vote(&PairLookup::Pair(vote.question_id, vote.user_id))
			.is_some()
		{
			return Err(StoreError::Duplicate(format!(
				"vote of user #{} on question #{}",
				vote.user_id, vote.question_id
			)));
		}
		let now = Utc::now();
		vote.id = self.allocate();
		vote.created_at = now;
		vote.updated_at = now;
		self.votes.insert(vote.id, vote.clone());
		Ok(vote)
	}

	fn update_vote(&mut self, vote: &Vote) -> Result<(), StoreError> {
		self.writable(EntityKind::Vote)?;
		let slot = self.votes.get_mut(&vote.id).ok_or(StoreError::NotFound {
			kind: EntityKind::Vote,
			id: vote.id,
		})?;
		*slot = vote.clone();
		Ok(())
	}
}

/// Implements `Repository` by locking `$tables` and delegating to `Tables`.
macro_rules! delegate_repository {
	($ty:ty, $this:ident => $tables:expr) => {
		#[async_trait]
		impl Repository for $ty {
			async fn find_user(&self, by: UserLookup) -> Result<Option<User>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.find_user(&by))
			}
			async fn list_users(&self, filter: RowFilter) -> Result<Vec<User>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.list_users(&filter))
			}
			async fn create_user(&self, user: User) -> Result<User, StoreError> {
				let $this = self;
				$tables.lock().await.create_user(user)
			}
			async fn update_user(&self, user: &User) -> Result<(), StoreError> {
				let $this = self;
				$tables.lock().await.update_user(user)
			}

			async fn find_community(&self, by: Lookup) -> Result<Option<Community>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.find_community(&by))
			}
			async fn list_communities(
				&self,
				filter: RowFilter,
			) -> Result<Vec<Community>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.list_communities(&filter))
			}
			async fn create_community(&self, community: Community) -> Result<Community, StoreError> {
				let $this = self;
				$tables.lock().await.create_community(community)
			}
			async fn update_community(&self, community: &Community) -> Result<(), StoreError> {
				let $this = self;
				$tables.lock().await.update_community(community)
			}

			async fn find_member(&self, by: PairLookup) -> Result<Option<Member>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.find_member(&by))
			}
			async fn list_members(&self, filter: RowFilter) -> Result<Vec<Member>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.list_members(&filter))
			}
			async fn create_member(&self, member: Member) -> Result<Member, StoreError> {
				let $this = self;
				$tables.lock().await.create_member(member)
			}
			async fn update_member(&self, member: &Member) -> Result<(), StoreError> {
				let $this = self;
				$tables.lock().await.update_member(member)
			}

			async fn find_question(
				&self,
				by: Lookup,
			) -> Result<Option<VotingQuestion>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.find_question(&by))
			}
			async fn list_questions(
				&self,
				filter: RowFilter,
			) -> Result<Vec<VotingQuestion>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.list_questions(&filter))
			}
			async fn create_question(
				&self,
				question: VotingQuestion,
			) -> Result<VotingQuestion, StoreError> {
				let $this = self;
				$tables.lock().await.create_question(question)
			}
			async fn update_question(&self, question: &VotingQuestion) -> Result<(), StoreError> {
				let $this = self;
				$tables.lock().await.update_question(question)
			}

			async fn find_vote(&self, by: PairLookup) -> Result<Option<Vote>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.find_vote(&by))
			}
			async fn list_votes(&self, filter: RowFilter) -> Result<Vec<Vote>, StoreError> {
				let $this = self;
				Ok($tables.lock().await.list_votes(&filter))
			}
			async fn create_vote(&self, vote: Vote) -> Result<Vote, StoreError> {
				let $this = self;
				$tables.lock().await.create_vote(vote)
			}
			async fn update_vote(&self, vote: &Vote) -> Result<(), StoreError> {
				let $this = self;
				$tables.lock().await.update_vote(vote)
			}
		}
	};
}

/// Transactional in-memory store.
#[derive(Clone, Default)]
pub struct InMemoryStore {
	tables: Arc<Mutex<Tables>>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make every write to `kind` fail until `accept_writes` is called. Used for fault injection.
	pub async fn reject_writes(&self, kind: EntityKind) {
		self.tables.lock().await.rejected.insert(kind);
	}

	pub async fn accept_writes(&self, kind: EntityKind) {
		self.tables.lock().await.rejected.remove(&kind);
	}
}

delegate_repository!(InMemoryStore, this => this.tables);

#[async_trait]
impl Store for InMemoryStore {
	async fn begin_transaction(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
		let guard = self.tables.clone().lock_owned().await;
		let staged = Mutex::new(guard.clone());
		Ok(Box::new(MemoryTransaction { guard, staged }))
	}
}

/// Open transaction holding the table lock.
struct MemoryTransaction {
	guard: OwnedMutexGuard<Tables>,
	staged: Mutex<Tables>,
}

delegate_repository!(MemoryTransaction, this => this.staged);

#[async_trait]
impl StoreTransaction for MemoryTransaction {
	async fn commit(self: Box<Self>) -> Result<(), StoreError> {
		let MemoryTransaction { mut guard, staged } = *self;
		*guard = staged.into_inner();
		debug!("Committed in-memory transaction");
		Ok(())
	}

	async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
		debug!("Rolled back in-memory transaction");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn community(on_chain_id: &str, created_by: RowId) -> Community {
		let now = Utc::now();
		Community {
			id: 0,
			on_chain_id: on_chain_id.to_string(),
			name: "Alpha".to_string(),
			description: None,
			config: json!({}),
			created_by,
			network: "devnet".to_string(),
			transaction_id: None,
			block_number: None,
			status: EntityStatus::Active,
			created_at: now,
			updated_at: now,
		}
	}

	#[tokio::test]
	async fn unique_keys_are_enforced() {
		let store = InMemoryStore::new();
		let user = store
			.create_user(User::draft("W1", "user_W1".to_string()))
			.await
			.unwrap();
		assert!(user.id > 0);
		assert!(matches!(
			store.create_user(User::draft("W1", "again".to_string())).await,
			Err(StoreError::Duplicate(_))
		));

		store.create_community(community("C1", user.id)).await.unwrap();
		assert!(store.create_community(community("C1", user.id)).await.is_err());
	}

	#[tokio::test]
	async fn rollback_discards_staged_writes() {
		let store = InMemoryStore::new();
		let user = store
			.create_user(User::draft("W1", "user_W1".to_string()))
			.await
			.unwrap();

		let tx = store.begin_transaction().await.unwrap();
		let mut staged = tx.find_user(UserLookup::Id(user.id)).await.unwrap().unwrap();
		staged.status = EntityStatus::Inactive;
		tx.update_user(&staged).await.unwrap();
		tx.rollback().await.unwrap();

		let stored = store.find_user(UserLookup::Id(user.id)).await.unwrap().unwrap();
		assert_eq!(stored.status, EntityStatus::Active);
	}

	#[tokio::test]
	async fn commit_publishes_all_staged_writes() {
		let store = InMemoryStore::new();
		let user = store
			.create_user(User::draft("W1", "user_W1".to_string()))
			.await
			.unwrap();
		let created = store.create_community(community("C1", user.id)).await.unwrap();

		let tx = store.begin_transaction().await.unwrap();
		let mut row = tx.find_community(Lookup::Id(created.id)).await.unwrap().unwrap();
		row.name = "Beta".to_string();
		tx.update_community(&row).await.unwrap();
		tx.commit().await.unwrap();

		let stored = store
			.find_community(Lookup::OnChainId("C1".to_string()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.name, "Beta");
	}

	#[tokio::test]
	async fn rejected_writes_fail_until_accepted() {
		let store = InMemoryStore::new();
		store.reject_writes(EntityKind::User).await;
		assert!(matches!(
			store.create_user(User::draft("W1", "u".to_string())).await,
			Err(StoreError::WriteRejected(EntityKind::User))
		));
		store.accept_writes(EntityKind::User).await;
		assert!(store.create_user(User::draft("W1", "u".to_string())).await.is_ok());
	}
}
