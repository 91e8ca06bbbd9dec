//! Per-event-kind handlers.
//!
//! Every handler is idempotent: it looks the entity up by its on-chain identity, creates it when
//! absent and updates it in place otherwise. Handlers that touch more than one row (creation with
//! the creator's membership, deletions with their cascades) run inside one store transaction.

use super::canonical::Canonical;
use super::events::EventKind;
use crate::chain::ChainEvent;
use crate::error::SyncError;
use crate::services::Cache;
use crate::store::*;
use crate::utils::short_wallet;
use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// TTL of `community:<on_chain_id>` cache entries
const COMMUNITY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Accepts RFC 3339 strings and unix milliseconds.
fn deadline<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Raw {
		Millis(i64),
		Text(DateTime<Utc>),
	}

	match Raw::deserialize(deserializer)? {
		Raw::Text(at) => Ok(at),
		Raw::Millis(ms) => Utc
			.timestamp_millis_opt(ms)
			.single()
			.ok_or_else(|| serde::de::Error::custom(format!("deadline out of range: {}", ms))),
	}
}

fn optional_deadline<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	struct Wrapper(#[serde(deserialize_with = "deadline")] DateTime<Utc>);

	Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(at)| at))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommunityCreated {
	community_id: String,
	name: String,
	#[serde(default)]
	description: Option<String>,
	creator: String,
	#[serde(default)]
	config: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommunityUpdated {
	community_id: String,
	#[serde(default)]
	name: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	config: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommunityRef {
	community_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MembershipChange {
	community_id: String,
	member_address: String,
	#[serde(default)]
	role: Option<MemberRole>,
	#[serde(default)]
	status: Option<EntityStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionCreated {
	question_id: String,
	community_id: String,
	title: String,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	options: Value,
	#[serde(deserialize_with = "deadline")]
	deadline: DateTime<Utc>,
	creator: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionUpdated {
	question_id: String,
	#[serde(default)]
	title: Option<String>,
	#[serde(default)]
	description: Option<String>,
	#[serde(default)]
	options: Option<Value>,
	#[serde(default, deserialize_with = "optional_deadline")]
	deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuestionRef {
	question_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteSubmitted {
	question_id: String,
	voter_address: String,
	vote_data: Value,
	#[serde(default)]
	signature: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserChange {
	wallet_address: String,
	#[serde(default)]
	username: Option<String>,
	#[serde(default)]
	status: Option<EntityStatus>,
}

fn payload<T: DeserializeOwned>(kind: EventKind, event: &ChainEvent) -> Result<T, SyncError> {
	serde_json::from_value(event.payload.clone())
		.map_err(|e| SyncError::InvalidPayload(format!("{}: {}", kind, e)))
}

/// Resolve the user owning `wallet`, creating it on first sight.
///
/// A concurrent creator may win the insert; the unique constraint turns that into a re-read.
pub(crate) async fn find_or_create_user<R>(repo: &R, wallet: &str) -> Result<User, SyncError>
where
	R: Repository + ?Sized,
{
	if let Some(user) = repo.find_user(UserLookup::Wallet(wallet.to_string())).await? {
		return Ok(user);
	}

	let username = format!("user_{}", short_wallet(wallet));
	match repo.create_user(User::draft(wallet, username)).await {
		Ok(user) => {
			debug!("Created user {} for wallet {}", user.id, wallet);
			Ok(user)
		}
		Err(StoreError::Duplicate(_)) => repo
			.find_user(UserLookup::Wallet(wallet.to_string()))
			.await?
			.ok_or_else(|| SyncError::MissingParent(format!("user {}", wallet))),
		Err(e) => Err(e.into()),
	}
}

async fn require_community<R>(repo: &R, on_chain_id: &str) -> Result<Community, SyncError>
where
	R: Repository + ?Sized,
{
	repo.find_community(Lookup::OnChainId(on_chain_id.to_string()))
		.await?
		.ok_or_else(|| SyncError::MissingParent(format!("community {}", on_chain_id)))
}

async fn require_question<R>(repo: &R, on_chain_id: &str) -> Result<VotingQuestion, SyncError>
where
	R: Repository + ?Sized,
{
	repo.find_question(Lookup::OnChainId(on_chain_id.to_string()))
		.await?
		.ok_or_else(|| SyncError::MissingParent(format!("question {}", on_chain_id)))
}

/// Create or refresh the membership of `user` in `community`.
async fn upsert_member<R>(
	repo: &R,
	community: &Community,
	user: &User,
	role: Option<MemberRole>,
	status: Option<EntityStatus>,
	event: &ChainEvent,
) -> Result<Member, SyncError>
where
	R: Repository + ?Sized,
{
	let now = Utc::now();
	match repo
		.find_member(PairLookup::Pair(community.id, user.id))
		.await?
	{
		Some(mut member) => {
			if let Some(role) = role {
				member.role = role;
			}
			if let Some(status) = status {
				member.status = status;
			}
			member.network = event.network.clone();
			member.transaction_id = event.tx_id.clone();
			member.updated_at = now;
			repo.update_member(&member).await?;
			Ok(member)
		}
		None => Ok(repo
			.create_member(Member {
				id: 0,
				community_id: community.id,
				user_id: user.id,
				role: role.unwrap_or(MemberRole::Member),
				status: status.unwrap_or(EntityStatus::Active),
				joined_at: now,
				network: event.network.clone(),
				transaction_id: event.tx_id.clone(),
				created_at: now,
				updated_at: now,
			})
			.await?),
	}
}

/// Commit `tx` when `result` is `Ok`, roll it back otherwise.
pub(crate) async fn finish<T>(
	tx: Box<dyn StoreTransaction>,
	result: Result<T, SyncError>,
) -> Result<T, SyncError> {
	match result {
		Ok(value) => {
			tx.commit().await?;
			Ok(value)
		}
		Err(e) => {
			if let Err(rollback) = tx.rollback().await {
				tracing::error!("Rollback failed after {}: {}", e, rollback);
			}
			Err(e)
		}
	}
}

/// Dispatch target for every `EventKind`.
pub(crate) struct EventHandlers {
	store: Arc<dyn Store>,
	cache: Arc<dyn Cache>,
}

impl EventHandlers {
	pub(crate) fn new(store: Arc<dyn Store>, cache: Arc<dyn Cache>) -> Self {
		Self { store, cache }
	}

	pub(crate) async fn handle(&self, kind: EventKind, event: &ChainEvent) -> Result<(), SyncError> {
		match kind {
			EventKind::CommunityCreated => self.community_created(payload(kind, event)?, event).await,
			EventKind::CommunityUpdated => self.community_updated(payload(kind, event)?, event).await,
			EventKind::CommunityDeleted => self.community_deleted(payload(kind, event)?).await,
			EventKind::MemberJoined => {
				let change: MembershipChange = payload(kind, event)?;
				let status = change.status.unwrap_or(EntityStatus::Active);
				self.membership_changed(change, Some(status), event).await
			}
			EventKind::MemberLeft => {
				self.membership_changed(payload(kind, event)?, Some(EntityStatus::Inactive), event)
					.await
			}
			EventKind::MemberApproved => {
				self.membership_changed(payload(kind, event)?, Some(EntityStatus::Active), event)
					.await
			}
			EventKind::MemberRoleChanged => {
				let change: MembershipChange = payload(kind, event)?;
				if change.role.is_none() {
					return Err(SyncError::InvalidPayload(format!("{}: missing role", kind)));
				}
				self.membership_changed(change, None, event).await
			}
			EventKind::VotingQuestionCreated => {
				self.question_created(payload(kind, event)?, event).await
			}
			EventKind::VotingQuestionUpdated => {
				self.question_updated(payload(kind, event)?, event).await
			}
			EventKind::VotingQuestionDeleted => self.question_deleted(payload(kind, event)?).await,
			EventKind::VotingEnded => self.voting_ended(payload(kind, event)?).await,
			EventKind::VoteCast | EventKind::VoteUpdated => {
				self.vote_submitted(payload(kind, event)?, event).await
			}
			EventKind::UserRegistered | EventKind::UserUpdated => {
				self.user_changed(payload(kind, event)?).await
			}
		}
	}

	async fn cache_community(&self, community: &Community) {
		let key = format!("community:{}", community.on_chain_id);
		let value = match serde_json::to_value(community) {
			Ok(value) => value,
			Err(e) => {
				debug!("Skipping cache write for {}: {}", key, e);
				return;
			}
		};
		if let Err(e) = self.cache.set(&key, value, COMMUNITY_CACHE_TTL).await {
			debug!("Failed to update community cache {}: {}", key, e);
		}
	}

	async fn community_created(
		&self,
		data: CommunityCreated,
		event: &ChainEvent,
	) -> Result<(), SyncError> {
		let tx = self.store.begin_transaction().await?;
		let result = async {
			let creator = find_or_create_user(&*tx, &data.creator).await?;
			let community = match tx
				.find_community(Lookup::OnChainId(data.community_id.clone()))
				.await?
			{
				Some(existing) => {
					debug!("Community {} already exists", data.community_id);
					existing
				}
				None => {
					let now = Utc::now();
					tx.create_community(Community {
						id: 0,
						on_chain_id: data.community_id.clone(),
						name: data.name.clone(),
						description: data.description.clone(),
						config: data.config.clone(),
						created_by: creator.id,
						network: event.network.clone(),
						transaction_id: event.tx_id.clone(),
						block_number: event.block_number,
						status: EntityStatus::Active,
						created_at: now,
						updated_at: now,
					})
					.await?
				}
			};
			if tx
				.find_member(PairLookup::Pair(community.id, creator.id))
				.await?
				.is_none()
			{
				upsert_member(
					&*tx,
					&community,
					&creator,
					Some(MemberRole::Admin),
					Some(EntityStatus::Active),
					event,
				)
				.await?;
			}
			Ok::<_, SyncError>(community)
		}
		.await;

		let community = finish(tx, result).await?;
		self.cache_community(&community).await;
		info!("Community created: {}", community.on_chain_id);
		Ok(())
	}

	async fn community_updated(
		&self,
		data: CommunityUpdated,
		event: &ChainEvent,
	) -> Result<(), SyncError> {
		let mut community = require_community(&*self.store, &data.community_id).await?;

		if let Some(name) = data.name {
			community.name = name;
		}
		if data.description.is_some() {
			community.description = data.description;
		}
		if let Some(config) = data.config {
			community.config = config;
		}
		community.network = event.network.clone();
		community.transaction_id = event.tx_id.clone();
		community.block_number = event.block_number.or(community.block_number);
		community.updated_at = Utc::now();
		self.store.update_community(&community).await?;

		self.cache_community(&community).await;
		info!("Community updated: {}", community.on_chain_id);
		Ok(())
	}

	async fn community_deleted(&self, data: CommunityRef) -> Result<(), SyncError> {
		let tx = self.store.begin_transaction().await?;
		let result = async {
			let mut community = require_community(&*tx, &data.community_id).await?;
			let now = Utc::now();
			community.status = EntityStatus::Inactive;
			community.updated_at = now;
			tx.update_community(&community).await?;
			community.deactivate_dependents(&*tx, now).await?;
			Ok::<_, SyncError>(())
		}
		.await;
		finish(tx, result).await?;

		let key = format!("community:{}", data.community_id);
		if let Err(e) = self.cache.delete(&key).await {
			debug!("Failed to invalidate {}: {}", key, e);
		}
		info!("Community deleted: {}", data.community_id);
		Ok(())
	}

	async fn membership_changed(
		&self,
		data: MembershipChange,
		status: Option<EntityStatus>,
		event: &ChainEvent,
	) -> Result<(), SyncError> {
		let community = require_community(&*self.store, &data.community_id).await?;
		let user = find_or_create_user(&*self.store, &data.member_address).await?;
		let member = upsert_member(&*self.store, &community, &user, data.role, status, event).await?;
		info!(
			"Membership {} -> {} is {}",
			data.member_address, data.community_id, member.status
		);
		Ok(())
	}

	async fn question_created(
		&self,
		data: QuestionCreated,
		event: &ChainEvent,
	) -> Result<(), SyncError> {
		let community = require_community(&*self.store, &data.community_id).await?;
		let creator = find_or_create_user(&*self.store, &data.creator).await?;
		let now = Utc::now();

		match self
			.store
			.find_question(Lookup::OnChainId(data.question_id.clone()))
			.await?
		{
			Some(mut question) => {
				question.title = data.title;
				question.description = data.description;
				question.options = data.options;
				question.deadline = data.deadline;
				question.network = event.network.clone();
				question.transaction_id = event.tx_id.clone();
				question.block_number = event.block_number.or(question.block_number);
				question.updated_at = now;
				self.store.update_question(&question).await?;
			}
			None => {
				self.store
					.create_question(VotingQuestion {
						id: 0,
						on_chain_id: data.question_id.clone(),
						community_id: community.id,
						title: data.title,
						description: data.description,
						options: data.options,
						deadline: data.deadline,
						created_by: creator.id,
						status: EntityStatus::Active,
						network: event.network.clone(),
						transaction_id: event.tx_id.clone(),
						block_number: event.block_number,
						created_at: now,
						updated_at: now,
					})
					.await?;
			}
		}

		info!("Voting question created: {}", data.question_id);
		Ok(())
	}

	async fn question_updated(
		&self,
		data: QuestionUpdated,
		event: &ChainEvent,
	) -> Result<(), SyncError> {
		let mut question = require_question(&*self.store, &data.question_id).await?;

		if let Some(title) = data.title {
			question.title = title;
		}
		if data.description.is_some() {
			question.description = data.description;
		}
		if let Some(options) = data.options {
			question.options = options;
		}
		if let Some(deadline) = data.deadline {
			question.deadline = deadline;
		}
		question.network = event.network.clone();
		question.transaction_id = event.tx_id.clone();
		question.block_number = event.block_number.or(question.block_number);
		question.updated_at = Utc::now();
		self.store.update_question(&question).await?;

		info!("Voting question updated: {}", data.question_id);
		Ok(())
	}

	async fn question_deleted(&self, data: QuestionRef) -> Result<(), SyncError> {
		let tx = self.store.begin_transaction().await?;
		let result = async {
			let mut question = require_question(&*tx, &data.question_id).await?;
			let now = Utc::now();
			question.status = EntityStatus::Inactive;
			question.updated_at = now;
			tx.update_question(&question).await?;
			question.deactivate_dependents(&*tx, now).await?;
			Ok::<_, SyncError>(())
		}
		.await;
		finish(tx, result).await?;

		info!("Voting question deleted: {}", data.question_id);
		Ok(())
	}

	async fn voting_ended(&self, data: QuestionRef) -> Result<(), SyncError> {
		let mut question = require_question(&*self.store, &data.question_id).await?;
		if question.status != EntityStatus::Ended {
			question.status = EntityStatus::Ended;
			question.updated_at = Utc::now();
			self.store.update_question(&question).await?;
		}
		info!("Voting ended: {}", data.question_id);
		Ok(())
	}

	async fn vote_submitted(&self, data: VoteSubmitted, event: &ChainEvent) -> Result<(), SyncError> {
		let question = require_question(&*self.store, &data.question_id).await?;
		let voter = find_or_create_user(&*self.store, &data.voter_address).await?;
		let now = Utc::now();

		match self
			.store
			.find_vote(PairLookup::Pair(question.id, voter.id))
			.await?
		{
			Some(mut vote) => {
				vote.vote_data = data.vote_data;
				vote.signature = data.signature;
				vote.status = EntityStatus::Active;
				vote.network = event.network.clone();
				vote.transaction_id = event.tx_id.clone();
				vote.updated_at = now;
				self.store.update_vote(&vote).await?;
			}
			None => {
				self.store
					.create_vote(Vote {
						id: 0,
						question_id: question.id,
						user_id: voter.id,
						vote_data: data.vote_data,
						signature: data.signature,
						status: EntityStatus::Active,
						network: event.network.clone(),
						transaction_id: event.tx_id.clone(),
						created_at: now,
						updated_at: now,
					})
					.await?;
			}
		}

		info!("Vote cast: {} -> {}", data.voter_address, data.question_id);
		Ok(())
	}

	async fn user_changed(&self, data: UserChange) -> Result<(), SyncError> {
		let mut user = find_or_create_user(&*self.store, &data.wallet_address).await?;

		let mut changed = false;
		if let Some(username) = data.username.filter(|u| *u != user.username) {
			user.username = username;
			changed = true;
		}
		if let Some(status) = data.status.filter(|s| *s != user.status) {
			user.status = status;
			changed = true;
		}
		if changed {
			user.updated_at = Utc::now();
			self.store.update_user(&user).await?;
		}

		debug!("User synced: {}", data.wallet_address);
		Ok(())
	}
}
