//! Chain event ingestion.
//!
//! `EventProcessor::submit` appends to an in-memory queue; a single drain task pulls batches of
//! up to `batch_size` events and fans them out. Events in one batch are grouped by the entity they
//! touch: groups run concurrently, events inside a group run in arrival order, so two events for
//! the same entity never race.
//!
//! A failed event is pushed back to the front of the queue after `retry_delay * retry_count`; once
//! `max_retry_attempts` retries are used up it is dead-lettered (logged and counted, then dropped).

use super::handlers::EventHandlers;
use crate::chain::ChainEvent;
use crate::config::EventProcessorConfig;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink, Cache};
use crate::store::Store;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Every event type emitted by the voting program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
	CommunityCreated,
	CommunityUpdated,
	CommunityDeleted,
	MemberJoined,
	MemberLeft,
	MemberApproved,
	MemberRoleChanged,
	VotingQuestionCreated,
	VotingQuestionUpdated,
	VotingQuestionDeleted,
	VoteCast,
	VoteUpdated,
	VotingEnded,
	UserRegistered,
	UserUpdated,
}

impl EventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::CommunityCreated => "CommunityCreated",
			EventKind::CommunityUpdated => "CommunityUpdated",
			EventKind::CommunityDeleted => "CommunityDeleted",
			EventKind::MemberJoined => "MemberJoined",
			EventKind::MemberLeft => "MemberLeft",
			EventKind::MemberApproved => "MemberApproved",
			EventKind::MemberRoleChanged => "MemberRoleChanged",
			EventKind::VotingQuestionCreated => "VotingQuestionCreated",
			EventKind::VotingQuestionUpdated => "VotingQuestionUpdated",
			EventKind::VotingQuestionDeleted => "VotingQuestionDeleted",
			EventKind::VoteCast => "VoteCast",
			EventKind::VoteUpdated => "VoteUpdated",
			EventKind::VotingEnded => "VotingEnded",
			EventKind::UserRegistered => "UserRegistered",
			EventKind::UserUpdated => "UserUpdated",
		}
	}

	/// Keys of the entities an event of this kind mutates or depends on, used to serialize events
	/// within a batch.
	///
	/// Membership events share the community key so they stay ordered behind the creation of
	/// their community; votes likewise share the question key. A question creation carries both
	/// its community and its own key.
	fn partition_keys(&self, event: &ChainEvent) -> Vec<String> {
		let field = |name: &str| event.payload.get(name).and_then(|v| v.as_str());
		let community = || field("communityId").map(|id| format!("community:{}", id));
		let question = || field("questionId").map(|id| format!("question:{}", id));
		match self {
			EventKind::CommunityCreated
			| EventKind::CommunityUpdated
			| EventKind::CommunityDeleted
			| EventKind::MemberJoined
			| EventKind::MemberLeft
			| EventKind::MemberApproved
			| EventKind::MemberRoleChanged => community().into_iter().collect(),
			EventKind::VotingQuestionCreated => community().into_iter().chain(question()).collect(),
			EventKind::VotingQuestionUpdated
			| EventKind::VotingQuestionDeleted
			| EventKind::VoteCast
			| EventKind::VoteUpdated
			| EventKind::VotingEnded => question().into_iter().collect(),
			EventKind::UserRegistered | EventKind::UserUpdated => field("walletAddress")
				.map(|w| format!("user:{}", w))
				.into_iter()
				.collect(),
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for EventKind {
	type Err = SyncError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"CommunityCreated" => EventKind::CommunityCreated,
			"CommunityUpdated" => EventKind::CommunityUpdated,
			"CommunityDeleted" => EventKind::CommunityDeleted,
			"MemberJoined" => EventKind::MemberJoined,
			"MemberLeft" => EventKind::MemberLeft,
			"MemberApproved" => EventKind::MemberApproved,
			"MemberRoleChanged" => EventKind::MemberRoleChanged,
			"VotingQuestionCreated" => EventKind::VotingQuestionCreated,
			"VotingQuestionUpdated" => EventKind::VotingQuestionUpdated,
			"VotingQuestionDeleted" => EventKind::VotingQuestionDeleted,
			"VoteCast" => EventKind::VoteCast,
			"VoteUpdated" => EventKind::VoteUpdated,
			"VotingEnded" => EventKind::VotingEnded,
			"UserRegistered" => EventKind::UserRegistered,
			"UserUpdated" => EventKind::UserUpdated,
			other => return Err(SyncError::UnknownEvent(other.to_string())),
		})
	}
}

/// Snapshot of the processor's queue and counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatistics {
	pub queue_length: usize,
	pub is_processing: bool,
	/// Events handled successfully
	pub processed: u64,
	/// Failed attempts, including ones that were retried
	pub failed: u64,
	/// Events dropped after exhausting their retries
	pub dead_lettered: u64,
	/// Events dropped because no handler exists for their type
	pub dropped: u64,
}

#[derive(Default)]
struct Counters {
	processed: AtomicU64,
	failed: AtomicU64,
	dead_lettered: AtomicU64,
	dropped: AtomicU64,
}

struct Inner {
	config: EventProcessorConfig,
	handlers: EventHandlers,
	audit: Arc<dyn AuditSink>,
	queue: Mutex<VecDeque<ChainEvent>>,
	draining: AtomicBool,
	paused: AtomicBool,
	/// Cancelled on `pause`; pending retry timers hold a clone
	retry_token: Mutex<CancellationToken>,
	counters: Counters,
}

/// Queued, batched, retrying event dispatcher.
#[derive(Clone)]
pub struct EventProcessor {
	inner: Arc<Inner>,
}

impl EventProcessor {
	/// Create an event processor.
	///
	/// # Arguments
	/// * `config` - Batch size, batch pause and retry policy.
	/// * `store` - Projection the handlers write to.
	/// * `cache` - Receives `community:<on_chain_id>` entries after community writes.
	/// * `audit` - Sink for received, processed, retried and failed events.
	pub fn new(
		config: EventProcessorConfig,
		store: Arc<dyn Store>,
		cache: Arc<dyn Cache>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				handlers: EventHandlers::new(store, cache),
				audit,
				queue: Mutex::new(VecDeque::new()),
				draining: AtomicBool::new(false),
				paused: AtomicBool::new(false),
				retry_token: Mutex::new(CancellationToken::new()),
				counters: Counters::default(),
			}),
		}
	}

	/// Queue an event and make sure a drain is running.
	pub async fn submit(&self, event: ChainEvent) {
		debug!(
			"Received event {} (tx {:?}, block {:?})",
			event.event_type, event.tx_id, event.block_number
		);
		self.inner.audit.log(
			"blockchain_event_received",
			AuditEntry::info(
				AuditCategory::Sync,
				json!({
					"eventType": event.event_type,
					"transactionId": event.tx_id,
					"blockNumber": event.block_number,
					"network": event.network,
				}),
			),
		);
		self.inner.queue.lock().await.push_back(event);
		Inner::kick(&self.inner);
	}

	/// Stop draining and cancel pending retry timers. Queued events stay queued; an in-flight
	/// batch runs to completion.
	pub async fn pause(&self) {
		self.inner.paused.store(true, Ordering::SeqCst);
		self.inner.retry_token.lock().await.cancel();
		debug!("Event processing paused");
	}

	/// Resume draining whatever is queued.
	pub async fn resume(&self) {
		*self.inner.retry_token.lock().await = CancellationToken::new();
		self.inner.paused.store(false, Ordering::SeqCst);
		Inner::kick(&self.inner);
		debug!("Event processing resumed");
	}

	pub async fn get_processing_statistics(&self) -> ProcessingStatistics {
		let counters = &self.inner.counters;
		ProcessingStatistics {
			queue_length: self.inner.queue.lock().await.len(),
			is_processing: self.inner.draining.load(Ordering::SeqCst),
			processed: counters.processed.load(Ordering::SeqCst),
			failed: counters.failed.load(Ordering::SeqCst),
			dead_lettered: counters.dead_lettered.load(Ordering::SeqCst),
			dropped: counters.dropped.load(Ordering::SeqCst),
		}
	}

	/// Drop every queued event. Returns how many were discarded.
	pub async fn clear_queue(&self) -> usize {
		let mut queue = self.inner.queue.lock().await;
		let cleared = queue.len();
		queue.clear();
		info!("Event processing queue cleared ({} events)", cleared);
		cleared
	}
}

impl Inner {
	/// Start a drain task unless one is running or processing is paused.
	fn kick(this: &Arc<Self>) {
		if this.paused.load(Ordering::SeqCst) {
			return;
		}
		if this.draining.swap(true, Ordering::SeqCst) {
			return;
		}
		let inner = this.clone();
		tokio::spawn(async move { inner.drain().await });
	}

	async fn drain(self: Arc<Self>) {
		loop {
			if self.paused.load(Ordering::SeqCst) {
				self.draining.store(false, Ordering::SeqCst);
				return;
			}

			let batch: Vec<ChainEvent> = {
				let mut queue = self.queue.lock().await;
				let take = queue.len().min(self.config.batch_size);
				queue.drain(..take).collect()
			};

			if batch.is_empty() {
				self.draining.store(false, Ordering::SeqCst);
				// An event may have been queued between the empty read and the flag reset
				if self.queue.lock().await.is_empty() || self.draining.swap(true, Ordering::SeqCst)
				{
					return;
				}
				continue;
			}

			self.process_batch(batch).await;

			if !self.queue.lock().await.is_empty() {
				tokio::time::sleep(self.config.batch_pause).await;
			}
		}
	}

	async fn process_batch(self: &Arc<Self>, batch: Vec<ChainEvent>) {
		join_all(partition(batch).into_iter().map(|group| async move {
			for event in group {
				self.process_event(event).await;
			}
		}))
		.await;
	}

	async fn process_event(self: &Arc<Self>, mut event: ChainEvent) {
		let kind = match EventKind::from_str(&event.event_type) {
			Ok(kind) => kind,
			Err(e) => {
				warn!("{}; dropping event", e);
				self.counters.dropped.fetch_add(1, Ordering::SeqCst);
				return;
			}
		};

		match self.handlers.handle(kind, &event).await {
			Ok(()) => {
				self.counters.processed.fetch_add(1, Ordering::SeqCst);
				self.audit.log(
					"event_processed_successfully",
					AuditEntry::info(
						AuditCategory::Sync,
						json!({
							"eventType": event.event_type,
							"transactionId": event.tx_id,
							"blockNumber": event.block_number,
							"network": event.network,
						}),
					),
				);
			}
			Err(e) => {
				self.counters.failed.fetch_add(1, Ordering::SeqCst);

				if event.retry_count < self.config.max_retry_attempts {
					event.retry_count += 1;
					warn!(
						"Event {} failed (attempt {}): {}",
						kind, event.retry_count, e
					);
					self.audit.log(
						"event_retry_scheduled",
						AuditEntry::warn(
							AuditCategory::Sync,
							json!({
								"eventType": event.event_type,
								"transactionId": event.tx_id,
								"retryCount": event.retry_count,
							}),
						),
					);
					self.schedule_retry(event).await;
				} else {
					self.counters.dead_lettered.fetch_add(1, Ordering::SeqCst);
					error!(
						"Event {} dead-lettered after {} attempts: {}",
						kind,
						event.retry_count + 1,
						e
					);
					self.audit.log(
						"event_processing_failed",
						AuditEntry::error(
							AuditCategory::Sync,
							json!({
								"eventType": event.event_type,
								"transactionId": event.tx_id,
								"error": e.to_string(),
							}),
						),
					);
				}
			}
		}
	}

	/// Put `event` back at the front of the queue after its backoff. When processing is paused
	/// first, the event is requeued right away without waking the drain.
	async fn schedule_retry(self: &Arc<Self>, event: ChainEvent) {
		let delay = self.config.retry_delay * event.retry_count;
		let token = self.retry_token.lock().await.clone();
		let inner = self.clone();

		tokio::spawn(async move {
			tokio::select! {
				_ = token.cancelled() => {}
				_ = tokio::time::sleep(delay) => {}
			}
			inner.queue.lock().await.push_front(event);
			Inner::kick(&inner);
		});
	}
}

/// Split a batch into groups that share no entity key. Each group keeps arrival order; an event
/// touching keys of several groups merges them.
fn partition(batch: Vec<ChainEvent>) -> Vec<Vec<ChainEvent>> {
	let mut groups: Vec<Vec<ChainEvent>> = Vec::new();
	let mut group_keys: Vec<Vec<String>> = Vec::new();
	let mut index: HashMap<String, usize> = HashMap::new();

	for event in batch {
		let keys = EventKind::from_str(&event.event_type)
			.map(|kind| kind.partition_keys(&event))
			.unwrap_or_default();

		let mut slots: Vec<usize> = keys.iter().filter_map(|k| index.get(k).copied()).collect();
		slots.sort_unstable();
		slots.dedup();

		let target = match slots.first() {
			Some(&first) => first,
			None => {
				groups.push(Vec::new());
				group_keys.push(Vec::new());
				groups.len() - 1
			}
		};
		for &slot in slots.iter().skip(1) {
			let moved = std::mem::take(&mut groups[slot]);
			groups[target].extend(moved);
			for key in std::mem::take(&mut group_keys[slot]) {
				index.insert(key.clone(), target);
				group_keys[target].push(key);
			}
		}
		for key in keys {
			if index.insert(key.clone(), target).is_none() {
				group_keys[target].push(key);
			}
		}
		groups[target].push(event);
	}

	groups.retain(|group| !group.is_empty());
	groups
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::services::MemoryCache;
	use crate::store::*;
	use crate::testing::RecordingAuditSink;
	use serde_json::Value;
	use std::time::Duration;
	use tracing_test::traced_test;

	fn processor(
		store: &InMemoryStore,
		audit: &Arc<RecordingAuditSink>,
	) -> EventProcessor {
		EventProcessor::new(
			EventProcessorConfig::default(),
			Arc::new(store.clone()),
			Arc::new(MemoryCache::new()),
			audit.clone(),
		)
	}

	fn community_created() -> ChainEvent {
		ChainEvent::new(
			"CommunityCreated",
			json!({ "communityId": "C1", "name": "Alpha", "creator": "W1" }),
		)
		.on_network("devnet")
		.with_tx("sig-1", 10)
	}

	/// Wait until the queue is empty and no drain is running.
	async fn settle(processor: &EventProcessor) {
		for _ in 0..200 {
			let stats = processor.get_processing_statistics().await;
			if stats.queue_length == 0 && !stats.is_processing {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	#[tokio::test]
	async fn community_created_projects_community_and_admin() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.submit(community_created()).await;
		settle(&processor).await;

		let community = store
			.find_community(Lookup::OnChainId("C1".into()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(community.name, "Alpha");
		assert_eq!(community.status, EntityStatus::Active);
		assert_eq!(community.transaction_id.as_deref(), Some("sig-1"));

		let user = store
			.find_user(UserLookup::Wallet("W1".into()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(user.username, "user_W1");

		let member = store
			.find_member(PairLookup::Pair(community.id, user.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(member.role, MemberRole::Admin);
		assert_eq!(member.status, EntityStatus::Active);
		assert_eq!(audit.count("event_processed_successfully"), 1);
	}

	#[tokio::test]
	async fn replaying_an_event_is_idempotent() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.submit(community_created()).await;
		processor.submit(community_created()).await;
		settle(&processor).await;
		processor.submit(community_created()).await;
		settle(&processor).await;

		assert_eq!(store.list_communities(RowFilter::default()).await.unwrap().len(), 1);
		assert_eq!(store.list_members(RowFilter::default()).await.unwrap().len(), 1);
		assert_eq!(store.list_users(RowFilter::default()).await.unwrap().len(), 1);
		assert_eq!(processor.get_processing_statistics().await.processed, 3);
	}

	#[tokio::test(start_paused = true)]
	#[traced_test]
	async fn failing_event_is_retried_then_dead_lettered() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		// The community never appears, so every attempt fails
		processor
			.submit(ChainEvent::new(
				"MemberJoined",
				json!({ "communityId": "missing", "memberAddress": "W2" }),
			))
			.await;

		// 5s + 10s + 15s of backoff
		tokio::time::sleep(Duration::from_secs(60)).await;

		let stats = processor.get_processing_statistics().await;
		assert_eq!(stats.failed, 4);
		assert_eq!(stats.dead_lettered, 1);
		assert_eq!(stats.processed, 0);
		assert_eq!(audit.count("event_retry_scheduled"), 3);
		assert_eq!(audit.count("event_processing_failed"), 1);
		assert!(logs_contain("dead-lettered after 4 attempts"));
	}

	#[tokio::test(start_paused = true)]
	async fn retried_event_goes_ahead_of_later_arrivals() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = EventProcessor::new(
			EventProcessorConfig {
				batch_size: 1,
				..Default::default()
			},
			Arc::new(store.clone()),
			Arc::new(MemoryCache::new()),
			audit.clone(),
		);

		// Fails until C9 exists
		processor
			.submit(ChainEvent::new(
				"MemberJoined",
				json!({ "communityId": "C9", "memberAddress": "W2" }),
			))
			.await;
		settle(&processor).await;
		assert_eq!(processor.get_processing_statistics().await.failed, 1);

		// Pausing releases the waiting retry straight back into the queue
		processor.pause().await;
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(processor.get_processing_statistics().await.queue_length, 1);

		processor
			.submit(ChainEvent::new(
				"CommunityCreated",
				json!({ "communityId": "C9", "name": "Nine", "creator": "W1" }),
			))
			.await;
		processor
			.submit(ChainEvent::new(
				"CommunityCreated",
				json!({ "communityId": "C8", "name": "Eight", "creator": "W1" }),
			))
			.await;
		processor.resume().await;
		settle(&processor).await;

		// The retry ran before C9 was created, so it failed a second time
		let stats = processor.get_processing_statistics().await;
		assert_eq!(stats.failed, 2);
		assert_eq!(stats.processed, 2);
		assert_eq!(audit.count("event_retry_scheduled"), 2);

		tokio::time::sleep(Duration::from_secs(11)).await;
		settle(&processor).await;
		assert_eq!(processor.get_processing_statistics().await.processed, 3);
		assert_eq!(store.list_members(RowFilter::default()).await.unwrap().len(), 3);
	}

	#[test]
	fn question_creation_joins_its_community_and_question_groups() {
		let groups = partition(vec![
			ChainEvent::new("MemberJoined", json!({ "communityId": "C1", "memberAddress": "W2" })),
			ChainEvent::new("VoteCast", json!({ "questionId": "Q1", "voterAddress": "W3" })),
			ChainEvent::new("CommunityCreated", json!({ "communityId": "C2" })),
			ChainEvent::new(
				"VotingQuestionCreated",
				json!({ "communityId": "C1", "questionId": "Q1" }),
			),
			ChainEvent::new("VoteUpdated", json!({ "questionId": "Q1", "voterAddress": "W3" })),
			ChainEvent::new("TreasuryDrained", Value::Null),
		]);

		let types: Vec<Vec<&str>> = groups
			.iter()
			.map(|group| group.iter().map(|e| e.event_type.as_str()).collect())
			.collect();
		assert_eq!(
			types,
			vec![
				vec!["MemberJoined", "VoteCast", "VotingQuestionCreated", "VoteUpdated"],
				vec!["CommunityCreated"],
				vec!["TreasuryDrained"],
			]
		);
	}

	#[tokio::test]
	async fn unknown_event_types_are_dropped_without_retry() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor
			.submit(ChainEvent::new("TreasuryDrained", Value::Null))
			.await;
		settle(&processor).await;

		let stats = processor.get_processing_statistics().await;
		assert_eq!(stats.dropped, 1);
		assert_eq!(stats.failed, 0);
		assert_eq!(audit.count("event_retry_scheduled"), 0);
	}

	#[tokio::test]
	async fn events_for_one_community_apply_in_order() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.submit(community_created()).await;
		processor
			.submit(ChainEvent::new(
				"MemberJoined",
				json!({ "communityId": "C1", "memberAddress": "W2" }),
			))
			.await;
		processor
			.submit(ChainEvent::new(
				"MemberRoleChanged",
				json!({ "communityId": "C1", "memberAddress": "W2", "role": "moderator" }),
			))
			.await;
		processor
			.submit(ChainEvent::new(
				"CommunityUpdated",
				json!({ "communityId": "C1", "name": "Alpha v2" }),
			))
			.await;
		settle(&processor).await;

		let community = store
			.find_community(Lookup::OnChainId("C1".into()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(community.name, "Alpha v2");
		let w2 = store
			.find_user(UserLookup::Wallet("W2".into()))
			.await
			.unwrap()
			.unwrap();
		let member = store
			.find_member(PairLookup::Pair(community.id, w2.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(member.role, MemberRole::Moderator);
		assert_eq!(processor.get_processing_statistics().await.failed, 0);
	}

	#[tokio::test]
	async fn community_deletion_cascades_to_memberships() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.submit(community_created()).await;
		processor
			.submit(ChainEvent::new(
				"MemberJoined",
				json!({ "communityId": "C1", "memberAddress": "W2" }),
			))
			.await;
		processor
			.submit(ChainEvent::new("CommunityDeleted", json!({ "communityId": "C1" })))
			.await;
		settle(&processor).await;

		let community = store
			.find_community(Lookup::OnChainId("C1".into()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(community.status, EntityStatus::Inactive);
		let active = store
			.list_members(RowFilter::status(EntityStatus::Active))
			.await
			.unwrap();
		assert!(active.is_empty());
	}

	#[tokio::test]
	async fn votes_upsert_per_voter() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.submit(community_created()).await;
		settle(&processor).await;
		processor
			.submit(ChainEvent::new(
				"VotingQuestionCreated",
				json!({
					"questionId": "Q1",
					"communityId": "C1",
					"title": "Budget",
					"options": ["yes", "no"],
					"deadline": "2030-01-01T00:00:00Z",
					"creator": "W1"
				}),
			))
			.await;
		settle(&processor).await;
		processor
			.submit(ChainEvent::new(
				"VoteCast",
				json!({ "questionId": "Q1", "voterAddress": "W3", "voteData": { "choice": 0 } }),
			))
			.await;
		processor
			.submit(ChainEvent::new(
				"VoteUpdated",
				json!({ "questionId": "Q1", "voterAddress": "W3", "voteData": { "choice": 1 } }),
			))
			.await;
		processor
			.submit(ChainEvent::new("VotingEnded", json!({ "questionId": "Q1" })))
			.await;
		settle(&processor).await;

		let votes = store.list_votes(RowFilter::default()).await.unwrap();
		assert_eq!(votes.len(), 1);
		assert_eq!(votes[0].vote_data, json!({ "choice": 1 }));
		let question = store
			.find_question(Lookup::OnChainId("Q1".into()))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(question.status, EntityStatus::Ended);
	}

	#[tokio::test]
	async fn clear_queue_discards_pending_events() {
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let processor = processor(&store, &audit);

		processor.pause().await;
		processor.submit(community_created()).await;
		assert_eq!(processor.get_processing_statistics().await.queue_length, 1);
		assert_eq!(processor.clear_queue().await, 1);
		processor.resume().await;
		settle(&processor).await;
		assert!(store.list_communities(RowFilter::default()).await.unwrap().is_empty());
	}
}
