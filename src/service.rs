//! Upward API of the sync core.
//!
//! `SyncService` wires the components together and is the only surface controllers talk to.

use crate::chain::{ChainClient, ChainEvent};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink, Cache};
use crate::store::{EntityKind, Store};
use crate::sync::{
	ConflictSummary, ConsistencyReport, EventProcessor, PassReport, ProcessingStatistics,
	ReconciliationReport, ReconciliationStats, StateReconciler, StateSynchronizer,
	SynchronizerStatus,
};
use crate::transaction::{
	Priority, QueuedTransaction, TransactionQueueManager, TransactionRecordRepository,
	TransactionRequest, TransactionSummary,
};
use crate::worker::{SyncTask, SyncWorker, TaskKind, WorkerHealth};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSyncReport {
	/// `None` when a synchronizer pass was already running
	pub passes: Option<Vec<PassReport>>,
	/// `None` when a reconciliation was already running
	pub reconciliation: Option<ReconciliationReport>,
	pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "target", content = "report")]
pub enum ForceSyncOutcome {
	Entities(PassReport),
	Conflicts(Option<ReconciliationReport>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
	pub worker: WorkerHealth,
	pub synchronizer: SynchronizerStatus,
	pub events: ProcessingStatistics,
	pub reconciliation: ReconciliationStats,
	pub transactions: TransactionSummary,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConsistencyReport {
	pub sync: ConsistencyReport,
	pub conflicts: ConflictSummary,
	pub worker: WorkerHealth,
}

pub struct SyncService {
	chain: Arc<dyn ChainClient>,
	network: String,
	events: EventProcessor,
	synchronizer: StateSynchronizer,
	reconciler: StateReconciler,
	transactions: TransactionQueueManager,
	worker: SyncWorker,
	audit: Arc<dyn AuditSink>,
	/// Parent of the transaction pump; never cancelled itself
	lifetime: CancellationToken,
}

impl SyncService {
	/// Build every component of the sync core around the injected collaborators.
	///
	/// # Arguments
	/// * `config` - Per-component settings and the chain network to connect to.
	/// * `chain` - Client used for subscriptions, snapshots and submissions.
	/// * `store` - Projection the event processor, synchronizer and reconciler write to.
	/// * `cache` - Best-effort cache for community rows.
	/// * `audit` - Sink for the audit trail.
	/// * `records` - Persistence for terminal transaction records.
	///
	/// # Returns
	/// A stopped `SyncService`; call `start` to connect and begin syncing.
	pub fn new(
		config: &SyncConfig,
		chain: Arc<dyn ChainClient>,
		store: Arc<dyn Store>,
		cache: Arc<dyn Cache>,
		audit: Arc<dyn AuditSink>,
		records: Arc<dyn TransactionRecordRepository>,
	) -> Self {
		let events = EventProcessor::new(
			config.events.clone(),
			store.clone(),
			cache,
			audit.clone(),
		);
		let synchronizer = StateSynchronizer::new(
			config.synchronizer.clone(),
			chain.clone(),
			store.clone(),
			audit.clone(),
		);
		let reconciler = StateReconciler::new(chain.clone(), store, audit.clone());
		let transactions = TransactionQueueManager::new(
			config.transactions.clone(),
			chain.clone(),
			records,
			audit.clone(),
		);
		let worker = SyncWorker::new(
			config.worker.clone(),
			config.chain.program_id.clone(),
			chain.clone(),
			events.clone(),
			synchronizer.clone(),
			reconciler.clone(),
			audit.clone(),
		);

		Self {
			chain,
			network: config.chain.network.clone(),
			events,
			synchronizer,
			reconciler,
			transactions,
			worker,
			audit,
			lifetime: CancellationToken::new(),
		}
	}

	pub async fn start(&self) -> Result<(), SyncError> {
		let connection = self.chain.connect(&self.network).await?;
		debug!("Chain connection ready: {:?}", connection);
		self.worker.start().await?;
		self.transactions.start(&self.lifetime).await;
		info!("Sync service started");
		Ok(())
	}

	pub async fn stop(&self) {
		self.transactions.stop().await;
		self.worker.stop().await;
		info!("Sync service stopped");
	}

	pub async fn schedule_periodic_tasks(&self) -> bool {
		self.worker.schedule_periodic_tasks().await
	}

	/// Synchronizer pass over every entity kind, then conflict reconciliation.
	pub async fn perform_full_sync(&self) -> FullSyncReport {
		info!("Performing full synchronization");
		let failed_before = self.synchronizer.get_sync_status().await.sync_stats.failed_syncs;
		let passes = self.synchronizer.perform_full_sync().await;
		let reconciliation = self.reconciler.detect_and_resolve_conflicts().await;
		let report = FullSyncReport {
			passes,
			reconciliation,
			timestamp: Utc::now(),
		};

		let sync_stats = self.synchronizer.get_sync_status().await.sync_stats;
		let detector_errors = report
			.reconciliation
			.as_ref()
			.map(|r| r.detector_errors.clone())
			.unwrap_or_default();

		if sync_stats.failed_syncs > failed_before || !detector_errors.is_empty() {
			error!("Full synchronization failed");
			self.audit.log(
				"full_sync_failed",
				AuditEntry::error(
					AuditCategory::Sync,
					json!({
						"syncError": sync_stats.last_error,
						"reconciliationErrors": detector_errors,
					}),
				),
			);
		} else {
			info!("Full synchronization completed");
			self.audit.log(
				"full_sync_completed",
				AuditEntry::info(AuditCategory::Sync, json!({ "report": report })),
			);
		}
		report
	}

	/// Run one synchronizer pass or a reconciliation right away.
	///
	/// # Arguments
	/// * `data_type` - `communities`, `memberships`, `questions`, `votes`, `users` or `conflicts`.
	///   Singular entity names are accepted too.
	///
	/// # Returns
	/// The pass report, or the reconciliation report (`None` if one was already running).
	///
	/// # Errors
	/// Returns `SyncError::InvalidPayload` for an unknown data type, or the pass error.
	pub async fn force_sync(&self, data_type: &str) -> Result<ForceSyncOutcome, SyncError> {
		info!("Forcing sync of {}", data_type);
		if data_type == "conflicts" {
			return Ok(ForceSyncOutcome::Conflicts(
				self.reconciler.detect_and_resolve_conflicts().await,
			));
		}

		let kind: EntityKind = data_type.parse().map_err(|e: String| {
			warn!("Rejected force sync: {}", e);
			SyncError::InvalidPayload(e)
		})?;
		Ok(ForceSyncOutcome::Entities(
			self.synchronizer.sync_entity(kind).await?,
		))
	}

	pub async fn force_task_execution(&self, task_type: &str, data: Value) -> Result<(), SyncError> {
		let kind = parse_task(task_type)?;
		self.worker.force_task_execution(kind, data).await
	}

	pub async fn add_task(&self, task_type: &str, data: Value) -> Result<String, SyncError> {
		let kind = parse_task(task_type)?;
		Ok(self.worker.add_task(kind, data).await)
	}

	pub async fn get_task_status(&self, id: &str) -> Option<SyncTask> {
		self.worker.get_task_status(id).await
	}

	pub async fn clear_completed_tasks(&self) -> usize {
		self.worker.clear_completed_tasks().await
	}

	pub async fn get_sync_status(&self) -> ServiceStatus {
		ServiceStatus {
			worker: self.worker.get_worker_health().await,
			synchronizer: self.synchronizer.get_sync_status().await,
			events: self.events.get_processing_statistics().await,
			reconciliation: self.reconciler.get_stats().await,
			transactions: self.transactions.get_all_transaction_statuses().await,
		}
	}

	pub async fn get_conflict_summary(&self) -> ConflictSummary {
		self.reconciler.get_conflict_summary().await
	}

	pub async fn get_consistency_report(&self) -> Result<ServiceConsistencyReport, SyncError> {
		Ok(ServiceConsistencyReport {
			sync: self.synchronizer.get_consistency_report().await?,
			conflicts: self.reconciler.get_conflict_summary().await,
			worker: self.worker.get_worker_health().await,
		})
	}

	pub async fn enqueue_transaction(&self, request: TransactionRequest, priority: Priority) -> String {
		self.transactions.enqueue(request, priority).await
	}

	pub async fn get_transaction_status(
		&self,
		id: &str,
	) -> Result<Option<QueuedTransaction>, SyncError> {
		self.transactions.get_transaction_status(id).await
	}

	pub async fn clear_old_transactions(&self) -> usize {
		self.transactions.clear_old_transactions().await
	}

	/// Feed an event into the processor outside the chain subscription.
	pub async fn process_blockchain_event(&self, event: ChainEvent) {
		self.events.submit(event).await
	}
}

fn parse_task(task_type: &str) -> Result<TaskKind, SyncError> {
	task_type.parse().inspect_err(|e| warn!("{}", e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::*;
	use crate::services::MemoryCache;
	use crate::store::*;
	use crate::testing::{MockChainClient, RecordingAuditSink};
	use crate::transaction::{FileTransactionRepository, TransactionStatus};
	use tempfile::TempDir;

	struct Fixture {
		chain: Arc<MockChainClient>,
		store: InMemoryStore,
		audit: Arc<RecordingAuditSink>,
		service: SyncService,
		_dir: TempDir,
	}

	fn fixture() -> Fixture {
		let dir = tempfile::tempdir().unwrap();
		let chain = Arc::new(MockChainClient::new());
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let service = SyncService::new(
			&SyncConfig::default(),
			chain.clone(),
			Arc::new(store.clone()),
			Arc::new(MemoryCache::new()),
			audit.clone(),
			Arc::new(FileTransactionRepository::new(dir.path().to_path_buf())),
		);
		Fixture {
			chain,
			store,
			audit,
			service,
			_dir: dir,
		}
	}

	#[tokio::test]
	async fn full_sync_overwrites_then_reconciles() {
		let f = fixture();
		let user = f
			.store
			.create_user(User::draft("W1", "user_W1".into()))
			.await
			.unwrap();
		let now = Utc::now();
		let community = f
			.store
			.create_community(Community {
				id: 0,
				on_chain_id: "C1".into(),
				name: "Alpha".into(),
				description: None,
				config: json!({}),
				created_by: user.id,
				network: "devnet".into(),
				transaction_id: None,
				block_number: None,
				status: EntityStatus::Active,
				created_at: now,
				updated_at: now,
			})
			.await
			.unwrap();
		f.chain.set_snapshot(
			EntityKey::Community {
				address: "C1".into(),
			},
			EntitySnapshot::Community(CommunitySnapshot {
				name: "Alpha DAO".into(),
				description: None,
				config: json!({}),
			}),
		);
		f.chain.set_snapshot(
			EntityKey::Account {
				address: "W1".into(),
			},
			EntitySnapshot::Account(AccountSnapshot { lamports: 5 }),
		);

		let report = f.service.perform_full_sync().await;
		assert!(report.passes.is_some());
		assert_eq!(report.reconciliation.map(|r| r.detected), Some(0));
		assert_eq!(f.audit.count("full_sync_completed"), 1);

		let stored = f
			.store
			.find_community(Lookup::Id(community.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.name, "Alpha DAO");
	}

	#[tokio::test]
	async fn start_connects_before_subscribing() {
		let f = fixture();

		f.service.start().await.unwrap();
		assert_eq!(f.chain.connected_network().as_deref(), Some("devnet"));
		assert_eq!(f.chain.active_subscriptions(), 1);

		f.service.stop().await;
		assert_eq!(f.chain.active_subscriptions(), 0);
	}

	#[tokio::test]
	async fn force_sync_accepts_data_types_and_conflicts() {
		let f = fixture();

		assert!(matches!(
			f.service.force_sync("votes").await.unwrap(),
			ForceSyncOutcome::Entities(PassReport {
				entity_type: EntityKind::Vote,
				..
			})
		));
		assert!(matches!(
			f.service.force_sync("conflicts").await.unwrap(),
			ForceSyncOutcome::Conflicts(Some(_))
		));
		assert!(matches!(
			f.service.force_sync("ledgers").await,
			Err(SyncError::InvalidPayload(_))
		));
	}

	#[tokio::test]
	async fn unknown_task_types_are_rejected() {
		let f = fixture();

		assert!(matches!(
			f.service.add_task("defragment", json!({})).await,
			Err(SyncError::UnknownTask(_))
		));
		assert!(matches!(
			f.service.force_task_execution("defragment", json!({})).await,
			Err(SyncError::UnknownTask(_))
		));

		let id = f.service.add_task("sync_votes", json!({})).await.unwrap();
		assert!(f.service.get_task_status(&id).await.is_some());
	}

	#[tokio::test]
	async fn enqueued_transactions_are_queryable() {
		let f = fixture();
		let id = f
			.service
			.enqueue_transaction(
				TransactionRequest::CastVote {
					user_wallet: "W1".into(),
					question_address: "Q1".into(),
					vote_data: json!({ "option": 0 }),
				},
				Priority::High,
			)
			.await;

		let status = f.service.get_transaction_status(&id).await.unwrap().unwrap();
		assert_eq!(status.status, TransactionStatus::Queued);
		assert_eq!(f.service.get_sync_status().await.transactions.queued, 1);
	}
}
