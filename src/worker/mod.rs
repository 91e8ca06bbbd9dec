//! Background orchestration.
//!
//! `SyncWorker` owns the running lifecycle of the sync core: the chain event subscription feeding
//! the event processor, the synchronizer's periodic loop, the named-task pump and the health check.
//! Every run-scoped resource hangs off one cancellation token so `stop` can tear it all down.

/// Named tasks and their bookkeeping
pub mod tasks;

pub use tasks::{SyncTask, TaskKind, TaskStatus};

use crate::chain::{ChainClient, ChainEvent, SubscriptionId};
use crate::config::WorkerConfig;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink};
use crate::store::EntityKind;
use crate::sync::{
	EventProcessor, ProcessingStatistics, ReconciliationStats, StateReconciler, StateSynchronizer,
	SynchronizerStatus,
};
use crate::utils::Ticker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tasks::TaskBook;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Buffered chain events between the subscription and the processor
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
	Stopped,
	Starting,
	Running,
	Stopping,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerStats {
	start_time: Option<DateTime<Utc>>,
	total_tasks: u64,
	completed_tasks: u64,
	failed_tasks: u64,
	last_task_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerHealth {
	pub state: WorkerState,
	pub uptime_ms: u64,
	pub total_tasks: u64,
	pub completed_tasks: u64,
	pub failed_tasks: u64,
	/// Completed share of finished tasks in percent; 100 before any task finished
	pub success_rate: f64,
	pub queue_length: usize,
	pub last_task_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
	pub worker: WorkerHealth,
	pub events: ProcessingStatistics,
	pub sync: SynchronizerStatus,
	pub reconciliation: ReconciliationStats,
	pub timestamp: DateTime<Utc>,
}

/// Everything that exists only while the worker runs, in start order.
struct RunResources {
	token: CancellationToken,
	subscription: SubscriptionId,
	forwarder: JoinHandle<()>,
	task_pump: Ticker,
	health_check: Ticker,
	schedule: Vec<Ticker>,
}

struct Inner {
	config: WorkerConfig,
	program_id: String,
	chain: Arc<dyn ChainClient>,
	events: EventProcessor,
	synchronizer: StateSynchronizer,
	reconciler: StateReconciler,
	audit: Arc<dyn AuditSink>,
	state: std::sync::Mutex<WorkerState>,
	/// `Some` while running; the lock also serializes `start` and `stop`
	resources: Mutex<Option<RunResources>>,
	tasks: Mutex<TaskBook>,
	stats: Mutex<WorkerStats>,
	task_processing: AtomicBool,
	health_checking: AtomicBool,
	/// Cancelled on `stop`; parked tasks are requeued right away
	retry_token: Mutex<CancellationToken>,
}

#[derive(Clone)]
pub struct SyncWorker {
	inner: Arc<Inner>,
}

impl SyncWorker {
	pub fn new(
		config: WorkerConfig,
		program_id: String,
		chain: Arc<dyn ChainClient>,
		events: EventProcessor,
		synchronizer: StateSynchronizer,
		reconciler: StateReconciler,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		let history = config.task_history.max(1);
		Self {
			inner: Arc::new(Inner {
				config,
				program_id,
				chain,
				events,
				synchronizer,
				reconciler,
				audit,
				state: std::sync::Mutex::new(WorkerState::Stopped),
				resources: Mutex::new(None),
				tasks: Mutex::new(TaskBook::new(history)),
				stats: Mutex::new(WorkerStats::default()),
				task_processing: AtomicBool::new(false),
				health_checking: AtomicBool::new(false),
				retry_token: Mutex::new(CancellationToken::new()),
			}),
		}
	}

	pub fn state(&self) -> WorkerState {
		match self.inner.state.lock() {
			Ok(state) => *state,
			Err(poisoned) => *poisoned.into_inner(),
		}
	}

	fn set_state(&self, next: WorkerState) {
		match self.inner.state.lock() {
			Ok(mut state) => *state = next,
			Err(poisoned) => *poisoned.into_inner() = next,
		}
	}

	/// Subscribe to chain events, then start the synchronizer loop, the task pump and the health
	/// check. A no-op while already running.
	pub async fn start(&self) -> Result<(), SyncError> {
		let mut resources = self.inner.resources.lock().await;
		if resources.is_some() {
			info!("Sync worker is already running");
			return Ok(());
		}

		info!("Starting synchronization worker...");
		self.set_state(WorkerState::Starting);
		let token = CancellationToken::new();

		let (sender, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
		let subscription = match self
			.inner
			.chain
			.subscribe_account_changes(&self.inner.program_id, sender)
			.await
		{
			Ok(id) => id,
			Err(e) => {
				error!("Failed to start sync worker: {}", e);
				self.set_state(WorkerState::Stopped);
				return Err(e.into());
			}
		};
		self.inner.events.resume().await;
		let forwarder = tokio::spawn(forward_events(
			receiver,
			self.inner.events.clone(),
			token.clone(),
		));

		self.inner.synchronizer.start_periodic_sync(&token).await;

		*self.inner.retry_token.lock().await = token.child_token();
		let this = self.clone();
		let task_pump = Ticker::spawn(
			"task-pump",
			self.inner.config.processing_interval,
			false,
			&token,
			move || {
				let this = this.clone();
				async move {
					this.process_next_task().await;
				}
			},
		);

		let this = self.clone();
		let health_check = Ticker::spawn(
			"health-check",
			self.inner.config.health_check_interval,
			false,
			&token,
			move || {
				let this = this.clone();
				async move {
					let _ = this.perform_health_check().await;
				}
			},
		);

		*resources = Some(RunResources {
			token,
			subscription,
			forwarder,
			task_pump,
			health_check,
			schedule: Vec::new(),
		});
		let stats = {
			let mut stats = self.inner.stats.lock().await;
			stats.start_time = Some(Utc::now());
			stats.clone()
		};
		self.set_state(WorkerState::Running);

		info!("Synchronization worker started successfully");
		self.inner.audit.log(
			"sync_worker_started",
			AuditEntry::info(AuditCategory::Worker, json!({ "workerStats": stats })),
		);
		Ok(())
	}

	/// Tear down everything `start` set up, in reverse order. In-flight work finishes on its own.
	/// A no-op while stopped; release errors are logged and otherwise ignored.
	pub async fn stop(&self) {
		// Held until teardown finishes so a concurrent `start` waits for a clean slate
		let mut guard = self.inner.resources.lock().await;
		let Some(resources) = guard.take() else {
			return;
		};

		info!("Stopping synchronization worker...");
		self.set_state(WorkerState::Stopping);

		for ticker in &resources.schedule {
			ticker.cancel();
		}
		resources.health_check.cancel();
		resources.task_pump.cancel();
		self.inner.retry_token.lock().await.cancel();
		self.inner.synchronizer.stop_periodic_sync().await;

		if let Err(e) = self.inner.chain.unsubscribe(resources.subscription).await {
			warn!(
				"Failed to unsubscribe from chain events ({}): {}",
				resources.subscription, e
			);
		}
		resources.token.cancel();
		if let Err(e) = resources.forwarder.await {
			warn!("Event forwarder ended abnormally: {}", e);
		}
		self.inner.events.pause().await;

		self.set_state(WorkerState::Stopped);
		drop(guard);
		let stats = self.inner.stats.lock().await.clone();
		info!("Synchronization worker stopped");
		self.inner.audit.log(
			"sync_worker_stopped",
			AuditEntry::info(AuditCategory::Worker, json!({ "workerStats": stats })),
		);
	}

	/// Seed the task queue with recurring sync and reconciliation tasks. The timers live until
	/// `stop`. Returns `false` when the worker is not running or the schedule is already active.
	pub async fn schedule_periodic_tasks(&self) -> bool {
		let mut resources = self.inner.resources.lock().await;
		let Some(resources) = resources.as_mut() else {
			warn!("Cannot schedule periodic tasks while the worker is stopped");
			return false;
		};
		if !resources.schedule.is_empty() {
			debug!("Periodic tasks already scheduled");
			return false;
		}

		let schedule = &self.inner.config.schedule;
		let plan: [(&'static str, TaskKind, Duration); 5] = [
			(
				"schedule-communities",
				TaskKind::SyncCommunities,
				schedule.communities,
			),
			(
				"schedule-memberships",
				TaskKind::SyncMemberships,
				schedule.memberships,
			),
			("schedule-questions", TaskKind::SyncQuestions, schedule.questions),
			("schedule-votes", TaskKind::SyncVotes, schedule.votes),
			(
				"schedule-reconciliation",
				TaskKind::ReconcileConflicts,
				schedule.reconciliation,
			),
		];

		for (name, kind, period) in plan {
			let this = self.clone();
			resources.schedule.push(Ticker::spawn(
				name,
				period,
				false,
				&resources.token,
				move || {
					let this = this.clone();
					async move {
						this.add_task(kind, json!({})).await;
					}
				},
			));
		}

		info!("Periodic tasks scheduled");
		true
	}

	/// Queue a task and return its id.
	pub async fn add_task(&self, kind: TaskKind, payload: Value) -> String {
		let task = SyncTask::new(kind, payload, self.inner.config.max_task_retries);
		let id = task.id.clone();
		self.inner.tasks.lock().await.push(task);
		self.inner.stats.lock().await.total_tasks += 1;

		debug!("Task added to queue: {} (ID: {})", kind, id);
		id
	}

	/// Run the oldest pending task. Returns its id, or `None` when there was nothing to run or
	/// another task is in progress.
	pub async fn process_next_task(&self) -> Option<String> {
		if self.inner.task_processing.swap(true, Ordering::SeqCst) {
			return None;
		}

		let Some(mut task) = self.inner.tasks.lock().await.start_next() else {
			self.inner.task_processing.store(false, Ordering::SeqCst);
			return None;
		};
		self.inner.stats.lock().await.last_task_time = Some(Utc::now());

		debug!("Processing task: {} (ID: {})", task.kind, task.id);
		let id = task.id.clone();
		match self.run_task(task.kind, &task.payload).await {
			Ok(()) => {
				task.status = TaskStatus::Completed;
				self.inner.stats.lock().await.completed_tasks += 1;
				self.inner.tasks.lock().await.finish(task);
				debug!("Task completed: {}", id);
			}
			Err(e) => self.task_failed(task, e).await,
		}

		self.inner.task_processing.store(false, Ordering::SeqCst);
		Some(id)
	}

	async fn task_failed(&self, mut task: SyncTask, e: SyncError) {
		task.last_error = Some(e.to_string());

		if task.retry_count < task.max_retries {
			task.retry_count += 1;
			task.status = TaskStatus::Pending;
			let delay = self.inner.config.task_retry_delay * task.retry_count;
			warn!(
				"Task {} (ID: {}) failed, retry {} in {:?}: {}",
				task.kind, task.id, task.retry_count, delay, e
			);

			let id = task.id.clone();
			self.inner.tasks.lock().await.park(task);
			let token = self.inner.retry_token.lock().await.clone();
			let inner = self.inner.clone();
			tokio::spawn(async move {
				tokio::select! {
					_ = token.cancelled() => {}
					_ = tokio::time::sleep(delay) => {}
				}
				inner.tasks.lock().await.unpark(&id);
			});
			return;
		}

		task.status = TaskStatus::Failed;
		error!(
			"Task {} (ID: {}) failed after {} attempts: {}",
			task.kind,
			task.id,
			task.retry_count + 1,
			e
		);
		self.inner.audit.log(
			"task_failed",
			AuditEntry::error(
				AuditCategory::Worker,
				json!({
					"taskId": task.id,
					"type": task.kind,
					"error": e.to_string(),
					"retryCount": task.retry_count,
				}),
			),
		);
		self.inner.stats.lock().await.failed_tasks += 1;
		self.inner.tasks.lock().await.finish(task);
	}

	/// Run a task handler immediately, bypassing the queue and its retry policy.
	pub async fn force_task_execution(&self, kind: TaskKind, payload: Value) -> Result<(), SyncError> {
		info!("Forcing task execution: {}", kind);
		self.run_task(kind, &payload).await
	}

	async fn run_task(&self, kind: TaskKind, _payload: &Value) -> Result<(), SyncError> {
		match kind {
			TaskKind::SyncCommunities => self.sync_pass(EntityKind::Community).await,
			TaskKind::SyncMemberships => self.sync_pass(EntityKind::Membership).await,
			TaskKind::SyncQuestions => self.sync_pass(EntityKind::Question).await,
			TaskKind::SyncVotes => self.sync_pass(EntityKind::Vote).await,
			TaskKind::ReconcileConflicts => {
				match self.inner.reconciler.detect_and_resolve_conflicts().await {
					Some(report) if !report.detector_errors.is_empty() => Err(
						SyncError::WorkerError(report.detector_errors.join("; ")),
					),
					_ => Ok(()),
				}
			}
			TaskKind::ProcessEvents => {
				self.inner.events.resume().await;
				Ok(())
			}
			TaskKind::HealthCheck => self.perform_health_check().await.map(|_| ()),
		}
	}

	async fn sync_pass(&self, kind: EntityKind) -> Result<(), SyncError> {
		let report = self.inner.synchronizer.sync_entity(kind).await?;
		debug!(
			"{} pass: {} checked, {} updated, {} deactivated",
			kind, report.checked, report.updated, report.deactivated
		);
		Ok(())
	}

	/// Probe the chain and collect component status. The report is written to the audit trail.
	pub async fn perform_health_check(&self) -> Result<HealthReport, SyncError> {
		if self.inner.health_checking.swap(true, Ordering::SeqCst) {
			return Err(SyncError::WorkerError(
				"health check already in progress".to_string(),
			));
		}
		let result = self.collect_health().await;
		self.inner.health_checking.store(false, Ordering::SeqCst);

		match &result {
			Ok(report) => self.inner.audit.log(
				"worker_health_check",
				AuditEntry::info(AuditCategory::Worker, json!(report)),
			),
			Err(e) => {
				error!("Health check failed: {}", e);
				self.inner.audit.log(
					"worker_health_check_failed",
					AuditEntry::error(AuditCategory::Worker, json!({ "error": e.to_string() })),
				);
			}
		}
		result
	}

	async fn collect_health(&self) -> Result<HealthReport, SyncError> {
		self.inner.chain.get_latest_blockhash().await?;

		let events = self.inner.events.get_processing_statistics().await;
		if self.state() == WorkerState::Running && events.queue_length > 0 && !events.is_processing {
			warn!("Event queue holds {} events but is not draining", events.queue_length);
		}

		Ok(HealthReport {
			worker: self.get_worker_health().await,
			events,
			sync: self.inner.synchronizer.get_sync_status().await,
			reconciliation: self.inner.reconciler.get_stats().await,
			timestamp: Utc::now(),
		})
	}

	pub async fn get_worker_health(&self) -> WorkerHealth {
		let stats = self.inner.stats.lock().await.clone();
		let queue_length = self.inner.tasks.lock().await.queue_length();
		let state = self.state();
		let uptime_ms = match (state, stats.start_time) {
			(WorkerState::Running, Some(start)) => {
				(Utc::now() - start).num_milliseconds().max(0) as u64
			}
			_ => 0,
		};
		let finished = stats.completed_tasks + stats.failed_tasks;

		WorkerHealth {
			state,
			uptime_ms,
			total_tasks: stats.total_tasks,
			completed_tasks: stats.completed_tasks,
			failed_tasks: stats.failed_tasks,
			success_rate: if finished == 0 {
				100.0
			} else {
				stats.completed_tasks as f64 * 100.0 / finished as f64
			},
			queue_length,
			last_task_time: stats.last_task_time,
		}
	}

	pub async fn get_task_status(&self, id: &str) -> Option<SyncTask> {
		self.inner.tasks.lock().await.find(id).cloned()
	}

	/// Forget completed and failed tasks. Returns how many were dropped.
	pub async fn clear_completed_tasks(&self) -> usize {
		let cleared = self.inner.tasks.lock().await.clear_finished();
		info!("Cleared {} finished tasks", cleared);
		cleared
	}
}

/// Move events from the subscription channel into the processor until cancelled or the
/// subscription closes.
async fn forward_events(
	mut receiver: mpsc::Receiver<ChainEvent>,
	events: EventProcessor,
	token: CancellationToken,
) {
	loop {
		tokio::select! {
			_ = token.cancelled() => break,
			received = receiver.recv() => match received {
				Some(event) => events.submit(event).await,
				None => {
					warn!("Chain event subscription closed");
					break;
				}
			},
		}
	}
	debug!("Event forwarder stopped");
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::ChainError;
	use crate::config::{EventProcessorConfig, SynchronizerConfig};
	use crate::services::MemoryCache;
	use crate::store::*;
	use crate::testing::{MockChainClient, RecordingAuditSink};
	use tracing_test::traced_test;

	struct Fixture {
		chain: Arc<MockChainClient>,
		store: InMemoryStore,
		audit: Arc<RecordingAuditSink>,
		worker: SyncWorker,
	}

	fn fixture(config: WorkerConfig) -> Fixture {
		let chain = Arc::new(MockChainClient::new());
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let shared_store: Arc<dyn Store> = Arc::new(store.clone());
		let events = EventProcessor::new(
			EventProcessorConfig::default(),
			shared_store.clone(),
			Arc::new(MemoryCache::new()),
			audit.clone(),
		);
		let synchronizer = StateSynchronizer::new(
			SynchronizerConfig::default(),
			chain.clone(),
			shared_store.clone(),
			audit.clone(),
		);
		let reconciler = StateReconciler::new(chain.clone(), shared_store, audit.clone());
		let worker = SyncWorker::new(
			config,
			"Vote111".into(),
			chain.clone(),
			events,
			synchronizer,
			reconciler,
			audit.clone(),
		);
		Fixture {
			chain,
			store,
			audit,
			worker,
		}
	}

	#[tokio::test]
	#[traced_test]
	async fn start_and_stop_are_idempotent() {
		let f = fixture(WorkerConfig::default());

		f.worker.start().await.unwrap();
		f.worker.start().await.unwrap();
		assert_eq!(f.worker.state(), WorkerState::Running);
		assert_eq!(f.chain.active_subscriptions(), 1);
		assert_eq!(f.audit.count("sync_worker_started"), 1);
		assert!(logs_contain("Sync worker is already running"));

		f.worker.stop().await;
		f.worker.stop().await;
		assert_eq!(f.worker.state(), WorkerState::Stopped);
		assert_eq!(f.chain.active_subscriptions(), 0);
		assert_eq!(f.audit.count("sync_worker_stopped"), 1);

		f.worker.start().await.unwrap();
		assert_eq!(f.chain.active_subscriptions(), 1);
		assert!(f.worker.inner.synchronizer.get_sync_status().await.is_running);
		f.worker.stop().await;
	}

	async fn wait_for_community(store: &InMemoryStore, on_chain_id: &str) -> Option<Community> {
		for _ in 0..100 {
			let found = store
				.find_community(Lookup::OnChainId(on_chain_id.into()))
				.await
				.unwrap();
			if found.is_some() {
				return found;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		None
	}

	#[tokio::test]
	async fn subscribed_events_reach_the_store() {
		let f = fixture(WorkerConfig::default());
		f.worker.start().await.unwrap();

		f.chain
			.emit(ChainEvent::new(
				"CommunityCreated",
				json!({ "communityId": "C1", "name": "Alpha", "creator": "W1" }),
			))
			.await;

		let found = wait_for_community(&f.store, "C1").await;
		assert_eq!(found.map(|c| c.name).as_deref(), Some("Alpha"));
		f.worker.stop().await;
	}

	#[tokio::test]
	async fn start_during_stop_waits_for_teardown() {
		let f = fixture(WorkerConfig::default());
		f.worker.start().await.unwrap();

		let (_, started) = tokio::join!(f.worker.stop(), f.worker.start());
		started.unwrap();
		assert_eq!(f.worker.state(), WorkerState::Running);
		assert_eq!(f.chain.active_subscriptions(), 1);
		assert!(f.worker.inner.synchronizer.get_sync_status().await.is_running);
		assert_eq!(f.audit.count("sync_worker_started"), 2);
		assert_eq!(f.audit.count("sync_worker_stopped"), 1);

		f.chain
			.emit(ChainEvent::new(
				"CommunityCreated",
				json!({ "communityId": "C2", "name": "Beta", "creator": "W2" }),
			))
			.await;
		let found = wait_for_community(&f.store, "C2").await;
		assert_eq!(found.map(|c| c.name).as_deref(), Some("Beta"));

		f.worker.stop().await;
		assert_eq!(f.worker.state(), WorkerState::Stopped);
		assert_eq!(f.chain.active_subscriptions(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn failing_task_is_retried_then_dropped() {
		let f = fixture(WorkerConfig {
			max_task_retries: 2,
			..Default::default()
		});
		f.chain
			.fail_blockhash(Some(ChainError::Network("node down".into())));
		let id = f.worker.add_task(TaskKind::HealthCheck, json!({})).await;

		f.worker.process_next_task().await;
		let task = f.worker.get_task_status(&id).await.unwrap();
		assert_eq!(task.status, TaskStatus::Pending);
		assert_eq!(task.retry_count, 1);
		assert_eq!(f.worker.process_next_task().await, None);

		tokio::time::sleep(Duration::from_millis(5100)).await;
		f.worker.process_next_task().await;
		tokio::time::sleep(Duration::from_millis(10_100)).await;
		f.worker.process_next_task().await;

		let task = f.worker.get_task_status(&id).await.unwrap();
		assert_eq!(task.status, TaskStatus::Failed);
		assert_eq!(task.retry_count, 2);
		assert_eq!(f.audit.count("worker_health_check_failed"), 3);
		assert_eq!(f.audit.count("task_failed"), 1);

		let health = f.worker.get_worker_health().await;
		assert_eq!(health.failed_tasks, 1);
		assert_eq!(health.queue_length, 0);
	}

	#[tokio::test]
	async fn finished_tasks_stay_queryable_until_cleared() {
		let f = fixture(WorkerConfig::default());
		let id = f.worker.add_task(TaskKind::SyncVotes, json!({})).await;

		assert_eq!(f.worker.process_next_task().await, Some(id.clone()));
		assert_eq!(
			f.worker.get_task_status(&id).await.unwrap().status,
			TaskStatus::Completed
		);
		assert_eq!(f.worker.get_worker_health().await.success_rate, 100.0);

		assert_eq!(f.worker.clear_completed_tasks().await, 1);
		assert!(f.worker.get_task_status(&id).await.is_none());
	}

	#[tokio::test]
	async fn forced_health_check_is_audited() {
		let f = fixture(WorkerConfig::default());

		f.worker
			.force_task_execution(TaskKind::HealthCheck, json!({}))
			.await
			.unwrap();
		assert_eq!(f.audit.count("worker_health_check"), 1);

		f.chain
			.fail_blockhash(Some(ChainError::Timeout("slow".into())));
		assert!(f.worker.perform_health_check().await.is_err());
		assert_eq!(f.audit.count("worker_health_check_failed"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn periodic_schedule_seeds_tasks_until_stopped() {
		let f = fixture(WorkerConfig::default());
		assert!(!f.worker.schedule_periodic_tasks().await);

		f.worker.start().await.unwrap();
		assert!(f.worker.schedule_periodic_tasks().await);
		assert!(!f.worker.schedule_periodic_tasks().await);

		tokio::time::sleep(Duration::from_secs(121)).await;
		assert_eq!(f.worker.get_worker_health().await.total_tasks, 1);

		f.worker.stop().await;
		tokio::time::sleep(Duration::from_secs(600)).await;
		assert_eq!(f.worker.get_worker_health().await.total_tasks, 1);
	}
}
