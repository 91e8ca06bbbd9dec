//! Serialized outbound transaction submission.
//!
//! Requests wait in a priority heap ordered by (priority, oldest first). A pump pops exactly one
//! entry per tick and submits it; at most one submission is ever in flight. Retryable failures
//! come back after `retry_delay × retries`, everything else lands in a terminal map and the
//! record repository.

use super::executor::{ExecutionOutcome, execute};
use super::repository::TransactionRecordRepository;
use super::types::*;
use crate::chain::ChainClient;
use crate::config::TransactionQueueConfig;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink};
use crate::utils::{Ticker, generate_id};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::cmp::{Ordering as CmpOrdering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Heap entry; the greatest entry is dequeued first.
struct Entry {
	seq: u64,
	transaction: QueuedTransaction,
}

impl Entry {
	fn rank(&self) -> (Priority, Reverse<DateTime<Utc>>, Reverse<u64>) {
		(
			self.transaction.priority,
			Reverse(self.transaction.created_at),
			Reverse(self.seq),
		)
	}
}

impl PartialEq for Entry {
	fn eq(&self, other: &Self) -> bool {
		self.rank() == other.rank()
	}
}

impl Eq for Entry {}

impl PartialOrd for Entry {
	fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
		Some(self.cmp(other))
	}
}

impl Ord for Entry {
	fn cmp(&self, other: &Self) -> CmpOrdering {
		self.rank().cmp(&other.rank())
	}
}

#[derive(Default)]
struct QueueState {
	heap: BinaryHeap<Entry>,
	next_seq: u64,
	processing: Option<QueuedTransaction>,
	/// Waiting out their retry delay
	retrying: HashMap<String, QueuedTransaction>,
	completed: HashMap<String, QueuedTransaction>,
	failed: HashMap<String, QueuedTransaction>,
}

impl QueueState {
	fn push(&mut self, mut transaction: QueuedTransaction) {
		transaction.status = TransactionStatus::Queued;
		self.next_seq += 1;
		self.heap.push(Entry {
			seq: self.next_seq,
			transaction,
		});
	}

	/// Remove the oldest queued entry regardless of priority.
	fn evict_oldest(&mut self) -> Option<QueuedTransaction> {
		let mut entries = std::mem::take(&mut self.heap).into_vec();
		let oldest = entries
			.iter()
			.enumerate()
			.min_by_key(|(_, e)| (e.transaction.created_at, e.seq))
			.map(|(idx, _)| idx);
		let evicted = oldest.map(|idx| entries.swap_remove(idx).transaction);
		self.heap = BinaryHeap::from(entries);
		evicted
	}
}

struct Inner {
	config: TransactionQueueConfig,
	chain: Arc<dyn ChainClient>,
	repository: Arc<dyn TransactionRecordRepository>,
	audit: Arc<dyn AuditSink>,
	state: Mutex<QueueState>,
	/// Single-flight guard for `process_next`
	processing: AtomicBool,
	pump: Mutex<Option<Ticker>>,
	/// Cancelled on `stop`; pending retry delays are cut short
	retry_token: Mutex<CancellationToken>,
}

/// Priority queue with single-in-flight submission and typed retries.
#[derive(Clone)]
pub struct TransactionQueueManager {
	inner: Arc<Inner>,
}

impl TransactionQueueManager {
	/// Create a stopped queue manager.
	///
	/// # Arguments
	/// * `config` - Capacity, pump interval and retry policy.
	/// * `chain` - Client the transactions are submitted through.
	/// * `repository` - Where completed and failed transactions are persisted.
	/// * `audit` - Sink for queue, completion and failure entries.
	pub fn new(
		config: TransactionQueueConfig,
		chain: Arc<dyn ChainClient>,
		repository: Arc<dyn TransactionRecordRepository>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				chain,
				repository,
				audit,
				state: Mutex::new(QueueState::default()),
				processing: AtomicBool::new(false),
				pump: Mutex::new(None),
				retry_token: Mutex::new(CancellationToken::new()),
			}),
		}
	}

	/// Start the pump. Calling it while running is a no-op.
	pub async fn start(&self, parent: &CancellationToken) {
		let mut pump = self.inner.pump.lock().await;
		if pump.as_ref().is_some_and(Ticker::is_active) {
			return;
		}
		*self.inner.retry_token.lock().await = parent.child_token();

		let this = self.clone();
		*pump = Some(Ticker::spawn(
			"transaction-pump",
			self.inner.config.processing_interval,
			false,
			parent,
			move || {
				let this = this.clone();
				async move {
					this.process_next().await;
				}
			},
		));
		info!("Transaction processor started");
	}

	/// Stop the pump. Transactions waiting out a retry delay go straight back to the queue.
	pub async fn stop(&self) {
		let Some(pump) = self.inner.pump.lock().await.take() else {
			return;
		};
		pump.cancel();
		self.inner.retry_token.lock().await.cancel();
		info!("Transaction processor stopped");
	}

	/// Queue a transaction for submission.
	///
	/// When the queue is at capacity the oldest waiting transaction is evicted first.
	///
	/// # Arguments
	/// * `request` - What to submit.
	/// * `priority` - Higher priorities are submitted first; ties go to the older request.
	///
	/// # Returns
	/// The id under which the transaction can be looked up.
	pub async fn enqueue(&self, request: TransactionRequest, priority: Priority) -> String {
		let id = generate_id("tx");
		let transaction = QueuedTransaction::new(id.clone(), request, priority);
		let kind = transaction.request.kind();

		let evicted = {
			let mut state = self.inner.state.lock().await;
			state.push(transaction);
			if state.heap.len() > self.inner.config.max_queue_size {
				state.evict_oldest()
			} else {
				None
			}
		};

		if let Some(evicted) = evicted {
			let reason = SyncError::QueueFull(format!(
				"capacity {} reached, evicted oldest transaction {}",
				self.inner.config.max_queue_size, evicted.id
			));
			warn!("{}", reason);
		}

		debug!("Queued {} transaction {} ({:?})", kind, id, priority);
		self.inner.audit.log(
			"transaction_queued",
			AuditEntry::info(
				AuditCategory::Blockchain,
				json!({ "transactionId": id, "type": kind, "priority": priority }),
			),
		);
		id
	}

	/// Pop and submit the highest ranked transaction.
	///
	/// Returns the id of the processed transaction, or `None` when the queue is empty or another
	/// submission is already in flight.
	pub async fn process_next(&self) -> Option<String> {
		if self.inner.processing.swap(true, Ordering::SeqCst) {
			return None;
		}

		let next = {
			let mut state = self.inner.state.lock().await;
			let next = state.heap.pop().map(|entry| entry.transaction);
			if let Some(transaction) = &next {
				let mut processing = transaction.clone();
				processing.status = TransactionStatus::Processing;
				processing.processing_at = Some(Utc::now());
				state.processing = Some(processing);
			}
			next
		};

		let Some(mut transaction) = next else {
			self.inner.processing.store(false, Ordering::SeqCst);
			return None;
		};

		info!("Processing transaction: {}", transaction.id);
		transaction.status = TransactionStatus::Processing;
		transaction.processing_at = Some(Utc::now());

		let outcome = execute(&*self.inner.chain, &transaction.request).await;
		let id = transaction.id.clone();
		match outcome {
			ExecutionOutcome::Success { signature } => self.complete(transaction, signature).await,
			ExecutionOutcome::Failure { error, retryable } => {
				self.fail(transaction, error, retryable).await
			}
		}

		self.inner.state.lock().await.processing = None;
		self.inner.processing.store(false, Ordering::SeqCst);
		Some(id)
	}

	async fn complete(&self, mut transaction: QueuedTransaction, signature: String) {
		transaction.status = TransactionStatus::Completed;
		transaction.completed_at = Some(Utc::now());
		transaction.signature = Some(signature.clone());
		self.persist(&transaction).await;

		info!("Transaction completed: {}", transaction.id);
		self.inner.audit.log(
			"transaction_completed",
			AuditEntry::info(
				AuditCategory::Blockchain,
				json!({
					"transactionId": transaction.id,
					"type": transaction.request.kind(),
					"signature": signature,
				}),
			),
		);
		self.inner
			.state
			.lock()
			.await
			.completed
			.insert(transaction.id.clone(), transaction);
	}

	async fn fail(&self, mut transaction: QueuedTransaction, error: String, retryable: bool) {
		transaction.retries += 1;
		transaction.last_error = Some(error.clone());
		transaction.last_attempt_at = Some(Utc::now());

		if retryable && transaction.retries < self.inner.config.max_retries {
			transaction.status = TransactionStatus::Retrying;
			let delay = self.inner.config.retry_delay * transaction.retries;
			info!(
				"Transaction {} will be retried in {:?} (attempt {})",
				transaction.id,
				delay,
				transaction.retries + 1
			);
			self.inner
				.state
				.lock()
				.await
				.retrying
				.insert(transaction.id.clone(), transaction.clone());
			self.schedule_retry(transaction.id, delay).await;
			return;
		}

		transaction.status = TransactionStatus::Failed;
		transaction.failed_at = Some(Utc::now());
		self.persist(&transaction).await;

		error!(
			"Transaction failed: {} after {} attempts: {}",
			transaction.id, transaction.retries, error
		);
		self.inner.audit.log(
			"transaction_failed",
			AuditEntry::error(
				AuditCategory::Blockchain,
				json!({
					"transactionId": transaction.id,
					"type": transaction.request.kind(),
					"error": error,
					"retries": transaction.retries,
				}),
			),
		);
		self.inner
			.state
			.lock()
			.await
			.failed
			.insert(transaction.id.clone(), transaction);
	}

	async fn schedule_retry(&self, id: String, delay: std::time::Duration) {
		let token = self.inner.retry_token.lock().await.clone();
		let inner = self.inner.clone();
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(delay) => {}
				_ = token.cancelled() => {}
			}
			let mut state = inner.state.lock().await;
			if let Some(transaction) = state.retrying.remove(&id) {
				state.push(transaction);
			}
		});
	}

	/// Repository failures are logged and otherwise ignored; the in-memory maps stay authoritative.
	async fn persist(&self, transaction: &QueuedTransaction) {
		if let Err(e) = self.inner.repository.save(transaction).await {
			warn!("Failed to persist transaction {}: {}", transaction.id, e);
		}
	}

	/// Look a transaction up in memory first, then in the record repository.
	///
	/// # Errors
	/// Returns an error if the persisted record exists but cannot be read.
	pub async fn get_transaction_status(
		&self,
		id: &str,
	) -> Result<Option<QueuedTransaction>, SyncError> {
		{
			let state = self.inner.state.lock().await;
			let found = state
				.completed
				.get(id)
				.or_else(|| state.failed.get(id))
				.or_else(|| state.processing.as_ref().filter(|t| t.id == id))
				.or_else(|| state.retrying.get(id))
				.or_else(|| {
					state
						.heap
						.iter()
						.map(|e| &e.transaction)
						.find(|t| t.id == id)
				});
			if let Some(transaction) = found {
				return Ok(Some(transaction.clone()));
			}
		}
		self.inner.repository.load(id).await
	}

	pub async fn get_all_transaction_statuses(&self) -> TransactionSummary {
		let state = self.inner.state.lock().await;
		let mut summary = TransactionSummary {
			queued: state.heap.len(),
			processing: usize::from(state.processing.is_some()),
			retrying: state.retrying.len(),
			completed: state.completed.len(),
			failed: state.failed.len(),
			..Default::default()
		};
		summary.total = summary.queued
			+ summary.processing
			+ summary.retrying
			+ summary.completed
			+ summary.failed;

		let all = state
			.heap
			.iter()
			.map(|e| &e.transaction)
			.chain(state.processing.iter())
			.chain(state.retrying.values())
			.chain(state.completed.values())
			.chain(state.failed.values());
		for transaction in all {
			*summary.by_type.entry(transaction.request.kind()).or_insert(0) += 1;
		}
		summary
	}

	/// Drop terminal transactions older than the retention window from memory.
	/// Returns how many were removed.
	pub async fn clear_old_transactions(&self) -> usize {
		let retention = chrono::Duration::from_std(self.inner.config.retention)
			.unwrap_or_else(|_| chrono::Duration::hours(24));
		let cutoff = Utc::now() - retention;
		let fresh = |t: &QueuedTransaction| t.finished_at().is_none_or(|at| at >= cutoff);

		let mut state = self.inner.state.lock().await;
		let before = state.completed.len() + state.failed.len();
		state.completed.retain(|_, t| fresh(t));
		state.failed.retain(|_, t| fresh(t));
		let removed = before - (state.completed.len() + state.failed.len());

		debug!("Cleared {} old transactions", removed);
		removed
	}
}
