//! Runtime configuration.
//!
//! Every component takes its own config struct; `SyncConfig::from_env` builds all of them from
//! environment variables, falling back to the defaults below for unset or unparseable values.

use crate::utils::env_or;
use crate::utils::ticker::MIN_PERIOD;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct EventProcessorConfig {
	/// Retries after the first attempt before an event is dead-lettered
	pub max_retry_attempts: u32,
	/// Base delay, multiplied by the retry count
	pub retry_delay: Duration,
	pub batch_size: usize,
	/// Pause between two batches while the queue is non-empty
	pub batch_pause: Duration,
}

impl Default for EventProcessorConfig {
	fn default() -> Self {
		Self {
			max_retry_attempts: 3,
			retry_delay: Duration::from_millis(5000),
			batch_size: 10,
			batch_pause: Duration::from_millis(100),
		}
	}
}

#[derive(Debug, Clone)]
pub struct TransactionQueueConfig {
	/// Total submission attempts for a retryable failure
	pub max_retries: u32,
	pub retry_delay: Duration,
	pub max_queue_size: usize,
	pub processing_interval: Duration,
	/// How long terminal records stay in memory before `clear_old_transactions` prunes them
	pub retention: Duration,
}

impl Default for TransactionQueueConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			retry_delay: Duration::from_millis(2000),
			max_queue_size: 1000,
			processing_interval: Duration::from_millis(1000),
			retention: Duration::from_secs(24 * 60 * 60),
		}
	}
}

#[derive(Debug, Clone)]
pub struct SynchronizerConfig {
	pub sync_interval: Duration,
	/// Window used by the consistency report to count a row as fresh
	pub freshness_window: Duration,
}

impl Default for SynchronizerConfig {
	fn default() -> Self {
		Self {
			sync_interval: Duration::from_millis(300_000),
			freshness_window: Duration::from_secs(24 * 60 * 60),
		}
	}
}

/// Recurring task cadence seeded by `SyncWorker::schedule_periodic_tasks`
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
	pub communities: Duration,
	pub memberships: Duration,
	pub questions: Duration,
	pub votes: Duration,
	pub reconciliation: Duration,
}

impl Default for ScheduleConfig {
	fn default() -> Self {
		Self {
			communities: Duration::from_secs(10 * 60),
			memberships: Duration::from_secs(5 * 60),
			questions: Duration::from_secs(5 * 60),
			votes: Duration::from_secs(2 * 60),
			reconciliation: Duration::from_secs(15 * 60),
		}
	}
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	pub processing_interval: Duration,
	pub health_check_interval: Duration,
	pub max_task_retries: u32,
	pub task_retry_delay: Duration,
	/// Finished tasks kept for status queries
	pub task_history: usize,
	pub schedule: ScheduleConfig,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			processing_interval: Duration::from_millis(1000),
			health_check_interval: Duration::from_millis(30_000),
			max_task_retries: 3,
			task_retry_delay: Duration::from_millis(5000),
			task_history: 1000,
			schedule: ScheduleConfig::default(),
		}
	}
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
	pub rpc_url: String,
	pub ws_url: String,
	pub network: String,
	pub program_id: String,
	pub relay_url: Option<String>,
}

impl Default for ChainConfig {
	fn default() -> Self {
		Self {
			rpc_url: "https://api.devnet.solana.com".to_string(),
			ws_url: "wss://api.devnet.solana.com".to_string(),
			network: "devnet".to_string(),
			program_id: "11111111111111111111111111111111".to_string(),
			relay_url: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct SyncConfig {
	pub events: EventProcessorConfig,
	pub transactions: TransactionQueueConfig,
	pub synchronizer: SynchronizerConfig,
	pub worker: WorkerConfig,
	pub chain: ChainConfig,
	pub data_dir: PathBuf,
}

fn millis(name: &str, default: Duration) -> Duration {
	Duration::from_millis(env_or(name, default.as_millis() as u64))
}

/// Like `millis`, for timer periods, which must be non-zero.
fn period(name: &str, default: Duration) -> Duration {
	let value = millis(name, default);
	if value < MIN_PERIOD {
		warn!("{} must be at least {:?}, using {:?}", name, MIN_PERIOD, default);
		return default;
	}
	value
}

impl SyncConfig {
	pub fn from_env() -> Self {
		let events = EventProcessorConfig::default();
		let transactions = TransactionQueueConfig::default();
		let synchronizer = SynchronizerConfig::default();
		let worker = WorkerConfig::default();
		let chain = ChainConfig::default();

		Self {
			events: EventProcessorConfig {
				max_retry_attempts: env_or("MAX_EVENT_RETRY_ATTEMPTS", events.max_retry_attempts),
				retry_delay: millis("EVENT_RETRY_DELAY", events.retry_delay),
				batch_size: env_or("EVENT_BATCH_SIZE", events.batch_size).max(1),
				batch_pause: millis("EVENT_BATCH_PAUSE", events.batch_pause),
			},
			transactions: TransactionQueueConfig {
				max_retries: env_or("TRANSACTION_MAX_RETRIES", transactions.max_retries),
				retry_delay: millis("TRANSACTION_RETRY_DELAY", transactions.retry_delay),
				max_queue_size: env_or("TRANSACTION_MAX_QUEUE_SIZE", transactions.max_queue_size)
					.max(1),
				processing_interval: period(
					"TRANSACTION_PROCESSING_INTERVAL",
					transactions.processing_interval,
				),
				..transactions
			},
			synchronizer: SynchronizerConfig {
				sync_interval: period("SYNC_INTERVAL", synchronizer.sync_interval),
				..synchronizer
			},
			worker: WorkerConfig {
				processing_interval: period("WORKER_PROCESSING_INTERVAL", worker.processing_interval),
				health_check_interval: period(
					"WORKER_HEALTH_CHECK_INTERVAL",
					worker.health_check_interval,
				),
				max_task_retries: env_or("MAX_TASK_RETRIES", worker.max_task_retries),
				task_retry_delay: millis("TASK_RETRY_DELAY", worker.task_retry_delay),
				..worker
			},
			chain: ChainConfig {
				rpc_url: env_or("SOLANA_RPC_URL", chain.rpc_url),
				ws_url: env_or("SOLANA_WS_URL", chain.ws_url),
				network: env_or("SOLANA_NETWORK", chain.network),
				program_id: env_or("VOTING_PROGRAM_ID", chain.program_id),
				relay_url: std::env::var("TRANSACTION_RELAY_URL").ok(),
			},
			data_dir: PathBuf::from(env_or("SYNC_DATA_DIR", "./data".to_string())),
		}
	}
}
