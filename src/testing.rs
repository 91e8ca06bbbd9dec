//! Test doubles for the chain and audit boundaries.

use crate::chain::*;
use crate::services::{AuditEntry, AuditSink};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scriptable in-process chain.
#[derive(Default)]
pub struct MockChainClient {
	snapshots: Mutex<HashMap<EntityKey, EntitySnapshot>>,
	failing: Mutex<HashSet<EntityKey>>,
	submit_script: Mutex<VecDeque<Result<Submission, ChainError>>>,
	submissions: Mutex<Vec<TransactionPayload>>,
	submit_delay: Mutex<Duration>,
	in_flight: AtomicUsize,
	max_in_flight: AtomicUsize,
	subscriptions: Mutex<HashMap<SubscriptionId, mpsc::Sender<ChainEvent>>>,
	next_id: AtomicU64,
	blockhash_error: Mutex<Option<ChainError>>,
	connected: Mutex<Option<String>>,
}

impl MockChainClient {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn set_snapshot(&self, key: EntityKey, snapshot: EntitySnapshot) {
		self.snapshots.lock().unwrap().insert(key, snapshot);
	}

	/// Make snapshot reads for `key` fail with a network error.
	pub fn fail_key(&self, key: EntityKey) {
		self.failing.lock().unwrap().insert(key);
	}

	/// Queue the result of the next `submit_transaction`. Unscripted submissions succeed.
	pub fn script_submit(&self, result: Result<Submission, ChainError>) {
		self.submit_script.lock().unwrap().push_back(result);
	}

	/// Make `get_latest_blockhash` fail with `error` until reset with `None`.
	pub fn fail_blockhash(&self, error: Option<ChainError>) {
		*self.blockhash_error.lock().unwrap() = error;
	}

	pub fn set_submit_delay(&self, delay: Duration) {
		*self.submit_delay.lock().unwrap() = delay;
	}

	pub fn submissions(&self) -> Vec<TransactionPayload> {
		self.submissions.lock().unwrap().clone()
	}

	/// Highest number of concurrently running `submit_transaction` calls seen.
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	/// Network passed to the last `connect`.
	pub fn connected_network(&self) -> Option<String> {
		self.connected.lock().unwrap().clone()
	}

	pub fn active_subscriptions(&self) -> usize {
		self.subscriptions.lock().unwrap().len()
	}

	/// Push `event` to every subscriber.
	pub async fn emit(&self, event: ChainEvent) {
		let sinks: Vec<_> = self.subscriptions.lock().unwrap().values().cloned().collect();
		for sink in sinks {
			let _ = sink.send(event.clone()).await;
		}
	}
}

#[async_trait]
impl ChainClient for MockChainClient {
	async fn connect(&self, network: &str) -> Result<ChainConnection, ChainError> {
		*self.connected.lock().unwrap() = Some(network.to_string());
		Ok(ChainConnection {
			network: network.to_string(),
			node_version: "mock".to_string(),
		})
	}

	async fn subscribe_account_changes(
		&self,
		_program_id: &str,
		sink: mpsc::Sender<ChainEvent>,
	) -> Result<SubscriptionId, ChainError> {
		let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		self.subscriptions.lock().unwrap().insert(id, sink);
		Ok(id)
	}

	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChainError> {
		self.subscriptions.lock().unwrap().remove(&id);
		Ok(())
	}

	async fn get_entity_snapshot(
		&self,
		key: &EntityKey,
	) -> Result<Option<EntitySnapshot>, ChainError> {
		if self.failing.lock().unwrap().contains(key) {
			return Err(ChainError::Network(format!("unreachable: {}", key)));
		}
		Ok(self.snapshots.lock().unwrap().get(key).cloned())
	}

	async fn submit_transaction(
		&self,
		payload: &TransactionPayload,
	) -> Result<Submission, ChainError> {
		let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
		self.max_in_flight.fetch_max(now, Ordering::SeqCst);

		let delay = *self.submit_delay.lock().unwrap();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}

		self.submissions.lock().unwrap().push(payload.clone());
		let scripted = self.submit_script.lock().unwrap().pop_front();
		self.in_flight.fetch_sub(1, Ordering::SeqCst);

		scripted.unwrap_or_else(|| {
			let n = self.submissions.lock().unwrap().len();
			Ok(Submission {
				signature: format!("sig-{}", n),
			})
		})
	}

	async fn get_latest_blockhash(&self) -> Result<String, ChainError> {
		match self.blockhash_error.lock().unwrap().clone() {
			Some(error) => Err(error),
			None => Ok("mock-blockhash".to_string()),
		}
	}
}

/// Audit sink that keeps every entry for assertions.
#[derive(Default)]
pub struct RecordingAuditSink {
	entries: Mutex<Vec<(String, AuditEntry)>>,
}

impl RecordingAuditSink {
	pub fn count(&self, event: &str) -> usize {
		self.entries
			.lock()
			.unwrap()
			.iter()
			.filter(|(name, _)| name == event)
			.count()
	}
}

impl AuditSink for RecordingAuditSink {
	fn log(&self, event: &str, entry: AuditEntry) {
		self.entries.lock().unwrap().push((event.to_string(), entry));
	}
}
