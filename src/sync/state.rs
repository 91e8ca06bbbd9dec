//! Periodic full-state synchronization.
//!
//! A full sync runs one pass per entity kind concurrently. Each pass walks the active rows of its
//! kind, fetches the canonical snapshot and either deactivates the row (absent on chain) or
//! overwrites its canonical fields (stale). Failures are isolated per row and per pass.

use super::canonical::{Canonical, fetch};
use crate::chain::ChainClient;
use crate::config::SynchronizerConfig;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink};
use crate::store::*;
use crate::utils::Ticker;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
	pub total_syncs: u64,
	pub successful_syncs: u64,
	pub failed_syncs: u64,
	pub last_error: Option<String>,
}

/// Outcome of one per-kind pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
	pub entity_type: EntityKind,
	pub checked: usize,
	pub updated: usize,
	pub deactivated: usize,
	/// Rows whose snapshot could not be fetched or whose write failed
	pub failed: usize,
}

impl PassReport {
	fn new(entity_type: EntityKind) -> Self {
		Self {
			entity_type,
			checked: 0,
			updated: 0,
			deactivated: 0,
			failed: 0,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizerStatus {
	pub is_running: bool,
	pub is_syncing: bool,
	pub last_sync_time: Option<DateTime<Utc>>,
	pub sync_interval_ms: u64,
	pub sync_stats: SyncStats,
}

/// Share of active rows touched within the freshness window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindConsistency {
	pub total: usize,
	pub synced: usize,
	/// Percentage in `0..=100`; 100 when there are no rows
	pub consistency: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyReport {
	pub communities: KindConsistency,
	pub memberships: KindConsistency,
	pub questions: KindConsistency,
	pub votes: KindConsistency,
	pub timestamp: DateTime<Utc>,
}

struct Inner {
	config: SynchronizerConfig,
	chain: Arc<dyn ChainClient>,
	store: Arc<dyn Store>,
	audit: Arc<dyn AuditSink>,
	/// Guards `perform_full_sync` against overlapping with itself
	syncing: AtomicBool,
	stats: Mutex<SyncStats>,
	last_sync_time: Mutex<Option<DateTime<Utc>>>,
	ticker: Mutex<Option<Ticker>>,
}

#[derive(Clone)]
pub struct StateSynchronizer {
	inner: Arc<Inner>,
}

impl StateSynchronizer {
	pub fn new(
		config: SynchronizerConfig,
		chain: Arc<dyn ChainClient>,
		store: Arc<dyn Store>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				chain,
				store,
				audit,
				syncing: AtomicBool::new(false),
				stats: Mutex::new(SyncStats::default()),
				last_sync_time: Mutex::new(None),
				ticker: Mutex::new(None),
			}),
		}
	}

	/// Run a full sync now and then every `sync_interval` until stopped or `parent` is cancelled.
	/// Calling it while already running is a no-op.
	pub async fn start_periodic_sync(&self, parent: &CancellationToken) {
		let mut ticker = self.inner.ticker.lock().await;
		if ticker.as_ref().is_some_and(Ticker::is_active) {
			debug!("State synchronization already running");
			return;
		}

		let this = self.clone();
		*ticker = Some(Ticker::spawn(
			"state-sync",
			self.inner.config.sync_interval,
			true,
			parent,
			move || {
				let this = this.clone();
				async move {
					this.perform_full_sync().await;
				}
			},
		));

		info!(
			"Periodic state synchronization started (every {:?})",
			self.inner.config.sync_interval
		);
		self.inner.audit.log(
			"state_sync_started",
			AuditEntry::info(
				AuditCategory::Sync,
				json!({ "syncIntervalMs": self.inner.config.sync_interval.as_millis() as u64 }),
			),
		);
	}

	/// Stop the periodic loop. A sync already in progress runs to completion.
	pub async fn stop_periodic_sync(&self) {
		let Some(ticker) = self.inner.ticker.lock().await.take() else {
			return;
		};
		ticker.cancel();

		info!("Periodic state synchronization stopped");
		let stats = self.inner.stats.lock().await.clone();
		self.inner.audit.log(
			"state_sync_stopped",
			AuditEntry::info(AuditCategory::Sync, json!({ "syncStats": stats })),
		);
	}

	/// Run every per-kind pass once.
	///
	/// Returns `None` when another full sync is still in progress.
	pub async fn perform_full_sync(&self) -> Option<Vec<PassReport>> {
		if self.inner.syncing.swap(true, Ordering::SeqCst) {
			debug!("Full sync already in progress, skipping");
			return None;
		}

		info!("Starting full state synchronization");
		{
			let mut stats = self.inner.stats.lock().await;
			stats.total_syncs += 1;
		}
		*self.inner.last_sync_time.lock().await = Some(Utc::now());

		let (communities, members, questions, votes, users) = futures::join!(
			self.sync_kind::<Community>(),
			self.sync_kind::<Member>(),
			self.sync_kind::<VotingQuestion>(),
			self.sync_kind::<Vote>(),
			self.sync_kind::<User>(),
		);
		let results = [communities, members, questions, votes, users];

		let mut reports = Vec::with_capacity(results.len());
		let mut errors = Vec::new();
		for result in results {
			match result {
				Ok(report) => reports.push(report),
				Err(e) => errors.push(e.to_string()),
			}
		}

		let stats = {
			let mut stats = self.inner.stats.lock().await;
			if errors.is_empty() {
				stats.successful_syncs += 1;
			} else {
				stats.failed_syncs += 1;
				stats.last_error = Some(errors.join("; "));
			}
			stats.clone()
		};

		if errors.is_empty() {
			info!("Full state synchronization completed");
			self.inner.audit.log(
				"state_sync_completed",
				AuditEntry::info(
					AuditCategory::Sync,
					json!({ "syncStats": stats, "passes": reports }),
				),
			);
		} else {
			error!("Full state synchronization failed: {}", errors.join("; "));
			self.inner.audit.log(
				"state_sync_failed",
				AuditEntry::error(
					AuditCategory::Sync,
					json!({ "errors": errors, "syncStats": stats }),
				),
			);
		}

		self.inner.syncing.store(false, Ordering::SeqCst);
		Some(reports)
	}

	/// Run the pass for a single entity kind.
	pub async fn sync_entity(&self, kind: EntityKind) -> Result<PassReport, SyncError> {
		match kind {
			EntityKind::Community => self.sync_kind::<Community>().await,
			EntityKind::Membership => self.sync_kind::<Member>().await,
			EntityKind::Question => self.sync_kind::<VotingQuestion>().await,
			EntityKind::Vote => self.sync_kind::<Vote>().await,
			EntityKind::User => self.sync_kind::<User>().await,
		}
	}

	async fn sync_kind<T: Canonical>(&self) -> Result<PassReport, SyncError> {
		debug!("Synchronizing {} rows", T::KIND);
		let store = &*self.inner.store;
		let rows = T::list_active(store).await?;
		let mut report = PassReport::new(T::KIND);

		for mut row in rows {
			report.checked += 1;
			match self.sync_row(&mut row).await {
				Ok(RowOutcome::Unchanged) => {}
				Ok(RowOutcome::Updated) => report.updated += 1,
				Ok(RowOutcome::Deactivated) => report.deactivated += 1,
				Err(e) => {
					report.failed += 1;
					warn!("Failed to sync {} #{}: {}", T::KIND, row.row_id(), e);
				}
			}
		}

		debug!(
			"{} sync done: {} checked, {} updated, {} deactivated, {} failed",
			T::KIND,
			report.checked,
			report.updated,
			report.deactivated,
			report.failed
		);
		Ok(report)
	}

	async fn sync_row<T: Canonical>(&self, row: &mut T) -> Result<RowOutcome, SyncError> {
		let store = &*self.inner.store;
		let key = row.key(store).await?;

		match fetch::<T>(&*self.inner.chain, &key).await? {
			None => {
				row.set_status(EntityStatus::Inactive);
				row.touch(Utc::now());
				row.save(store).await?;
				info!("{} {} marked inactive, absent on chain", T::KIND, key);
				Ok(RowOutcome::Deactivated)
			}
			Some(snapshot) if row.differs(&snapshot) => {
				row.apply(&snapshot);
				row.touch(Utc::now());
				row.save(store).await?;
				info!("{} {} updated from chain", T::KIND, key);
				Ok(RowOutcome::Updated)
			}
			Some(_) => Ok(RowOutcome::Unchanged),
		}
	}

	pub async fn get_sync_status(&self) -> SynchronizerStatus {
		SynchronizerStatus {
			is_running: self
				.inner
				.ticker
				.lock()
				.await
				.as_ref()
				.is_some_and(Ticker::is_active),
			is_syncing: self.inner.syncing.load(Ordering::SeqCst),
			last_sync_time: *self.inner.last_sync_time.lock().await,
			sync_interval_ms: self.inner.config.sync_interval.as_millis() as u64,
			sync_stats: self.inner.stats.lock().await.clone(),
		}
	}

	/// Staleness proxy: per kind, the share of active rows updated within the freshness window.
	pub async fn get_consistency_report(&self) -> Result<ConsistencyReport, SyncError> {
		let store = &*self.inner.store;
		let window = chrono::Duration::from_std(self.inner.config.freshness_window)
			.unwrap_or_else(|_| chrono::Duration::hours(24));
		let since = Utc::now() - window;
		let active = RowFilter::status(EntityStatus::Active);

		let communities = store.list_communities(active).await?;
		let members = store.list_members(active).await?;
		let questions = store.list_questions(active).await?;
		let votes = store.list_votes(active).await?;

		Ok(ConsistencyReport {
			communities: consistency(communities.iter().map(|r| r.updated_at), since),
			memberships: consistency(members.iter().map(|r| r.updated_at), since),
			questions: consistency(questions.iter().map(|r| r.updated_at), since),
			votes: consistency(votes.iter().map(|r| r.updated_at), since),
			timestamp: Utc::now(),
		})
	}
}

enum RowOutcome {
	Unchanged,
	Updated,
	Deactivated,
}

fn consistency(
	updated: impl Iterator<Item = DateTime<Utc>>,
	since: DateTime<Utc>,
) -> KindConsistency {
	let (total, synced) = updated.fold((0, 0), |(total, synced), at| {
		(total + 1, synced + usize::from(at >= since))
	});
	KindConsistency {
		total,
		synced,
		consistency: if total == 0 {
			100.0
		} else {
			synced as f64 * 100.0 / total as f64
		},
	}
}
