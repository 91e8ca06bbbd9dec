//! Conflict detection and repair between the projection and the chain.
//!
//! Unlike the synchronizer's overwrite pass, the reconciler first classifies every discrepancy
//! into a [`Conflict`] and then repairs each one in its own store transaction: a row missing on
//! chain is soft-deactivated together with its dependents, a mismatching row takes the chain's
//! canonical fields.

use super::canonical::{Canonical, fetch};
use super::handlers::finish;
use crate::chain::ChainClient;
use crate::error::SyncError;
use crate::services::{AuditCategory, AuditEntry, AuditSink};
use crate::store::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
	MissingOnChain,
	DataMismatch,
}

/// A single divergence between a stored row and its chain snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
	pub entity_type: EntityKind,
	pub entity_id: RowId,
	pub on_chain_id: Option<String>,
	pub conflict_type: ConflictType,
	pub backend_snapshot: Value,
	/// `None` for `MissingOnChain`
	pub chain_snapshot: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationStats {
	pub total_runs: u64,
	pub conflicts_detected: u64,
	pub conflicts_resolved: u64,
	pub data_repairs: u64,
	pub failed_resolutions: u64,
	pub last_run: Option<DateTime<Utc>>,
}

/// Outcome of one `detect_and_resolve_conflicts` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
	pub detected: usize,
	pub resolved: usize,
	pub failed: usize,
	/// Detectors that could not complete, as `kind: error`
	pub detector_errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictSummary {
	pub total: usize,
	pub by_entity_type: BTreeMap<EntityKind, usize>,
	pub by_conflict_type: BTreeMap<ConflictType, usize>,
	pub timestamp: DateTime<Utc>,
}

struct Inner {
	chain: Arc<dyn ChainClient>,
	store: Arc<dyn Store>,
	audit: Arc<dyn AuditSink>,
	reconciling: AtomicBool,
	stats: Mutex<ReconciliationStats>,
}

#[derive(Clone)]
pub struct StateReconciler {
	inner: Arc<Inner>,
}

impl StateReconciler {
	pub fn new(
		chain: Arc<dyn ChainClient>,
		store: Arc<dyn Store>,
		audit: Arc<dyn AuditSink>,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				chain,
				store,
				audit,
				reconciling: AtomicBool::new(false),
				stats: Mutex::new(ReconciliationStats::default()),
			}),
		}
	}

	/// Detect conflicts for every entity kind and resolve each one.
	///
	/// Returns `None` when a run is already in progress.
	pub async fn detect_and_resolve_conflicts(&self) -> Option<ReconciliationReport> {
		if self.inner.reconciling.swap(true, Ordering::SeqCst) {
			debug!("Conflict reconciliation already in progress, skipping");
			return None;
		}

		info!("Starting conflict detection and resolution");
		let (conflicts, detector_errors) = self.detect_all().await;
		let mut report = ReconciliationReport {
			detected: conflicts.len(),
			detector_errors,
			..Default::default()
		};

		for conflict in &conflicts {
			match self.resolve_conflict(conflict).await {
				Ok(()) => report.resolved += 1,
				Err(e) => {
					report.failed += 1;
					warn!(
						"Failed to resolve {:?} for {} #{}: {}",
						conflict.conflict_type, conflict.entity_type, conflict.entity_id, e
					);
				}
			}
		}

		let stats = {
			let mut stats = self.inner.stats.lock().await;
			stats.total_runs += 1;
			stats.conflicts_detected += report.detected as u64;
			stats.failed_resolutions += report.failed as u64;
			stats.last_run = Some(Utc::now());
			stats.clone()
		};

		if report.detector_errors.is_empty() {
			info!(
				"Conflict reconciliation completed: {} detected, {} resolved, {} failed",
				report.detected, report.resolved, report.failed
			);
			self.inner.audit.log(
				"conflict_reconciliation_completed",
				AuditEntry::info(
					AuditCategory::Reconciliation,
					json!({ "report": report, "stats": stats }),
				),
			);
		} else {
			error!(
				"Conflict reconciliation failed: {}",
				report.detector_errors.join("; ")
			);
			self.inner.audit.log(
				"conflict_reconciliation_failed",
				AuditEntry::error(
					AuditCategory::Reconciliation,
					json!({ "report": report, "stats": stats }),
				),
			);
		}

		self.inner.reconciling.store(false, Ordering::SeqCst);
		Some(report)
	}

	/// Read-only detection pass grouped by entity kind and conflict type.
	pub async fn get_conflict_summary(&self) -> ConflictSummary {
		let (conflicts, errors) = self.detect_all().await;
		for e in &errors {
			warn!("Conflict detection incomplete: {}", e);
		}

		let mut by_entity_type = BTreeMap::new();
		let mut by_conflict_type = BTreeMap::new();
		for conflict in &conflicts {
			*by_entity_type.entry(conflict.entity_type).or_insert(0) += 1;
			*by_conflict_type.entry(conflict.conflict_type).or_insert(0) += 1;
		}

		ConflictSummary {
			total: conflicts.len(),
			by_entity_type,
			by_conflict_type,
			timestamp: Utc::now(),
		}
	}

	pub async fn get_stats(&self) -> ReconciliationStats {
		self.inner.stats.lock().await.clone()
	}

	/// Repair one conflict atomically. Nothing is written unless every step succeeds.
	///
	/// # Errors
	/// Returns the store error that aborted the repair, or a payload error when a data mismatch
	/// carries no usable chain snapshot.
	pub async fn resolve_conflict(&self, conflict: &Conflict) -> Result<(), SyncError> {
		let cascaded = match conflict.entity_type {
			EntityKind::Community => self.resolve::<Community>(conflict).await?,
			EntityKind::Membership => self.resolve::<Member>(conflict).await?,
			EntityKind::Question => self.resolve::<VotingQuestion>(conflict).await?,
			EntityKind::Vote => self.resolve::<Vote>(conflict).await?,
			EntityKind::User => self.resolve::<User>(conflict).await?,
		};

		{
			let mut stats = self.inner.stats.lock().await;
			stats.conflicts_resolved += 1;
			stats.data_repairs += 1;
		}
		info!(
			"Resolved {:?} for {} #{} ({} dependents deactivated)",
			conflict.conflict_type, conflict.entity_type, conflict.entity_id, cascaded
		);
		Ok(())
	}

	async fn detect_all(&self) -> (Vec<Conflict>, Vec<String>) {
		let (communities, members, questions, votes, users) = futures::join!(
			self.detect::<Community>(),
			self.detect::<Member>(),
			self.detect::<VotingQuestion>(),
			self.detect::<Vote>(),
			self.detect::<User>(),
		);
		let results = [communities, members, questions, votes, users];

		let mut conflicts = Vec::new();
		let mut errors = Vec::new();
		for (kind, result) in EntityKind::ALL.iter().zip(results) {
			match result {
				Ok(found) => conflicts.extend(found),
				Err(e) => errors.push(format!("{}: {}", kind, e)),
			}
		}
		(conflicts, errors)
	}

	async fn detect<T: Canonical>(&self) -> Result<Vec<Conflict>, SyncError> {
		let store = &*self.inner.store;
		let rows = T::list_active(store).await?;
		let mut conflicts = Vec::new();

		for row in rows {
			match self.classify(&row).await {
				Ok(Some(conflict)) => conflicts.push(conflict),
				Ok(None) => {}
				Err(e) => warn!("Could not check {} #{}: {}", T::KIND, row.row_id(), e),
			}
		}

		debug!("{} conflicts found for {}", conflicts.len(), T::KIND);
		Ok(conflicts)
	}

	async fn classify<T: Canonical>(&self, row: &T) -> Result<Option<Conflict>, SyncError> {
		let key = row.key(&*self.inner.store).await?;
		let (conflict_type, chain_snapshot) = match fetch::<T>(&*self.inner.chain, &key).await? {
			None => (ConflictType::MissingOnChain, None),
			Some(snapshot) if row.differs(&snapshot) => (
				ConflictType::DataMismatch,
				Some(serde_json::to_value(&snapshot)?),
			),
			Some(_) => return Ok(None),
		};

		Ok(Some(Conflict {
			entity_type: T::KIND,
			entity_id: row.row_id(),
			on_chain_id: row.on_chain_id().map(str::to_string),
			conflict_type,
			backend_snapshot: serde_json::to_value(row)?,
			chain_snapshot,
		}))
	}

	/// Returns the number of dependents deactivated.
	async fn resolve<T: Canonical>(&self, conflict: &Conflict) -> Result<usize, SyncError> {
		let snapshot = match conflict.conflict_type {
			ConflictType::MissingOnChain => None,
			ConflictType::DataMismatch => {
				let value = conflict.chain_snapshot.clone().ok_or_else(|| {
					SyncError::InvalidPayload(format!(
						"data mismatch on {} #{} without chain snapshot",
						conflict.entity_type, conflict.entity_id
					))
				})?;
				Some(serde_json::from_value::<T::Snapshot>(value)?)
			}
		};

		let tx = self.inner.store.begin_transaction().await?;
		let result = async {
			let mut row = T::reload(&*tx, conflict.entity_id)
				.await?
				.ok_or(StoreError::NotFound {
					kind: T::KIND,
					id: conflict.entity_id,
				})?;
			let now = Utc::now();
			let cascaded = match &snapshot {
				None => {
					row.set_status(EntityStatus::Inactive);
					row.touch(now);
					row.save(&*tx).await?;
					row.deactivate_dependents(&*tx, now).await?
				}
				Some(snapshot) => {
					row.apply(snapshot);
					row.touch(now);
					row.save(&*tx).await?;
					0
				}
			};
			Ok::<_, SyncError>(cascaded)
		}
		.await;

		finish(tx, result).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::chain::*;
	use crate::testing::{MockChainClient, RecordingAuditSink};

	struct Fixture {
		chain: Arc<MockChainClient>,
		store: InMemoryStore,
		audit: Arc<RecordingAuditSink>,
		reconciler: StateReconciler,
	}

	fn fixture() -> Fixture {
		let chain = Arc::new(MockChainClient::new());
		let store = InMemoryStore::new();
		let audit = Arc::new(RecordingAuditSink::default());
		let reconciler = StateReconciler::new(chain.clone(), Arc::new(store.clone()), audit.clone());
		chain.set_snapshot(
			EntityKey::Account {
				address: "W1".into(),
			},
			EntitySnapshot::Account(AccountSnapshot { lamports: 1 }),
		);
		Fixture {
			chain,
			store,
			audit,
			reconciler,
		}
	}

	/// Community `C1` created by `W1`, with `W1` as an active admin member.
	async fn seed(store: &InMemoryStore) -> (Community, Member) {
		let user = store.create_user(User::draft("W1", "user_W1".into())).await.unwrap();
		let now = Utc::now();
		let community = store
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
		let member = store
			.create_member(Member {
				id: 0,
				community_id: community.id,
				user_id: user.id,
				role: MemberRole::Admin,
				status: EntityStatus::Active,
				joined_at: now,
				network: "devnet".into(),
				transaction_id: None,
				created_at: now,
				updated_at: now,
			})
			.await
			.unwrap();
		(community, member)
	}

	fn community_key() -> EntityKey {
		EntityKey::Community {
			address: "C1".into(),
		}
	}

	fn membership_key() -> EntityKey {
		EntityKey::Membership {
			community: "C1".into(),
			member: "W1".into(),
		}
	}

	#[tokio::test]
	async fn mismatched_name_is_repaired_from_chain() {
		let f = fixture();
		let (community, _) = seed(&f.store).await;
		f.chain.set_snapshot(
			community_key(),
			EntitySnapshot::Community(CommunitySnapshot {
				name: "Alpha DAO".into(),
				description: None,
				config: json!({}),
			}),
		);
		f.chain.set_snapshot(
			membership_key(),
			EntitySnapshot::Membership(MembershipSnapshot {
				role: MemberRole::Admin,
				status: EntityStatus::Active,
			}),
		);

		let summary = f.reconciler.get_conflict_summary().await;
		assert_eq!(summary.total, 1);
		assert_eq!(summary.by_conflict_type.get(&ConflictType::DataMismatch), Some(&1));

		let report = f.reconciler.detect_and_resolve_conflicts().await.unwrap();
		assert_eq!(report.detected, 1);
		assert_eq!(report.resolved, 1);

		let stored = f
			.store
			.find_community(Lookup::Id(community.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.name, "Alpha DAO");
		assert_eq!(f.reconciler.get_stats().await.data_repairs, 1);
		assert_eq!(f.audit.count("conflict_reconciliation_completed"), 1);
	}

	#[tokio::test]
	async fn missing_community_cascades_to_memberships() {
		let f = fixture();
		let (community, member) = seed(&f.store).await;
		f.chain.set_snapshot(
			membership_key(),
			EntitySnapshot::Membership(MembershipSnapshot {
				role: MemberRole::Admin,
				status: EntityStatus::Active,
			}),
		);

		let conflict = f
			.reconciler
			.classify(&community)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(conflict.conflict_type, ConflictType::MissingOnChain);
		f.reconciler.resolve_conflict(&conflict).await.unwrap();

		let community = f
			.store
			.find_community(Lookup::Id(community.id))
			.await
			.unwrap()
			.unwrap();
		let member = f
			.store
			.find_member(PairLookup::Id(member.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(community.status, EntityStatus::Inactive);
		assert_eq!(member.status, EntityStatus::Inactive);
	}

	#[tokio::test]
	async fn failed_cascade_rolls_back_the_whole_repair() {
		let f = fixture();
		let (community, member) = seed(&f.store).await;
		let conflict = f
			.reconciler
			.classify(&community)
			.await
			.unwrap()
			.unwrap();
		f.store.reject_writes(EntityKind::Membership).await;

		assert!(f.reconciler.resolve_conflict(&conflict).await.is_err());

		let community = f
			.store
			.find_community(Lookup::Id(community.id))
			.await
			.unwrap()
			.unwrap();
		let member = f
			.store
			.find_member(PairLookup::Id(member.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(community.status, EntityStatus::Active);
		assert_eq!(member.status, EntityStatus::Active);
		assert_eq!(f.reconciler.get_stats().await.data_repairs, 0);
	}

	#[tokio::test]
	async fn summary_does_not_resolve() {
		let f = fixture();
		let (community, _) = seed(&f.store).await;

		let summary = f.reconciler.get_conflict_summary().await;
		assert_eq!(summary.total, 2);
		assert_eq!(summary.by_entity_type.get(&EntityKind::Community), Some(&1));
		assert_eq!(summary.by_entity_type.get(&EntityKind::Membership), Some(&1));

		let stored = f
			.store
			.find_community(Lookup::Id(community.id))
			.await
			.unwrap()
			.unwrap();
		assert_eq!(stored.status, EntityStatus::Active);
	}
}
