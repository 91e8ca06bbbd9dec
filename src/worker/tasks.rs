use crate::error::SyncError;
use crate::utils::generate_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Named background jobs the worker knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
	SyncCommunities,
	SyncMemberships,
	SyncQuestions,
	SyncVotes,
	ReconcileConflicts,
	ProcessEvents,
	HealthCheck,
}

impl TaskKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			TaskKind::SyncCommunities => "sync_communities",
			TaskKind::SyncMemberships => "sync_memberships",
			TaskKind::SyncQuestions => "sync_questions",
			TaskKind::SyncVotes => "sync_votes",
			TaskKind::ReconcileConflicts => "reconcile_conflicts",
			TaskKind::ProcessEvents => "process_events",
			TaskKind::HealthCheck => "health_check",
		}
	}
}

impl fmt::Display for TaskKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for TaskKind {
	type Err = SyncError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"sync_communities" => TaskKind::SyncCommunities,
			"sync_memberships" => TaskKind::SyncMemberships,
			"sync_questions" => TaskKind::SyncQuestions,
			"sync_votes" => TaskKind::SyncVotes,
			"reconcile_conflicts" => TaskKind::ReconcileConflicts,
			"process_events" => TaskKind::ProcessEvents,
			"health_check" => TaskKind::HealthCheck,
			other => return Err(SyncError::UnknownTask(other.to_string())),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
	Pending,
	Processing,
	Completed,
	Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncTask {
	pub id: String,
	#[serde(rename = "type")]
	pub kind: TaskKind,
	pub payload: Value,
	pub status: TaskStatus,
	pub retry_count: u32,
	pub max_retries: u32,
	pub created_at: DateTime<Utc>,
	pub last_error: Option<String>,
}

impl SyncTask {
	pub fn new(kind: TaskKind, payload: Value, max_retries: u32) -> Self {
		Self {
			id: generate_id("task"),
			kind,
			payload,
			status: TaskStatus::Pending,
			retry_count: 0,
			max_retries,
			created_at: Utc::now(),
			last_error: None,
		}
	}
}

/// Pending FIFO, tasks waiting out a retry delay, the running task and a bounded history of
/// finished ones.
pub(crate) struct TaskBook {
	pending: VecDeque<SyncTask>,
	waiting: HashMap<String, SyncTask>,
	running: Option<SyncTask>,
	history: VecDeque<SyncTask>,
	history_limit: usize,
}

impl TaskBook {
	pub(crate) fn new(history_limit: usize) -> Self {
		Self {
			pending: VecDeque::new(),
			waiting: HashMap::new(),
			running: None,
			history: VecDeque::new(),
			history_limit,
		}
	}

	pub(crate) fn push(&mut self, task: SyncTask) {
		self.pending.push_back(task);
	}

	/// Take the next pending task and mark it running.
	pub(crate) fn start_next(&mut self) -> Option<SyncTask> {
		let mut task = self.pending.pop_front()?;
		task.status = TaskStatus::Processing;
		self.running = Some(task.clone());
		Some(task)
	}

	/// Park a failed task until its retry delay elapses.
	pub(crate) fn park(&mut self, task: SyncTask) {
		self.running = None;
		self.waiting.insert(task.id.clone(), task);
	}

	/// Move a parked task to the front of the pending queue.
	pub(crate) fn unpark(&mut self, id: &str) {
		if let Some(task) = self.waiting.remove(id) {
			self.pending.push_front(task);
		}
	}

	pub(crate) fn finish(&mut self, task: SyncTask) {
		self.running = None;
		if self.history.len() >= self.history_limit {
			self.history.pop_front();
		}
		self.history.push_back(task);
	}

	pub(crate) fn find(&self, id: &str) -> Option<&SyncTask> {
		self.pending
			.iter()
			.find(|t| t.id == id)
			.or_else(|| self.waiting.get(id))
			.or_else(|| self.running.as_ref().filter(|t| t.id == id))
			.or_else(|| self.history.iter().find(|t| t.id == id))
	}

	/// Pending and parked tasks.
	pub(crate) fn queue_length(&self) -> usize {
		self.pending.len() + self.waiting.len()
	}

	/// Forget finished tasks. Returns how many were dropped.
	pub(crate) fn clear_finished(&mut self) -> usize {
		let cleared = self.history.len();
		self.history.clear();
		cleared
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn task_names_round_trip_through_from_str() {
		for kind in [
			TaskKind::SyncCommunities,
			TaskKind::SyncMemberships,
			TaskKind::SyncQuestions,
			TaskKind::SyncVotes,
			TaskKind::ReconcileConflicts,
			TaskKind::ProcessEvents,
			TaskKind::HealthCheck,
		] {
			assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
		}
		assert!(matches!(
			"sync_everything".parse::<TaskKind>(),
			Err(SyncError::UnknownTask(_))
		));
	}

	#[test]
	fn retried_tasks_jump_the_queue() {
		let mut book = TaskBook::new(10);
		let first = SyncTask::new(TaskKind::SyncVotes, json!({}), 3);
		let second = SyncTask::new(TaskKind::SyncQuestions, json!({}), 3);
		let first_id = first.id.clone();
		book.push(first);
		book.push(second);

		let running = book.start_next().unwrap();
		assert_eq!(book.find(&first_id).unwrap().status, TaskStatus::Processing);
		book.park(running);
		assert_eq!(book.queue_length(), 2);

		book.unpark(&first_id);
		assert_eq!(book.start_next().unwrap().id, first_id);
	}

	#[test]
	fn history_is_bounded() {
		let mut book = TaskBook::new(2);
		let mut ids = Vec::new();
		for _ in 0..3 {
			let mut task = SyncTask::new(TaskKind::HealthCheck, json!({}), 3);
			task.status = TaskStatus::Completed;
			ids.push(task.id.clone());
			book.finish(task);
		}

		assert!(book.find(&ids[0]).is_none());
		assert!(book.find(&ids[2]).is_some());
		assert_eq!(book.clear_finished(), 2);
		assert!(book.find(&ids[2]).is_none());
	}
}
