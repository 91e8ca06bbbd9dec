//! Audit trail sink.

use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditLevel {
	Info,
	Warn,
	Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditCategory {
	Sync,
	Blockchain,
	Reconciliation,
	Worker,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
	pub level: AuditLevel,
	pub category: AuditCategory,
	pub details: Value,
}

impl AuditEntry {
	pub fn info(category: AuditCategory, details: Value) -> Self {
		Self {
			level: AuditLevel::Info,
			category,
			details,
		}
	}

	pub fn warn(category: AuditCategory, details: Value) -> Self {
		Self {
			level: AuditLevel::Warn,
			category,
			details,
		}
	}

	pub fn error(category: AuditCategory, details: Value) -> Self {
		Self {
			level: AuditLevel::Error,
			category,
			details,
		}
	}
}

/// Fire-and-forget audit log. Implementations must not block and must swallow their own failures.
pub trait AuditSink: Send + Sync {
	fn log(&self, event: &str, entry: AuditEntry);
}

/// Emits audit entries as tracing events on the `audit` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
	fn log(&self, event: &str, entry: AuditEntry) {
		let category = format!("{:?}", entry.category).to_uppercase();
		match entry.level {
			AuditLevel::Info => {
				info!(target: "audit", event, category = %category, details = %entry.details)
			}
			AuditLevel::Warn => {
				warn!(target: "audit", event, category = %category, details = %entry.details)
			}
			AuditLevel::Error => {
				error!(target: "audit", event, category = %category, details = %entry.details)
			}
		}
	}
}
