//! Collaborators injected into the sync core: audit trail and cache.

mod audit;
mod cache;

pub use audit::{AuditCategory, AuditEntry, AuditSink, TracingAuditSink};
pub use cache::{Cache, MemoryCache};
