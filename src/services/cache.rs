//! Best-effort key/value cache with per-entry TTL.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
	#[error("Cache unavailable: {0}")]
	Unavailable(String),
}

/// Callers treat every error as a miss.
#[async_trait]
pub trait Cache: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;
	async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;
	async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Process-local cache. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
	entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl MemoryCache {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl Cache for MemoryCache {
	async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
		let mut entries = self.entries.lock().await;
		match entries.get(key) {
			Some((_, expires_at)) if *expires_at <= Instant::now() => {
				entries.remove(key);
				Ok(None)
			}
			Some((value, _)) => Ok(Some(value.clone())),
			None => Ok(None),
		}
	}

	async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
		self.entries
			.lock()
			.await
			.insert(key.to_string(), (value, Instant::now() + ttl));
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), CacheError> {
		self.entries.lock().await.remove(key);
		Ok(())
	}
}
