use super::types::QueuedTransaction;
use crate::error::SyncError;
use std::path::PathBuf;
use tracing::debug;

/// Persistence for transactions that reached a terminal state
#[async_trait::async_trait]
pub trait TransactionRecordRepository: Send + Sync {
	async fn save(&self, transaction: &QueuedTransaction) -> Result<(), SyncError>;
	async fn load(&self, id: &str) -> Result<Option<QueuedTransaction>, SyncError>;
}

/// File-based implementation of TransactionRecordRepository, one JSON file per transaction
pub struct FileTransactionRepository {
	data_dir: PathBuf,
}

impl FileTransactionRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_record_filename(&self, id: &str) -> PathBuf {
		self.data_dir.join(format!("transaction_{}.json", id))
	}
}

#[async_trait::async_trait]
impl TransactionRecordRepository for FileTransactionRepository {
	async fn save(&self, transaction: &QueuedTransaction) -> Result<(), SyncError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		let filename = self.get_record_filename(&transaction.id);
		let content = serde_json::to_string_pretty(transaction)?;
		tokio::fs::write(&filename, content).await?;

		debug!(
			"Saved transaction {} ({:?}) to {:?}",
			transaction.id, transaction.status, filename
		);
		Ok(())
	}

	async fn load(&self, id: &str) -> Result<Option<QueuedTransaction>, SyncError> {
		let filename = self.get_record_filename(id);

		let content = match tokio::fs::read_to_string(&filename).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e.into()),
		};

		Ok(Some(serde_json::from_str(&content)?))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::transaction::types::{Priority, TransactionRequest, TransactionStatus};

	#[tokio::test]
	async fn saved_records_load_back() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileTransactionRepository::new(dir.path().join("transactions"));

		let mut record = QueuedTransaction::new(
			"tx_1".into(),
			TransactionRequest::Custom {
				transaction: "AQID".into(),
			},
			Priority::High,
		);
		record.status = TransactionStatus::Completed;
		record.signature = Some("sig".into());
		repo.save(&record).await.unwrap();

		assert_eq!(repo.load("tx_1").await.unwrap(), Some(record));
		assert_eq!(repo.load("tx_missing").await.unwrap(), None);
	}
}
