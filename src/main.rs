mod chain;
mod config;
mod error;
mod service;
mod services;
mod store;
mod sync;
#[cfg(test)]
mod testing;
mod transaction;
mod utils;
mod worker;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::chain::RpcChainClient;
use crate::config::SyncConfig;
use crate::service::SyncService;
use crate::services::{MemoryCache, TracingAuditSink};
use crate::store::InMemoryStore;
use crate::transaction::FileTransactionRepository;
use crate::utils::Ticker;

/// How often terminal transaction records are pruned from memory
const TRANSACTION_CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main(flavor = "current_thread")]
async fn main() {
	// Initialize tracing subscriber with debug logging for the sync core
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("chain_projection_sync=debug".parse().unwrap())
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting chain projection sync service");
	let config = SyncConfig::from_env();

	let chain = match RpcChainClient::new(
		config.chain.rpc_url.clone(),
		config.chain.ws_url.clone(),
		config.chain.network.clone(),
		config.chain.program_id.clone(),
		config.chain.relay_url.clone(),
	) {
		Ok(client) => Arc::new(client),
		Err(e) => {
			error!("Failed to create chain client: {}", e);
			return;
		}
	};

	info!("Created chain client for {}", config.chain.network);

	let service = Arc::new(SyncService::new(
		&config,
		chain,
		Arc::new(InMemoryStore::new()),
		Arc::new(MemoryCache::new()),
		Arc::new(TracingAuditSink),
		Arc::new(FileTransactionRepository::new(
			config.data_dir.join("transactions"),
		)),
	));

	if let Err(e) = service.start().await {
		error!("Failed to start sync service: {}", e);
		return;
	}
	service.schedule_periodic_tasks().await;

	let shutdown = CancellationToken::new();
	let cleanup_service = service.clone();
	let _cleanup = Ticker::spawn(
		"transaction-cleanup",
		TRANSACTION_CLEANUP_INTERVAL,
		false,
		&shutdown,
		move || {
			let service = cleanup_service.clone();
			async move {
				service.clear_old_transactions().await;
			}
		},
	);

	info!("Sync service running, press Ctrl-C to stop");
	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for shutdown signal: {}", e);
	}

	shutdown.cancel();
	service.stop().await;
	info!("Shutdown complete");
}
