//!
//! JSON-RPC client for the voting program.
//!
//! Reads go through the node's HTTP JSON-RPC endpoint, program events arrive over a `logsSubscribe`
//! websocket subscription, and unsigned program instructions are handed to a relay service that
//! signs and sends them.

use super::ChainClient;
use super::types::*;
use async_trait::async_trait;
use backoff::{ExponentialBackoff, future::retry};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Prefix of program log lines carrying a JSON encoded event
const EVENT_LOG_PREFIX: &str = "Program log: EVENT:";

/// Offsets of the two parent keys in membership and vote accounts, after the 8 byte discriminator
const FIRST_PARENT_OFFSET: usize = 8;
const SECOND_PARENT_OFFSET: usize = 40;

/// JSON-RPC client for one network
#[derive(Clone)]
pub struct RpcChainClient {
	http_client: Client,
	rpc_url: String,
	ws_url: String,
	network: String,
	program_id: String,
	/// Relay accepting `TransactionPayload::Program` submissions
	relay_url: Option<String>,
	next_request_id: Arc<AtomicU64>,
	next_subscription_id: Arc<AtomicU64>,
	subscriptions: Arc<Mutex<HashMap<SubscriptionId, CancellationToken>>>,
}

impl RpcChainClient {
	/// Create a client for one network. No request is made until `connect`.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP JSON-RPC endpoint.
	/// * `ws_url` - The WebSocket endpoint for log subscriptions.
	/// * `network` - Network name stamped on every event.
	/// * `program_id` - Program whose accounts hold the projected entities.
	/// * `relay_url` - Optional relay accepting program instructions for signing.
	///
	/// # Errors
	/// Returns a `ChainError` if the HTTP client cannot be built.
	pub fn new(
		rpc_url: String,
		ws_url: String,
		network: String,
		program_id: String,
		relay_url: Option<String>,
	) -> Result<Self, ChainError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			ws_url,
			network,
			program_id,
			relay_url,
			next_request_id: Arc::new(AtomicU64::new(1)),
			next_subscription_id: Arc::new(AtomicU64::new(1)),
			subscriptions: Arc::new(Mutex::new(HashMap::new())),
		})
	}

	/// Execute a JSON-RPC call and return its `result`.
	///
	/// Transport failures that classify as retryable are retried with exponential backoff. Errors
	/// reported by the node itself are returned as-is; resending the same request would not help.
	async fn rpc_call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
		let backoff = ExponentialBackoff {
			max_elapsed_time: Some(Duration::from_secs(10)),
			..ExponentialBackoff::default()
		};

		retry(backoff, || async {
			let request_body = json!({
				"jsonrpc": "2.0",
				"id": self.next_request_id.fetch_add(1, Ordering::Relaxed),
				"method": method,
				"params": params.clone(),
			});

			let response = self
				.http_client
				.post(&self.rpc_url)
				.json(&request_body)
				.send()
				.await
				.map_err(|e| classify_transport(ChainError::from(e)))?;

			if !response.status().is_success() {
				let status = response.status();
				let err = ChainError::Network(format!("HTTP error: {}", status));
				return Err(if status.is_server_error() {
					backoff::Error::transient(err)
				} else {
					backoff::Error::permanent(err)
				});
			}

			let body: Value = response
				.json()
				.await
				.map_err(|e| backoff::Error::permanent(ChainError::from(e)))?;

			if let Some(rpc_error) = body.get("error") {
				debug!("RPC {} failed: {}", method, rpc_error);
				return Err(backoff::Error::permanent(map_rpc_error(rpc_error)));
			}

			match body.get("result") {
				Some(result) => Ok::<Value, backoff::Error<ChainError>>(result.clone()),
				None => Err(backoff::Error::permanent(ChainError::Decode(
					"missing result".into(),
				))),
			}
		})
		.await
	}

	async fn account_info(&self, address: &str) -> Result<Option<Value>, ChainError> {
		let result = self
			.rpc_call(
				"getAccountInfo",
				json!([address, { "encoding": "jsonParsed", "commitment": "confirmed" }]),
			)
			.await?;

		match result.get("value") {
			Some(Value::Null) | None => Ok(None),
			Some(value) => Ok(Some(value.clone())),
		}
	}

	/// First program account whose two parent keys match.
	async fn join_account(&self, first: &str, second: &str) -> Result<Option<Value>, ChainError> {
		let result = self
			.rpc_call(
				"getProgramAccounts",
				json!([
					self.program_id,
					{
						"encoding": "jsonParsed",
						"commitment": "confirmed",
						"filters": [
							{ "memcmp": { "offset": FIRST_PARENT_OFFSET, "bytes": first } },
							{ "memcmp": { "offset": SECOND_PARENT_OFFSET, "bytes": second } }
						]
					}
				]),
			)
			.await?;

		let accounts = result
			.as_array()
			.ok_or_else(|| ChainError::Decode("getProgramAccounts did not return a list".into()))?;

		Ok(accounts.first().and_then(|a| a.get("account")).cloned())
	}

	async fn send_to_relay(&self, payload: &TransactionPayload) -> Result<Submission, ChainError> {
		let relay_url = self.relay_url.as_ref().ok_or_else(|| {
			ChainError::Unsupported("program instructions need a transaction relay".into())
		})?;

		let response = self
			.http_client
			.post(format!("{}/transactions", relay_url.trim_end_matches('/')))
			.json(payload)
			.send()
			.await?;

		let status = response.status();
		let body: Value = response.json().await?;

		if let Some(rpc_error) = body.get("error") {
			return Err(map_rpc_error(rpc_error));
		}
		if !status.is_success() {
			let message = format!("relay returned {}", status);
			return Err(if status.is_server_error() {
				ChainError::Network(message)
			} else {
				ChainError::Rejected(message)
			});
		}

		Ok(serde_json::from_value(body)?)
	}
}

fn classify_transport(e: ChainError) -> backoff::Error<ChainError> {
	if e.is_retryable() {
		backoff::Error::transient(e)
	} else {
		backoff::Error::permanent(e)
	}
}

/// Map a JSON-RPC error object to the typed taxonomy using its code and `data.err` tag.
fn map_rpc_error(rpc_error: &Value) -> ChainError {
	let code = rpc_error.get("code").and_then(Value::as_i64).unwrap_or_default();
	let message = rpc_error
		.get("message")
		.and_then(Value::as_str)
		.unwrap_or("unknown RPC error")
		.to_string();

	match code {
		// Preflight simulation failure; the reason is a structured TransactionError
		-32002 => {
			let err = rpc_error.get("data").and_then(|d| d.get("err"));
			let tag = match err {
				Some(Value::String(tag)) => Some(tag.as_str()),
				Some(Value::Object(map)) => map.keys().next().map(String::as_str),
				_ => None,
			};
			match tag {
				Some("BlockhashNotFound") => ChainError::BlockhashExpired(message),
				Some("InsufficientFundsForFee") | Some("InsufficientFundsForRent") => {
					ChainError::InsufficientFunds(message)
				}
				_ => ChainError::Rejected(message),
			}
		}
		-32003 => ChainError::InvalidSignature(message),
		// Node is behind or unhealthy
		-32005 => ChainError::Network(message),
		-32602 => ChainError::Decode(message),
		_ => ChainError::Rejected(message),
	}
}

/// `data.parsed.info` of a jsonParsed account.
fn parsed_info(account: &Value) -> Result<Value, ChainError> {
	account
		.get("data")
		.and_then(|d| d.get("parsed"))
		.and_then(|p| p.get("info"))
		.cloned()
		.ok_or_else(|| ChainError::Decode("account data is not parsed".into()))
}

/// Extract program events from a `logsNotification` message.
fn parse_log_events(message: &Value, network: &str) -> Vec<ChainEvent> {
	if message.get("method").and_then(Value::as_str) != Some("logsNotification") {
		return Vec::new();
	}
	let Some(result) = message.get("params").and_then(|p| p.get("result")) else {
		return Vec::new();
	};
	let slot = result
		.get("context")
		.and_then(|c| c.get("slot"))
		.and_then(Value::as_u64)
		.unwrap_or_default();
	let Some(value) = result.get("value") else {
		return Vec::new();
	};
	// Failed transactions leave no state behind
	if value.get("err").is_some_and(|e| !e.is_null()) {
		return Vec::new();
	}
	let signature = value
		.get("signature")
		.and_then(Value::as_str)
		.unwrap_or_default();

	value
		.get("logs")
		.and_then(Value::as_array)
		.into_iter()
		.flatten()
		.filter_map(Value::as_str)
		.filter_map(|line| line.strip_prefix(EVENT_LOG_PREFIX))
		.filter_map(|raw| match serde_json::from_str::<Value>(raw.trim()) {
			Ok(parsed) => Some(parsed),
			Err(e) => {
				warn!("Skipping malformed program event in {}: {}", signature, e);
				None
			}
		})
		.filter_map(|parsed| {
			let event_type = parsed.get("type").and_then(Value::as_str)?.to_string();
			let data = parsed.get("data").cloned().unwrap_or(Value::Null);
			Some(
				ChainEvent::new(event_type, data)
					.on_network(network)
					.with_tx(signature, slot),
			)
		})
		.collect()
}

#[async_trait]
impl ChainClient for RpcChainClient {
	async fn connect(&self, network: &str) -> Result<ChainConnection, ChainError> {
		if network != self.network {
			return Err(ChainError::Unsupported(format!(
				"client is configured for {}, not {}",
				self.network, network
			)));
		}

		let result = self.rpc_call("getVersion", json!([])).await?;
		let node_version = result
			.get("solana-core")
			.and_then(Value::as_str)
			.unwrap_or("unknown")
			.to_string();
		info!("Connected to {} node {} at {}", self.network, node_version, self.rpc_url);

		Ok(ChainConnection {
			network: self.network.clone(),
			node_version,
		})
	}

	async fn subscribe_account_changes(
		&self,
		program_id: &str,
		sink: mpsc::Sender<ChainEvent>,
	) -> Result<SubscriptionId, ChainError> {
		debug!("Attempting WebSocket connection to: {}", self.ws_url);

		let (ws_stream, response) = connect_async(self.ws_url.as_str()).await?;
		debug!(
			"WebSocket connection established, response status: {}",
			response.status()
		);
		let (mut ws_sender, mut ws_receiver) = ws_stream.split();

		let subscribe_message = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": "logsSubscribe",
			"params": [{ "mentions": [program_id] }, { "commitment": "confirmed" }]
		});
		ws_sender
			.send(Message::Text(subscribe_message.to_string()))
			.await?;

		let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);
		let token = CancellationToken::new();
		self.subscriptions.lock().await.insert(id, token.clone());

		let network = self.network.clone();
		let subscriptions = self.subscriptions.clone();
		tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = token.cancelled() => {
						debug!("Subscription {} cancelled", id);
						let _ = ws_sender.send(Message::Close(None)).await;
						break;
					}
					msg = ws_receiver.next() => {
						let text = match msg {
							Some(Ok(Message::Text(text))) => text,
							Some(Ok(Message::Ping(payload))) => {
								let _ = ws_sender.send(Message::Pong(payload)).await;
								continue;
							}
							Some(Ok(_)) => continue,
							Some(Err(e)) => {
								error!("Subscription {} failed: {}", id, e);
								break;
							}
							None => {
								warn!("Subscription {} closed by the node", id);
								break;
							}
						};
						let parsed = match serde_json::from_str::<Value>(&text) {
							Ok(parsed) => parsed,
							Err(e) => {
								warn!("Ignoring undecodable subscription message: {}", e);
								continue;
							}
						};
						for event in parse_log_events(&parsed, &network) {
							if sink.send(event).await.is_err() {
								debug!("Event receiver dropped, ending subscription {}", id);
								subscriptions.lock().await.remove(&id);
								return;
							}
						}
					}
				}
			}
			subscriptions.lock().await.remove(&id);
		});

		info!("Subscribed to program {} on {} (#{})", program_id, self.network, id);
		Ok(id)
	}

	async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), ChainError> {
		if let Some(token) = self.subscriptions.lock().await.remove(&id) {
			token.cancel();
			info!("Unsubscribed #{} on {}", id, self.network);
		}
		Ok(())
	}

	async fn get_entity_snapshot(
		&self,
		key: &EntityKey,
	) -> Result<Option<EntitySnapshot>, ChainError> {
		let snapshot = match key {
			EntityKey::Community { address } => match self.account_info(address).await? {
				Some(account) => Some(EntitySnapshot::Community(serde_json::from_value(
					parsed_info(&account)?,
				)?)),
				None => None,
			},
			EntityKey::Question { address } => match self.account_info(address).await? {
				Some(account) => Some(EntitySnapshot::Question(serde_json::from_value(
					parsed_info(&account)?,
				)?)),
				None => None,
			},
			EntityKey::Membership { community, member } => {
				match self.join_account(community, member).await? {
					Some(account) => Some(EntitySnapshot::Membership(serde_json::from_value(
						parsed_info(&account)?,
					)?)),
					None => None,
				}
			}
			EntityKey::Vote { question, voter } => match self.join_account(question, voter).await? {
				Some(account) => Some(EntitySnapshot::Vote(serde_json::from_value(
					parsed_info(&account)?,
				)?)),
				None => None,
			},
			EntityKey::Account { address } => match self.account_info(address).await? {
				Some(account) => {
					let lamports = account
						.get("lamports")
						.and_then(Value::as_u64)
						.unwrap_or_default();
					Some(EntitySnapshot::Account(AccountSnapshot { lamports }))
				}
				None => None,
			},
		};

		Ok(snapshot)
	}

	async fn submit_transaction(
		&self,
		payload: &TransactionPayload,
	) -> Result<Submission, ChainError> {
		match payload {
			TransactionPayload::Signed { transaction } => {
				let result = self
					.rpc_call(
						"sendTransaction",
						json!([
							transaction,
							{ "encoding": "base64", "preflightCommitment": "confirmed" }
						]),
					)
					.await?;
				let signature = result
					.as_str()
					.ok_or_else(|| ChainError::Decode("signature is not a string".into()))?
					.to_string();
				Ok(Submission { signature })
			}
			TransactionPayload::Program { .. } => self.send_to_relay(payload).await,
		}
	}

	async fn get_latest_blockhash(&self) -> Result<String, ChainError> {
		let result = self
			.rpc_call("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
			.await?;

		result
			.get("value")
			.and_then(|v| v.get("blockhash"))
			.and_then(Value::as_str)
			.map(str::to_string)
			.ok_or_else(|| ChainError::Decode("missing blockhash".into()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rpc_errors_map_by_code_and_tag() {
		let expired = json!({
			"code": -32002,
			"message": "Transaction simulation failed",
			"data": { "err": "BlockhashNotFound" }
		});
		assert!(matches!(map_rpc_error(&expired), ChainError::BlockhashExpired(_)));

		let funds = json!({
			"code": -32002,
			"message": "Transaction simulation failed",
			"data": { "err": { "InsufficientFundsForRent": { "account_index": 0 } } }
		});
		assert!(matches!(map_rpc_error(&funds), ChainError::InsufficientFunds(_)));

		let program = json!({
			"code": -32002,
			"message": "Transaction simulation failed",
			"data": { "err": { "InstructionError": [0, { "Custom": 6001 }] } }
		});
		assert!(matches!(map_rpc_error(&program), ChainError::Rejected(_)));

		let signature = json!({ "code": -32003, "message": "signature verification failure" });
		assert!(matches!(map_rpc_error(&signature), ChainError::InvalidSignature(_)));

		let unhealthy = json!({ "code": -32005, "message": "Node is behind" });
		assert!(map_rpc_error(&unhealthy).is_retryable());
	}

	#[test]
	fn log_notifications_yield_program_events() {
		let notification = json!({
			"jsonrpc": "2.0",
			"method": "logsNotification",
			"params": {
				"result": {
					"context": { "slot": 5208469 },
					"value": {
						"signature": "5h6x",
						"err": null,
						"logs": [
							"Program 11111111111111111111111111111111 invoke [1]",
							"Program log: EVENT:{\"type\":\"CommunityCreated\",\"data\":{\"communityId\":\"C1\"}}",
							"Program log: EVENT:not json",
							"Program 11111111111111111111111111111111 success"
						]
					}
				},
				"subscription": 24040
			}
		});

		let events = parse_log_events(&notification, "devnet");
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].event_type, "CommunityCreated");
		assert_eq!(events[0].payload["communityId"], "C1");
		assert_eq!(events[0].tx_id.as_deref(), Some("5h6x"));
		assert_eq!(events[0].block_number, Some(5208469));
		assert_eq!(events[0].network, "devnet");
	}

	#[test]
	fn failed_transactions_are_ignored() {
		let notification = json!({
			"method": "logsNotification",
			"params": { "result": {
				"context": { "slot": 1 },
				"value": {
					"signature": "x",
					"err": { "InstructionError": [0, "InvalidArgument"] },
					"logs": ["Program log: EVENT:{\"type\":\"VoteCast\",\"data\":{}}"]
				}
			}}
		});
		assert!(parse_log_events(&notification, "devnet").is_empty());
	}

	#[tokio::test]
	async fn connecting_to_another_network_is_refused() {
		let client = RpcChainClient::new(
			"http://127.0.0.1:1".into(),
			"ws://127.0.0.1:1".into(),
			"devnet".into(),
			"Prog".into(),
			None,
		)
		.unwrap();
		assert!(matches!(
			client.connect("mainnet-beta").await,
			Err(ChainError::Unsupported(_))
		));
	}

	#[tokio::test]
	async fn program_payloads_need_a_relay() {
		let client = RpcChainClient::new(
			"http://127.0.0.1:1".into(),
			"ws://127.0.0.1:1".into(),
			"devnet".into(),
			"Prog".into(),
			None,
		)
		.unwrap();
		let payload = TransactionPayload::Program {
			instruction: "cast_vote".into(),
			accounts: vec![],
			args: json!({}),
			recent_blockhash: "hash".into(),
		};
		assert!(matches!(
			client.submit_transaction(&payload).await,
			Err(ChainError::Unsupported(_))
		));
	}
}
