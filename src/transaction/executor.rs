//! Turns a `TransactionRequest` into a chain submission.

use super::types::TransactionRequest;
use crate::chain::{ChainClient, ChainError, TransactionPayload};
use serde_json::json;
use tracing::debug;

/// Result of one submission attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
	Success { signature: String },
	Failure { error: String, retryable: bool },
}

impl From<Result<String, ChainError>> for ExecutionOutcome {
	fn from(result: Result<String, ChainError>) -> Self {
		match result {
			Ok(signature) => ExecutionOutcome::Success { signature },
			Err(e) => ExecutionOutcome::Failure {
				retryable: e.is_retryable(),
				error: e.to_string(),
			},
		}
	}
}

/// Submit `request` once.
pub async fn execute(chain: &dyn ChainClient, request: &TransactionRequest) -> ExecutionOutcome {
	submit(chain, request).await.into()
}

async fn submit(chain: &dyn ChainClient, request: &TransactionRequest) -> Result<String, ChainError> {
	let payload = match request {
		TransactionRequest::Custom { transaction } => TransactionPayload::Signed {
			transaction: transaction.clone(),
		},
		_ => {
			let recent_blockhash = chain.get_latest_blockhash().await?;
			let (accounts, args) = instruction_args(request);
			TransactionPayload::Program {
				instruction: request.kind().to_string(),
				accounts,
				args,
				recent_blockhash,
			}
		}
	};

	debug!("Submitting {} transaction", request);
	let submission = chain.submit_transaction(&payload).await?;
	Ok(submission.signature)
}

/// Signer first, then the accounts the instruction touches.
fn instruction_args(request: &TransactionRequest) -> (Vec<String>, serde_json::Value) {
	match request {
		TransactionRequest::CreateCommunity {
			admin_wallet,
			name,
			description,
			config,
		} => (
			vec![admin_wallet.clone()],
			json!({ "name": name, "description": description, "config": config }),
		),
		TransactionRequest::JoinCommunity {
			user_wallet,
			community_address,
		} => (
			vec![user_wallet.clone(), community_address.clone()],
			json!({}),
		),
		TransactionRequest::CreateQuestion {
			admin_wallet,
			community_address,
			title,
			description,
			options,
			deadline,
		} => (
			vec![admin_wallet.clone(), community_address.clone()],
			json!({
				"title": title,
				"description": description,
				"options": options,
				"deadline": deadline.timestamp_millis(),
			}),
		),
		TransactionRequest::CastVote {
			user_wallet,
			question_address,
			vote_data,
		} => (
			vec![user_wallet.clone(), question_address.clone()],
			json!({ "voteData": vote_data }),
		),
		TransactionRequest::Custom { .. } => (Vec::new(), json!({})),
	}
}
