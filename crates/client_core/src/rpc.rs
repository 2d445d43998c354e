use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use shared::{
    domain::{Address, Candidate, CandidateId, TxHash, VotingWindow, Winner},
    error::{ContractError, ElectionError},
    protocol::{
        CallRequest, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse, TransactionReceipt,
        USER_REJECTED_CODE,
    },
};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    abi::{self, signatures, RevertReason, Token},
    config::Settings,
    ElectionCall, ElectionContract, RemoteError, RemoteResult, TransactionSender,
};

const INVALID_PARAMS_CODE: i64 = -32602;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcErrorObject),
    #[error("malformed rpc response: {0}")]
    Malformed(String),
}

impl From<RpcError> for RemoteError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Transport(message) => RemoteError::Unavailable(message),
            RpcError::Malformed(message) => RemoteError::Corrupt(message),
            RpcError::Remote(error) => RemoteError::Rejected(classify_rpc_error(&error)),
        }
    }
}

impl From<RpcError> for ElectionError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Transport(message) => ElectionError::NetworkUnavailable(message),
            RpcError::Malformed(message) => ElectionError::Corrupt(message),
            RpcError::Remote(error) => classify_rpc_error(&error),
        }
    }
}

/// Maps a node or wallet error object onto the election error taxonomy,
/// keeping the remote message verbatim.
pub fn classify_rpc_error(error: &JsonRpcErrorObject) -> ElectionError {
    if error.code == USER_REJECTED_CODE {
        return ElectionError::UserDeclined(error.message.clone());
    }

    match error
        .data
        .as_ref()
        .and_then(revert_data)
        .and_then(|data| abi::decode_revert(&data))
    {
        Some(RevertReason::Contract(contract_error)) => {
            return contract_error.into_election_error(&error.message);
        }
        Some(RevertReason::Message(reason)) => {
            let message = if error.message.contains(&reason) {
                error.message.clone()
            } else {
                format!("{}: {reason}", error.message)
            };
            return ElectionError::StateConflict(message);
        }
        Some(RevertReason::Unknown(_)) | None => {}
    }

    if let Some(contract_error) = ContractError::ALL
        .into_iter()
        .find(|e| error.message.contains(e.name()))
    {
        return contract_error.into_election_error(&error.message);
    }

    let lower = error.message.to_ascii_lowercase();
    if lower.contains("user denied") || lower.contains("user rejected") {
        ElectionError::UserDeclined(error.message.clone())
    } else if error.code == INVALID_PARAMS_CODE {
        ElectionError::InvalidInput(error.message.clone())
    } else {
        ElectionError::StateConflict(error.message.clone())
    }
}

/// Nodes nest revert bytes either directly in `data` or one level down.
fn revert_data(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::String(raw) => abi::decode_hex(raw).ok().filter(|data| data.len() >= 4),
        Value::Object(map) => map.get("data").and_then(revert_data),
        _ => None,
    }
}

pub struct JsonRpcTransport {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcTransport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build rpc http client")?;
        Ok(Self {
            http,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> std::result::Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "rpc: request");
        let body: JsonRpcResponse = self
            .http
            .post(&self.url)
            .json(&JsonRpcRequest::new(id, method, params))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(transport_error)?
            .json()
            .await
            .map_err(|err| RpcError::Malformed(format!("{method}: {err}")))?;

        if let Some(error) = body.error {
            debug!(method, id, code = error.code, "rpc: error response");
            return Err(RpcError::Remote(error));
        }
        serde_json::from_value(body.result.unwrap_or(Value::Null))
            .map_err(|err| RpcError::Malformed(format!("{method}: {err}")))
    }
}

fn transport_error(err: reqwest::Error) -> RpcError {
    if err.is_timeout() {
        RpcError::Transport(format!("request timed out: {err}"))
    } else {
        RpcError::Transport(err.to_string())
    }
}

/// The deployed voting contract, reached over Ethereum JSON-RPC.
///
/// Reads go through `eth_call`; writes go through `eth_sendTransaction` from
/// the configured account, leaving signing to the node or wallet behind it.
pub struct JsonRpcElectionContract {
    transport: JsonRpcTransport,
    contract: Address,
    account: Option<Address>,
    receipt_poll_interval: Duration,
    submitted: Mutex<HashMap<TxHash, CallRequest>>,
}

impl JsonRpcElectionContract {
    pub fn new(
        rpc_url: &str,
        contract: Address,
        account: Option<Address>,
        request_timeout: Duration,
        receipt_poll_interval: Duration,
    ) -> Result<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(rpc_url, request_timeout)?,
            contract,
            account,
            receipt_poll_interval,
            submitted: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.rpc_endpoint()?.as_str(),
            settings.contract_address()?,
            settings.account()?,
            settings.request_timeout,
            settings.receipt_poll_interval,
        )
    }

    pub fn contract_address(&self) -> &Address {
        &self.contract
    }

    pub fn account(&self) -> Option<&Address> {
        self.account.as_ref()
    }

    async fn call(&self, signature: &str, tokens: &[Token]) -> RemoteResult<Vec<u8>> {
        let request = CallRequest {
            from: None,
            to: self.contract.clone(),
            data: abi::encode_call(signature, tokens),
        };
        let raw: String = self
            .transport
            .request("eth_call", json!([request, "latest"]))
            .await
            .map_err(|err| {
                warn!(signature, "rpc: query failed: {err}");
                RemoteError::from(err)
            })?;
        Ok(abi::decode_hex(&raw)?)
    }

    async fn revert_reason(
        &self,
        tx_hash: &TxHash,
        call: Option<CallRequest>,
        block_number: Option<String>,
    ) -> ElectionError {
        let fallback = ElectionError::StateConflict(format!("transaction {tx_hash} reverted"));
        let Some(call) = call else {
            return fallback;
        };
        let block = block_number.unwrap_or_else(|| "latest".to_string());
        match self
            .transport
            .request::<String>("eth_call", json!([call, block]))
            .await
        {
            Err(RpcError::Remote(error)) => classify_rpc_error(&error),
            _ => fallback,
        }
    }
}

#[async_trait]
impl ElectionContract for JsonRpcElectionContract {
    async fn admin(&self) -> RemoteResult<Address> {
        let data = self.call(signatures::GET_ADMIN, &[]).await?;
        Ok(abi::decode_address(&data)?)
    }

    async fn all_candidates(&self) -> RemoteResult<Vec<Candidate>> {
        let data = self.call(signatures::GET_ALL_CANDIDATES, &[]).await?;
        Ok(abi::decode_candidates(&data)?)
    }

    async fn candidate(&self, id: CandidateId) -> RemoteResult<Candidate> {
        let data = self
            .call(signatures::GET_CANDIDATE, &[Token::Uint(id.0)])
            .await?;
        Ok(abi::decode_candidate(&data)?)
    }

    async fn candidate_count(&self) -> RemoteResult<u64> {
        let data = self.call(signatures::GET_CANDIDATE_COUNT, &[]).await?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn remaining_time(&self) -> RemoteResult<u64> {
        let data = self.call(signatures::GET_REMAINING_TIME, &[]).await?;
        Ok(abi::decode_uint(&data)?)
    }

    async fn voting_status(&self) -> RemoteResult<bool> {
        let data = self.call(signatures::GET_VOTING_STATUS, &[]).await?;
        Ok(abi::decode_bool(&data)?)
    }

    async fn voting_window(&self) -> RemoteResult<VotingWindow> {
        let data = self.call(signatures::GET_VOTING_TIMES, &[]).await?;
        let (start, end) = abi::decode_uint_pair(&data)?;
        Ok(VotingWindow { start, end })
    }

    async fn winner(&self) -> RemoteResult<Winner> {
        let data = self.call(signatures::GET_WINNER, &[]).await?;
        let (candidate_id, vote_count) = abi::decode_uint_pair(&data)?;
        Ok(Winner {
            candidate_id: CandidateId(candidate_id),
            vote_count,
        })
    }

    async fn has_voted(&self, voter: &Address) -> RemoteResult<bool> {
        let data = self
            .call(signatures::HAS_VOTED, &[Token::Address(voter.clone())])
            .await?;
        Ok(abi::decode_bool(&data)?)
    }
}

#[async_trait]
impl TransactionSender for JsonRpcElectionContract {
    async fn submit(&self, call: &ElectionCall) -> std::result::Result<TxHash, ElectionError> {
        let from = self.account.clone().ok_or_else(|| {
            ElectionError::Validation("no sending account configured".to_string())
        })?;
        let request = CallRequest {
            from: Some(from),
            to: self.contract.clone(),
            data: abi::encode_election_call(call),
        };
        info!(call = %call, "tx: handing request to signer");
        let tx_hash: TxHash = self
            .transport
            .request("eth_sendTransaction", json!([request]))
            .await?;
        self.submitted
            .lock()
            .await
            .insert(tx_hash.clone(), request);
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(&self, tx_hash: &TxHash) -> std::result::Result<(), ElectionError> {
        loop {
            let receipt: Option<TransactionReceipt> = self
                .transport
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            let Some(receipt) = receipt else {
                debug!(tx_hash = %tx_hash, "tx: receipt not yet available");
                tokio::time::sleep(self.receipt_poll_interval).await;
                continue;
            };

            let call = self.submitted.lock().await.remove(tx_hash);
            if receipt.succeeded() {
                return Ok(());
            }
            warn!(tx_hash = %tx_hash, "tx: receipt reports revert");
            return Err(self
                .revert_reason(tx_hash, call, receipt.block_number)
                .await);
        }
    }
}

#[cfg(test)]
#[path = "tests/rpc_tests.rs"]
mod tests;
