//! State registry client over Ethereum JSON-RPC
//!
//! Reads the identity state contract with `eth_call`. Any HTTP, JSON-RPC or
//! ABI decoding failure is reported as a [`RegistryError`]: the registry could
//! not be read, which callers treat as retryable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use zk_auth_verifier::{RegistryError, StateRegistry, TransitionInfo};

/// `getState(uint256)`
pub const GET_STATE_SELECTOR: [u8; 4] = [0x44, 0xc9, 0xaf, 0x28];
/// `getTransitionInfo(uint256)`
pub const GET_TRANSITION_INFO_SELECTOR: [u8; 4] = [0xbb, 0x79, 0x57, 0x15];

const WORD: usize = 32;

#[derive(Debug, Serialize)]
struct RpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct EthStateRegistry {
    client: reqwest::Client,
    rpc_url: String,
    contract: String,
    next_id: AtomicU64,
}

impl EthStateRegistry {
    pub fn new(
        rpc_url: impl Into<String>,
        contract: [u8; 20],
        timeout: Duration,
    ) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            contract: format!("0x{}", hex::encode(contract)),
            next_id: AtomicU64::new(1),
        })
    }

    /// `eth_call` against the latest block; returns the raw return data.
    async fn call(&self, selector: [u8; 4], arg: &BigUint) -> Result<Vec<u8>, RegistryError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: "eth_call",
            params: json!([
                { "to": self.contract, "data": encode_call(selector, arg)? },
                "latest"
            ]),
        };

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RegistryError(format!("eth_call: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError(format!("eth_call: HTTP {status}")));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| RegistryError(format!("eth_call: invalid response: {e}")))?;
        if let Some(err) = body.error {
            return Err(RegistryError(format!(
                "eth_call: rpc error {}: {}",
                err.code, err.message
            )));
        }
        let result = body
            .result
            .ok_or_else(|| RegistryError("eth_call: response has no result".into()))?;
        decode_hex(&result)
    }
}

#[async_trait]
impl StateRegistry for EthStateRegistry {
    #[instrument(skip(self), fields(contract = %self.contract))]
    async fn latest_state(&self, id: &BigUint) -> Result<BigUint, RegistryError> {
        let data = self.call(GET_STATE_SELECTOR, id).await?;
        let words = words(&data, 1)?;
        let state = BigUint::from_bytes_be(&words[0]);
        debug!(%state, "latest state");
        Ok(state)
    }

    #[instrument(skip(self), fields(contract = %self.contract))]
    async fn transition_info(&self, state: &BigUint) -> Result<TransitionInfo, RegistryError> {
        let data = self.call(GET_TRANSITION_INFO_SELECTOR, state).await?;
        let w = words(&data, 6)?;
        Ok(TransitionInfo {
            replaced_at_timestamp: word_u64(&w[0])?,
            created_at_timestamp: word_u64(&w[1])?,
            replaced_at_block: word_u64(&w[2])?,
            created_at_block: word_u64(&w[3])?,
            replaced_by: BigUint::from_bytes_be(&w[4]),
            id: BigUint::from_bytes_be(&w[5]),
        })
    }
}

/// Calldata for a single `uint256` argument.
fn encode_call(selector: [u8; 4], arg: &BigUint) -> Result<String, RegistryError> {
    let be = arg.to_bytes_be();
    if be.len() > WORD {
        return Err(RegistryError(format!(
            "argument needs {} bytes, uint256 holds {WORD}",
            be.len()
        )));
    }
    let mut data = Vec::with_capacity(4 + WORD);
    data.extend_from_slice(&selector);
    data.resize(4 + WORD - be.len(), 0);
    data.extend_from_slice(&be);
    Ok(format!("0x{}", hex::encode(data)))
}

fn decode_hex(s: &str) -> Result<Vec<u8>, RegistryError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(digits).map_err(|e| RegistryError(format!("eth_call: invalid hex result: {e}")))
}

fn words(data: &[u8], count: usize) -> Result<Vec<[u8; WORD]>, RegistryError> {
    if data.len() < count * WORD {
        return Err(RegistryError(format!(
            "eth_call: expected {} bytes of return data, got {} (is the contract deployed?)",
            count * WORD,
            data.len()
        )));
    }
    Ok(data
        .chunks_exact(WORD)
        .take(count)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

fn word_u64(word: &[u8; WORD]) -> Result<u64, RegistryError> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(RegistryError("eth_call: value does not fit in uint64".into()));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(tail))
}
