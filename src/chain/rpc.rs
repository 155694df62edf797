//! JSON-RPC `eth_call` client for the ENS registrar contracts.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::ChainClient;
use crate::config::ChainConfig;
use crate::domain::commitment::{keccak256, labelhash, parse_bytes32, to_hex};
use crate::error::GatewayError;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: (CallParams<'a>, &'static str),
}

#[derive(Debug, Serialize)]
struct CallParams<'a> {
    to: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<String>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Outcome of one `eth_call`.
enum CallResult {
    Word([u8; 32]),
    Reverted,
}

/// `eth_call` client against one RPC endpoint.
#[derive(Debug, Clone)]
pub struct JsonRpcChainClient {
    client: reqwest::Client,
    rpc_url: String,
    controller: String,
    base_registrar: String,
}

impl JsonRpcChainClient {
    /// Builds the client with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the HTTP client cannot be built.
    pub fn new(config: &ChainConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc_timeout_secs))
            .build()
            .map_err(|e| GatewayError::Internal(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            controller: config.controller_address.clone(),
            base_registrar: config.base_registrar_address.clone(),
        })
    }

    async fn call(&self, to: &str, data: Vec<u8>) -> Result<CallResult, GatewayError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method: "eth_call",
            params: (
                CallParams {
                    to,
                    data: to_hex(&data),
                },
                "latest",
            ),
        };
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Upstream("chain rpc timed out".to_string())
                } else {
                    GatewayError::Upstream(format!("chain rpc request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Upstream(format!("chain rpc HTTP error: {status}")));
        }
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Upstream(format!("invalid chain rpc response: {e}")))?;

        if let Some(error) = body.error {
            if error.message.to_ascii_lowercase().contains("revert") {
                return Ok(CallResult::Reverted);
            }
            return Err(GatewayError::Upstream(format!(
                "chain rpc error {}: {}",
                error.code, error.message
            )));
        }
        let result = body
            .result
            .ok_or_else(|| GatewayError::Upstream("missing result in chain rpc response".to_string()))?;
        if result == "0x" {
            return Ok(CallResult::Reverted);
        }
        first_word(&result).map(CallResult::Word)
    }

    async fn call_word(&self, to: &str, data: Vec<u8>, what: &str) -> Result<[u8; 32], GatewayError> {
        match self.call(to, data).await? {
            CallResult::Word(word) => Ok(word),
            CallResult::Reverted => Err(GatewayError::Upstream(format!("{what} reverted"))),
        }
    }
}

/// First four bytes of `keccak256(signature)`.
fn selector(signature: &str) -> [u8; 4] {
    let [a, b, c, d, ..] = keccak256(signature.as_bytes());
    [a, b, c, d]
}

fn encode_call(signature: &str, arg: Option<&[u8; 32]>) -> Vec<u8> {
    let mut data = selector(signature).to_vec();
    if let Some(arg) = arg {
        data.extend_from_slice(arg);
    }
    data
}

fn first_word(hex_result: &str) -> Result<[u8; 32], GatewayError> {
    let body = hex_result.trim_start_matches("0x");
    let word = body
        .get(..64)
        .ok_or_else(|| GatewayError::Upstream(format!("short eth_call result: {hex_result}")))?;
    let mut out = [0u8; 32];
    hex::decode_to_slice(word, &mut out)
        .map_err(|e| GatewayError::Upstream(format!("invalid eth_call result: {e}")))?;
    Ok(out)
}

/// Decodes a uint256 word that must fit in a `u64`.
fn word_to_u64(word: &[u8; 32]) -> Result<u64, GatewayError> {
    let (high, low) = word.split_at(24);
    if high.iter().any(|b| *b != 0) {
        return Err(GatewayError::Upstream("uint256 value exceeds u64".to_string()));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(low);
    Ok(u64::from_be_bytes(bytes))
}

fn word_to_address(word: &[u8; 32]) -> String {
    let (_, address) = word.split_at(12);
    to_hex(address)
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn commitment_timestamp(&self, commitment: &str) -> Result<u64, GatewayError> {
        let commitment = parse_bytes32(commitment)?;
        let data = encode_call("commitments(bytes32)", Some(&commitment));
        let word = self.call_word(&self.controller, data, "commitments").await?;
        word_to_u64(&word)
    }

    async fn name_expires(&self, label: &str) -> Result<u64, GatewayError> {
        let data = encode_call("nameExpires(uint256)", Some(&labelhash(label)));
        let word = self.call_word(&self.base_registrar, data, "nameExpires").await?;
        word_to_u64(&word)
    }

    async fn owner_of(&self, label: &str) -> Result<Option<String>, GatewayError> {
        let data = encode_call("ownerOf(uint256)", Some(&labelhash(label)));
        match self.call(&self.base_registrar, data).await? {
            CallResult::Reverted => Ok(None),
            CallResult::Word(word) => {
                let owner = word_to_address(&word);
                Ok((word != [0u8; 32]).then_some(owner))
            }
        }
    }

    async fn commitment_age_bounds(&self) -> Result<(i64, i64), GatewayError> {
        let min = self
            .call_word(&self.controller, encode_call("minCommitmentAge()", None), "minCommitmentAge")
            .await?;
        let max = self
            .call_word(&self.controller, encode_call("maxCommitmentAge()", None), "maxCommitmentAge")
            .await?;
        let to_i64 = |word: &[u8; 32]| {
            word_to_u64(word).and_then(|v| {
                i64::try_from(v).map_err(|_| GatewayError::Upstream("commitment age overflow".to_string()))
            })
        };
        Ok((to_i64(&min)?, to_i64(&max)?))
    }
}
