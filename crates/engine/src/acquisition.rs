// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Trace acquisition from an EVM node.
//!
//! A replay uses `debug_traceTransaction`, a simulation `debug_traceCall`; both
//! with geth's `callTracer`. The opcode step log comes from a second call with
//! the default struct logger, stripped of stack, storage and memory.
//!
//! Every node call is bounded by the configured timeout, and every failure is
//! classified into [`AcquisitionError`] with its text already scrubbed, since
//! transport errors echo the endpoint URL (and with it, provider API keys).

use std::{fmt::Debug, future::IntoFuture, time::Duration};

use alloy_network::Ethereum;
use alloy_primitives::{Address, Bytes, TxHash, B256, U256, U64};
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_types::BlockNumberOrTag;
use alloy_transport::{TransportError, TransportErrorKind, TransportResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use walnut_common::{
    redacted_endpoint, scrub_sensitive, CallKind, RawTraceCall, StructStep, TraceRequest,
    TxMetadata,
};

/// EIP-1967 implementation slot: `keccak256("eip1967.proxy.implementation") - 1`.
pub const EIP1967_IMPLEMENTATION_SLOT: B256 =
    alloy_primitives::b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// Acquisition faults. Messages never contain the node URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquisitionError {
    /// The node does not expose the `debug` namespace, or returned no trace
    #[error("debug tracing is not supported on this network: {0}")]
    DebugNotSupported(String),
    /// The node could not be reached
    #[error("connection to the node failed: {0}")]
    ConnectionFailed(String),
    /// A node call did not complete in time
    #[error("node request timed out: {0}")]
    Timeout(String),
    /// The node answered with something that is not a usable trace
    #[error("malformed trace: {0}")]
    MalformedTrace(String),
    /// The transaction is unknown to the node
    #[error("transaction {0} not found")]
    TransactionNotFound(TxHash),
    /// Any other node error
    #[error("node error: {0}")]
    Rpc(String),
}

impl AcquisitionError {
    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DebugNotSupported(_) => "debugNotSupported",
            Self::ConnectionFailed(_) => "connectionFailed",
            Self::Timeout(_) => "timeout",
            Self::MalformedTrace(_) => "malformedTrace",
            Self::TransactionNotFound(_) => "transactionNotFound",
            Self::Rpc(_) => "rpc",
        }
    }
}

/// JSON-RPC code for an unknown or disabled method.
const METHOD_NOT_FOUND: i64 = -32601;

/// HTTP statuses a gateway answers with when the `debug` namespace is blocked.
const METHOD_NOT_ALLOWED: [u16; 2] = [405, 501];

static RPC_CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:error code|"code"\s*:)\s*(-?\d+)"#).expect("valid rpc code regex")
});

static HTTP_STATUS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"http error (\d{3})\b").expect("valid http status regex"));

static MISSING_METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"method not found|the method debug_\w+ does not exist")
        .expect("valid missing method regex")
});

/// Classify a failed node call.
pub fn classify_transport_error(method: &str, err: &TransportError) -> AcquisitionError {
    let debug_call = method.starts_with("debug_");
    if let Some(payload) = err.as_error_resp() {
        if payload.code == METHOD_NOT_FOUND && debug_call {
            return AcquisitionError::DebugNotSupported(scrub_sensitive(&payload.message));
        }
        return classify_error_text(method, &payload.message);
    }
    if let Some(TransportErrorKind::HttpError(http)) = err.as_transport_err() {
        if debug_call && METHOD_NOT_ALLOWED.contains(&http.status) {
            return AcquisitionError::DebugNotSupported(format!("node answered HTTP {}", http.status));
        }
    }
    if err.is_deser_error() && debug_call {
        return AcquisitionError::MalformedTrace(scrub_sensitive(&err.to_string()));
    }
    classify_error_text(method, &err.to_string())
}

/// Classify a failed node call from its error text alone.
///
/// Only an explicit method-not-found code, HTTP status or message marks the
/// `debug` namespace as missing; anything else from a debug method stays an
/// ordinary node error.
pub fn classify_error_text(method: &str, text: &str) -> AcquisitionError {
    let scrubbed = scrub_sensitive(text);
    let lower = text.to_ascii_lowercase();
    let debug_call = method.starts_with("debug_");

    if lower.contains("timed out") || lower.contains("timeout") || lower.contains("deadline") {
        AcquisitionError::Timeout(scrubbed)
    } else if lower.contains("connection refused")
        || lower.contains("error sending request")
        || lower.contains("tcp connect")
        || lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("connection reset")
        || lower.contains("connection closed")
        || lower.contains("no route to host")
    {
        AcquisitionError::ConnectionFailed(scrubbed)
    } else if debug_call && names_missing_method(&lower) {
        AcquisitionError::DebugNotSupported(scrubbed)
    } else {
        AcquisitionError::Rpc(scrubbed)
    }
}

fn names_missing_method(lower: &str) -> bool {
    let rpc_code = RPC_CODE_RE
        .captures(lower)
        .and_then(|c| c[1].parse::<i64>().ok())
        .is_some_and(|code| code == METHOD_NOT_FOUND);
    let http_status = HTTP_STATUS_RE
        .captures(lower)
        .and_then(|c| c[1].parse::<u16>().ok())
        .is_some_and(|status| METHOD_NOT_ALLOWED.contains(&status));
    rpc_code || http_status || MISSING_METHOD_RE.is_match(lower)
}

/// A raw trace together with everything needed downstream.
#[derive(Debug, Clone)]
pub struct AcquiredTrace {
    /// Root frame as returned by the node
    pub raw: RawTraceCall,
    /// Opcode step log, empty when not collected or unavailable
    pub steps: Vec<StructStep>,
    /// Transaction metadata
    pub tx: TxMetadata,
    /// Chain the node serves
    pub chain_id: u64,
}

/// The subset of `eth_getTransactionByHash` we need. Read loosely so that
/// transaction types the Ethereum envelope does not know still load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionLookup {
    from: Address,
    #[serde(default)]
    to: Option<Address>,
    nonce: U64,
    #[serde(default)]
    block_number: Option<U64>,
}

#[derive(Debug, Clone, Deserialize)]
struct BlockLookup {
    timestamp: U64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StructLogTrace {
    #[serde(default)]
    struct_logs: Vec<StructStep>,
}

fn call_tracer_options() -> Value {
    json!({ "tracer": "callTracer", "tracerConfig": { "withLog": true } })
}

fn struct_logger_options() -> Value {
    json!({ "disableStack": true, "disableStorage": true, "enableMemory": false, "enableReturnData": false })
}

/// JSON-RPC client for one node.
#[derive(Debug, Clone)]
pub struct NodeClient {
    provider: RootProvider<Ethereum>,
    timeout: Duration,
    endpoint: String,
}

impl NodeClient {
    /// Connect to `rpc_url`. Nothing is sent until the first call.
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self, AcquisitionError> {
        let url = rpc_url.parse::<reqwest::Url>().map_err(|e| {
            AcquisitionError::ConnectionFailed(format!("invalid node url: {e}"))
        })?;
        Ok(Self {
            provider: RootProvider::new_http(url),
            timeout,
            endpoint: redacted_endpoint(rpc_url),
        })
    }

    /// Endpoint with credentials removed, for logs.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn bounded<F, T>(&self, method: &'static str, call: F) -> Result<T, AcquisitionError>
    where
        F: IntoFuture<Output = TransportResult<T>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify_transport_error(method, &err)),
            Err(_) => Err(AcquisitionError::Timeout(format!(
                "{method} did not answer within {}s",
                self.timeout.as_secs()
            ))),
        }
    }

    async fn request<R>(&self, method: &'static str, params: Value) -> Result<R, AcquisitionError>
    where
        R: DeserializeOwned + Debug + Send + Sync + Unpin + 'static,
    {
        self.bounded(method, self.provider.raw_request::<Value, R>(method.into(), params)).await
    }

    /// `eth_chainId`
    pub async fn chain_id(&self) -> Result<u64, AcquisitionError> {
        self.bounded("eth_chainId", self.provider.get_chain_id()).await
    }

    /// `eth_blockNumber`
    pub async fn block_number(&self) -> Result<u64, AcquisitionError> {
        self.bounded("eth_blockNumber", self.provider.get_block_number()).await
    }

    /// `eth_getCode` at the latest block.
    pub async fn code_at(&self, address: Address) -> Result<Bytes, AcquisitionError> {
        self.bounded("eth_getCode", self.provider.get_code_at(address)).await
    }

    /// `eth_getStorageAt` at the latest block.
    pub async fn storage_at(&self, address: Address, slot: B256) -> Result<U256, AcquisitionError> {
        self.bounded("eth_getStorageAt", self.provider.get_storage_at(address, U256::from_be_bytes(slot.0))).await
    }

    /// Implementation address stored in the EIP-1967 slot, if any.
    pub async fn implementation_of(
        &self,
        address: Address,
    ) -> Result<Option<Address>, AcquisitionError> {
        let word = self.storage_at(address, EIP1967_IMPLEMENTATION_SLOT).await?;
        let implementation = Address::from_word(B256::from(word.to_be_bytes::<32>()));
        Ok((!implementation.is_zero()).then_some(implementation))
    }

    /// Timestamp of block `number` via `eth_getBlockByNumber`, `None` for an
    /// unknown block.
    pub async fn block_timestamp(&self, number: u64) -> Result<Option<u64>, AcquisitionError> {
        let block: Option<BlockLookup> = self
            .request("eth_getBlockByNumber", json!([BlockNumberOrTag::Number(number), false]))
            .await?;
        Ok(block.map(|b| b.timestamp.to::<u64>()))
    }

    async fn transaction(&self, tx_hash: TxHash) -> Result<TransactionLookup, AcquisitionError> {
        let tx: Option<TransactionLookup> =
            self.request("eth_getTransactionByHash", json!([tx_hash])).await?;
        tx.ok_or(AcquisitionError::TransactionNotFound(tx_hash))
    }

    /// Call trace of a mined transaction.
    pub async fn trace_transaction(
        &self,
        tx_hash: TxHash,
    ) -> Result<RawTraceCall, AcquisitionError> {
        let trace: Option<RawTraceCall> = self
            .request("debug_traceTransaction", json!([tx_hash, call_tracer_options()]))
            .await?;
        trace.ok_or_else(|| {
            AcquisitionError::DebugNotSupported("node returned no trace".to_string())
        })
    }

    /// Call trace of a hypothetical call.
    pub async fn trace_call(
        &self,
        call: &Value,
        block: BlockNumberOrTag,
    ) -> Result<RawTraceCall, AcquisitionError> {
        let trace: Option<RawTraceCall> =
            self.request("debug_traceCall", json!([call, block, call_tracer_options()])).await?;
        trace.ok_or_else(|| {
            AcquisitionError::DebugNotSupported("node returned no trace".to_string())
        })
    }

    async fn struct_logs_transaction(
        &self,
        tx_hash: TxHash,
    ) -> Result<Vec<StructStep>, AcquisitionError> {
        let trace: Option<StructLogTrace> = self
            .request("debug_traceTransaction", json!([tx_hash, struct_logger_options()]))
            .await?;
        Ok(trace.map(|t| t.struct_logs).unwrap_or_default())
    }

    async fn struct_logs_call(
        &self,
        call: &Value,
        block: BlockNumberOrTag,
    ) -> Result<Vec<StructStep>, AcquisitionError> {
        let trace: Option<StructLogTrace> =
            self.request("debug_traceCall", json!([call, block, struct_logger_options()])).await?;
        Ok(trace.map(|t| t.struct_logs).unwrap_or_default())
    }

    /// Obtain the raw trace, step log and metadata for `request`.
    pub async fn acquire(
        &self,
        request: &TraceRequest,
        collect_steps: bool,
    ) -> Result<AcquiredTrace, AcquisitionError> {
        let chain_id = match request.chain_id() {
            Some(id) => id,
            None => self.chain_id().await?,
        };

        let (raw, steps, mut tx) = match request {
            TraceRequest::Replay { tx_hash, .. } => {
                info!(tx_hash = %tx_hash, endpoint = %self.endpoint, "Replaying transaction");
                let lookup = self.transaction(*tx_hash).await?;
                let raw = self.trace_transaction(*tx_hash).await?;
                ensure_recipient(&raw)?;

                let steps = if collect_steps {
                    self.struct_logs_transaction(*tx_hash).await
                } else {
                    Ok(Vec::new())
                };

                let tx = TxMetadata {
                    tx_hash: Some(*tx_hash),
                    block_number: lookup.block_number.map(|n| n.to::<u64>()).unwrap_or_default(),
                    nonce: Some(lookup.nonce.to::<u64>()),
                    from: lookup.from,
                    to: lookup.to,
                    block_timestamp: None,
                };
                (raw, steps, tx)
            }
            TraceRequest::Simulate { from, to, calldata, value, block_number, .. } => {
                let block_number = match block_number {
                    Some(n) => *n,
                    None => self.block_number().await?,
                };
                info!(block_number, endpoint = %self.endpoint, "Tracing simulated call");

                let mut call = json!({ "from": from, "to": to, "input": calldata });
                if let Some(value) = value {
                    call["value"] = json!(value);
                }
                let block = BlockNumberOrTag::Number(block_number);
                let raw = self.trace_call(&call, block).await?;

                let steps = if collect_steps {
                    self.struct_logs_call(&call, block).await
                } else {
                    Ok(Vec::new())
                };

                let tx = TxMetadata {
                    tx_hash: None,
                    block_number,
                    nonce: None,
                    from: *from,
                    to: Some(*to),
                    block_timestamp: None,
                };
                (raw, steps, tx)
            }
        };

        let steps = steps.unwrap_or_else(|e| {
            warn!(error = %e, "Step log unavailable; continuing without source-level steps");
            Vec::new()
        });
        tx.block_timestamp = self.block_timestamp(tx.block_number).await.unwrap_or_else(|e| {
            debug!(error = %e, block = tx.block_number, "Block timestamp unavailable");
            None
        });
        debug!(steps = steps.len(), chain_id, "Trace acquired");

        Ok(AcquiredTrace { raw, steps, tx, chain_id })
    }
}

/// A root frame without a recipient must be a contract creation.
fn ensure_recipient(raw: &RawTraceCall) -> Result<(), AcquisitionError> {
    let kind = raw
        .typ
        .parse::<CallKind>()
        .map_err(|e| AcquisitionError::MalformedTrace(e.to_string()))?;
    let has_recipient = raw.to.as_deref().is_some_and(|to| !to.is_empty());
    if has_recipient || kind.is_create() {
        Ok(())
    } else {
        Err(AcquisitionError::MalformedTrace(format!(
            "{kind} frame without a recipient that is not a contract creation"
        )))
    }
}
