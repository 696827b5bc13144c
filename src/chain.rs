//! Chain facade: JSON-RPC reads, log queries, and signed legacy sends.
//!
//! Every other component talks to the chain through this type. Reads time
//! out after 15 s and surface as `ChainRpc`. Sends hold an exclusive lock
//! for the whole sign-submit-confirm sequence, so the wallet nonce is a
//! single-owner resource: the keeper never has two transactions in flight.

use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{hex, Address, Bytes, TxKind, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{KeeperError, Result};

/// Per-RPC-call timeout.
const RPC_TIMEOUT: Duration = Duration::from_secs(15);
/// How long to wait for a receipt before declaring the attempt lost.
const RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Receipt poll period.
const RECEIPT_POLL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
    data: Option<Value>,
}

/// One entry returned by `eth_getLogs`, ordered per address by the node.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
}

/// Log query: one emitting address, optionally one event signature.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: Option<B256>,
}

/// Outcome of a confirmed transaction.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
}

pub struct ChainClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    signer: PrivateKeySigner,
    chain_id: u64,
    gas_price: u128,
    gas_limit: u64,
    /// Wallet-nonce lock: exactly one in-flight transaction at a time.
    send_lock: tokio::sync::Mutex<()>,
}

impl ChainClient {
    pub fn new(url: &str, private_key: &str, chain_id: u64, gas_price: u128, gas_limit: u64) -> Result<Self> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| KeeperError::Config(format!("PRIVATE_KEY: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| KeeperError::Config(format!("http client: {e}")))?;
        Ok(ChainClient {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
            signer,
            chain_id,
            gas_price,
            gas_limit,
            send_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| KeeperError::ChainRpc(format!("{method}: {e}")))?;
        let parsed: RpcResponse = resp
            .json()
            .await
            .map_err(|e| KeeperError::ChainRpc(format!("{method}: malformed response: {e}")))?;
        if let Some(err) = parsed.error {
            return Err(rpc_error(method, &err));
        }
        parsed
            .result
            .ok_or_else(|| KeeperError::ChainRpc(format!("{method}: empty result")))
    }

    pub async fn current_block(&self) -> Result<u64> {
        let v = self.rpc("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&v)
    }

    /// Timestamp of the latest block, the clock auction math runs on.
    pub async fn block_timestamp(&self) -> Result<u64> {
        let v = self
            .rpc("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let ts = v
            .get("timestamp")
            .ok_or_else(|| KeeperError::ChainRpc("block missing timestamp".into()))?;
        parse_hex_u64(ts)
    }

    /// `eth_call` against latest state; returns the raw return bytes.
    pub async fn call(&self, to: Address, data: Vec<u8>) -> Result<Bytes> {
        let v = self
            .rpc(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_str(&data) }, "latest"]),
            )
            .await?;
        parse_hex_bytes(&v)
    }

    pub async fn get_logs(&self, filter: &LogFilter, from: u64, to: u64) -> Result<Vec<LogEntry>> {
        let topics: Value = match filter.topic0 {
            Some(t) => json!([t.to_string()]),
            None => json!([]),
        };
        let v = self
            .rpc(
                "eth_getLogs",
                json!([{
                    "address": filter.address.to_string(),
                    "fromBlock": format!("0x{from:x}"),
                    "toBlock": format!("0x{to:x}"),
                    "topics": topics,
                }]),
            )
            .await?;
        let entries = v
            .as_array()
            .ok_or_else(|| KeeperError::ChainRpc("eth_getLogs: non-array result".into()))?;
        entries.iter().map(parse_log).collect()
    }

    /// Sign and submit a legacy transaction, then wait for its receipt.
    ///
    /// An underpriced rejection and a receipt timeout each get exactly one
    /// retry; a second receipt timeout is `TxUnknown`. A mined receipt with
    /// status 0 is `TxReverted`, with the reason recovered by replaying the
    /// call.
    pub async fn send(&self, to: Address, data: Vec<u8>) -> Result<TxReceipt> {
        let _guard = self.send_lock.lock().await;

        let tx_hash = match self.submit(to, &data).await {
            Ok(hash) => hash,
            Err(KeeperError::TxUnderpriced(msg)) => {
                warn!(reason = %msg, "send rejected as underpriced, retrying once");
                self.submit(to, &data).await?
            }
            Err(e) => return Err(e),
        };

        for attempt in 0..2 {
            match self.wait_receipt(tx_hash).await? {
                Some(receipt) => {
                    if receipt.0 {
                        return Ok(receipt.1);
                    }
                    let reason = self
                        .revert_reason(to, &data, receipt.1.block_number)
                        .await
                        .unwrap_or_else(|| "no reason returned".to_string());
                    return Err(KeeperError::TxReverted { tx_hash, reason });
                }
                None => {
                    warn!(%tx_hash, attempt, "receipt wait timed out");
                }
            }
        }
        Err(KeeperError::TxUnknown { tx_hash })
    }

    /// Sign against the current pending nonce and push the raw bytes.
    async fn submit(&self, to: Address, data: &[u8]) -> Result<B256> {
        let nonce = self.pending_nonce().await?;
        let mut tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(to),
            value: U256::ZERO,
            input: Bytes::copy_from_slice(data),
        };
        let sig = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| KeeperError::Config(format!("signing key rejected: {e}")))?;
        let envelope = TxEnvelope::Legacy(tx.into_signed(sig));
        let raw = envelope.encoded_2718();

        let v = match self
            .rpc("eth_sendRawTransaction", json!([hex_str(&raw)]))
            .await
        {
            Ok(v) => v,
            Err(KeeperError::ChainRpc(msg)) if msg.contains("underpriced") => {
                return Err(KeeperError::TxUnderpriced(msg));
            }
            Err(e) => return Err(e),
        };
        let tx_hash = parse_hex_b256(&v)?;
        debug!(%tx_hash, nonce, to = %to, "transaction submitted");
        Ok(tx_hash)
    }

    async fn pending_nonce(&self) -> Result<u64> {
        let v = self
            .rpc(
                "eth_getTransactionCount",
                json!([self.signer.address().to_string(), "pending"]),
            )
            .await?;
        parse_hex_u64(&v)
    }

    /// Poll for a receipt. `Ok(Some((succeeded, receipt)))` once mined,
    /// `Ok(None)` on timeout.
    async fn wait_receipt(&self, tx_hash: B256) -> Result<Option<(bool, TxReceipt)>> {
        let deadline = tokio::time::Instant::now() + RECEIPT_TIMEOUT;
        loop {
            let v = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash.to_string()]))
                .await?;
            if !v.is_null() {
                let status = v
                    .get("status")
                    .and_then(|s| parse_hex_u64(s).ok())
                    .unwrap_or(0);
                let receipt = TxReceipt {
                    tx_hash,
                    block_number: v
                        .get("blockNumber")
                        .map(parse_hex_u64)
                        .transpose()?
                        .unwrap_or(0),
                    gas_used: v
                        .get("gasUsed")
                        .map(parse_hex_u64)
                        .transpose()?
                        .unwrap_or(0),
                };
                return Ok(Some((status == 1, receipt)));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(RECEIPT_POLL).await;
        }
    }

    /// Replay a reverted call at its mined block to recover the reason.
    async fn revert_reason(&self, to: Address, data: &[u8], block: u64) -> Option<String> {
        let err = self
            .rpc(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_str(data) }, format!("0x{block:x}")]),
            )
            .await
            .err()?;
        match err {
            KeeperError::ChainRpc(msg) => Some(msg),
            _ => None,
        }
    }
}

fn rpc_error(method: &str, err: &RpcErrorBody) -> KeeperError {
    // Surface revert payloads where the node provides them.
    if let Some(Value::String(data)) = &err.data {
        if let Some(reason) = decode_revert_string(data) {
            return KeeperError::ChainRpc(format!("{method}: execution reverted: {reason}"));
        }
    }
    KeeperError::ChainRpc(format!("{method}: {}", err.message))
}

/// Decode an ABI `Error(string)` payload (selector 0x08c379a0).
pub fn decode_revert_string(hex_data: &str) -> Option<String> {
    let bytes = hex::decode(hex_data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 68 || bytes[..4] != [0x08, 0xc3, 0x79, 0xa0] {
        return None;
    }
    let len = U256::from_be_slice(&bytes[36..68]);
    let len = usize::try_from(len).ok()?;
    let tail = bytes.get(68..68 + len)?;
    Some(String::from_utf8_lossy(tail).into_owned())
}

fn hex_str(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

fn parse_hex_u64(v: &Value) -> Result<u64> {
    let s = v
        .as_str()
        .ok_or_else(|| KeeperError::ChainRpc(format!("expected hex string, got {v}")))?;
    u64::from_str_radix(s.trim_start_matches("0x"), 16)
        .map_err(|e| KeeperError::ChainRpc(format!("bad hex quantity '{s}': {e}")))
}

fn parse_hex_bytes(v: &Value) -> Result<Bytes> {
    let s = v
        .as_str()
        .ok_or_else(|| KeeperError::ChainRpc(format!("expected hex string, got {v}")))?;
    hex::decode(s.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| KeeperError::ChainRpc(format!("bad hex data: {e}")))
}

fn parse_hex_b256(v: &Value) -> Result<B256> {
    let s = v
        .as_str()
        .ok_or_else(|| KeeperError::ChainRpc(format!("expected hex string, got {v}")))?;
    B256::from_str(s).map_err(|e| KeeperError::ChainRpc(format!("bad hash '{s}': {e}")))
}

fn parse_log(v: &Value) -> Result<LogEntry> {
    let address = v
        .get("address")
        .and_then(Value::as_str)
        .ok_or_else(|| KeeperError::ChainRpc("log missing address".into()))
        .and_then(|s| {
            Address::from_str(s).map_err(|e| KeeperError::ChainRpc(format!("bad address: {e}")))
        })?;
    let topics = v
        .get("topics")
        .and_then(Value::as_array)
        .ok_or_else(|| KeeperError::ChainRpc("log missing topics".into()))?
        .iter()
        .map(parse_hex_b256)
        .collect::<Result<Vec<_>>>()?;
    let data = v
        .get("data")
        .map(parse_hex_bytes)
        .transpose()?
        .unwrap_or_default();
    let block_number = v
        .get("blockNumber")
        .map(parse_hex_u64)
        .transpose()?
        .unwrap_or(0);
    Ok(LogEntry {
        address,
        topics,
        data,
        block_number,
    })
}
