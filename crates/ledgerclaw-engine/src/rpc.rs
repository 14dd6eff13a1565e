//! JSON-RPC ledger client.
//!
//! Speaks the node's JSON-RPC 2.0 API over HTTP:
//! `getblockcount`, `getblockhash`, `getblocknotifications`,
//! `sendrawtransaction`, `gettransactionheight`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use ledgerclaw_core::traits::LedgerClient;
use ledgerclaw_core::{Hash160, LedgerClawError, LedgerNotification, Result, SignedTransaction, StackItem};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Node error code for a transaction it has never seen.
const UNKNOWN_TRANSACTION: i64 = -100;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    fn new(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Ledger client over HTTP JSON-RPC.
pub struct RpcLedgerClient {
    endpoint: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedgerClient {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LedgerClawError::Ledger(format!("HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send one request; JSON-RPC errors come back as `Err(Ok(error))`.
    async fn call_raw(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, JsonRpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = JsonRpcRequest::new(id, method, params);

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await
            .map_err(|e| LedgerClawError::Ledger(format!("{method}: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(LedgerClawError::Ledger(format!("{method}: HTTP {status}")));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| LedgerClawError::Ledger(format!("{method}: invalid response: {e}")))?;

        if let Some(err) = body.error {
            return Ok(Err(err));
        }
        Ok(Ok(body.result.unwrap_or(Value::Null)))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_raw(method, params).await?.map_err(|err| {
            LedgerClawError::Ledger(format!("{method} error {}: {}", err.code, err.message))
        })
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn block_count(&self) -> Result<u32> {
        let result = self.call("getblockcount", serde_json::json!([])).await?;
        result
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| LedgerClawError::Ledger(format!("getblockcount: unexpected result {result}")))
    }

    async fn block_hash(&self, height: u32) -> Result<String> {
        let result = self.call("getblockhash", serde_json::json!([height])).await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| LedgerClawError::Ledger(format!("getblockhash: unexpected result {result}")))
    }

    async fn block_notifications(&self, block_hash: &str) -> Result<Vec<LedgerNotification>> {
        let result = self
            .call("getblocknotifications", serde_json::json!([block_hash]))
            .await?;

        let mut out = Vec::new();
        for section in ["prepersist_notifications", "notifications", "postpersist_notifications"] {
            let Some(items) = result.get(section).and_then(Value::as_array) else {
                continue;
            };
            for item in items {
                match parse_notification(item) {
                    Ok(n) => out.push(n),
                    Err(e) => tracing::warn!("⚠️ Skipping malformed notification in {block_hash}: {e}"),
                }
            }
        }
        Ok(out)
    }

    async fn send_raw_transaction(&self, tx: &SignedTransaction) -> Result<String> {
        let result = self
            .call("sendrawtransaction", serde_json::json!([BASE64.encode(&tx.raw)]))
            .await?;
        Ok(result
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| tx.hash.clone()))
    }

    async fn transaction_height(&self, tx_hash: &str) -> Result<Option<u32>> {
        match self
            .call_raw("gettransactionheight", serde_json::json!([tx_hash]))
            .await?
        {
            Ok(result) => Ok(result.as_u64().and_then(|n| u32::try_from(n).ok())),
            Err(err) if err.code == UNKNOWN_TRANSACTION => Ok(None),
            Err(err) => Err(LedgerClawError::Ledger(format!(
                "gettransactionheight error {}: {}",
                err.code, err.message
            ))),
        }
    }
}

fn parse_notification(item: &Value) -> std::result::Result<LedgerNotification, String> {
    let contract = item
        .get("contract")
        .and_then(Value::as_str)
        .ok_or("missing contract")?;
    let contract_hash: Hash160 = contract.parse()?;
    let event_name = item
        .get("eventname")
        .and_then(Value::as_str)
        .ok_or("missing eventname")?
        .to_string();
    let state = item.get("state").map(parse_stack_item).transpose()?.unwrap_or(StackItem::Any);
    Ok(LedgerNotification {
        contract_hash,
        event_name,
        state,
        container: item.get("container").and_then(Value::as_str).map(str::to_string),
    })
}

/// Decode a stack item from its `{ "type": ..., "value": ... }` JSON form.
pub fn parse_stack_item(item: &Value) -> std::result::Result<StackItem, String> {
    let kind = item
        .get("type")
        .and_then(Value::as_str)
        .ok_or("stack item without type")?;
    let value = item.get("value");

    let bytes = |v: Option<&Value>| -> std::result::Result<Vec<u8>, String> {
        let s = v.and_then(Value::as_str).unwrap_or_default();
        BASE64.decode(s).map_err(|e| format!("invalid base64 in {kind}: {e}"))
    };
    let items = |v: Option<&Value>| -> std::result::Result<Vec<StackItem>, String> {
        v.and_then(Value::as_array)
            .map(|a| a.iter().map(parse_stack_item).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    };

    Ok(match kind {
        "Any" => StackItem::Any,
        "Boolean" => StackItem::Boolean(match value {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => return Err("invalid Boolean value".into()),
        }),
        "Integer" => {
            let n = match value {
                Some(Value::String(s)) => s.parse::<i128>().map_err(|e| format!("invalid Integer: {e}"))?,
                Some(Value::Number(n)) => n
                    .as_i64()
                    .map(i128::from)
                    .or_else(|| n.as_u64().map(i128::from))
                    .ok_or("invalid Integer")?,
                _ => return Err("invalid Integer value".into()),
            };
            StackItem::Integer(n)
        }
        "ByteString" => StackItem::ByteString(bytes(value)?),
        "Buffer" => StackItem::Buffer(bytes(value)?),
        "Array" => StackItem::Array(items(value)?),
        "Struct" => StackItem::Struct(items(value)?),
        "Map" => {
            let mut entries = Vec::new();
            for entry in value.and_then(Value::as_array).into_iter().flatten() {
                let key = entry.get("key").ok_or("map entry without key")?;
                let val = entry.get("value").ok_or("map entry without value")?;
                entries.push((parse_stack_item(key)?, parse_stack_item(val)?));
            }
            StackItem::Map(entries)
        }
        "Pointer" => StackItem::Pointer(
            value
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or("invalid Pointer value")?,
        ),
        "InteropInterface" => StackItem::InteropInterface,
        other => return Err(format!("unknown stack item type {other}")),
    })
}
