//! BIL ledger gateway adapter (reqwest).
//!
//! Implements the `bilmon-core` source and registry ports over the canister
//! HTTP gateway. All transport and decode failures are normalized to
//! `SourceUnavailable` / `RegistryUnavailable` here so the core never sees
//! gateway-specific error shapes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use bilmon_core::{
    domain::{BlockHeader, BlockHeight, BlockRecord, Destination, Transaction},
    errors::Error,
    ports::{RegistryPort, SourcePort},
    Result,
};

/// Shared HTTP gateway client. Query and update calls address a canister by
/// id; replies arrive as candid-JSON.
#[derive(Clone)]
pub struct Gateway {
    http: reqwest::Client,
    host: String,
}

impl Gateway {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client build");
        Self {
            http,
            host: host.into().trim_end_matches('/').to_string(),
        }
    }

    async fn call(
        &self,
        kind: &str,
        canister_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, String> {
        let url = format!("{}/api/v2/canister/{canister_id}/{kind}", self.host);
        let body = json!({ "method": method, "args": args });

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("gateway request error: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("gateway returned {} for {method}", resp.status()));
        }

        let reply: QueryReply = resp
            .json()
            .await
            .map_err(|e| format!("gateway json error: {e}"))?;
        Ok(reply.reply)
    }

    async fn query(
        &self,
        canister_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, String> {
        self.call("query", canister_id, method, args).await
    }

    async fn update(
        &self,
        canister_id: &str,
        method: &str,
        args: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, String> {
        self.call("call", canister_id, method, args).await
    }
}

#[derive(Deserialize)]
struct QueryReply {
    reply: serde_json::Value,
}

/// Source port over the BIL backend canister.
#[derive(Clone)]
pub struct LedgerSource {
    gateway: Gateway,
    canister_id: String,
}

impl LedgerSource {
    pub fn new(gateway: Gateway, canister_id: impl Into<String>) -> Self {
        Self {
            gateway,
            canister_id: canister_id.into(),
        }
    }

    async fn fetch_latest(&self) -> Result<BlockRecord> {
        let reply = self
            .gateway
            .query(&self.canister_id, "get_latest_block", json!([]))
            .await
            .map_err(Error::SourceUnavailable)?;
        decode_block(reply)
    }
}

#[async_trait]
impl SourcePort for LedgerSource {
    async fn latest_height(&self) -> Result<BlockHeight> {
        Ok(self.fetch_latest().await?.header.height)
    }

    async fn latest_block(&self) -> Result<BlockRecord> {
        self.fetch_latest().await
    }
}

/// Registry port over the store canister holding Telegram group codes.
#[derive(Clone)]
pub struct GroupStore {
    gateway: Gateway,
    canister_id: String,
}

impl GroupStore {
    pub fn new(gateway: Gateway, canister_id: impl Into<String>) -> Self {
        Self {
            gateway,
            canister_id: canister_id.into(),
        }
    }
}

#[async_trait]
impl RegistryPort for GroupStore {
    async fn list(&self) -> Result<Vec<Destination>> {
        let reply = self
            .gateway
            .query(&self.canister_id, "getTelegramGroupCodes", json!([]))
            .await
            .map_err(Error::RegistryUnavailable)?;

        let codes: Vec<String> = serde_json::from_value(reply)
            .map_err(|e| Error::RegistryUnavailable(format!("group list decode error: {e}")))?;
        Ok(codes.into_iter().map(Destination).collect())
    }

    async fn add(&self, destination: &Destination) -> Result<()> {
        self.gateway
            .update(
                &self.canister_id,
                "addTelegramGroupCode",
                json!([destination.0]),
            )
            .await
            .map_err(Error::RegistryUnavailable)?;
        Ok(())
    }

    async fn remove(&self, destination: &Destination) -> Result<()> {
        self.gateway
            .update(
                &self.canister_id,
                "removeTelegramGroupCode",
                json!([destination.0]),
            )
            .await
            .map_err(Error::RegistryUnavailable)?;
        Ok(())
    }
}

// === candid-JSON decoding ===

#[derive(Deserialize)]
struct BlockPayload {
    header: HeaderPayload,
    #[serde(default)]
    transactions: Vec<TransactionPayload>,
}

#[derive(Deserialize)]
struct HeaderPayload {
    height: u64,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Deserialize)]
struct TransactionPayload {
    recipient: String,
    #[serde(default)]
    timestamp: i64,
}

impl From<BlockPayload> for BlockRecord {
    fn from(payload: BlockPayload) -> Self {
        BlockRecord {
            header: BlockHeader {
                height: BlockHeight(payload.header.height),
                timestamp_nanos: payload.header.timestamp,
            },
            transactions: payload
                .transactions
                .into_iter()
                .map(|tx| Transaction {
                    recipient: tx.recipient,
                    timestamp_nanos: tx.timestamp,
                })
                .collect(),
        }
    }
}

/// `get_latest_block` replies with the candid optional encoding: either a
/// bare record or a zero/one-element vector wrapping it.
fn decode_block(value: serde_json::Value) -> Result<BlockRecord> {
    let payload = match value {
        serde_json::Value::Array(mut items) => match items.pop() {
            Some(item) => item,
            None => {
                return Err(Error::SourceUnavailable(
                    "ledger returned no block".to_string(),
                ))
            }
        },
        other => other,
    };

    let block: BlockPayload = serde_json::from_value(payload)
        .map_err(|e| Error::SourceUnavailable(format!("block decode error: {e}")))?;
    Ok(block.into())
}
