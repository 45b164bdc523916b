//! Parent-chain RPC surface (spec.md §6): `getblocktemplate`, `submitblock`,
//! `getblockhash`, `getblock`, `getrawtransaction`, `sendrawtransaction`,
//! `getnetworkinfo`, `help`, tolerant of unknown fields per BIP22/23's
//! "capabilities" model.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::client::RpcClient;
use crate::error::RpcError;

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateTransaction {
    pub data: String,
    pub txid: String,
    #[serde(default)]
    pub fee: i64,
}

/// A `getblocktemplate` response. Only the fields the work composer (C5)
/// needs are named; anything else the node returns is simply dropped by
/// serde, matching the "tolerant of added fields" contract.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTemplate {
    pub version: i32,
    pub previousblockhash: String,
    pub transactions: Vec<TemplateTransaction>,
    pub coinbasevalue: u64,
    #[serde(default)]
    pub coinbaseaux: std::collections::HashMap<String, String>,
    /// Present when the node supports pre-built coinbase templates;
    /// absent nodes require C5 to fall back to `coinbasevalue` +
    /// `coinbaseaux` (spec.md §9's documented open question).
    pub coinbasetxn: Option<TemplateTransaction>,
    pub target: Option<String>,
    pub bits: String,
    pub curtime: u32,
    pub mintime: Option<u32>,
    pub height: u64,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInfo {
    pub version: u64,
    pub subversion: String,
    pub connections: u32,
}

pub struct ParentRpc {
    client: RpcClient,
}

impl ParentRpc {
    pub fn new(client: RpcClient) -> Self {
        ParentRpc { client }
    }

    pub async fn get_block_template(&self, rules: &[&str]) -> Result<BlockTemplate, RpcError> {
        self.client
            .call("getblocktemplate", json!([{ "rules": rules }]))
            .await
    }

    pub async fn submit_block(&self, raw_block_hex: &str) -> Result<Value, RpcError> {
        self.client.call("submitblock", json!([raw_block_hex])).await
    }

    pub async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.client.call("getblockhash", json!([height])).await
    }

    pub async fn get_block(&self, hash: &str) -> Result<Value, RpcError> {
        self.client.call("getblock", json!([hash])).await
    }

    pub async fn get_raw_transaction(&self, txid: &str) -> Result<String, RpcError> {
        self.client
            .call("getrawtransaction", json!([txid, false]))
            .await
    }

    /// Relays a share-gossiped transaction into the parent node's mempool.
    /// Already-known transactions come back as an RPC error from the node;
    /// callers (the peer crate's tx-gossip handler) treat that as a no-op.
    pub async fn send_raw_transaction(&self, raw_tx_hex: &str) -> Result<String, RpcError> {
        self.client
            .call("sendrawtransaction", json!([raw_tx_hex]))
            .await
    }

    pub async fn get_network_info(&self) -> Result<NetworkInfo, RpcError> {
        self.client.call("getnetworkinfo", json!([])).await
    }

    pub async fn help(&self) -> Result<String, RpcError> {
        self.client.call("help", json!([])).await
    }

    /// Fails fast with `RpcError::Misconfigured` when the node cannot even
    /// answer `getnetworkinfo` — spec.md §7 calls this fatal at startup.
    pub async fn check_reachable(&self) -> Result<(), RpcError> {
        self.get_network_info()
            .await
            .map(|_| ())
            .map_err(|err| RpcError::Misconfigured(format!("parent node unreachable: {err}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParentCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}
