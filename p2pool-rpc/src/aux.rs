//! Merged-mining aux-chain RPC client (spec.md §6): two modes, detected
//! from the shape of the response rather than configured up front —
//! legacy `getauxblock` (single payout address) and trustless
//! `getblocktemplate({"capabilities":["auxpow"]})` (multi-output coinbase).

use serde::Deserialize;
use serde_json::{json, Value};

use crate::client::RpcClient;
use crate::error::RpcError;

#[derive(Debug, Clone, Deserialize)]
pub struct AuxPow {
    pub chainid: u32,
    pub target: String,
}

/// A normalized aux template, regardless of which mode produced it.
#[derive(Debug, Clone)]
pub struct AuxTemplate {
    pub mode: AuxMode,
    pub hash: String,
    pub chain_id: u32,
    pub target: String,
    /// Only present in trustless mode: the aux chain's own block template,
    /// which C5 uses to build a multi-output aux coinbase via C4's aux map.
    pub coinbase_template: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxMode {
    Legacy,
    Trustless,
}

pub struct AuxRpc {
    client: RpcClient,
}

impl AuxRpc {
    pub fn new(client: RpcClient) -> Self {
        AuxRpc { client }
    }

    /// Tries the trustless path first (an `auxpow` object with `chainid`
    /// and `target` in the response selects it); falls back to the legacy
    /// single-address `getauxblock` call.
    pub async fn get_template(&self) -> Result<AuxTemplate, RpcError> {
        let trustless: Result<Value, RpcError> = self
            .client
            .call("getblocktemplate", json!([{ "capabilities": ["auxpow"] }]))
            .await;

        if let Ok(response) = trustless {
            if let Some(auxpow) = response.get("auxpow") {
                let auxpow: AuxPow = serde_json::from_value(auxpow.clone())?;
                let hash = response
                    .get("hash")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                return Ok(AuxTemplate {
                    mode: AuxMode::Trustless,
                    hash,
                    chain_id: auxpow.chainid,
                    target: auxpow.target,
                    coinbase_template: Some(response),
                });
            }
        }

        let legacy: Value = self.client.call("getauxblock", json!([])).await?;
        Ok(AuxTemplate {
            mode: AuxMode::Legacy,
            hash: legacy.get("hash").and_then(Value::as_str).unwrap_or_default().to_string(),
            chain_id: legacy.get("chainid").and_then(Value::as_u64).unwrap_or(0) as u32,
            target: legacy.get("target").and_then(Value::as_str).unwrap_or_default().to_string(),
            coinbase_template: None,
        })
    }

    /// Submit a solved aux block. Legacy mode takes `(hash, auxpow_hex)`;
    /// trustless mode takes a raw serialized block like the parent chain's
    /// `submitblock`.
    pub async fn submit(&self, template: &AuxTemplate, payload_hex: &str) -> Result<Value, RpcError> {
        match template.mode {
            AuxMode::Legacy => {
                self.client
                    .call("getauxblock", json!([template.hash, payload_hex]))
                    .await
            }
            AuxMode::Trustless => self.client.call("submitblock", json!([payload_hex])).await,
        }
    }
}
