//! A JSON-RPC 1.0 (Bitcoin-style, HTTP Basic auth) client. Used both for
//! the parent chain and, in its legacy mode, the merged-mining aux chain —
//! the wire shape is the same, only the method table differs.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::RpcError;

#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    endpoint: RpcEndpoint,
}

impl RpcClient {
    pub fn new(endpoint: RpcEndpoint) -> Self {
        RpcClient {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Calls are tolerant of added fields and report-but-continue on
    /// unknown ones (spec.md §6): we deserialize only the fields the
    /// caller's type names, ignoring the rest.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "p2pool",
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint.url)
            .basic_auth(&self.endpoint.user, Some(&self.endpoint.password))
            .json(&body)
            .send()
            .await?;

        let parsed: Value = response.json().await?;
        if let Some(error) = parsed.get("error") {
            if !error.is_null() {
                let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1) as i32;
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown RPC error")
                    .to_string();
                return Err(RpcError::Remote { code, message });
            }
        }

        let result = parsed.get("result").cloned().unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }
}
