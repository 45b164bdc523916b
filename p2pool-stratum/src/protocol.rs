//! Line-delimited JSON-RPC shapes for the mining RPC server (spec.md §4.6).
//!
//! Grounded on the teacher's `StratumRequest`/`StratumResponse`/
//! `StratumNotification`/`StratumMethod` shapes (`mining/src/stratum.rs`),
//! with the method table replaced by the exact names spec.md §4.6 lists and
//! `mining.configure`/`mining.extranonce.subscribe` added.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StratumMethod {
    Subscribe,
    Authorize,
    Configure,
    Submit,
    ExtranonceSubscribe,
    Unknown(String),
}

impl From<&str> for StratumMethod {
    fn from(s: &str) -> Self {
        match s {
            "mining.subscribe" => StratumMethod::Subscribe,
            "mining.authorize" => StratumMethod::Authorize,
            "mining.configure" => StratumMethod::Configure,
            "mining.submit" => StratumMethod::Submit,
            "mining.extranonce.subscribe" => StratumMethod::ExtranonceSubscribe,
            other => StratumMethod::Unknown(other.to_string()),
        }
    }
}

impl std::fmt::Display for StratumMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StratumMethod::Subscribe => "mining.subscribe",
            StratumMethod::Authorize => "mining.authorize",
            StratumMethod::Configure => "mining.configure",
            StratumMethod::Submit => "mining.submit",
            StratumMethod::ExtranonceSubscribe => "mining.extranonce.subscribe",
            StratumMethod::Unknown(other) => other,
        };
        f.write_str(s)
    }
}

/// An inbound request line. `id` is `None` only for malformed input; a
/// genuine JSON-RPC notification from a miner never happens in this
/// protocol direction, but `Option` keeps decoding lenient.
#[derive(Debug, Clone, Deserialize)]
pub struct StratumRequest {
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// An outbound reply. `id` must echo the request's id exactly (spec.md
/// §4.6's request/response discipline).
#[derive(Debug, Clone, Serialize)]
pub struct StratumResponse {
    pub id: Value,
    pub result: Option<Value>,
    pub error: Option<Value>,
}

impl StratumResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        StratumResponse {
            id,
            result: Some(result),
            error: None,
        }
    }

    /// `error` is `[code, message, data]` (spec.md §4.6's wire contract), not
    /// a bare string — real stratum clients parse it positionally.
    pub fn err(id: Value, code: i32, message: &str) -> Self {
        StratumResponse {
            id,
            result: None,
            error: Some(Value::Array(vec![
                Value::Number(code.into()),
                Value::String(message.to_string()),
                Value::Null,
            ])),
        }
    }
}

/// An outbound server-initiated push: `mining.notify`, `mining.set_difficulty`,
/// `mining.set_extranonce`. Always carries `id: null` — a mining client must
/// never confuse a notification for a reply to one of its own requests.
#[derive(Debug, Clone, Serialize)]
pub struct StratumNotification {
    pub id: Option<Value>,
    pub method: String,
    pub params: Vec<Value>,
}

impl StratumNotification {
    pub fn new(method: &str, params: Vec<Value>) -> Self {
        StratumNotification {
            id: None,
            method: method.to_string(),
            params,
        }
    }
}
