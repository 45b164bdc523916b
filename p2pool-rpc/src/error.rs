use thiserror::Error;

/// Matches spec.md §7's "parent-chain misconfiguration" classification:
/// transport failures are recoverable-but-logged mid-run, `Misconfigured`
/// is fatal at startup.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("response body was not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RPC error {code}: {message}")]
    Remote { code: i32, message: String },
    #[error("parent/aux node misconfigured: {0}")]
    Misconfigured(String),
    #[error("direct P2P block broadcast failed: {0}")]
    P2pBroadcast(String),
}
