use thiserror::Error;

#[derive(Debug, Error)]
pub enum StratumError {
    #[error("malformed JSON-RPC line: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("work composition error: {0}")]
    Work(#[from] p2pool_work::WorkError),
    #[error("share validation error: {0}")]
    Validation(#[from] p2pool_consensus::ValidationError),
    #[error("PPLNS accounting error: {0}")]
    Pplns(#[from] p2pool_pplns::PplnsError),
    #[error("parent/aux RPC error: {0}")]
    Rpc(#[from] p2pool_rpc::RpcError),
}
