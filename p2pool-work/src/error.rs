use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkError {
    #[error("parent/aux RPC error: {0}")]
    Rpc(#[from] p2pool_rpc::RpcError),
    #[error("PPLNS accounting error: {0}")]
    Pplns(#[from] p2pool_pplns::PplnsError),
    #[error("malformed parent template: {0}")]
    MalformedTemplate(String),
}
