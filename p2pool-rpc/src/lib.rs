//! Outbound JSON-RPC clients (C5's collaborators): the parent-chain node
//! and, when merged mining is configured, the aux-chain node. P2Pool never
//! runs an inbound RPC server of its own — the HTTP stats endpoint is an
//! external collaborator interface per spec.md's scope, not part of this
//! crate.

pub mod aux;
pub mod client;
pub mod error;
pub mod p2p_broadcast;
pub mod parent;

pub use aux::{AuxMode, AuxPow, AuxRpc, AuxTemplate};
pub use client::{RpcClient, RpcEndpoint};
pub use error::RpcError;
pub use p2p_broadcast::{ParentP2pBroadcaster, MAINNET_MAGIC, REGTEST_MAGIC, TESTNET_MAGIC};
pub use parent::{BlockTemplate, NetworkInfo, ParentCredentials, ParentRpc, TemplateTransaction};
