//! Layered configuration (spec.md §6's CLI option groups): a TOML/env file
//! loaded via the `config` crate, with `clap`-derived CLI flags as
//! overrides. Grounded on the teacher's `Cli` (`clap::Parser` with a
//! `Commands` subcommand) and its declared-but-unused `config = "0.13"`
//! dependency — this module is the gap that dependency left unfilled.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid value for --{flag}: {reason}")]
    InvalidValue { flag: &'static str, reason: String },
}

/// Mirrors spec.md §6's CLI option-group table one struct field (group) at
/// a time; see each field's doc comment for which group it belongs to.
#[derive(Parser, Debug)]
#[clap(name = "p2pool", about = "Decentralized peer-to-peer mining pool node")]
pub struct Cli {
    /// Optional TOML config file layered beneath these flags.
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Network selector: mainnet, testnet, or regtest.
    #[clap(long, default_value = "mainnet")]
    pub network: String,

    /// Parent-node connection: JSON-RPC URL.
    #[clap(long, default_value = "http://127.0.0.1:8332")]
    pub parent_rpc_url: String,
    #[clap(long, default_value = "")]
    pub parent_rpc_user: String,
    #[clap(long, default_value = "")]
    pub parent_rpc_password: String,

    /// Optional direct P2P connection to the parent node, host/port, used to
    /// additionally broadcast a found block over the parent chain's own P2P
    /// wire protocol alongside the `submitblock` RPC call. Unset disables it.
    #[clap(long)]
    pub parent_p2p_addr: Option<SocketAddr>,

    /// Aux-node connection: unset `aux_rpc_url` disables merged mining.
    #[clap(long)]
    pub aux_rpc_url: Option<String>,
    #[clap(long, default_value = "")]
    pub aux_rpc_user: String,
    #[clap(long, default_value = "")]
    pub aux_rpc_password: String,

    /// Payout address: the operator's own miner address (pool-default, used
    /// when a connecting miner's username carries none).
    #[clap(long)]
    pub payout_address: String,

    /// Author donation fraction, percent 0..100, added to the donation
    /// output in generated shares.
    #[clap(long, default_value_t = 0)]
    pub donation_percent: u8,
    /// Author donation payout address.
    #[clap(long)]
    pub donation_address: Option<String>,

    /// Node fee: a separate operator fee, percent 0..100, paid into
    /// `node_fee_address` (defaults to `payout_address`).
    #[clap(long, default_value_t = 0)]
    pub node_fee_percent: u8,
    #[clap(long)]
    pub node_fee_address: Option<String>,

    /// Mining-RPC bind: host/port for the stratum listener.
    #[clap(long, default_value = "0.0.0.0:9327")]
    pub stratum_bind: SocketAddr,

    /// Peer bind: host/port for the peer listener. `0` picks the network's
    /// default peer port.
    #[clap(long, default_value = "0.0.0.0:0")]
    pub peer_bind: SocketAddr,

    /// Peer bootstrap: seed `host:port` list, comma-separated; falls back
    /// to no seeds (an operator-supplied list is required for first sync).
    #[clap(long, value_delimiter = ',')]
    pub peer_seeds: Vec<SocketAddr>,

    /// Connection limits.
    #[clap(long, default_value_t = 32)]
    pub max_inbound_peers: usize,
    #[clap(long, default_value_t = 8)]
    pub max_outbound_peers: usize,

    /// Data directory: root of the share log, archive, address book.
    #[clap(long, default_value = "./p2pool-data")]
    pub data_dir: PathBuf,

    /// Logging verbosity, 0 (error) through 4 (trace).
    #[clap(short, long, default_value_t = 2)]
    pub verbosity: u8,
}

/// The subset of `Cli` fields a TOML/env config file may also supply;
/// CLI flags that were explicitly passed win over the file, and the file
/// wins over clap's own defaults. `config` only overlays fields present in
/// the file, so every field here is optional.
#[derive(Debug, Deserialize, Default)]
struct FileSettings {
    network: Option<String>,
    parent_rpc_url: Option<String>,
    parent_rpc_user: Option<String>,
    parent_rpc_password: Option<String>,
    parent_p2p_addr: Option<String>,
    aux_rpc_url: Option<String>,
    aux_rpc_user: Option<String>,
    aux_rpc_password: Option<String>,
    payout_address: Option<String>,
    donation_percent: Option<u8>,
    donation_address: Option<String>,
    node_fee_percent: Option<u8>,
    node_fee_address: Option<String>,
    stratum_bind: Option<String>,
    peer_bind: Option<String>,
    peer_seeds: Option<Vec<String>>,
    max_inbound_peers: Option<usize>,
    max_outbound_peers: Option<usize>,
    data_dir: Option<String>,
    verbosity: Option<u8>,
}

/// Loads `path` (if given) through the `config` crate (TOML, plus
/// `P2POOL_*` environment overrides) and layers the already-parsed CLI
/// flags on top: any flag the operator actually typed wins; otherwise the
/// file's value is used if present, else clap's default stands.
pub fn load(cli: Cli) -> Result<Cli, ConfigError> {
    let mut builder = config::Config::builder();
    if let Some(path) = &cli.config {
        builder = builder.add_source(config::File::from(path.as_path()));
    }
    builder = builder.add_source(config::Environment::with_prefix("P2POOL"));
    let file: FileSettings = builder.build()?.try_deserialize().unwrap_or_default();

    let args: Vec<String> = std::env::args().collect();
    let flag_given = |name: &str| args.iter().any(|a| a == name || a.starts_with(&format!("{name}=")));

    let mut merged = cli;
    if !flag_given("--network") {
        if let Some(v) = file.network {
            merged.network = v;
        }
    }
    if !flag_given("--parent-rpc-url") {
        if let Some(v) = file.parent_rpc_url {
            merged.parent_rpc_url = v;
        }
    }
    if !flag_given("--parent-rpc-user") {
        if let Some(v) = file.parent_rpc_user {
            merged.parent_rpc_user = v;
        }
    }
    if !flag_given("--parent-rpc-password") {
        if let Some(v) = file.parent_rpc_password {
            merged.parent_rpc_password = v;
        }
    }
    if merged.parent_p2p_addr.is_none() {
        if let Some(v) = file.parent_p2p_addr {
            merged.parent_p2p_addr = Some(v.parse().map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                flag: "parent-p2p-addr",
                reason: format!("{e}"),
            })?);
        }
    }
    if merged.aux_rpc_url.is_none() {
        merged.aux_rpc_url = file.aux_rpc_url;
    }
    if !flag_given("--aux-rpc-user") {
        if let Some(v) = file.aux_rpc_user {
            merged.aux_rpc_user = v;
        }
    }
    if !flag_given("--aux-rpc-password") {
        if let Some(v) = file.aux_rpc_password {
            merged.aux_rpc_password = v;
        }
    }
    if !flag_given("--payout-address") {
        if let Some(v) = file.payout_address {
            merged.payout_address = v;
        }
    }
    if !flag_given("--donation-percent") {
        if let Some(v) = file.donation_percent {
            merged.donation_percent = v;
        }
    }
    if merged.donation_address.is_none() {
        merged.donation_address = file.donation_address;
    }
    if !flag_given("--node-fee-percent") {
        if let Some(v) = file.node_fee_percent {
            merged.node_fee_percent = v;
        }
    }
    if merged.node_fee_address.is_none() {
        merged.node_fee_address = file.node_fee_address;
    }
    if !flag_given("--stratum-bind") {
        if let Some(v) = file.stratum_bind {
            merged.stratum_bind = v.parse().map_err(|e| ConfigError::InvalidValue {
                flag: "stratum-bind",
                reason: format!("{e}"),
            })?;
        }
    }
    if !flag_given("--peer-bind") {
        if let Some(v) = file.peer_bind {
            merged.peer_bind = v.parse().map_err(|e| ConfigError::InvalidValue {
                flag: "peer-bind",
                reason: format!("{e}"),
            })?;
        }
    }
    if merged.peer_seeds.is_empty() {
        if let Some(seeds) = file.peer_seeds {
            merged.peer_seeds = seeds
                .iter()
                .map(|s| s.parse())
                .collect::<Result<_, _>>()
                .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                    flag: "peer-seeds",
                    reason: format!("{e}"),
                })?;
        }
    }
    if !flag_given("--max-inbound-peers") {
        if let Some(v) = file.max_inbound_peers {
            merged.max_inbound_peers = v;
        }
    }
    if !flag_given("--max-outbound-peers") {
        if let Some(v) = file.max_outbound_peers {
            merged.max_outbound_peers = v;
        }
    }
    if !flag_given("--data-dir") {
        if let Some(v) = file.data_dir {
            merged.data_dir = v.into();
        }
    }
    if !flag_given("--verbosity") && !flag_given("-v") {
        if let Some(v) = file.verbosity {
            merged.verbosity = v;
        }
    }

    Ok(merged)
}
