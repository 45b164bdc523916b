//! p2pool node entry point: CLI/config parsing, startup wiring of C1-C9,
//! and the periodic job/prune/flush loops that keep the node alive.
//!
//! Grounded on the teacher's `src/main.rs` (`Cli`/`Commands`,
//! `init_logging`, `parse_address` shape, spawning background tasks off
//! `main`) and `mining/src/pool.rs::MiningPool::start`'s periodic-task
//! pattern, generalized from a single-chain miner node into the operator
//! orchestrator spec.md §6 describes: parent/aux RPC reachability gates
//! startup, C9's spool recovers into C2's tracker, C5/C6/C7 serve miners,
//! C8 gossips shares to peers, and C2/C9 periodically prune/archive/flush.

mod config;

use std::collections::HashSet;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::mpsc;
use tokio::time;

use p2pool_consensus::{NetworkParams, ParentPow, Sha256dPow};
use p2pool_core::share::Share;
use p2pool_crypto::PayoutAddress;
use p2pool_rpc::{AuxRpc, ParentP2pBroadcaster, ParentRpc, RpcClient, RpcEndpoint};
use p2pool_stratum::{ShareBroadcaster, StratumServer, SubmissionPipeline};
use p2pool_work::{FinderContext, JobCache, NodeFeeConfig, WorkComposer, DEFAULT_JOB_TTL_SECONDS};
use peer::message::SharesPayload;
use peer::{NetworkConfig, NetworkService};
use spool::{ShareLog, Spool};
use tracker::Tracker;

use config::Cli;

/// Share-chain versions this node will accept in `cheap_verify`; kept in
/// sync with `p2pool_core::share::ShareVariant`'s tagged union.
const ACCEPTED_SHARE_VERSIONS: [u16; 5] = [17, 33, 34, 35, 36];

/// The default coinbase tag prefixed to every job this node composes,
/// identifying the software the way the teacher's `MiningJobManager`
/// embedded its own pool name.
const COINBASE_TAG: &[u8] = b"/p2pool-rs/";

/// Periodic intervals for the background tasks `run` spawns.
const JOB_REFRESH_INTERVAL: Duration = Duration::from_secs(20);
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const ADDRESS_BOOK_FLUSH_INTERVAL: Duration = Duration::from_secs(300);

fn init_logging(verbosity: u8) {
    let log_level = match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();
}

/// Decode a base58check payout address into a P2PKH scriptPubKey, the same
/// script shape `p2pool_stratum::username` builds for `mining.authorize`.
fn parse_payout_script(address: &str) -> Result<Vec<u8>, String> {
    let decoded = PayoutAddress::from_base58check(address).map_err(|e| e.to_string())?;
    Ok(p2pool_stratum::username::p2pkh_script(&decoded.payload))
}

/// Broadcasts locally-found network shares (C7's tier-three acceptance) to
/// the P2P network (C8) and persists them to the spool (C9) — the tracker
/// itself (C2) only indexes in memory, so nothing else writes these to
/// disk for a locally-found share.
struct PeerShareBroadcaster {
    peers: Arc<peer::PeerManager>,
    share_log: Arc<ShareLog>,
}

impl ShareBroadcaster for PeerShareBroadcaster {
    fn broadcast(&self, share: &Share) {
        let peers = self.peers.clone();
        let share_log = self.share_log.clone();
        let share = share.clone();
        tokio::spawn(async move {
            if let Err(err) = share_log.append(&share).await {
                warn!("failed to persist locally-found share: {}", err);
            }
            peers
                .broadcast(peer::Command::Shares, &SharesPayload { shares: vec![share] }, None)
                .await;
        });
    }
}

fn main() -> ExitCode {
    let cli = match config::load(Cli::parse()) {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(1);
        }
    };

    init_logging(cli.verbosity);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start async runtime: {err}");
            return ExitCode::from(3);
        }
    };

    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> ExitCode {
    let params = match cli.network.as_str() {
        "mainnet" => NetworkParams::mainnet(),
        "testnet" => NetworkParams::testnet(),
        "regtest" => NetworkParams::regtest(),
        other => {
            error!("unknown --network {other:?}: expected mainnet, testnet, or regtest");
            return ExitCode::from(1);
        }
    };
    info!("network: {:?}", params.network);

    let payout_script = match parse_payout_script(&cli.payout_address) {
        Ok(script) => script,
        Err(err) => {
            error!("invalid --payout-address: {err}");
            return ExitCode::from(1);
        }
    };
    let donation_address = cli.donation_address.as_deref().unwrap_or(&cli.payout_address);
    let donation_script = match parse_payout_script(donation_address) {
        Ok(script) => script,
        Err(err) => {
            error!("invalid --donation-address: {err}");
            return ExitCode::from(1);
        }
    };
    let donation_fraction = percent_to_fraction(cli.donation_percent);

    let node_fee = if cli.node_fee_percent > 0 {
        let fee_address = cli.node_fee_address.as_deref().unwrap_or(&cli.payout_address);
        match parse_payout_script(fee_address) {
            Ok(script) => Some(NodeFeeConfig {
                fraction: percent_to_fraction(cli.node_fee_percent),
                script,
            }),
            Err(err) => {
                error!("invalid --node-fee-address: {err}");
                return ExitCode::from(1);
            }
        }
    } else {
        None
    };

    let spool = match Spool::open(&cli.data_dir).await {
        Ok(spool) => spool,
        Err(err) => {
            error!("failed to open data directory {:?}: {}", cli.data_dir, err);
            return ExitCode::from(1);
        }
    };
    let Spool { shares: share_log, peers: address_book } = spool;
    let share_log = Arc::new(share_log);
    let address_book = Arc::new(address_book);

    let tracker = Tracker::new();
    match share_log.replay() {
        Ok(recovered) => {
            let count = recovered.len();
            for share in recovered {
                // Already accepted once before the previous shutdown; replay
                // restores the tracker to its pre-shutdown state rather than
                // re-running validation.
                if let Err(err) = tracker.insert(share, true).await {
                    warn!("dropping unreplayable share during recovery: {}", err);
                }
            }
            info!("recovered {} shares from the spool", count);
        }
        Err(err) => warn!("failed to replay share log: {}", err),
    }

    let parent_endpoint = RpcEndpoint {
        url: cli.parent_rpc_url.clone(),
        user: cli.parent_rpc_user.clone(),
        password: cli.parent_rpc_password.clone(),
    };
    let parent_client = RpcClient::new(parent_endpoint);
    let parent_rpc_for_work = ParentRpc::new(parent_client.clone());
    let parent_rpc = Arc::new(ParentRpc::new(parent_client));

    if let Err(err) = parent_rpc.check_reachable().await {
        error!("parent node unreachable at startup: {}", err);
        return ExitCode::from(2);
    }
    info!("parent node reachable at {}", cli.parent_rpc_url);

    let parent_p2p = cli.parent_p2p_addr.map(|addr| {
        let magic = match cli.network.as_str() {
            "mainnet" => p2pool_rpc::MAINNET_MAGIC,
            "testnet" => p2pool_rpc::TESTNET_MAGIC,
            _ => p2pool_rpc::REGTEST_MAGIC,
        };
        info!("direct P2P block broadcast enabled, parent node at {}", addr);
        Arc::new(ParentP2pBroadcaster::new(addr, magic))
    });

    let (aux_rpc_for_work, aux_rpc) = match &cli.aux_rpc_url {
        Some(url) => {
            let endpoint = RpcEndpoint {
                url: url.clone(),
                user: cli.aux_rpc_user.clone(),
                password: cli.aux_rpc_password.clone(),
            };
            let aux_client = RpcClient::new(endpoint);
            (Some(AuxRpc::new(aux_client.clone())), Some(Arc::new(AuxRpc::new(aux_client))))
        }
        None => (None, None),
    };

    let pow: Arc<dyn ParentPow> = Arc::new(Sha256dPow);
    let accepted_versions: HashSet<u16> = ACCEPTED_SHARE_VERSIONS.into_iter().collect();

    let peer_bind = if cli.peer_bind.port() == 0 {
        std::net::SocketAddr::new(cli.peer_bind.ip(), params.p2p_port)
    } else {
        cli.peer_bind
    };
    let network_config = NetworkConfig {
        listen_addr: peer_bind,
        seed_peers: cli.peer_seeds.clone(),
        max_outbound_connections: cli.max_outbound_peers,
        max_inbound_connections: cli.max_inbound_peers,
        software_id: format!("p2pool-rs:{}", env!("CARGO_PKG_VERSION")),
        ban_duration: Duration::from_secs(24 * 3600),
    };
    let (network_service, peer_events): (NetworkService, mpsc::Receiver<peer::PeerEvent>) = NetworkService::new(
        network_config,
        params.clone(),
        tracker.clone(),
        pow.clone(),
        accepted_versions.clone(),
        address_book.clone(),
        Some(parent_rpc.clone()),
        Some(share_log.clone()),
        donation_script.clone(),
    );
    let peer_manager = network_service.peer_manager();

    let broadcaster = Arc::new(PeerShareBroadcaster {
        peers: peer_manager.clone(),
        share_log: share_log.clone(),
    });

    let job_cache = Arc::new(JobCache::new(DEFAULT_JOB_TTL_SECONDS));
    let work_composer = Arc::new(WorkComposer::new(
        parent_rpc_for_work,
        aux_rpc_for_work,
        tracker.clone(),
        params.clone(),
        donation_script.clone(),
        node_fee,
        4,
        COINBASE_TAG.to_vec(),
    ));

    let pipeline = Arc::new(SubmissionPipeline::new(
        job_cache.clone(),
        tracker.clone(),
        params.clone(),
        pow.clone(),
        parent_rpc.clone(),
        parent_p2p,
        aux_rpc.clone(),
        accepted_versions.clone(),
        Some(broadcaster.clone()),
        donation_script,
    ));

    let stratum_server = Arc::new(StratumServer::new(cli.stratum_bind, 4, 4, pipeline));

    info!("starting mining RPC server on {}", cli.stratum_bind);
    let mut stratum_task = {
        let server = stratum_server.clone();
        tokio::spawn(async move {
            if let Err(err) = server.run().await {
                error!("mining RPC server stopped: {}", err);
            }
        })
    };

    info!("starting peer service on {}", peer_bind);
    let mut peer_task = tokio::spawn(async move {
        if let Err(err) = network_service.run(peer_events).await {
            error!("peer service stopped: {}", err);
        }
    });

    let job_refresh_task = {
        let work_composer = work_composer.clone();
        let job_cache = job_cache.clone();
        let stratum_server = stratum_server.clone();
        let finder = FinderContext {
            payout_script,
            donation_fraction,
            desired_version: 36,
        };
        tokio::spawn(async move {
            let mut interval = time::interval(JOB_REFRESH_INTERVAL);
            let mut first = true;
            loop {
                interval.tick().await;
                let evicted = job_cache.evict_expired(p2pool_core::current_timestamp() as u32).await;
                if evicted > 0 {
                    info!("evicted {} expired jobs", evicted);
                }
                match work_composer.compose(&finder, first).await {
                    Ok(job) => {
                        first = false;
                        job_cache.insert(job.clone()).await;
                        stratum_server.broadcast_job(job).await;
                    }
                    Err(err) => warn!("failed to compose a new job: {}", err),
                }
            }
        })
    };

    let maintenance_task = {
        let tracker = tracker.clone();
        let share_log = share_log.clone();
        let address_book = address_book.clone();
        let params = params.clone();
        tokio::spawn(async move {
            let mut prune_interval = time::interval(PRUNE_INTERVAL);
            let mut flush_interval = time::interval(ADDRESS_BOOK_FLUSH_INTERVAL);
            loop {
                tokio::select! {
                    _ = prune_interval.tick() => {
                        if let Some(tip) = tracker.best_tip().await {
                            let pruned = tracker.prune(tip, params.retention).await;
                            if !pruned.is_empty() {
                                let shares: Vec<Share> = pruned.iter().map(|e| (*e.share).clone()).collect();
                                if let Err(err) = share_log.archive(&shares).await {
                                    warn!("failed to archive pruned shares: {}", err);
                                } else {
                                    info!("archived {} pruned shares", shares.len());
                                }
                            }
                        }
                    }
                    _ = flush_interval.tick() => {
                        if let Err(err) = address_book.save().await {
                            warn!("failed to flush address book: {}", err);
                        }
                    }
                }
            }
        })
    };

    let shutdown = tokio::signal::ctrl_c();
    tokio::select! {
        result = shutdown => {
            if let Err(err) = result {
                error!("failed to listen for shutdown signal: {}", err);
            }
            info!("shutting down");
            stratum_task.abort();
            peer_task.abort();
            job_refresh_task.abort();
            maintenance_task.abort();
            if let Err(err) = address_book.save().await {
                warn!("failed to flush address book on shutdown: {}", err);
            }
            ExitCode::from(0)
        }
        _ = &mut stratum_task => {
            error!("mining RPC server task exited unexpectedly");
            ExitCode::from(3)
        }
        _ = &mut peer_task => {
            error!("peer service task exited unexpectedly");
            ExitCode::from(3)
        }
    }
}

fn percent_to_fraction(percent: u8) -> u16 {
    ((percent.min(100) as u32 * 65535) / 100) as u16
}
