//! Peer-to-peer share propagation (C8, spec.md §4.8): binary framing
//! (`message`), connection lifecycle (`peer`), and the sync/gossip driver
//! (`sync`), wired together by `NetworkService`.
//!
//! Grounded on the teacher's `NetworkService`/`NetworkConfig` (`lib.rs`):
//! same "owns a `PeerManager`, exposes a command channel, runs a listener
//! plus a seed-dial pass" shape, generalized from the teacher's
//! block/transaction broadcast commands to share-chain tip announcement
//! and the `SyncDriver`'s event-driven backfill/gossip.

pub mod message;
pub mod peer;
pub mod sync;

pub use message::{Command, Frame, FrameCodec, MessageError};
pub use peer::{Direction, Peer, PeerError, PeerEvent, PeerInfo, PeerManager, PeerManagerConfig, PeerState};
pub use sync::{SyncDriver, SyncError};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use p2pool_consensus::{NetworkParams, ParentPow};
use p2pool_rpc::ParentRpc;
use spool::{AddressBook, ShareLog};
use tracker::Tracker;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer error: {0}")]
    Peer(#[from] PeerError),
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),
}

/// What the orchestrator (`main`) supplies at startup; mirrors the
/// teacher's `NetworkConfig` but keyed off `NetworkParams` for the magic
/// and default port instead of a hardcoded mainnet constant.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    pub seed_peers: Vec<SocketAddr>,
    pub max_outbound_connections: usize,
    pub max_inbound_connections: usize,
    pub software_id: String,
    pub ban_duration: Duration,
}

impl NetworkConfig {
    pub fn new(params: &NetworkParams, listen_host: std::net::IpAddr) -> Self {
        NetworkConfig {
            listen_addr: SocketAddr::new(listen_host, params.p2p_port),
            seed_peers: Vec::new(),
            max_outbound_connections: 8,
            max_inbound_connections: 32,
            software_id: format!("p2pool:{}", env!("CARGO_PKG_VERSION")),
            ban_duration: Duration::from_secs(24 * 3600),
        }
    }
}

/// Owns the listener, the `PeerManager`, and the `SyncDriver`; `start`
/// never returns while the listener is healthy.
pub struct NetworkService {
    config: NetworkConfig,
    magic: [u8; 4],
    peers: Arc<PeerManager>,
    driver: Arc<SyncDriver>,
}

impl NetworkService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: NetworkConfig,
        params: NetworkParams,
        tracker: Tracker,
        pow: Arc<dyn ParentPow>,
        accepted_versions: std::collections::HashSet<u16>,
        address_book: Arc<AddressBook>,
        parent_rpc: Option<Arc<ParentRpc>>,
        share_log: Option<Arc<ShareLog>>,
        donation_script: Vec<u8>,
    ) -> (Self, mpsc::Receiver<PeerEvent>) {
        let magic = params.p2p_magic;
        let (events_tx, events_rx) = mpsc::channel(1024);
        let manager_config = PeerManagerConfig {
            max_outbound: config.max_outbound_connections,
            max_inbound: config.max_inbound_connections,
            protocol_version: 1,
            software_id: config.software_id.clone(),
            listen_port: config.listen_addr.port(),
            self_nonce: rand::random(),
            ban_duration: config.ban_duration,
        };
        let peers = PeerManager::new(magic, manager_config, events_tx);
        let driver = SyncDriver::new(
            tracker,
            params,
            pow,
            accepted_versions,
            address_book,
            parent_rpc,
            peers.clone(),
            share_log,
            donation_script,
        );

        (NetworkService { config, magic, peers, driver }, events_rx)
    }

    pub fn peer_manager(&self) -> Arc<PeerManager> {
        self.peers.clone()
    }

    /// Binds the listener, dials seed peers, and spawns the sync driver's
    /// event loop. Returns once the listener itself fails; individual peer
    /// connections failing does not bring the service down.
    pub async fn run(self, events: mpsc::Receiver<PeerEvent>) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("listening for peers on {} (magic {:x?})", self.config.listen_addr, self.magic);

        tokio::spawn(self.driver.clone().run(events));

        for seed in self.config.seed_peers.clone() {
            let peers = self.peers.clone();
            tokio::spawn(async move {
                if let Err(err) = peers.connect(seed).await {
                    warn!("failed to dial seed peer {}: {}", seed, err);
                }
            });
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            let peers = self.peers.clone();
            tokio::spawn(async move {
                if let Err(err) = peers.accept(stream, addr).await {
                    error!("rejected inbound connection from {}: {}", addr, err);
                }
            });
        }
    }
}
