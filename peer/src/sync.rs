//! Share-chain sync driver (C8, spec.md §4.8): tip announcement, the
//! `getshares`/`shares` expanding-window backfill, and transaction gossip.
//! Consumes `PeerEvent`s handed off by `peer::PeerManager` once a
//! connection's handshake completes, so this module never touches raw
//! sockets — only the tracker, validator and address book.
//!
//! Grounded on the teacher's `SyncManager` (`network/src/sync.rs`): same
//! event-driven state-per-remote shape, generalized from the teacher's
//! simulated sleep-based header/block sync and "higher height wins" rule to
//! the tracker's own `TrackerError::Orphan`-driven predecessor walk and
//! cumulative-work tie-break (`Tracker::best_tip`).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

use p2pool_consensus::validator::{cheap_verify, contextual_verify, ValidationError};
use p2pool_consensus::{NetworkParams, ParentPow};
use p2pool_core::tx::Transaction;
use p2pool_core::Hash;
use p2pool_rpc::ParentRpc;
use spool::{AddressBook, ShareLog};
use tracker::{Tracker, TrackerError};

use crate::message::{
    AddrEntry, AddrsPayload, Command, GetSharesPayload, HaveTipPayload, SharesPayload, TxIdPayload, TxPayload,
};
use crate::peer::{Direction, PeerEvent, PeerManager};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer manager channel closed")]
    ChannelClosed,
}

/// Shares requested from a peer but not yet answered: the window grows
/// (doubling, capped) each time the peer's reply still leaves us with an
/// unknown predecessor.
#[derive(Debug, Clone)]
struct PendingBackfill {
    announced_tip: Hash,
    window: u32,
}

const INITIAL_BACKFILL_WINDOW: u32 = 64;
const MAX_BACKFILL_WINDOW: u32 = 8192;
const GETSHARES_MAX_COUNT: u32 = 500;
const ZERO_HASH: Hash = [0u8; 32];

/// Drives sync and gossip for every peer the manager hands events for.
/// Cloning is cheap; every clone shares the same state.
pub struct SyncDriver {
    tracker: Tracker,
    params: NetworkParams,
    pow: Arc<dyn ParentPow>,
    accepted_versions: HashSet<u16>,
    address_book: Arc<AddressBook>,
    parent_rpc: Option<Arc<ParentRpc>>,
    peers: Arc<PeerManager>,
    share_log: Option<Arc<ShareLog>>,
    donation_script: Vec<u8>,
    pending_backfill: RwLock<HashMap<std::net::SocketAddr, PendingBackfill>>,
    known_txs: RwLock<HashMap<Hash, Transaction>>,
}

impl SyncDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tracker: Tracker,
        params: NetworkParams,
        pow: Arc<dyn ParentPow>,
        accepted_versions: HashSet<u16>,
        address_book: Arc<AddressBook>,
        parent_rpc: Option<Arc<ParentRpc>>,
        peers: Arc<PeerManager>,
        share_log: Option<Arc<ShareLog>>,
        donation_script: Vec<u8>,
    ) -> Arc<Self> {
        Arc::new(SyncDriver {
            tracker,
            params,
            pow,
            accepted_versions,
            address_book,
            parent_rpc,
            peers,
            share_log,
            donation_script,
            pending_backfill: RwLock::new(HashMap::new()),
            known_txs: RwLock::new(HashMap::new()),
        })
    }

    /// Drains `events` until the channel closes (every peer connection has
    /// ended and the manager has been dropped).
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<PeerEvent>) -> Result<(), SyncError> {
        while let Some(event) = events.recv().await {
            let this = self.clone();
            match event {
                PeerEvent::Connected { addr, direction } => {
                    tokio::spawn(async move { this.on_connected(addr, direction).await });
                }
                PeerEvent::Disconnected { addr } => {
                    self.pending_backfill.write().await.remove(&addr);
                }
                PeerEvent::Message { addr, command, payload } => {
                    tokio::spawn(async move {
                        if let Err(err) = this.on_message(addr, command, payload).await {
                            debug!("error handling {:?} from {}: {}", command, addr, err);
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn on_connected(&self, addr: std::net::SocketAddr, _direction: Direction) {
        self.address_book.record_seen(&addr.ip().to_string(), addr.port()).await;
        let Some(peer) = self.peers.get(&addr).await else { return };

        if let Some(tip) = self.tracker.best_tip().await {
            let _ = peer.send_payload(Command::HaveTip, &HaveTipPayload { tip_hash: tip }).await;
        }

        let addrs = self
            .address_book
            .best(32)
            .await
            .into_iter()
            .map(|r| AddrEntry { host: r.host, port: r.port })
            .collect();
        let _ = peer.send_payload(Command::Addrs, &AddrsPayload { addrs }).await;
    }

    async fn on_message(
        &self,
        addr: std::net::SocketAddr,
        command: Command,
        payload: Vec<u8>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let Some(peer) = self.peers.get(&addr).await else {
            return Ok(());
        };

        match command {
            Command::HaveTip => {
                let msg: HaveTipPayload = decode(&payload)?;
                if self.tracker.get_entry(&msg.tip_hash).await.is_some() {
                    return Ok(());
                }
                self.begin_backfill(addr, msg.tip_hash, INITIAL_BACKFILL_WINDOW).await;
            }

            Command::GetShares => {
                let req: GetSharesPayload = decode(&payload)?;
                let max = req.max_count.min(GETSHARES_MAX_COUNT) as usize;
                let mut chain = self.tracker.get_chain(req.announced_tip, max).await;
                if req.known_hash != ZERO_HASH {
                    if let Some(pos) = chain.iter().position(|e| e.share.share_hash() == req.known_hash) {
                        chain.truncate(pos);
                    }
                }
                chain.reverse();
                let shares = chain.into_iter().map(|e| (*e.share).clone()).collect();
                peer.send_payload(Command::Shares, &SharesPayload { shares }).await?;
            }

            Command::Shares => {
                let msg: SharesPayload = decode(&payload)?;
                self.handle_shares(addr, msg).await;
            }

            Command::HaveTx => {
                let msg: TxIdPayload = decode(&payload)?;
                if !self.known_txs.read().await.contains_key(&msg.txid) {
                    peer.send_payload(Command::GetTx, &TxIdPayload { txid: msg.txid }).await?;
                }
            }

            Command::GetTx => {
                let msg: TxIdPayload = decode(&payload)?;
                if let Some(tx) = self.known_txs.read().await.get(&msg.txid).cloned() {
                    peer.send_payload(Command::Tx, &TxPayload { tx }).await?;
                }
            }

            Command::Tx => {
                let msg: TxPayload = decode(&payload)?;
                let txid = msg.tx.txid();
                let is_new = self.known_txs.write().await.insert(txid, msg.tx.clone()).is_none();
                if is_new {
                    if let Some(rpc) = &self.parent_rpc {
                        let raw_hex = hex::encode(p2pool_core::codec::encode_to_vec(&msg.tx));
                        if let Err(err) = rpc.send_raw_transaction(&raw_hex).await {
                            debug!("parent node rejected relayed tx {:x?}: {}", txid, err);
                        }
                    }
                    self.peers
                        .broadcast(Command::HaveTx, &TxIdPayload { txid }, Some(addr))
                        .await;
                }
            }

            Command::GetAddrs => {
                let addrs = self
                    .address_book
                    .best(32)
                    .await
                    .into_iter()
                    .map(|r| AddrEntry { host: r.host, port: r.port })
                    .collect();
                peer.send_payload(Command::Addrs, &AddrsPayload { addrs }).await?;
            }

            Command::Addrs => {
                let msg: AddrsPayload = decode(&payload)?;
                for entry in msg.addrs {
                    self.address_book.record_seen(&entry.host, entry.port).await;
                }
            }

            Command::Ping | Command::Pong | Command::Version | Command::VerAck => {
                // Handled inline by `peer::PeerManager`; never reaches here.
            }
        }

        Ok(())
    }

    async fn begin_backfill(&self, addr: std::net::SocketAddr, announced_tip: Hash, window: u32) {
        let Some(peer) = self.peers.get(&addr).await else { return };
        let known_hash = self.tracker.best_tip().await.unwrap_or(ZERO_HASH);
        self.pending_backfill
            .write()
            .await
            .insert(addr, PendingBackfill { announced_tip, window });
        let _ = peer
            .send_payload(
                Command::GetShares,
                &GetSharesPayload { announced_tip, known_hash, max_count: window },
            )
            .await;
    }

    async fn handle_shares(&self, addr: std::net::SocketAddr, msg: SharesPayload) {
        let mut orphaned = false;
        for share in msg.shares {
            let predecessor_timestamp = match share.info.info().predecessor {
                Some(pred) => self
                    .tracker
                    .get_entry(&pred)
                    .await
                    .map(|e| e.share.info.info().timestamp),
                None => None,
            };

            if let Err(err) = cheap_verify(
                &share,
                &self.params,
                self.pow.as_ref(),
                &self.accepted_versions,
                predecessor_timestamp,
            ) {
                warn!("rejecting share from {}: {}", addr, err);
                self.address_book.record_failure(&addr.ip().to_string(), addr.port()).await;
                continue;
            }

            // Contextual verification runs whenever the predecessor is
            // already known; a share whose predecessor hasn't arrived yet is
            // inserted unverified and re-checked once its parent attaches
            // (the tracker's own orphan-drain pass re-runs `insert_locked`,
            // but not contextual verification, so such shares stay
            // `verified: false` until a later backfill round revisits them).
            let verified = if let Some(pred_hash) = share.info.info().predecessor {
                match self.tracker.get_entry(&pred_hash).await {
                    Some(pred_entry) => {
                        let window = self.tracker.retarget_window(pred_hash, self.params.target_lookbehind).await;
                        let payout_window = self
                            .tracker
                            .window_shares(pred_hash, self.params.real_chain_length as usize)
                            .await;
                        let far_predecessor_candidate =
                            self.tracker.far_predecessor(pred_hash, self.params.chain_length).await;
                        match contextual_verify(
                            &share,
                            pred_entry.absheight,
                            pred_entry.abswork,
                            far_predecessor_candidate,
                            &window,
                            &payout_window,
                            &self.donation_script,
                            &self.params,
                        ) {
                            Ok(()) => true,
                            Err(err) => {
                                warn!("rejecting share from {}: {}", addr, err);
                                self.address_book.record_failure(&addr.ip().to_string(), addr.port()).await;
                                continue;
                            }
                        }
                    }
                    None => false,
                }
            } else {
                true
            };

            let log_copy = self.share_log.as_ref().map(|_| share.clone());
            match self.tracker.insert(share, verified).await {
                Ok(_) => {
                    self.address_book.record_success(&addr.ip().to_string(), addr.port()).await;
                    if let (Some(log), Some(share)) = (&self.share_log, log_copy) {
                        if let Err(err) = log.append(&share).await {
                            warn!("failed to persist peer-gossiped share: {}", err);
                        }
                    }
                }
                Err(TrackerError::Duplicate(_)) => {}
                Err(TrackerError::Above(_)) => {}
                Err(TrackerError::Orphan(_)) => orphaned = true,
            }
        }

        let pending = self.pending_backfill.read().await.get(&addr).cloned();
        if let Some(pending) = pending {
            if orphaned && pending.window < MAX_BACKFILL_WINDOW {
                self.begin_backfill(addr, pending.announced_tip, pending.window * 2).await;
            } else {
                self.pending_backfill.write().await.remove(&addr);
            }
        }
    }
}

fn decode<T: p2pool_core::codec::Decode>(bytes: &[u8]) -> Result<T, ValidationError> {
    p2pool_core::codec::decode_from_slice(bytes)
        .map_err(|_| ValidationError::Malformed("malformed peer message payload".to_string()))
}
