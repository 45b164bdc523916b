//! Connection lifecycle (C8, spec.md §4.8): per-peer framing, the
//! version/verack handshake with self-connection detection, rate limiting
//! and scoring, and the outbound send queue. Protocol *semantics* (sync,
//! tx gossip) live in `sync.rs`; this module only owns the wire.
//!
//! Grounded on the teacher's `Peer`/`PeerManager` (`network/src/peer.rs`):
//! same `tokio::io::split` + mpsc outbox shape, generalized from the
//! teacher's stubbed `send_*` methods (`let payload = vec![]; // Placeholder`)
//! into a real read/write loop over `FrameCodec`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, RwLock};
use tokio_util::codec::Framed;

use p2pool_core::codec::Encode;
use p2pool_core::Hash;

use crate::message::{Command, Frame, FrameCodec, MessageError, NoncePayload, VersionPayload};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing error: {0}")]
    Message(#[from] MessageError),
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("peer is banned")]
    Banned,
    #[error("connection limit reached")]
    ConnectionLimitReached,
    #[error("already connected to peer")]
    AlreadyConnected,
    #[error("peer exceeded its rate limit")]
    RateLimited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Handshaking,
    Ready,
    Disconnected,
}

/// Sliding-window abuse tracker (spec.md §4.8: "rate limiting & scoring").
/// Thresholds are generous defaults, not protocol-significant constants.
struct RateLimiter {
    window_start: Instant,
    bytes_in_window: u64,
    invalid_in_window: u32,
}

const RATE_WINDOW: Duration = Duration::from_secs(10);
const MAX_BYTES_PER_WINDOW: u64 = 8 * 1024 * 1024;
const MAX_INVALID_PER_WINDOW: u32 = 20;

impl RateLimiter {
    fn new() -> Self {
        RateLimiter {
            window_start: Instant::now(),
            bytes_in_window: 0,
            invalid_in_window: 0,
        }
    }

    fn roll_window(&mut self) {
        if self.window_start.elapsed() >= RATE_WINDOW {
            self.window_start = Instant::now();
            self.bytes_in_window = 0;
            self.invalid_in_window = 0;
        }
    }

    fn record_bytes(&mut self, n: u64) -> bool {
        self.roll_window();
        self.bytes_in_window += n;
        self.bytes_in_window <= MAX_BYTES_PER_WINDOW
    }

    fn record_invalid(&mut self) -> bool {
        self.roll_window();
        self.invalid_in_window += 1;
        self.invalid_in_window <= MAX_INVALID_PER_WINDOW
    }
}

#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub addr: SocketAddr,
    pub direction: Direction,
    pub software_id: String,
    pub protocol_version: u32,
    pub listen_port: u16,
    pub connected_since: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub tip_hash: Option<Hash>,
}

/// A message the sync driver cares about, handed off by `handle_connection`
/// once the handshake completes. Ping/pong are answered inline and never
/// surface here.
#[derive(Debug)]
pub enum PeerEvent {
    Connected { addr: SocketAddr, direction: Direction },
    Disconnected { addr: SocketAddr },
    Message { addr: SocketAddr, command: Command, payload: Vec<u8> },
}

pub struct Peer {
    addr: SocketAddr,
    direction: Direction,
    info: RwLock<PeerInfo>,
    state: RwLock<PeerState>,
    outbox: mpsc::Sender<Frame>,
    rate: tokio::sync::Mutex<RateLimiter>,
}

impl Peer {
    fn new(addr: SocketAddr, direction: Direction, outbox: mpsc::Sender<Frame>) -> Self {
        let info = PeerInfo {
            addr,
            direction,
            software_id: String::new(),
            protocol_version: 0,
            listen_port: 0,
            connected_since: p2pool_core::current_timestamp(),
            bytes_sent: 0,
            bytes_received: 0,
            tip_hash: None,
        };
        Peer {
            addr,
            direction,
            info: RwLock::new(info),
            state: RwLock::new(PeerState::Handshaking),
            outbox,
            rate: tokio::sync::Mutex::new(RateLimiter::new()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub async fn info(&self) -> PeerInfo {
        self.info.read().await.clone()
    }

    pub async fn state(&self) -> PeerState {
        *self.state.read().await
    }

    async fn set_state(&self, state: PeerState) {
        *self.state.write().await = state;
    }

    pub async fn send(&self, frame: Frame) -> Result<(), PeerError> {
        self.outbox
            .send(frame)
            .await
            .map_err(|_| PeerError::Handshake("send queue closed".to_string()))
    }

    pub async fn send_payload<T: Encode>(&self, command: Command, payload: &T) -> Result<(), PeerError> {
        self.send(Frame::new(command, payload)).await
    }

    pub async fn send_ping(&self, nonce: u64) -> Result<(), PeerError> {
        self.send_payload(Command::Ping, &NoncePayload { nonce }).await
    }
}

/// Configuration a `PeerManager` needs from the orchestrator: connection
/// caps, this node's own handshake identity, and the self-connection nonce.
#[derive(Debug, Clone)]
pub struct PeerManagerConfig {
    pub max_outbound: usize,
    pub max_inbound: usize,
    pub protocol_version: u32,
    pub software_id: String,
    pub listen_port: u16,
    pub self_nonce: u64,
    pub ban_duration: Duration,
}

pub struct PeerManager {
    magic: [u8; 4],
    config: PeerManagerConfig,
    peers: RwLock<HashMap<SocketAddr, Arc<Peer>>>,
    banned: RwLock<HashMap<SocketAddr, Instant>>,
    events: mpsc::Sender<PeerEvent>,
}

impl PeerManager {
    pub fn new(magic: [u8; 4], config: PeerManagerConfig, events: mpsc::Sender<PeerEvent>) -> Arc<Self> {
        Arc::new(PeerManager {
            magic,
            config,
            peers: RwLock::new(HashMap::new()),
            banned: RwLock::new(HashMap::new()),
            events,
        })
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn connected_peers(&self) -> Vec<PeerInfo> {
        let mut out = Vec::new();
        for peer in self.peers.read().await.values() {
            if peer.state().await == PeerState::Ready {
                out.push(peer.info().await);
            }
        }
        out
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<Arc<Peer>> {
        self.peers.read().await.get(addr).cloned()
    }

    pub async fn is_banned(&self, addr: &SocketAddr) -> bool {
        match self.banned.read().await.get(addr) {
            Some(until) => Instant::now() < *until,
            None => false,
        }
    }

    pub async fn ban(self: &Arc<Self>, addr: SocketAddr) {
        warn!("banning peer {} for {:?}", addr, self.config.ban_duration);
        self.banned
            .write()
            .await
            .insert(addr, Instant::now() + self.config.ban_duration);
        self.disconnect(&addr).await;
    }

    pub async fn disconnect(&self, addr: &SocketAddr) {
        if let Some(peer) = self.peers.write().await.remove(addr) {
            peer.set_state(PeerState::Disconnected).await;
        }
    }

    /// Broadcast a frame to every `Ready` peer except `exclude`.
    pub async fn broadcast<T: Encode>(&self, command: Command, payload: &T, exclude: Option<SocketAddr>) {
        let peers = self.peers.read().await;
        for peer in peers.values() {
            if Some(peer.addr()) == exclude {
                continue;
            }
            if peer.state().await != PeerState::Ready {
                continue;
            }
            if let Err(err) = peer.send_payload(command, payload).await {
                warn!("failed to send {:?} to {}: {}", command, peer.addr(), err);
            }
        }
    }

    /// Dial an outbound peer and drive its connection to completion.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<(), PeerError> {
        if self.is_banned(&addr).await {
            return Err(PeerError::Banned);
        }
        if self.peers.read().await.contains_key(&addr) {
            return Err(PeerError::AlreadyConnected);
        }
        let outbound_count = {
            let peers = self.peers.read().await;
            peers.values().filter(|p| p.direction() == Direction::Outbound).count()
        };
        if outbound_count >= self.config.max_outbound {
            return Err(PeerError::ConnectionLimitReached);
        }

        let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::Handshake("connection timed out".to_string()))??;

        self.spawn_connection(stream, addr, Direction::Outbound).await
    }

    /// Accept and drive an inbound peer.
    pub async fn accept(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<(), PeerError> {
        if self.is_banned(&addr).await {
            return Err(PeerError::Banned);
        }
        let inbound_count = {
            let peers = self.peers.read().await;
            peers.values().filter(|p| p.direction() == Direction::Inbound).count()
        };
        if inbound_count >= self.config.max_inbound {
            return Err(PeerError::ConnectionLimitReached);
        }
        self.spawn_connection(stream, addr, Direction::Inbound).await
    }

    async fn spawn_connection(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        direction: Direction,
    ) -> Result<(), PeerError> {
        let (outbox_tx, outbox_rx) = mpsc::channel(256);
        let peer = Arc::new(Peer::new(addr, direction, outbox_tx));
        self.peers.write().await.insert(addr, peer.clone());

        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.clone().run_connection(peer.clone(), stream, outbox_rx).await {
                debug!("connection to {} ended: {}", addr, err);
            }
            manager.peers.write().await.remove(&addr);
            let _ = manager
                .events
                .send(PeerEvent::Disconnected { addr })
                .await;
        });

        Ok(())
    }

    async fn run_connection<T>(
        self: Arc<Self>,
        peer: Arc<Peer>,
        stream: T,
        mut outbox_rx: mpsc::Receiver<Frame>,
    ) -> Result<(), PeerError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = Framed::new(stream, FrameCodec::new(self.magic));
        let (mut sink, mut stream) = framed.split();

        let our_version = VersionPayload {
            protocol_version: self.config.protocol_version,
            software_id: self.config.software_id.clone(),
            timestamp: p2pool_core::current_timestamp(),
            listen_port: self.config.listen_port,
            nonce: self.config.self_nonce,
        };
        sink.send(Frame::new(Command::Version, &our_version)).await?;

        let their_version = match stream.next().await {
            Some(Ok(frame)) if frame.command == Command::Version => {
                frame.decode_payload::<VersionPayload>()?
            }
            Some(Ok(other)) => {
                return Err(PeerError::Handshake(format!(
                    "expected version, got {:?}",
                    other.command
                )))
            }
            Some(Err(err)) => return Err(err.into()),
            None => return Err(PeerError::Handshake("connection closed during handshake".to_string())),
        };

        if their_version.nonce == self.config.self_nonce {
            info!("dropping self-connection to {}", peer.addr());
            return Ok(());
        }

        sink.send(Frame::empty(Command::VerAck)).await?;
        match stream.next().await {
            Some(Ok(frame)) if frame.command == Command::VerAck => {}
            Some(Ok(other)) => {
                return Err(PeerError::Handshake(format!("expected verack, got {:?}", other.command)))
            }
            Some(Err(err)) => return Err(err.into()),
            None => return Err(PeerError::Handshake("connection closed before verack".to_string())),
        }

        {
            let mut info = peer.info.write().await;
            info.software_id = their_version.software_id;
            info.protocol_version = their_version.protocol_version;
            info.listen_port = their_version.listen_port;
        }
        peer.set_state(PeerState::Ready).await;
        info!("peer {} ready ({})", peer.addr(), peer.info().await.software_id);
        let _ = self
            .events
            .send(PeerEvent::Connected { addr: peer.addr(), direction: peer.direction() })
            .await;

        let writer_peer = peer.clone();
        let writer = tokio::spawn(async move {
            while let Some(frame) = outbox_rx.recv().await {
                let sent_bytes = frame.payload.len() as u64;
                if let Err(err) = sink.send(frame).await {
                    warn!("write error to {}: {}", writer_peer.addr(), err);
                    break;
                }
                writer_peer.info.write().await.bytes_sent += sent_bytes;
            }
        });

        loop {
            let frame = match stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => {
                    let mut rate = peer.rate.lock().await;
                    if !rate.record_invalid() {
                        return Err(PeerError::RateLimited);
                    }
                    drop(rate);
                    return Err(err.into());
                }
                None => break,
            };

            {
                let mut info = peer.info.write().await;
                info.bytes_received += frame.payload.len() as u64;
                let mut rate = peer.rate.lock().await;
                if !rate.record_bytes(frame.payload.len() as u64) {
                    return Err(PeerError::RateLimited);
                }
            }

            match frame.command {
                Command::Ping => {
                    let nonce_payload: NoncePayload = frame.decode_payload()?;
                    peer.send_payload(Command::Pong, &nonce_payload).await.ok();
                }
                Command::Pong => {}
                Command::Version | Command::VerAck => {
                    // Already consumed during the handshake; a peer resending
                    // these afterward is ignored rather than treated as fatal.
                }
                other => {
                    let _ = self
                        .events
                        .send(PeerEvent::Message { addr: peer.addr(), command: other, payload: frame.payload })
                        .await;
                }
            }
        }

        writer.abort();
        Ok(())
    }
}
