//! Direct block broadcast to the parent chain's own P2P network (spec.md
//! §4.7: "broadcast via a direct connection to the parent chain's P2P port
//! when configured"). This supplements `ParentRpc::submit_block` rather than
//! replacing it — some parent nodes relay a freshly found block across their
//! P2P mesh faster than `submitblock`'s own validation-then-relay path, and
//! the feature is best-effort: a failure here never undoes the RPC
//! submission that already happened.
//!
//! Grounded on `peer::message`'s wire framing (magic / 12-byte command /
//! length / `sha256d`-truncated checksum) — the same shape, but framing the
//! parent chain's own node-to-node protocol rather than p2pool's share-gossip
//! protocol, so magic bytes and message types differ.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use p2pool_crypto::sha256d;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::error::RpcError;

const HEADER_LEN: usize = 24;
const COMMAND_LEN: usize = 12;
const PROTOCOL_VERSION: i32 = 70016;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Parent-chain network magic bytes. Distinct from
/// `p2pool_consensus::NetworkParams::p2p_magic`, which frames p2pool's own
/// share-gossip protocol between p2pool nodes, not the parent chain's.
pub const MAINNET_MAGIC: [u8; 4] = [0xf9, 0xbe, 0xb4, 0xd9];
pub const TESTNET_MAGIC: [u8; 4] = [0x0b, 0x11, 0x09, 0x07];
pub const REGTEST_MAGIC: [u8; 4] = [0xfa, 0xbf, 0xb5, 0xda];

fn command_bytes(name: &str) -> [u8; COMMAND_LEN] {
    let mut out = [0u8; COMMAND_LEN];
    out[..name.len()].copy_from_slice(name.as_bytes());
    out
}

fn frame(magic: [u8; 4], command: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&magic);
    out.extend_from_slice(&command_bytes(command));
    out.put_u32_le(payload.len() as u32);
    out.extend_from_slice(&sha256d(payload)[..4]);
    out.extend_from_slice(payload);
    out.to_vec()
}

/// Bare-minimum `version` payload: enough for a compliant node to complete
/// the handshake. `start_height` is left at zero and `relay` at `false` — we
/// never ask the peer to relay anything back to us.
fn version_payload(nonce: u64) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_i32_le(PROTOCOL_VERSION);
    buf.put_u64_le(0); // services
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    buf.put_i64_le(now as i64);
    buf.put_u64_le(0); // addr_recv.services
    buf.extend_from_slice(&[0u8; 16]); // addr_recv.ip
    buf.put_u16(0); // addr_recv.port
    buf.put_u64_le(0); // addr_from.services
    buf.extend_from_slice(&[0u8; 16]); // addr_from.ip
    buf.put_u16(0); // addr_from.port
    buf.put_u64_le(nonce);
    let user_agent = b"/p2pool-rs:broadcast/";
    buf.put_u8(user_agent.len() as u8);
    buf.extend_from_slice(user_agent);
    buf.put_i32_le(0); // start_height
    buf.put_u8(0); // relay
    buf.to_vec()
}

/// A one-shot connection to the parent chain's P2P listener: handshake,
/// push a single `block` message, disconnect. Never kept alive between
/// broadcasts — unlike the RPC client, there's no ongoing conversation to
/// maintain, just a found block to hand off as fast as possible.
pub struct ParentP2pBroadcaster {
    addr: SocketAddr,
    magic: [u8; 4],
}

impl ParentP2pBroadcaster {
    pub fn new(addr: SocketAddr, magic: [u8; 4]) -> Self {
        ParentP2pBroadcaster { addr, magic }
    }

    pub async fn broadcast_block(&self, raw_block: &[u8]) -> Result<(), RpcError> {
        let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| RpcError::P2pBroadcast("connect timed out".to_string()))?
            .map_err(|err| RpcError::P2pBroadcast(format!("connect failed: {err}")))?;

        let nonce = rand::thread_rng().next_u64();
        stream
            .write_all(&frame(self.magic, "version", &version_payload(nonce)))
            .await
            .map_err(|err| RpcError::P2pBroadcast(format!("send version failed: {err}")))?;

        timeout(HANDSHAKE_TIMEOUT, self.await_verack(&mut stream))
            .await
            .map_err(|_| RpcError::P2pBroadcast("handshake timed out".to_string()))??;

        stream
            .write_all(&frame(self.magic, "verack", &[]))
            .await
            .map_err(|err| RpcError::P2pBroadcast(format!("send verack failed: {err}")))?;

        stream
            .write_all(&frame(self.magic, "block", raw_block))
            .await
            .map_err(|err| RpcError::P2pBroadcast(format!("send block failed: {err}")))?;

        let _ = stream.shutdown().await;
        Ok(())
    }

    /// Reads frames until the peer's own `verack` arrives, ignoring its
    /// `version` and anything else sent before then (`ping`, `sendheaders`,
    /// feature-negotiation messages a modern node sends unprompted).
    async fn await_verack(&self, stream: &mut TcpStream) -> Result<(), RpcError> {
        let mut header = [0u8; HEADER_LEN];
        loop {
            stream
                .read_exact(&mut header)
                .await
                .map_err(|err| RpcError::P2pBroadcast(format!("read header failed: {err}")))?;
            if header[0..4] != self.magic {
                return Err(RpcError::P2pBroadcast("bad magic bytes from peer".to_string()));
            }
            let payload_len = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;
            let mut payload = vec![0u8; payload_len];
            if payload_len > 0 {
                stream
                    .read_exact(&mut payload)
                    .await
                    .map_err(|err| RpcError::P2pBroadcast(format!("read payload failed: {err}")))?;
            }
            let command = String::from_utf8_lossy(&header[4..4 + COMMAND_LEN])
                .trim_end_matches('\0')
                .to_string();
            if command == "verack" {
                return Ok(());
            }
        }
    }
}
