//! P2P wire framing (C8, spec.md §4.8): a length-prefixed binary envelope
//! around payloads that are themselves encoded with the C1 binary codec
//! rather than `serde_json`, so a share or transaction travels over the
//! wire in exactly the bytes `p2pool_core::codec` already knows how to
//! produce and consume.
//!
//! Grounded on the teacher's `Message`/`MessageType` (`network/src/message.rs`):
//! same magic + command + length + checksum + payload shape, but the
//! checksum is a real double-SHA256 (the teacher's was a placeholder
//! CRC32-like routine) and the command table is P2Pool's steady-state set
//! instead of the teacher's 21-variant Bitcoin-clone enum.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

use p2pool_core::codec::{
    decode_bytes, decode_hash, decode_list, decode_varint, encode_bytes, encode_hash, encode_list,
    encode_varint, CodecError, Decode, Encode,
};
use p2pool_core::share::Share;
use p2pool_core::tx::Transaction;
use p2pool_core::Hash;
use p2pool_crypto::sha256d;

pub const COMMAND_LEN: usize = 12;
pub const HEADER_LEN: usize = 4 + COMMAND_LEN + 4 + 4;

/// Sanity bound against a hostile length prefix, not a protocol-significant
/// constant. A `shares` batch of `GETSHARES_MAX_COUNT` full shares comfortably
/// fits under this.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("frame magic does not match this network")]
    BadMagic,
    #[error("unknown command: {0:?}")]
    UnknownCommand([u8; COMMAND_LEN]),
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("payload too large: {0} bytes")]
    TooLarge(usize),
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// The steady-state command set (spec.md §4.8). Handshake (`version`,
/// `verack`) and steady-state commands share one envelope and one codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Version,
    VerAck,
    HaveTip,
    GetShares,
    Shares,
    HaveTx,
    GetTx,
    Tx,
    GetAddrs,
    Addrs,
    Ping,
    Pong,
}

impl Command {
    fn name(self) -> &'static str {
        match self {
            Command::Version => "version",
            Command::VerAck => "verack",
            Command::HaveTip => "have_tip",
            Command::GetShares => "getshares",
            Command::Shares => "shares",
            Command::HaveTx => "have_tx",
            Command::GetTx => "gettx",
            Command::Tx => "tx",
            Command::GetAddrs => "getaddrs",
            Command::Addrs => "addrs",
            Command::Ping => "ping",
            Command::Pong => "pong",
        }
    }

    fn to_bytes(self) -> [u8; COMMAND_LEN] {
        let mut out = [0u8; COMMAND_LEN];
        let name = self.name().as_bytes();
        out[..name.len()].copy_from_slice(name);
        out
    }

    fn from_bytes(bytes: &[u8; COMMAND_LEN]) -> Result<Self, MessageError> {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
        match &bytes[..end] {
            b"version" => Ok(Command::Version),
            b"verack" => Ok(Command::VerAck),
            b"have_tip" => Ok(Command::HaveTip),
            b"getshares" => Ok(Command::GetShares),
            b"shares" => Ok(Command::Shares),
            b"have_tx" => Ok(Command::HaveTx),
            b"gettx" => Ok(Command::GetTx),
            b"tx" => Ok(Command::Tx),
            b"getaddrs" => Ok(Command::GetAddrs),
            b"addrs" => Ok(Command::Addrs),
            b"ping" => Ok(Command::Ping),
            b"pong" => Ok(Command::Pong),
            _ => Err(MessageError::UnknownCommand(*bytes)),
        }
    }
}

/// A decoded frame: command plus its still-encoded payload. Handlers decode
/// the payload themselves once they know which `Command` it is.
#[derive(Debug, Clone)]
pub struct Frame {
    pub command: Command,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new<T: Encode>(command: Command, payload: &T) -> Self {
        let mut out = BytesMut::new();
        payload.encode(&mut out);
        Frame {
            command,
            payload: out.to_vec(),
        }
    }

    pub fn empty(command: Command) -> Self {
        Frame {
            command,
            payload: Vec::new(),
        }
    }

    pub fn decode_payload<T: Decode>(&self) -> Result<T, MessageError> {
        let mut buf = self.payload.as_slice();
        let value = T::decode(&mut buf)?;
        if !buf.is_empty() {
            return Err(MessageError::Malformed("trailing bytes after payload".to_string()));
        }
        Ok(value)
    }
}

/// `tokio_util::codec::{Decoder, Encoder}` implementation for `Frame`,
/// bound to one network's magic bytes at construction time (the teacher
/// hardcoded a single `NETWORK_MAGIC` constant; here it's an
/// `p2pool_consensus::NetworkParams::p2p_magic` value passed in by the
/// caller).
pub struct FrameCodec {
    magic: [u8; 4],
}

impl FrameCodec {
    pub fn new(magic: [u8; 4]) -> Self {
        FrameCodec { magic }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = MessageError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, MessageError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        if &src[0..4] != &self.magic[..] {
            return Err(MessageError::BadMagic);
        }
        let mut command_bytes = [0u8; COMMAND_LEN];
        command_bytes.copy_from_slice(&src[4..4 + COMMAND_LEN]);
        let len_offset = 4 + COMMAND_LEN;
        let payload_len =
            u32::from_le_bytes(src[len_offset..len_offset + 4].try_into().unwrap()) as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(MessageError::TooLarge(payload_len));
        }
        let checksum_offset = len_offset + 4;
        if src.len() < HEADER_LEN + payload_len {
            src.reserve(HEADER_LEN + payload_len - src.len());
            return Ok(None);
        }

        let mut expected_checksum = [0u8; 4];
        expected_checksum.copy_from_slice(&src[checksum_offset..checksum_offset + 4]);

        src.advance(HEADER_LEN);
        let payload = src.split_to(payload_len).to_vec();

        let actual_checksum = &sha256d(&payload)[..4];
        if actual_checksum != &expected_checksum[..] {
            return Err(MessageError::BadChecksum);
        }

        let command = Command::from_bytes(&command_bytes)?;
        Ok(Some(Frame { command, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = MessageError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), MessageError> {
        if frame.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MessageError::TooLarge(frame.payload.len()));
        }
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_slice(&self.magic);
        dst.put_slice(&frame.command.to_bytes());
        dst.put_u32_le(frame.payload.len() as u32);
        dst.put_slice(&sha256d(&frame.payload)[..4]);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}

fn encode_string(s: &str, out: &mut BytesMut) {
    encode_bytes(s.as_bytes(), out);
}

fn decode_string(buf: &mut &[u8]) -> p2pool_core::codec::Result<String> {
    let bytes = decode_bytes(buf)?;
    String::from_utf8(bytes).map_err(|_| CodecError::NonCanonical("payload is not valid utf-8"))
}

/// `version` handshake payload. Exchanged both ways immediately after the
/// TCP connection opens; `nonce` lets each side detect a connection to
/// itself (a self-dial sees its own nonce echoed back).
#[derive(Debug, Clone)]
pub struct VersionPayload {
    pub protocol_version: u32,
    pub software_id: String,
    pub timestamp: u64,
    pub listen_port: u16,
    pub nonce: u64,
}

impl Encode for VersionPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_varint(self.protocol_version as u64, out);
        encode_string(&self.software_id, out);
        encode_varint(self.timestamp, out);
        encode_varint(self.listen_port as u64, out);
        self.nonce.encode(out);
    }
}

impl Decode for VersionPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(VersionPayload {
            protocol_version: decode_varint(buf)? as u32,
            software_id: decode_string(buf)?,
            timestamp: decode_varint(buf)?,
            listen_port: decode_varint(buf)? as u16,
            nonce: u64::decode(buf)?,
        })
    }
}

/// Announces the sender's current best share-chain tip.
#[derive(Debug, Clone)]
pub struct HaveTipPayload {
    pub tip_hash: Hash,
}

impl Encode for HaveTipPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_hash(&self.tip_hash, out);
    }
}

impl Decode for HaveTipPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(HaveTipPayload { tip_hash: decode_hash(buf)? })
    }
}

/// Requests a backfill batch: shares on the chain ending at `announced_tip`,
/// walking back no further than `known_hash` (the all-zero hash if the
/// requester has nothing on that chain yet), up to `max_count` shares.
#[derive(Debug, Clone)]
pub struct GetSharesPayload {
    pub announced_tip: Hash,
    pub known_hash: Hash,
    pub max_count: u32,
}

impl Encode for GetSharesPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_hash(&self.announced_tip, out);
        encode_hash(&self.known_hash, out);
        encode_varint(self.max_count as u64, out);
    }
}

impl Decode for GetSharesPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(GetSharesPayload {
            announced_tip: decode_hash(buf)?,
            known_hash: decode_hash(buf)?,
            max_count: decode_varint(buf)? as u32,
        })
    }
}

/// A batch of shares, oldest first, answering a `getshares` request.
#[derive(Debug, Clone)]
pub struct SharesPayload {
    pub shares: Vec<Share>,
}

impl Encode for SharesPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_list(&self.shares, out);
    }
}

impl Decode for SharesPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(SharesPayload { shares: decode_list(buf)? })
    }
}

/// `have_tx` / `gettx`: both carry nothing but a transaction id.
#[derive(Debug, Clone)]
pub struct TxIdPayload {
    pub txid: Hash,
}

impl Encode for TxIdPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_hash(&self.txid, out);
    }
}

impl Decode for TxIdPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(TxIdPayload { txid: decode_hash(buf)? })
    }
}

#[derive(Debug, Clone)]
pub struct TxPayload {
    pub tx: Transaction,
}

impl Encode for TxPayload {
    fn encode(&self, out: &mut BytesMut) {
        self.tx.encode(out);
    }
}

impl Decode for TxPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(TxPayload { tx: Transaction::decode(buf)? })
    }
}

#[derive(Debug, Clone)]
pub struct AddrEntry {
    pub host: String,
    pub port: u16,
}

impl Encode for AddrEntry {
    fn encode(&self, out: &mut BytesMut) {
        encode_string(&self.host, out);
        encode_varint(self.port as u64, out);
    }
}

impl Decode for AddrEntry {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(AddrEntry {
            host: decode_string(buf)?,
            port: decode_varint(buf)? as u16,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AddrsPayload {
    pub addrs: Vec<AddrEntry>,
}

impl Encode for AddrsPayload {
    fn encode(&self, out: &mut BytesMut) {
        encode_list(&self.addrs, out);
    }
}

impl Decode for AddrsPayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(AddrsPayload { addrs: decode_list(buf)? })
    }
}

/// `ping` / `pong`: an echoed nonce, used for both liveness and RTT.
#[derive(Debug, Clone)]
pub struct NoncePayload {
    pub nonce: u64,
}

impl Encode for NoncePayload {
    fn encode(&self, out: &mut BytesMut) {
        self.nonce.encode(out);
    }
}

impl Decode for NoncePayload {
    fn decode(buf: &mut &[u8]) -> p2pool_core::codec::Result<Self> {
        Ok(NoncePayload { nonce: u64::decode(buf)? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn frame_round_trips_through_codec() {
        let mut codec = FrameCodec::new([0xaa, 0xbb, 0xcc, 0xdd]);
        let payload = NoncePayload { nonce: 424242 };
        let frame = Frame::new(Command::Ping, &payload);

        let mut buf = BytesMut::new();
        codec.encode(frame, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.command, Command::Ping);
        let decoded_payload: NoncePayload = decoded.decode_payload().unwrap();
        assert_eq!(decoded_payload.nonce, 424242);
        assert!(buf.is_empty());
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut writer = FrameCodec::new([1, 2, 3, 4]);
        let mut reader = FrameCodec::new([9, 9, 9, 9]);
        let mut buf = BytesMut::new();
        writer.encode(Frame::empty(Command::GetAddrs), &mut buf).unwrap();
        assert!(matches!(reader.decode(&mut buf), Err(MessageError::BadMagic)));
    }

    #[test]
    fn incomplete_frame_waits_for_more_data() {
        let mut codec = FrameCodec::new([1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(Command::HaveTip, &HaveTipPayload { tip_hash: [7u8; 32] }), &mut buf)
            .unwrap();
        let mut partial = buf.split_to(HEADER_LEN + 4);
        assert!(codec.decode(&mut partial).unwrap().is_none());
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let mut codec = FrameCodec::new([1, 2, 3, 4]);
        let mut buf = BytesMut::new();
        codec
            .encode(Frame::new(Command::Ping, &NoncePayload { nonce: 1 }), &mut buf)
            .unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xff;
        assert!(matches!(codec.decode(&mut buf), Err(MessageError::BadChecksum)));
    }
}
