//! Mining RPC server (C6, spec.md §4.6): line-delimited JSON-RPC over TCP.
//!
//! Grounded on the teacher's `StratumServer`/`StratumSession`
//! (`mining/src/stratum.rs`): a `TcpListener` accept loop, `LinesCodec`
//! (64KB max line) over `FramedRead`, a per-connection `mpsc::channel`
//! feeding a dedicated writer task, and a periodic idle-connection sweep.
//! The teacher's session type carried a duplicated second `impl
//! StratumSession` block (a leftover authoring artifact); this rewrite folds
//! everything into one handler per connection instead of copying that.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, trace, warn};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time;
use tokio_util::codec::{FramedRead, LinesCodec};

use p2pool_work::MiningJob;

use crate::error::StratumError;
use crate::protocol::{StratumMethod, StratumNotification, StratumRequest, StratumResponse};
use crate::session::SessionState;
use crate::submission::{SubmissionParams, SubmissionPipeline, SubmitResult};
use crate::username::parse_username;

const MAX_LINE_LENGTH: usize = 65536;
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const OUTBOX_CAPACITY: usize = 100;

/// Stratum error codes (spec.md §4.6), the conventional mining-pool set;
/// `RejectReason::code` in `submission` mirrors the rest (21-23).
const ERR_OTHER: i32 = 20;
const ERR_UNAUTHORIZED: i32 = 24;

/// The version bits miners are permitted to roll, the ASICBoost-style
/// convention most Bitcoin-derived stratum pools grant.
const VERSION_ROLLING_MASK: u32 = 0x1fff_e000;

struct Connection {
    state: Mutex<SessionState>,
    outbox: mpsc::Sender<String>,
}

pub struct StratumServer {
    bind_addr: SocketAddr,
    extranonce1_len: usize,
    extranonce2_len: usize,
    pipeline: Arc<SubmissionPipeline>,
    connections: Arc<RwLock<HashMap<SocketAddr, Arc<Connection>>>>,
    current_job: Arc<RwLock<Option<MiningJob>>>,
}

impl StratumServer {
    pub fn new(
        bind_addr: SocketAddr,
        extranonce1_len: usize,
        extranonce2_len: usize,
        pipeline: Arc<SubmissionPipeline>,
    ) -> Self {
        StratumServer {
            bind_addr,
            extranonce1_len,
            extranonce2_len,
            pipeline,
            connections: Arc::new(RwLock::new(HashMap::new())),
            current_job: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn run(self: Arc<Self>) -> Result<(), StratumError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!("mining RPC server listening on {}", self.bind_addr);

        let cleanup_server = self.clone();
        tokio::spawn(async move {
            let mut interval = time::interval(CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                cleanup_server.cleanup_idle_connections().await;
            }
        });

        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("new mining connection from {addr}");
                    let server = self.clone();
                    tokio::spawn(async move {
                        server.handle_connection(socket, addr).await;
                    });
                }
                Err(err) => error!("error accepting mining connection: {err}"),
            }
        }
    }

    async fn cleanup_idle_connections(&self) {
        let mut stale = Vec::new();
        {
            let connections = self.connections.read().await;
            for (addr, conn) in connections.iter() {
                if conn.state.lock().await.idle_for() > IDLE_TIMEOUT {
                    stale.push(*addr);
                }
            }
        }
        if !stale.is_empty() {
            let mut connections = self.connections.write().await;
            for addr in &stale {
                info!("dropping idle mining connection {addr}");
                connections.remove(addr);
            }
        }
    }

    async fn handle_connection(&self, socket: tokio::net::TcpStream, addr: SocketAddr) {
        let subscription_id = format!("{:016x}", rand::random::<u64>());
        let extranonce1 = random_bytes(self.extranonce1_len);
        let state = SessionState::new(subscription_id, extranonce1, self.extranonce2_len);

        let (tx, mut rx) = mpsc::channel::<String>(OUTBOX_CAPACITY);
        let connection = Arc::new(Connection {
            state: Mutex::new(state),
            outbox: tx,
        });
        self.connections.write().await.insert(addr, connection.clone());

        let (reader, writer) = socket.into_split();
        let mut codec = LinesCodec::new();
        codec.set_max_length(MAX_LINE_LENGTH);
        let mut lines = FramedRead::new(reader, codec);
        let mut writer = tokio::io::BufWriter::new(writer);

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if writer.write_all(message.as_bytes()).await.is_err() || writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("mining connection {addr} read error: {err}");
                    break;
                }
            };
            trace!("{addr} -> {line}");
            let request: StratumRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(err) => {
                    debug!("malformed request from {addr}: {err}");
                    continue;
                }
            };
            connection.state.lock().await.touch();
            let response = self.dispatch(&connection, request).await;
            if let Some(response) = response {
                let _ = connection.outbox.send(serde_json::to_string(&response).unwrap()).await;
            }
        }

        info!("mining connection {addr} closed");
        self.connections.write().await.remove(&addr);
    }

    async fn dispatch(&self, conn: &Arc<Connection>, request: StratumRequest) -> Option<StratumResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);
        let method = StratumMethod::from(request.method.as_str());
        Some(match method {
            StratumMethod::Subscribe => self.handle_subscribe(conn, id).await,
            StratumMethod::Authorize => self.handle_authorize(conn, id, &request.params).await,
            StratumMethod::Configure => self.handle_configure(conn, id, &request.params).await,
            StratumMethod::Submit => self.handle_submit(conn, id, &request.params).await,
            StratumMethod::ExtranonceSubscribe => {
                conn.state.lock().await.subscribed_extranonce = true;
                StratumResponse::ok(id, Value::Bool(true))
            }
            StratumMethod::Unknown(name) => {
                StratumResponse::err(id, ERR_OTHER, &format!("unsupported method: {name}"))
            }
        })
    }

    async fn handle_subscribe(&self, conn: &Arc<Connection>, id: Value) -> StratumResponse {
        let state = conn.state.lock().await;
        let result = json!([
            [
                ["mining.set_difficulty", state.subscription_id],
                ["mining.notify", state.subscription_id],
            ],
            hex::encode(&state.extranonce1),
            state.extranonce2_len,
        ]);
        StratumResponse::ok(id, result)
    }

    async fn handle_configure(&self, conn: &Arc<Connection>, id: Value, params: &[Value]) -> StratumResponse {
        let extensions: Vec<String> = params
            .first()
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        let options = params.get(1).cloned().unwrap_or(Value::Null);

        let mut result = serde_json::Map::new();
        if extensions.iter().any(|e| e == "version-rolling") {
            let requested_mask = options
                .get("version-rolling.mask")
                .and_then(Value::as_str)
                .and_then(|s| u32::from_str_radix(s, 16).ok())
                .unwrap_or(VERSION_ROLLING_MASK);
            let granted_mask = requested_mask & VERSION_ROLLING_MASK;
            conn.state.lock().await.version_rolling_mask = Some(granted_mask);
            result.insert("version-rolling".to_string(), json!(true));
            result.insert("version-rolling.mask".to_string(), json!(format!("{:08x}", granted_mask)));
        }
        if extensions.iter().any(|e| e == "subscribe-extranonce") {
            conn.state.lock().await.subscribed_extranonce = true;
            result.insert("subscribe-extranonce".to_string(), json!(true));
        }
        StratumResponse::ok(id, Value::Object(result))
    }

    async fn handle_authorize(&self, conn: &Arc<Connection>, id: Value, params: &[Value]) -> StratumResponse {
        let Some(username) = params.first().and_then(Value::as_str) else {
            return StratumResponse::err(id, ERR_OTHER, "missing username");
        };
        // An invalid payout (a username whose address p2pkh_script can't
        // parse) gets a normal `result: false`, not an RPC error (spec.md
        // §4.6: "Returns true. Invalid payout -> false.").
        let parsed = match parse_username(username) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!("authorize with unparseable payout from {}: {}", self.bind_addr, err);
                return StratumResponse::ok(id, Value::Bool(false));
            }
        };

        let share_difficulty;
        {
            let mut state = conn.state.lock().await;
            state.authorize(parsed);
            share_difficulty = state.share_difficulty;
        }

        info!("worker authorized on {}", self.bind_addr);
        self.push_to(conn, StratumNotification::new("mining.set_difficulty", vec![json!(share_difficulty)]))
            .await;

        if let Some(job) = self.current_job.read().await.as_ref() {
            self.push_to(conn, notify_from_job(job, true)).await;
        }

        StratumResponse::ok(id, Value::Bool(true))
    }

    async fn handle_submit(&self, conn: &Arc<Connection>, id: Value, params: &[Value]) -> StratumResponse {
        let Some(job_id) = params.get(1).and_then(Value::as_str) else {
            return StratumResponse::err(id, ERR_OTHER, "malformed submission");
        };
        let Some(extranonce2) = params
            .get(2)
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok())
        else {
            return StratumResponse::err(id, ERR_OTHER, "malformed submission");
        };
        let Some(ntime) = params
            .get(3)
            .and_then(Value::as_str)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
        else {
            return StratumResponse::err(id, ERR_OTHER, "malformed submission");
        };
        let Some(nonce) = params
            .get(4)
            .and_then(Value::as_str)
            .and_then(|s| u32::from_str_radix(s, 16).ok())
        else {
            return StratumResponse::err(id, ERR_OTHER, "malformed submission");
        };
        let version_bits = params
            .get(5)
            .and_then(Value::as_str)
            .and_then(|s| u32::from_str_radix(s, 16).ok());

        let session = conn.state.lock().await.clone();
        if !session.authorized {
            return StratumResponse::err(id, ERR_UNAUTHORIZED, "unauthorized worker");
        }

        let submit_params = SubmissionParams {
            job_id: job_id.to_string(),
            extranonce2,
            ntime,
            nonce,
            version_bits,
        };

        match self.pipeline.submit(&session, submit_params).await {
            Ok(SubmitResult::Accepted(outcome)) => {
                conn.state.lock().await.shares_accepted += 1;
                if outcome.became_parent_block {
                    info!("mining connection submitted a winning parent-chain block");
                }
                if outcome.became_aux_block {
                    info!("mining connection submitted a winning aux-chain block");
                }
                StratumResponse::ok(id, Value::Bool(true))
            }
            Ok(SubmitResult::Rejected(reason)) => {
                conn.state.lock().await.shares_rejected += 1;
                StratumResponse::err(id, reason.code(), reason.message())
            }
            Err(err) => {
                conn.state.lock().await.shares_rejected += 1;
                warn!("submission pipeline error: {err}");
                StratumResponse::err(id, ERR_OTHER, "internal error")
            }
        }
    }

    async fn push_to(&self, conn: &Arc<Connection>, notification: StratumNotification) {
        if let Ok(line) = serde_json::to_string(&notification) {
            let _ = conn.outbox.send(line).await;
        }
    }

    /// Replace the advertised job and push `mining.notify` to every
    /// connection. `clean_jobs` must be `true` whenever the parent (or
    /// share) tip has changed since the previous job (spec.md §4.6).
    pub async fn broadcast_job(&self, job: MiningJob) {
        let notification = notify_from_job(&job, job.clean_jobs);
        *self.current_job.write().await = Some(job);

        let connections: Vec<Arc<Connection>> = self.connections.read().await.values().cloned().collect();
        for conn in connections {
            self.push_to(&conn, notification.clone()).await;
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|_| rand::random::<u8>()).collect()
}

/// `mining.notify` params: `[job_id, prev_hash, coinb1, coinb2,
/// merkle_branch, version, bits, ntime, clean_jobs]`. `bits` carries the
/// parent chain's real difficulty (cosmetic in most miner implementations —
/// the miner's actual per-connection target comes from `set_difficulty`).
fn notify_from_job(job: &MiningJob, clean_jobs: bool) -> StratumNotification {
    let prev_hash_display = reversed(&job.prev_hash);
    let params = vec![
        json!(job.job_id),
        json!(hex::encode(prev_hash_display)),
        json!(hex::encode(&job.coinbase.prefix)),
        json!(hex::encode(&job.coinbase.suffix)),
        json!(job
            .merkle_siblings
            .iter()
            .map(hex::encode)
            .collect::<Vec<_>>()),
        json!(format!("{:08x}", job.version)),
        json!(format!("{:08x}", job.parent_bits)),
        json!(format!("{:08x}", job.timestamp)),
        json!(clean_jobs),
    ];
    StratumNotification::new("mining.notify", params)
}

fn reversed(hash: &p2pool_core::Hash) -> p2pool_core::Hash {
    let mut out = *hash;
    out.reverse();
    out
}
