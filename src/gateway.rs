//! Gateway (WebSocket) transport for the Discord API.
//!
//! This module owns the WebSocket connection lifecycle:
//!   - connect, receive HELLO, send IDENTIFY (or RESUME)
//!   - background heartbeat task with zombie-connection detection
//!   - sequence number + session_id tracking
//!   - reconnect with backoff on disconnect
//!   - gateway send rate limiting (120 events / 60s)
//!
//! The bot consumes a channel of [`GatewayEvent`] values and never touches
//! `tokio_tungstenite` directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_lock::Mutex;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::events::{opcode, GatewayEvent};
use crate::types::{GatewayPayload, Intents};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Discord allows at most 120 gateway sends per 60 seconds.
const SEND_BUDGET_MAX: usize = 120;
const SEND_BUDGET_WINDOW: Duration = Duration::from_secs(60);

const HELLO_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RECONNECT_ATTEMPTS: u32 = 8;
const EVENT_CHANNEL_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("timed out waiting for HELLO")]
    HelloTimeout,
    #[error("connection closed before HELLO")]
    ClosedBeforeHello,
    #[error("expected op {expected}, got op {got}")]
    UnexpectedOpcode { expected: u8, got: u8 },
    #[error("malformed gateway payload: {0}")]
    Malformed(String),
    #[error("gateway closed the connection with fatal code {0}")]
    FatalClose(u16),
    #[error("gave up after {0} reconnect attempts")]
    ReconnectsExhausted(u32),
}

// ---------------------------------------------------------------------------
// Gateway send rate limiter
// ---------------------------------------------------------------------------

/// Sliding-window limiter for outbound gateway messages.
#[derive(Debug)]
struct SendWindow {
    sent: Vec<Instant>,
    budget: usize,
    window: Duration,
}

impl SendWindow {
    fn new(budget: usize, window: Duration) -> Self {
        Self {
            sent: Vec::with_capacity(budget),
            budget,
            window,
        }
    }

    /// How long to wait before the next send is allowed. Does not record
    /// anything.
    fn delay(&self, now: Instant) -> Option<Duration> {
        let mut in_window = self
            .sent
            .iter()
            .filter(|&&t| now.duration_since(t) < self.window);
        if in_window.clone().count() < self.budget {
            return None;
        }
        let oldest = in_window.next()?;
        (*oldest + self.window)
            .checked_duration_since(now)
            .filter(|d| !d.is_zero())
    }

    fn record(&mut self, now: Instant) {
        let window = self.window;
        self.sent.retain(|&t| now.duration_since(t) < window);
        self.sent.push(now);
    }
}

// ---------------------------------------------------------------------------
// Configuration + session state
// ---------------------------------------------------------------------------

/// Options for connecting to the Discord gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub intents: Intents,
    /// Optional shard info: `[shard_id, num_shards]`.
    pub shard: Option<[u32; 2]>,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("token", &"<redacted>")
            .field("intents", &self.intents)
            .field("shard", &self.shard)
            .finish()
    }
}

impl GatewayConfig {
    fn identify_payload(&self) -> Value {
        let mut identify = json!({
            "op": opcode::IDENTIFY,
            "d": {
                "token": self.token,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "song-selector",
                    "device": "song-selector",
                },
                "intents": self.intents.bits(),
            }
        });
        if let Some([id, count]) = self.shard {
            identify["d"]["shard"] = json!([id, count]);
        }
        identify
    }
}

#[derive(Debug, Clone, Default)]
struct Session {
    session_id: Option<String>,
    resume_gateway_url: Option<String>,
    sequence: Option<u64>,
}

impl Session {
    /// RESUME body, if this session has enough state to resume.
    fn resume_payload(&self, token: &str) -> Option<Value> {
        let session_id = self.session_id.as_ref()?;
        let seq = self.sequence?;
        Some(json!({
            "op": opcode::RESUME,
            "d": {
                "token": token,
                "session_id": session_id,
                "seq": seq,
            }
        }))
    }

    fn gateway_url(&self) -> String {
        let url = self
            .resume_gateway_url
            .as_deref()
            .unwrap_or(DEFAULT_GATEWAY_URL);
        if url.contains("v=10") {
            url.to_string()
        } else if url.contains('?') {
            format!("{url}&v=10&encoding=json")
        } else {
            format!("{url}/?v=10&encoding=json")
        }
    }

    fn forget(&mut self) {
        self.session_id = None;
        self.sequence = None;
    }
}

// ---------------------------------------------------------------------------
// Disconnect classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Reconnect and send RESUME.
    Resume,
    /// Reconnect with a fresh IDENTIFY.
    Reidentify,
    /// Do not reconnect; carries the close code.
    Fatal(u16),
    /// Every receiver of the event channel is gone.
    ConsumerGone,
}

/// Decide how to react to a close frame from Discord.
pub fn classify_close(code: u16) -> DisconnectReason {
    match code {
        // Authentication failed, invalid shard, sharding required,
        // invalid API version, invalid intents, disallowed intents.
        4004 | 4010..=4014 => DisconnectReason::Fatal(code),
        // Invalid seq, session timed out.
        4007 | 4009 => DisconnectReason::Reidentify,
        _ => DisconnectReason::Resume,
    }
}

/// Consecutive failed connections. Only a connection that reached READY or
/// RESUMED resets the count.
#[derive(Debug, Default)]
struct Reconnects {
    attempts: u32,
}

impl Reconnects {
    /// Account for a finished connection and return how long to wait before
    /// the next one.
    fn next_delay(&mut self, established: bool) -> Result<Duration, GatewayError> {
        if established {
            self.attempts = 0;
        }
        self.attempts += 1;
        if self.attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(GatewayError::ReconnectsExhausted(MAX_RECONNECT_ATTEMPTS));
        }
        Ok(backoff_delay(self.attempts))
    }
}

/// Exponential backoff with jitter, capped at 60 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let base_ms = 1000u64 * 2u64.saturating_pow(attempt.min(6));
    let jittered = (rand::random::<f64>() * 0.5 + 0.75) * base_ms as f64;
    Duration::from_millis(jittered.min(60_000.0) as u64)
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Running gateway connection.
///
/// `events` closes once the driver stops; `driver_handle` then yields the
/// reason it stopped.
pub struct GatewayHandle {
    pub events: async_channel::Receiver<GatewayEvent>,
    pub driver_handle: tokio::task::JoinHandle<Result<(), GatewayError>>,
}

/// Spawn the gateway driver and return a handle to its event stream.
pub fn connect(config: GatewayConfig) -> GatewayHandle {
    let (event_tx, event_rx) = async_channel::bounded(EVENT_CHANNEL_CAPACITY);
    let driver_handle = tokio::spawn(drive(config, event_tx));
    GatewayHandle {
        events: event_rx,
        driver_handle,
    }
}

// ---------------------------------------------------------------------------
// Driver loop
// ---------------------------------------------------------------------------

/// Per-connection state shared between the read loop and heartbeat task.
struct Connection {
    write: Mutex<WsSink>,
    limiter: Mutex<SendWindow>,
    awaiting_ack: AtomicBool,
    /// Set once READY or RESUMED arrives on this connection.
    established: AtomicBool,
    /// Fired by the heartbeat task when an ACK was missed.
    zombie: Notify,
}

/// How a connection that completed its handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConnectionEnd {
    reason: DisconnectReason,
    established: bool,
}

impl Connection {
    async fn send(&self, payload: &Value) -> Result<(), GatewayError> {
        loop {
            let delay = self.limiter.lock().await.delay(Instant::now());
            let Some(delay) = delay else { break };
            debug!(
                delay_ms = delay.as_millis() as u64,
                "gateway send rate-limited, waiting"
            );
            tokio::time::sleep(delay).await;
        }
        self.limiter.lock().await.record(Instant::now());

        let text = serde_json::to_string(payload)
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        self.write.lock().await.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn heartbeat(&self, session: &Mutex<Session>) -> Result<(), GatewayError> {
        let seq = session.lock().await.sequence;
        self.awaiting_ack.store(true, Ordering::SeqCst);
        self.send(&json!({ "op": opcode::HEARTBEAT, "d": seq })).await?;
        debug!(seq = ?seq, "sent heartbeat");
        Ok(())
    }

    async fn close(&self) {
        let _ = self.write.lock().await.send(WsMessage::Close(None)).await;
    }
}

async fn drive(
    config: GatewayConfig,
    event_tx: async_channel::Sender<GatewayEvent>,
) -> Result<(), GatewayError> {
    let session = Arc::new(Mutex::new(Session::default()));
    let mut reconnects = Reconnects::default();

    loop {
        let ConnectionEnd {
            reason,
            established,
        } = match run_connection(&config, &session, &event_tx).await {
            Ok(end) => end,
            Err(e) => {
                error!(error = %e, "gateway connection failed");
                ConnectionEnd {
                    reason: DisconnectReason::Resume,
                    established: false,
                }
            }
        };

        match reason {
            DisconnectReason::Resume => info!("will attempt RESUME"),
            DisconnectReason::Reidentify => {
                info!("session invalidated, will re-IDENTIFY");
                session.lock().await.forget();
            }
            DisconnectReason::Fatal(code) => {
                error!(close_code = code, "fatal gateway close, shutting down");
                return Err(GatewayError::FatalClose(code));
            }
            DisconnectReason::ConsumerGone => {
                info!("event channel closed, shutting down gateway driver");
                return Ok(());
            }
        }

        let delay = reconnects.next_delay(established).inspect_err(|_| {
            error!("exceeded max reconnect attempts, giving up");
        })?;
        warn!(
            delay_ms = delay.as_millis() as u64,
            attempt = reconnects.attempts,
            "reconnecting after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}

/// One WebSocket connection from handshake to disconnect.
async fn run_connection(
    config: &GatewayConfig,
    session: &Arc<Mutex<Session>>,
    event_tx: &async_channel::Sender<GatewayEvent>,
) -> Result<ConnectionEnd, GatewayError> {
    let url = session.lock().await.gateway_url();
    info!(url = %url, "connecting to Discord gateway");
    let (ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    let (write, mut read) = ws.split();

    let interval = read_hello(&mut read).await?;
    info!(interval_ms = interval.as_millis() as u64, "received HELLO");

    let conn = Arc::new(Connection {
        write: Mutex::new(write),
        limiter: Mutex::new(SendWindow::new(SEND_BUDGET_MAX, SEND_BUDGET_WINDOW)),
        awaiting_ack: AtomicBool::new(false),
        established: AtomicBool::new(false),
        zombie: Notify::new(),
    });

    let resume = session.lock().await.resume_payload(&config.token);
    match resume {
        Some(payload) => {
            conn.send(&payload).await?;
            info!("sent RESUME");
        }
        None => {
            conn.send(&config.identify_payload()).await?;
            info!("sent IDENTIFY");
        }
    }

    let heartbeat = tokio::spawn(heartbeat_loop(
        Arc::clone(&conn),
        Arc::clone(session),
        interval,
    ));
    let reason = read_loop(&mut read, &conn, session, event_tx).await;
    heartbeat.abort();
    conn.close().await;
    Ok(ConnectionEnd {
        reason,
        established: conn.established.load(Ordering::SeqCst),
    })
}

async fn heartbeat_loop(conn: Arc<Connection>, session: Arc<Mutex<Session>>, every: Duration) {
    // First beat goes out after `every * jitter`, jitter in [0, 1).
    let jitter = rand::random::<f64>();
    tokio::time::sleep(every.mul_f64(jitter)).await;

    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        if conn.awaiting_ack.load(Ordering::SeqCst) {
            warn!("no heartbeat ACK since last beat, dropping zombie connection");
            conn.zombie.notify_one();
            return;
        }
        if let Err(e) = conn.heartbeat(&session).await {
            warn!(error = %e, "heartbeat send failed, stopping heartbeat task");
            return;
        }
    }
}

async fn read_loop(
    read: &mut WsStream,
    conn: &Connection,
    session: &Mutex<Session>,
    event_tx: &async_channel::Sender<GatewayEvent>,
) -> DisconnectReason {
    loop {
        let msg = tokio::select! {
            msg = read.next() => msg,
            _ = conn.zombie.notified() => return DisconnectReason::Resume,
        };
        let Some(msg) = msg else { break };

        let text = match msg {
            Ok(WsMessage::Text(text)) => text,
            Ok(WsMessage::Close(frame)) => {
                let code = frame.map(|f| u16::from(f.code));
                warn!(close_code = ?code, "WebSocket closed by server");
                return code.map_or(DisconnectReason::Resume, classify_close);
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(error = %e, "WebSocket read error");
                return DisconnectReason::Resume;
            }
        };

        let payload: GatewayPayload = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to parse gateway payload");
                continue;
            }
        };
        if let Some(seq) = payload.s {
            session.lock().await.sequence = Some(seq);
        }

        let event = GatewayEvent::from_payload(payload);
        match &event {
            GatewayEvent::Ready(ready) => {
                let mut s = session.lock().await;
                s.session_id = Some(ready.session_id.clone());
                s.resume_gateway_url = Some(ready.resume_gateway_url.clone());
                conn.established.store(true, Ordering::SeqCst);
            }
            GatewayEvent::Unknown { .. } if event.name() == Some("RESUMED") => {
                info!("session resumed");
                conn.established.store(true, Ordering::SeqCst);
            }
            GatewayEvent::HeartbeatRequest => {
                if let Err(e) = conn.heartbeat(session).await {
                    warn!(error = %e, "failed to send requested heartbeat");
                }
                continue;
            }
            GatewayEvent::HeartbeatAck => {
                conn.awaiting_ack.store(false, Ordering::SeqCst);
                continue;
            }
            GatewayEvent::Reconnect => {
                info!("gateway requested reconnect (op 7)");
                return DisconnectReason::Resume;
            }
            GatewayEvent::InvalidSession(resumable) => {
                warn!(resumable, "session invalidated (op 9)");
                tokio::time::sleep(Duration::from_secs(if *resumable { 2 } else { 3 })).await;
                return if *resumable {
                    DisconnectReason::Resume
                } else {
                    DisconnectReason::Reidentify
                };
            }
            _ => {}
        }

        if event_tx.send(event).await.is_err() {
            return DisconnectReason::ConsumerGone;
        }
    }

    info!("WebSocket stream ended");
    DisconnectReason::Resume
}

/// Wait for HELLO and return the heartbeat interval.
async fn read_hello(read: &mut WsStream) -> Result<Duration, GatewayError> {
    let msg = tokio::time::timeout(HELLO_TIMEOUT, read.next())
        .await
        .map_err(|_| GatewayError::HelloTimeout)?
        .ok_or(GatewayError::ClosedBeforeHello)??;

    let WsMessage::Text(text) = msg else {
        return Err(GatewayError::Malformed(format!(
            "expected text frame for HELLO, got {msg:?}"
        )));
    };
    hello_interval(&text)
}

fn hello_interval(text: &str) -> Result<Duration, GatewayError> {
    let payload: GatewayPayload =
        serde_json::from_str(text).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    if payload.op != opcode::HELLO {
        return Err(GatewayError::UnexpectedOpcode {
            expected: opcode::HELLO,
            got: payload.op,
        });
    }
    payload
        .d
        .as_ref()
        .and_then(|d| d.get("heartbeat_interval"))
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .ok_or_else(|| GatewayError::Malformed("HELLO missing heartbeat_interval".into()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
