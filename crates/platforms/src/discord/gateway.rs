//! Discord gateway client.
//!
//! Maintains one websocket session: Hello → Identify, heartbeats on the
//! interval the server announces, and forwards `READY` and `MESSAGE_CREATE`
//! dispatches through a bounded channel. Lost connections are re-established
//! with exponential backoff; sessions are never resumed, a reconnect always
//! identifies from scratch.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::RngExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::models::{GatewayPayload, Hello, Message, Ready};
use crate::error::{PlatformError, Result};

const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Close codes after which reconnecting is pointless.
const FATAL_CLOSE_CODES: &[u16] = &[4004, 4010, 4011, 4012, 4013, 4014];

/// Discord asks for a 1-5 s pause before identifying again after op 9.
const INVALID_SESSION_WAIT_MS: (u64, u64) = (1_000, 5_000);

/// Gateway intents.
pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const DIRECT_MESSAGES: u64 = 1 << 12;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    /// Everything needed to read commands from guild channels and DMs.
    pub const COMMANDS: u64 = GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT;
}

/// Events forwarded to the gateway's owner.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// The session is established; carries the bot's own user id.
    Ready { user_id: String },
    /// A message written by a human.
    MessageCreate(Message),
}

/// Reconnect settings.
#[derive(Debug, Clone, Copy)]
pub struct GatewayConfig {
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub channel_capacity: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 60000,
            channel_capacity: 100,
        }
    }
}

/// What the connection loop should do after a frame was processed.
#[derive(Debug, Clone, PartialEq)]
enum SessionAction {
    Send(Value),
    Forward(GatewayEvent),
    StartHeartbeat(Duration),
    Reconnect,
}

/// Protocol state of one websocket session.
#[derive(Debug)]
struct Session {
    token: String,
    intents: u64,
    sequence: Option<u64>,
    awaiting_ack: bool,
    /// `READY` was received on this connection.
    ready: bool,
    /// The server answered with op 9.
    invalidated: bool,
}

impl Session {
    fn new(token: &str, intents: u64) -> Self {
        Self {
            token: token.to_string(),
            intents,
            sequence: None,
            awaiting_ack: false,
            ready: false,
            invalidated: false,
        }
    }

    fn identify(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.token,
                "intents": self.intents,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "nerodia",
                    "device": "nerodia"
                }
            }
        })
    }

    /// Build the next heartbeat, or `None` when the previous one was never acknowledged.
    fn heartbeat(&mut self) -> Option<Value> {
        if self.awaiting_ack {
            return None;
        }
        self.awaiting_ack = true;
        Some(json!({ "op": OP_HEARTBEAT, "d": self.sequence }))
    }

    fn handle(&mut self, payload: GatewayPayload) -> Result<Vec<SessionAction>> {
        if let Some(seq) = payload.s {
            self.sequence = Some(seq);
        }

        let actions = match payload.op {
            OP_HELLO => {
                let hello: Hello = serde_json::from_value(payload.d.unwrap_or_default())?;
                vec![
                    SessionAction::StartHeartbeat(Duration::from_millis(hello.heartbeat_interval)),
                    SessionAction::Send(self.identify()),
                ]
            }
            OP_HEARTBEAT => {
                vec![SessionAction::Send(
                    json!({ "op": OP_HEARTBEAT, "d": self.sequence }),
                )]
            }
            OP_HEARTBEAT_ACK => {
                self.awaiting_ack = false;
                Vec::new()
            }
            OP_RECONNECT => vec![SessionAction::Reconnect],
            OP_INVALID_SESSION => {
                self.invalidated = true;
                vec![SessionAction::Reconnect]
            }
            OP_DISPATCH => self.handle_dispatch(payload.t.as_deref(), payload.d)?,
            other => {
                trace!(op = other, "Ignoring gateway opcode");
                Vec::new()
            }
        };

        Ok(actions)
    }

    fn handle_dispatch(&mut self, event: Option<&str>, data: Option<Value>) -> Result<Vec<SessionAction>> {
        let data = data.unwrap_or_default();
        match event {
            Some("READY") => {
                let ready: Ready = serde_json::from_value(data)?;
                self.ready = true;
                Ok(vec![SessionAction::Forward(GatewayEvent::Ready {
                    user_id: ready.user.id,
                })])
            }
            Some("MESSAGE_CREATE") => {
                let message: Message = serde_json::from_value(data)?;
                if message.author.bot {
                    return Ok(Vec::new());
                }
                Ok(vec![SessionAction::Forward(GatewayEvent::MessageCreate(
                    message,
                ))])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Reconnect pacing across connections.
///
/// The attempt count and delay only start over once a connection reached
/// `READY`; a socket that drops before that counts as a failed attempt.
#[derive(Debug)]
struct Backoff {
    config: GatewayConfig,
    attempt: u32,
    delay_ms: u64,
}

impl Backoff {
    fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            attempt: 0,
            delay_ms: config.base_reconnect_delay_ms,
        }
    }

    /// Jittered wait before the next connection, or `None` when attempts are exhausted.
    fn next(&mut self, ready: bool, invalidated: bool) -> Option<Duration> {
        if ready {
            self.attempt = 0;
            self.delay_ms = self.config.base_reconnect_delay_ms;
        }
        if self.attempt >= self.config.max_reconnect_attempts {
            return None;
        }
        self.attempt += 1;

        let mut rng = rand::rng();
        let mut wait = Duration::from_millis(self.delay_ms).mul_f64(rng.random_range(0.5..=1.0));
        if invalidated {
            let (min, max) = INVALID_SESSION_WAIT_MS;
            wait = wait.max(Duration::from_millis(rng.random_range(min..=max)));
        }

        self.delay_ms = self
            .delay_ms
            .saturating_mul(2)
            .min(self.config.max_reconnect_delay_ms);
        Some(wait)
    }
}

/// How a single connection ended.
enum SessionEnd {
    Reconnect,
    Fatal(String),
    Shutdown,
}

/// Discord gateway client.
pub struct DiscordGateway {
    token: String,
    intents: u64,
    config: GatewayConfig,
}

impl DiscordGateway {
    pub fn new(token: impl Into<String>, intents: u64) -> Self {
        Self::with_config(token, intents, GatewayConfig::default())
    }

    pub fn with_config(token: impl Into<String>, intents: u64, config: GatewayConfig) -> Self {
        Self {
            token: token.into(),
            intents,
            config,
        }
    }

    /// Start the connection task.
    ///
    /// The returned receiver yields gateway events until `shutdown` is cancelled,
    /// reconnect attempts are exhausted, or the server rejects the session.
    pub fn spawn(self, shutdown: CancellationToken) -> (mpsc::Receiver<GatewayEvent>, JoinHandle<()>) {
        crate::http::install_rustls_provider();
        let (event_tx, event_rx) = mpsc::channel(self.config.channel_capacity);
        let handle = tokio::spawn(async move { self.run(event_tx, shutdown).await });
        (event_rx, handle)
    }

    async fn run(self, event_tx: mpsc::Sender<GatewayEvent>, shutdown: CancellationToken) {
        let mut backoff = Backoff::new(self.config);

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let mut session = Session::new(&self.token, self.intents);
            match self.run_session(&mut session, &event_tx, &shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Fatal(reason)) => {
                    error!(%reason, "Discord gateway session rejected, giving up");
                    break;
                }
                Ok(SessionEnd::Reconnect) => info!(
                    ready = session.ready,
                    invalidated = session.invalidated,
                    "Discord gateway connection ended"
                ),
                Err(e) => warn!(error = %e, "Discord gateway connection failed"),
            }

            let Some(wait) = backoff.next(session.ready, session.invalidated) else {
                error!(
                    attempts = backoff.attempt,
                    "Max reconnect attempts reached for the Discord gateway"
                );
                break;
            };
            debug!(
                attempt = backoff.attempt,
                wait_ms = wait.as_millis() as u64,
                "Reconnecting to the Discord gateway"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Discord gateway task stopped");
    }

    async fn run_session(
        &self,
        session: &mut Session,
        event_tx: &mpsc::Sender<GatewayEvent>,
        shutdown: &CancellationToken,
    ) -> Result<SessionEnd> {
        let (mut stream, _) = connect_async(GATEWAY_URL)
            .await
            .map_err(|e| PlatformError::connection(e.to_string()))?;
        info!("Connected to the Discord gateway");

        let mut heartbeat: Option<tokio::time::Interval> = None;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(SessionEnd::Shutdown);
                }

                _ = tick(&mut heartbeat) => {
                    let Some(frame) = session.heartbeat() else {
                        warn!("Discord heartbeat was not acknowledged, reconnecting");
                        return Ok(SessionEnd::Reconnect);
                    };
                    stream
                        .send(WsMessage::text(frame.to_string()))
                        .await
                        .map_err(|e| PlatformError::connection(e.to_string()))?;
                    trace!("Sent Discord heartbeat");
                }

                frame = stream.next() => {
                    let text = match frame {
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(WsMessage::Close(frame))) => {
                            let code = frame.as_ref().map(|f| u16::from(f.code)).unwrap_or(1000);
                            if FATAL_CLOSE_CODES.contains(&code) {
                                return Ok(SessionEnd::Fatal(format!("closed with code {code}")));
                            }
                            return Ok(SessionEnd::Reconnect);
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(e)) => return Err(PlatformError::connection(e.to_string())),
                        None => return Ok(SessionEnd::Reconnect),
                    };

                    let payload: GatewayPayload = match serde_json::from_str(text.as_str()) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(error = %e, "Failed to decode gateway frame");
                            continue;
                        }
                    };

                    let actions = match session.handle(payload) {
                        Ok(actions) => actions,
                        Err(e) => {
                            warn!(error = %e, "Failed to handle gateway frame");
                            continue;
                        }
                    };

                    for action in actions {
                        match action {
                            SessionAction::Send(frame) => stream
                                .send(WsMessage::text(frame.to_string()))
                                .await
                                .map_err(|e| PlatformError::connection(e.to_string()))?,
                            SessionAction::Forward(event) => {
                                if event_tx.send(event).await.is_err() {
                                    // Nobody listens anymore.
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                            SessionAction::StartHeartbeat(period) => {
                                heartbeat = Some(heartbeat_interval(period));
                            }
                            SessionAction::Reconnect => return Ok(SessionEnd::Reconnect),
                        }
                    }
                }
            }
        }
    }
}

/// First beat is jittered as the gateway docs ask.
fn heartbeat_interval(period: Duration) -> tokio::time::Interval {
    let jitter = rand::rng().random_range(0.0..1.0);
    let start = tokio::time::Instant::now() + period.mul_f64(jitter);
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
