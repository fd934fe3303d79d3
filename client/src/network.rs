//! Headless UDP client.
//!
//! Connects, plays a scripted input pattern at the server's tick rate,
//! predicts and reconciles its own player, and keeps smoothed estimates of
//! everything else. A timed-out session is resumed with its token.

use crate::input::{InputPattern, InputSource};
use crate::predictor::{ClientPredictor, PredictorConfig, Reconciliation};
use log::{debug, error, info, warn};
use shared::movement::MovementConfig;
use shared::protocol::{decode_message, encode_message, DisconnectCode, Message, PROTOCOL_VERSION};
use shared::snapshot::Snapshot;
use shared::{PlayerId, DEFAULT_TICK_RATE};
use std::error::Error;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

pub type NetResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

const RECV_BUFFER: usize = 65536;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub server: String,
    /// Artificial one-way delay is half of this, applied on send and receive.
    pub fake_ping_ms: u64,
    pub pattern: InputPattern,
    /// Stop after this long. `None` runs until the server goes away.
    pub duration: Option<Duration>,
    pub predictor: PredictorConfig,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:8080".to_string(),
            fake_ping_ms: 0,
            pattern: InputPattern::Forward,
            duration: None,
            predictor: PredictorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub snapshots: u64,
    pub minor_corrections: u64,
    pub major_corrections: u64,
    pub inputs_sent: u64,
    /// Snapshots dropped for arriving behind one already applied.
    pub stale_snapshots: u64,
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    player_id: Option<PlayerId>,
    session_token: Option<String>,
    connected: bool,
    reconnect_pending: bool,
    finished: bool,

    tick_rate: u32,
    movement: MovementConfig,
    world: Snapshot,
    predictor: Option<ClientPredictor>,
    predictor_config: PredictorConfig,
    input_source: InputSource,

    fake_ping_ms: u64,
    duration: Option<Duration>,
    frames_since_snapshot: u32,
    stats: ClientStats,
}

impl Client {
    pub async fn new(options: ClientOptions) -> NetResult<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = options.server.parse()?;

        Ok(Client {
            socket,
            server_addr,
            player_id: None,
            session_token: None,
            connected: false,
            reconnect_pending: false,
            finished: false,
            tick_rate: DEFAULT_TICK_RATE,
            movement: MovementConfig::default(),
            world: Snapshot::default(),
            predictor: None,
            predictor_config: options.predictor,
            input_source: InputSource::new(options.pattern, DEFAULT_TICK_RATE),
            fake_ping_ms: options.fake_ping_ms,
            duration: options.duration,
            frames_since_snapshot: 0,
            stats: ClientStats::default(),
        })
    }

    pub fn player_id(&self) -> Option<PlayerId> {
        self.player_id
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn world(&self) -> &Snapshot {
        &self.world
    }

    pub fn predictor(&self) -> Option<&ClientPredictor> {
        self.predictor.as_ref()
    }

    pub fn movement(&self) -> &MovementConfig {
        &self.movement
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    async fn send_message(&self, message: &Message) -> NetResult<()> {
        if self.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
        }

        self.socket.send_to(&encode_message(message), self.server_addr).await?;
        Ok(())
    }

    async fn connect(&mut self) -> NetResult<()> {
        info!("Connecting to {}...", self.server_addr);
        self.send_message(&Message::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await
    }

    async fn reconnect(&mut self) -> NetResult<()> {
        self.reconnect_pending = false;
        let Some(session_token) = self.session_token.clone() else {
            return Ok(());
        };
        info!("Resuming session from tick {}", self.world.tick);
        self.send_message(&Message::Reconnect {
            session_token,
            last_tick: self.world.tick,
        })
        .await
    }

    fn on_accepted(&mut self, player_id: PlayerId, session_token: String, tick_rate: u32) {
        self.player_id = Some(player_id);
        self.session_token = Some(session_token);
        self.connected = true;
        self.tick_rate = tick_rate.max(1);
        self.input_source = InputSource::new(self.input_source.pattern(), self.tick_rate);
        self.predictor = Some(ClientPredictor::new(
            player_id,
            self.movement,
            self.tick_rate,
            self.predictor_config,
        ));
    }

    pub fn handle_message(&mut self, message: Message) {
        match message {
            Message::HandshakeAck {
                player_id,
                tick,
                session_token,
                tick_rate,
            } => {
                info!("Connected as player {} at tick {} ({} ticks/s)", player_id, tick, tick_rate);
                self.on_accepted(player_id, session_token, tick_rate);
            }

            Message::ReconnectAck {
                player_id,
                tick,
                session_token,
                tick_rate,
            } => {
                info!("Reconnected as player {} at tick {}", player_id, tick);
                self.on_accepted(player_id, session_token, tick_rate);
            }

            Message::WorldDefinition { world } => {
                if let Some(movement) = world.get("movement") {
                    self.movement = MovementConfig::from_value(movement);
                }
                if let Some(predictor) = self.predictor.as_mut() {
                    predictor.set_movement(self.movement);
                }
                debug!("World definition applied: {:?}", self.movement);
            }

            Message::AppModule { name, code } => {
                info!("Received module {} ({} bytes)", name, code.len());
            }

            Message::Snapshot(snapshot) => self.apply_snapshot(snapshot),

            Message::StateRecovery {
                player,
                snapshot,
                events,
            } => {
                info!(
                    "Recovered state at tick {} with {} missed events",
                    snapshot.tick,
                    events.len()
                );
                self.world = snapshot;
                self.frames_since_snapshot = 0;
                if let Some(predictor) = self.predictor.as_mut() {
                    predictor.reset_local(player);
                }
            }

            Message::DisconnectReason { code, message } => {
                warn!("Disconnected by server ({:?}): {}", code, message);
                self.connected = false;
                match code {
                    DisconnectCode::Timeout if self.session_token.is_some() => {
                        self.reconnect_pending = true;
                    }
                    _ => self.finished = true,
                }
            }

            Message::PlayerJoin { player_id } => info!("Player {} joined", player_id),
            Message::PlayerLeave { player_id } => info!("Player {} left", player_id),
            Message::AppEvent { name, data } => debug!("App event {}: {:?}", name, data),

            other => warn!("Unexpected message from server: {}", other.type_name()),
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        if self.stats.snapshots > 0 && snapshot.tick <= self.world.tick {
            debug!("Dropping snapshot for tick {}, already at tick {}", snapshot.tick, self.world.tick);
            self.stats.stale_snapshots += 1;
            return;
        }
        self.stats.snapshots += 1;
        self.frames_since_snapshot = 0;

        if let Some(predictor) = self.predictor.as_mut() {
            match predictor.on_server_snapshot(&snapshot) {
                Some(Reconciliation::Minor) => self.stats.minor_corrections += 1,
                Some(Reconciliation::Major) => self.stats.major_corrections += 1,
                _ => {}
            }
        }
        self.world.merge(snapshot);
    }

    async fn send_input(&mut self) -> NetResult<()> {
        if !self.connected {
            return Ok(());
        }
        let Some(predictor) = self.predictor.as_mut() else {
            return Ok(());
        };

        let input = predictor.predict(self.input_source.next_input());
        self.send_message(&Message::Input {
            sequence: input.sequence,
            timestamp: input.timestamp,
            input: input.input,
        })
        .await?;
        self.stats.inputs_sent += 1;

        let (tick, frames) = (self.world.tick, self.frames_since_snapshot);
        let display = self.predictor.as_mut().map(|p| p.get_display_state(tick, frames));
        self.frames_since_snapshot = self.frames_since_snapshot.saturating_add(1);

        if self.stats.inputs_sent % u64::from(self.tick_rate) == 0 {
            if let Some(display) = display {
                let position = display.local.as_ref().map(|p| p.position);
                info!(
                    "tick {} position {:?} remotes {} snapshots {} corrections {}/{}",
                    display.tick,
                    position,
                    display.remotes.len(),
                    self.stats.snapshots,
                    self.stats.minor_corrections,
                    self.stats.major_corrections
                );
            }
        }
        Ok(())
    }

    pub async fn run(&mut self) -> NetResult<()> {
        self.connect().await?;

        let mut tick_rate = self.tick_rate;
        let mut input_interval = tick_interval(tick_rate);
        let deadline = self.duration.map(|d| Instant::now() + d);
        let mut buffer = vec![0u8; RECV_BUFFER];

        while !self.finished {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.fake_ping_ms / 2)).await;
                            }

                            match decode_message(&buffer[..len]) {
                                Ok(message) => self.handle_message(message),
                                Err(e) => warn!("Dropping undecodable datagram: {}", e),
                            }
                        }
                        Err(e) => error!("Error receiving datagram: {}", e),
                    }
                },

                _ = input_interval.tick() => {
                    if self.reconnect_pending {
                        self.reconnect().await?;
                    }
                    if let Err(e) = self.send_input().await {
                        error!("Error sending input: {}", e);
                    }
                },

                _ = sleep_until_deadline(deadline) => {
                    info!("Run time elapsed");
                    self.finished = true;
                },
            }

            if self.tick_rate != tick_rate {
                tick_rate = self.tick_rate;
                input_interval = tick_interval(tick_rate);
            }
        }

        if self.connected {
            let _ = self.send_message(&Message::Disconnect).await;
            self.connected = false;
        }

        Ok(())
    }
}

fn tick_interval(tick_rate: u32) -> tokio::time::Interval {
    let mut ticker = interval(Duration::from_secs_f64(1.0 / f64::from(tick_rate.max(1))));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
