//! Server network layer handling UDP communications and tick loop coordination

use crate::game::{LeaveReason, SimulationConfig, World};
use crate::player_store::{Transport, TransportError};
use log::{debug, error, info, warn};
use shared::protocol::{decode_message, Message};
use shared::time::SystemClock;
use shared::wire::DecodeError;
use shared::PlayerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

pub type NetResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Largest datagram the receiver accepts.
pub const MAX_DATAGRAM: usize = 65_507;

pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { message: Message, addr: SocketAddr },
    MalformedPacket { addr: SocketAddr, error: DecodeError },
    CheckTimeouts,
    Shutdown,
}

/// Messages sent from the tick loop to the sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { bytes: Vec<u8>, addr: SocketAddr },
}

/// Player transport backed by the shared UDP socket. Frames are queued to
/// the sender task so the tick loop never awaits the socket.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<GameMessage>,
}

impl UdpTransport {
    pub fn new(addr: SocketAddr, tx: mpsc::UnboundedSender<GameMessage>) -> Self {
        Self { addr, tx }
    }
}

impl Transport for UdpTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(GameMessage::SendPacket {
                bytes: bytes.to_vec(),
                addr: self.addr,
            })
            .map_err(|_| TransportError::Closed)
    }
}

/// Main server coordinating networking and the authoritative world
pub struct Server {
    socket: Arc<UdpSocket>,
    world: World,
    addrs: HashMap<SocketAddr, PlayerId>,
    tick_duration: Duration,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn new(addr: &str, config: SimulationConfig) -> NetResult<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();
        let tick_duration = Duration::from_secs_f64(config.dt());

        Ok(Server {
            socket,
            world: World::new(config, Arc::new(SystemClock)),
            addrs: HashMap::new(),
            tick_duration,
            client_timeout: CLIENT_TIMEOUT,
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn set_client_timeout(&mut self, timeout: Duration) {
        self.client_timeout = timeout;
    }

    /// Handle for stopping `run` from another task.
    pub fn control(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let event = match decode_message(&buffer[..len]) {
                            Ok(message) => ServerMessage::PacketReceived { message, addr },
                            Err(error) => ServerMessage::MalformedPacket { addr, error },
                        };
                        if let Err(e) = server_tx.send(event) {
                            error!("Failed to send packet to main loop: {}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes the outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = match self.game_rx.take() {
            Some(rx) => rx,
            None => return,
        };

        tokio::spawn(async move {
            while let Some(message) = game_rx.recv().await {
                match message {
                    GameMessage::SendPacket { bytes, addr } => {
                        if let Err(e) = socket.send_to(&bytes, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                }
            }
        });
    }

    /// Spawns task that periodically asks the main loop to look for silent clients
    fn spawn_timeout_checker(&self) {
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;
                if server_tx.send(ServerMessage::CheckTimeouts).is_err() {
                    break;
                }
            }
        });
    }

    fn transport_for(&self, addr: SocketAddr) -> Box<dyn Transport> {
        Box::new(UdpTransport::new(addr, self.game_tx.clone()))
    }

    /// Routes one decoded message. Handshakes are answered immediately;
    /// everything else is handed to the world for the next tick.
    fn handle_packet(&mut self, message: Message, addr: SocketAddr) {
        match message {
            Message::Connect { client_version } => {
                info!("Client connecting from {} (version: {})", addr, client_version);
                if let Some(existing) = self.addrs.remove(&addr) {
                    info!("Replacing existing player {} from {}", existing, addr);
                    self.world.remove_player(existing, LeaveReason::Disconnected);
                }

                let transport = self.transport_for(addr);
                match self.world.connect(transport, client_version) {
                    Ok(id) => {
                        self.addrs.insert(addr, id);
                    }
                    Err(e) => warn!("Refused {}: {}", addr, e),
                }
            }

            Message::Reconnect {
                session_token,
                last_tick,
            } => {
                if let Some(existing) = self.addrs.remove(&addr) {
                    self.world.remove_player(existing, LeaveReason::Replaced);
                }

                let transport = self.transport_for(addr);
                match self.world.reconnect(transport, &session_token, last_tick) {
                    Ok(id) => {
                        self.addrs.insert(addr, id);
                    }
                    Err(e) => warn!("Reconnect from {} refused: {}", addr, e),
                }
            }

            other => match self.addrs.get(&addr) {
                Some(&id) => self.world.handle_message(id, other),
                None => debug!("Dropping `{}` from unknown address {}", other.type_name(), addr),
            },
        }
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> NetResult<()> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Server started at {} ticks/s",
            self.world.config().tick_rate
        );

        loop {
            tokio::select! {
                // Handle network events
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { message, addr }) => {
                            self.handle_packet(message, addr);
                        }
                        Some(ServerMessage::MalformedPacket { addr, error }) => {
                            warn!("Malformed packet from {}: {}", addr, error);
                            if let Some(id) = self.addrs.remove(&addr) {
                                self.world.queue_removal(id, LeaveReason::Malformed);
                            }
                        }
                        Some(ServerMessage::CheckTimeouts) => {
                            for id in self.world.timed_out(self.client_timeout) {
                                info!("Player {} timed out", id);
                                self.world.queue_removal(id, LeaveReason::TimedOut);
                            }
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                }

                // Handle server tick events
                _ = tick_interval.tick() => {
                    let started = Instant::now();
                    let report = self.world.tick();
                    let elapsed = started.elapsed();

                    let world = &self.world;
                    self.addrs.retain(|_, id| world.player(*id).is_some());

                    if elapsed > self.tick_duration {
                        warn!("Tick {} took {:?}, over the {:?} budget", report.tick, elapsed, self.tick_duration);
                    }
                    if report.tick % 600 == 0 && !self.addrs.is_empty() {
                        debug!(
                            "Tick {}: {} players, {} snapshots, {} bytes, {:?}",
                            report.tick, self.addrs.len(), report.snapshots_sent, report.bytes_sent, elapsed
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::protocol::{DisconnectCode, PROTOCOL_VERSION};
    use std::net::{IpAddr, Ipv4Addr};

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn test_udp_transport_queues_frames() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let transport = UdpTransport::new(addr(9000), tx);
        transport.send(b"frame").unwrap();

        match rx.try_recv().unwrap() {
            GameMessage::SendPacket { bytes, addr: a } => {
                assert_eq!(bytes, b"frame".to_vec());
                assert_eq!(a, addr(9000));
            }
        }
    }

    #[test]
    fn test_udp_transport_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let transport = UdpTransport::new(addr(9000), tx);
        assert!(matches!(transport.send(b"x"), Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.tick_duration, Duration::from_secs_f64(1.0 / 60.0));
    }

    #[tokio::test]
    async fn test_connect_registers_address() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        server.handle_packet(Message::Connect { client_version: PROTOCOL_VERSION }, addr(7000));
        assert_eq!(server.addrs.get(&addr(7000)), Some(&1));

        // Reconnecting from the same address replaces the old player.
        server.handle_packet(Message::Connect { client_version: PROTOCOL_VERSION }, addr(7000));
        assert_eq!(server.addrs.get(&addr(7000)), Some(&2));
        assert!(server.world().player(1).is_none());
        assert_eq!(server.world().player_count(), 1);
    }

    #[tokio::test]
    async fn test_repeat_connect_succeeds_when_full() {
        let config = SimulationConfig {
            max_players: 1,
            ..Default::default()
        };
        let mut server = Server::new("127.0.0.1:0", config).await.unwrap();
        server.handle_packet(Message::Connect { client_version: PROTOCOL_VERSION }, addr(7004));
        server.handle_packet(Message::Connect { client_version: PROTOCOL_VERSION }, addr(7004));

        assert_eq!(server.addrs.get(&addr(7004)), Some(&2));
        assert_eq!(server.world().player_count(), 1);
        assert!(server.world().player(2).is_some());
    }

    #[tokio::test]
    async fn test_handshake_frames_are_queued_for_sender() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();
        server.handle_packet(Message::Connect { client_version: PROTOCOL_VERSION }, addr(7001));

        match game_rx.try_recv().unwrap() {
            GameMessage::SendPacket { bytes, addr: a } => {
                assert_eq!(a, addr(7001));
                assert!(matches!(decode_message(&bytes), Ok(Message::HandshakeAck { .. })));
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_address_is_ignored() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        server.handle_packet(Message::Disconnect, addr(7002));
        assert_eq!(server.world().player_count(), 0);
    }

    #[tokio::test]
    async fn test_bad_version_is_refused() {
        let mut server = Server::new("127.0.0.1:0", SimulationConfig::default()).await.unwrap();
        let mut game_rx = server.game_rx.take().unwrap();
        server.handle_packet(Message::Connect { client_version: 99 }, addr(7003));
        assert!(server.addrs.is_empty());

        match game_rx.try_recv().unwrap() {
            GameMessage::SendPacket { bytes, .. } => {
                let expected_code = DisconnectCode::VersionMismatch;
                assert!(matches!(
                    decode_message(&bytes),
                    Ok(Message::DisconnectReason { code, .. }) if code == expected_code
                ));
            }
        }
    }
}
