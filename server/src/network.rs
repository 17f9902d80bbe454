//! Server network layer handling UDP communications and tick scheduling

use crate::client_manager::{ClientManager, Session};
use crate::config::GameConfig;
use crate::game::GameState;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{Direction, Packet, UserId, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, MissedTickBehavior};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Cap on the time a single tick may simulate, in seconds
const MAX_DELTA_TIME: f32 = 0.05;
const STATS_INTERVAL_TICKS: u32 = 100;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    ClientTimeout { user_id: UserId },
    Shutdown,
}

/// Messages sent from game loop to network tasks
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// Main server coordinating networking and the match simulation
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    game_state: GameState,
    tick_duration: Duration,
    client_timeout: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: mpsc::UnboundedReceiver<GameMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_clients: usize,
        client_timeout: Duration,
        config: GameConfig,
    ) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            game_state: GameState::initialize(config),
            tick_duration,
            client_timeout,
            server_tx,
            server_rx,
            game_tx,
            game_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender for stopping a running server with [`ServerMessage::Shutdown`].
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn game_state(&self) -> &GameState {
        &self.game_state
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match deserialize::<Packet>(&buffer[0..len]) {
                        Ok(packet) => {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        }
                        Err(_) => warn!("Failed to deserialize packet from {}", addr),
                    },
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let mut game_rx = std::mem::replace(&mut self.game_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();
        let client_timeout = self.client_timeout;

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(client_timeout)
                };

                for user_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { user_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Looks up the session behind `addr`, refreshing its liveness.
    async fn session(&self, addr: SocketAddr) -> Option<UserId> {
        let user_id = self.clients.write().await.touch(addr);
        if user_id.is_none() {
            warn!("Request from unknown address {}", addr);
        }
        user_id
    }

    /// A player whose session ended stays in the match but stops steering.
    fn end_session(&mut self, user_id: &str) {
        if self.game_state.player(user_id).is_none() {
            return;
        }
        if let Err(e) = self.game_state.set_direction(user_id, &Direction::default()) {
            warn!("Failed to reset input for {}: {}", user_id, e);
        }
    }

    /// Processes incoming packets and applies requests to the simulation
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect {
                client_version,
                token,
            } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    warn!(
                        "Rejected {}: protocol version {} (expected {})",
                        addr, client_version, PROTOCOL_VERSION
                    );
                    let reason = "Protocol version mismatch".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                }

                let (replaced, session) = {
                    let mut clients = self.clients.write().await;
                    let replaced = clients.find_client_by_addr(addr);
                    (replaced, clients.add_client(addr, token.as_deref()))
                };

                let kept = session.as_ref().map(|session| &session.user_id);
                if let Some(replaced) = replaced.filter(|id| Some(id) != kept) {
                    self.end_session(&replaced);
                }

                match session {
                    Some(Session { user_id, token }) => {
                        self.send_packet(Packet::Connected { user_id, token }, addr)
                    }
                    None => {
                        warn!("Rejected {}: server full", addr);
                        let reason = "Server full".to_string();
                        self.send_packet(Packet::Disconnected { reason }, addr);
                    }
                }
            }

            Packet::JoinGame(request) => {
                if let Some(user_id) = self.session(addr).await {
                    let result = self
                        .game_state
                        .join_game(&user_id, &request)
                        .map_err(|e| e.to_string());
                    self.send_packet(Packet::Response { result }, addr);
                }
            }

            Packet::SetDirection(request) => {
                if let Some(user_id) = self.session(addr).await {
                    let result = self
                        .game_state
                        .set_direction(&user_id, &request)
                        .map_err(|e| e.to_string());
                    self.send_packet(Packet::Response { result }, addr);
                }
            }

            Packet::Heartbeat => {
                self.session(addr).await;
            }

            Packet::Disconnect => {
                let user_id = {
                    let clients = self.clients.read().await;
                    clients.find_client_by_addr(addr)
                };

                if let Some(user_id) = user_id {
                    self.clients.write().await.remove_client(&user_id);
                    self.end_session(&user_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Runs one simulation step and delivers each client its view.
    async fn advance_tick(&mut self, dt: f32) {
        let dt = if dt > MAX_DELTA_TIME {
            warn!(
                "Large delta time detected ({:.3}s), capping to {:.3}s",
                dt, MAX_DELTA_TIME
            );
            MAX_DELTA_TIME
        } else {
            dt
        };

        self.game_state.on_tick(dt);
        self.game_state.tick = self.game_state.tick.wrapping_add(1);
        self.broadcast_game_state().await;
    }

    async fn broadcast_game_state(&self) {
        let client_addrs = self.clients.read().await.get_client_addrs();
        if client_addrs.is_empty() {
            return;
        }

        let timestamp = current_timestamp();
        for (user_id, addr) in client_addrs {
            let packet = Packet::GameState {
                tick: self.game_state.tick,
                timestamp,
                state: self.game_state.get_user_state(&user_id),
            };
            self.send_packet(packet, addr);
        }
    }

    /// Tells every connected client the server is going away.
    async fn notify_shutdown(&self) {
        let packet = Packet::Disconnected {
            reason: "Server shutting down".to_string(),
        };
        let client_addrs = self.clients.read().await.get_client_addrs();

        for (user_id, addr) in client_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &packet, addr).await {
                error!("Failed to notify {} of shutdown: {}", user_id, e);
            }
        }
    }

    /// Applies one message from the network tasks. Returns false once the
    /// server should stop.
    async fn handle_message(&mut self, message: Option<ServerMessage>) -> bool {
        match message {
            Some(ServerMessage::PacketReceived { packet, addr }) => {
                self.handle_packet(packet, addr).await;
                true
            }
            Some(ServerMessage::ClientTimeout { user_id }) => {
                info!("Client {} timed out", user_id);
                self.end_session(&user_id);
                true
            }
            Some(ServerMessage::Shutdown) | None => {
                info!("Server shutting down");
                self.notify_shutdown().await;
                false
            }
        }
    }

    /// Main server loop. All simulation mutations happen here, one at a time.
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();

        info!(
            "Server started successfully ({:.0}Hz, {} platforms)",
            1.0 / self.tick_duration.as_secs_f32(),
            self.game_state.platform_count()
        );

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    if !self.handle_message(message).await {
                        break;
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.advance_tick(dt).await;

                    if self.game_state.tick % STATS_INTERVAL_TICKS == 0 {
                        let client_count = self.clients.read().await.len();
                        debug!(
                            "Tick {}: {} clients, {} players, {:.1}Hz",
                            self.game_state.tick,
                            client_count,
                            self.game_state.player_count(),
                            1.0 / dt.max(f32::EPSILON)
                        );
                    }
                },
            }
        }

        Ok(())
    }
}

fn current_timestamp() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis();
    millis.min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::{JoinGameRequest, SessionToken, XDirection, YDirection};
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::time::timeout;

    fn client_addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    async fn server_with_timeout(max_clients: usize, client_timeout: Duration) -> Server {
        Server::new(
            "127.0.0.1:0",
            Duration::from_millis(50),
            max_clients,
            client_timeout,
            GameConfig::default(),
        )
        .await
        .unwrap()
    }

    async fn test_server(max_clients: usize) -> Server {
        server_with_timeout(max_clients, Duration::from_secs(5)).await
    }

    fn sent(server: &mut Server) -> Vec<(Packet, SocketAddr)> {
        let mut packets = Vec::new();
        while let Ok(GameMessage::SendPacket { packet, addr }) = server.game_rx.try_recv() {
            packets.push((packet, addr));
        }
        packets
    }

    async fn connect_with(server: &mut Server, addr: SocketAddr, token: Option<&str>) -> Session {
        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            token: token.map(str::to_string),
        };
        server.handle_packet(packet, addr).await;

        match sent(server).as_slice() {
            [(Packet::Connected { user_id, token }, to)] if *to == addr => Session {
                user_id: user_id.clone(),
                token: token.clone(),
            },
            other => panic!("Expected Connected for {}, got {:?}", addr, other),
        }
    }

    async fn connect(server: &mut Server, addr: SocketAddr) -> Session {
        connect_with(server, addr, None).await
    }

    async fn join(server: &mut Server, addr: SocketAddr) {
        server
            .handle_packet(Packet::JoinGame(JoinGameRequest), addr)
            .await;
        assert_eq!(response(&sent(server)), Ok(()));
    }

    async fn steer(
        server: &mut Server,
        addr: SocketAddr,
        direction: Direction,
    ) -> Result<(), String> {
        server
            .handle_packet(Packet::SetDirection(direction), addr)
            .await;
        response(&sent(server))
    }

    fn response(packets: &[(Packet, SocketAddr)]) -> Result<(), String> {
        match packets {
            [(Packet::Response { result }, _)] => result.clone(),
            other => panic!("Expected a single response, got {:?}", other),
        }
    }

    fn is_session_token(token: &SessionToken) -> bool {
        token.len() == 32 && token.chars().all(|c| c.is_ascii_hexdigit())
    }

    #[test]
    fn test_server_binds_ephemeral_port() {
        let server = tokio_test::block_on(Server::new(
            "127.0.0.1:0",
            Duration::from_millis(50),
            4,
            Duration::from_secs(5),
            GameConfig::default(),
        ))
        .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.game_state().platform_count(), 5);
        assert_eq!(server.game_state().tick, 0);
    }

    #[tokio::test]
    async fn test_connect_assigns_session() {
        let mut server = test_server(4).await;
        let addr = client_addr(9001);

        let session = connect(&mut server, addr).await;

        assert!(session.user_id.starts_with("anon-"));
        assert!(is_session_token(&session.token));
        assert_ne!(session.token, session.user_id);
        assert_eq!(server.clients.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejects_version_mismatch() {
        let mut server = test_server(4).await;

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION + 1,
            token: None,
        };
        server.handle_packet(packet, client_addr(9001)).await;

        match sent(&mut server).as_slice() {
            [(Packet::Disconnected { reason }, _)] => {
                assert_eq!(reason, "Protocol version mismatch")
            }
            other => panic!("Unexpected packets {:?}", other),
        }
        assert!(server.clients.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_connect_rejects_when_full() {
        let mut server = test_server(1).await;
        connect(&mut server, client_addr(9001)).await;

        let packet = Packet::Connect {
            client_version: PROTOCOL_VERSION,
            token: None,
        };
        server.handle_packet(packet, client_addr(9002)).await;

        match sent(&mut server).as_slice() {
            [(Packet::Disconnected { reason }, _)] => assert_eq!(reason, "Server full"),
            other => panic!("Unexpected packets {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_and_duplicate_join_responses() {
        let mut server = test_server(4).await;
        let addr = client_addr(9001);
        connect(&mut server, addr).await;

        join(&mut server, addr).await;

        server
            .handle_packet(Packet::JoinGame(JoinGameRequest), addr)
            .await;
        assert_eq!(
            response(&sent(&mut server)),
            Err("Already joined".to_string())
        );
        assert_eq!(server.game_state().player_count(), 1);
    }

    #[tokio::test]
    async fn test_set_direction_before_join_is_rejected() {
        let mut server = test_server(4).await;
        let addr = client_addr(9001);
        connect(&mut server, addr).await;

        let request = Direction::new(XDirection::Right, YDirection::None);
        assert_eq!(
            steer(&mut server, addr, request).await,
            Err("Not joined".to_string())
        );
    }

    #[tokio::test]
    async fn test_requests_from_unknown_address_are_ignored() {
        let mut server = test_server(4).await;

        server
            .handle_packet(Packet::JoinGame(JoinGameRequest), client_addr(9001))
            .await;

        assert!(sent(&mut server).is_empty());
        assert_eq!(server.game_state().player_count(), 0);
    }

    #[tokio::test]
    async fn test_public_user_id_cannot_take_over_session() {
        let mut server = test_server(4).await;
        let owner_addr = client_addr(9001);
        let other_addr = client_addr(9002);
        let owner = connect(&mut server, owner_addr).await;
        join(&mut server, owner_addr).await;
        let walk = Direction::new(XDirection::Right, YDirection::None);
        assert_eq!(steer(&mut server, owner_addr, walk).await, Ok(()));

        // Every snapshot names the owner, so anyone can learn the id
        server.advance_tick(0.05).await;
        let public_id = match sent(&mut server).as_slice() {
            [(Packet::GameState { state, .. }, _)] => state.players[0].id.clone(),
            other => panic!("Unexpected packets {:?}", other),
        };
        assert_eq!(public_id, owner.user_id);

        let other = connect_with(&mut server, other_addr, Some(&public_id)).await;
        assert_ne!(other.user_id, owner.user_id);
        assert_ne!(other.token, owner.token);

        let stop = Direction::new(XDirection::Left, YDirection::Up);
        assert_eq!(
            steer(&mut server, other_addr, stop).await,
            Err("Not joined".to_string())
        );
        assert_eq!(steer(&mut server, owner_addr, walk).await, Ok(()));

        let bound = server.clients.read().await.find_client_by_addr(owner_addr);
        assert_eq!(bound, Some(owner.user_id.clone()));
        let player = server.game_state().player(&owner.user_id).unwrap();
        assert_eq!(player.intent, walk);
    }

    #[tokio::test]
    async fn test_session_token_resumes_control_from_new_address() {
        let mut server = test_server(4).await;
        let first_addr = client_addr(9001);
        let second_addr = client_addr(9002);
        let session = connect(&mut server, first_addr).await;
        join(&mut server, first_addr).await;

        let resumed = connect_with(&mut server, second_addr, Some(&session.token)).await;
        assert_eq!(resumed, session);

        let jump = Direction::new(XDirection::None, YDirection::Up);
        assert_eq!(steer(&mut server, second_addr, jump).await, Ok(()));
        server
            .handle_packet(Packet::JoinGame(JoinGameRequest), first_addr)
            .await;
        assert!(sent(&mut server).is_empty());

        let player = server.game_state().player(&session.user_id).unwrap();
        assert_eq!(player.intent, jump);
        assert_eq!(server.game_state().player_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_keeps_player_and_clears_input() {
        let mut server = test_server(4).await;
        let addr = client_addr(9001);
        let session = connect(&mut server, addr).await;
        join(&mut server, addr).await;
        let request = Direction::new(XDirection::Right, YDirection::Up);
        assert_eq!(steer(&mut server, addr, request).await, Ok(()));

        server.handle_packet(Packet::Disconnect, addr).await;

        assert!(server.clients.read().await.is_empty());
        let player = server.game_state().player(&session.user_id).unwrap();
        assert_eq!(player.intent, Direction::default());
    }

    #[tokio::test]
    async fn test_client_timeout_clears_input() {
        let mut server = server_with_timeout(4, Duration::from_millis(10)).await;
        let addr = client_addr(9001);
        let session = connect(&mut server, addr).await;
        join(&mut server, addr).await;
        let request = Direction::new(XDirection::Left, YDirection::Up);
        assert_eq!(steer(&mut server, addr, request).await, Ok(()));

        tokio::time::sleep(Duration::from_millis(30)).await;
        server.spawn_timeout_checker();

        let message = timeout(Duration::from_secs(2), server.server_rx.recv())
            .await
            .expect("timeout checker never reported");
        match &message {
            Some(ServerMessage::ClientTimeout { user_id }) => {
                assert_eq!(user_id, &session.user_id)
            }
            other => panic!("Unexpected message {:?}", other),
        }
        assert!(server.handle_message(message).await);

        assert!(server.clients.read().await.is_empty());
        let player = server.game_state().player(&session.user_id).unwrap();
        assert_eq!(player.intent, Direction::default());
        assert!(sent(&mut server).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_message_stops_loop() {
        let mut server = test_server(4).await;

        assert!(!server.handle_message(Some(ServerMessage::Shutdown)).await);
        assert!(!server.handle_message(None).await);
    }

    #[tokio::test]
    async fn test_tick_delivers_snapshot_to_each_client() {
        let mut server = test_server(4).await;
        let alice = connect(&mut server, client_addr(9001)).await;
        connect(&mut server, client_addr(9002)).await;
        join(&mut server, client_addr(9001)).await;

        server.advance_tick(0.05).await;

        let packets = sent(&mut server);
        assert_eq!(packets.len(), 2);
        for (packet, _) in packets {
            match packet {
                Packet::GameState { tick, state, .. } => {
                    assert_eq!(tick, 1);
                    assert_eq!(state.players.len(), 1);
                    assert!(state.player(&alice.user_id).is_some());
                }
                other => panic!("Unexpected packet {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_tick_caps_large_delta() {
        let mut server = test_server(4).await;
        let addr = client_addr(9001);
        let session = connect(&mut server, addr).await;
        join(&mut server, addr).await;

        server.advance_tick(1.0).await;

        // One capped step of free fall from rest
        let state = server.game_state().get_user_state(&session.user_id);
        assert_approx_eq!(state.players[0].y, 0.5, 0.001);
    }

    #[test]
    fn test_timestamp_is_monotonic_enough() {
        let first = current_timestamp();
        std::thread::sleep(Duration::from_millis(2));
        assert!(current_timestamp() > first);
    }
}
