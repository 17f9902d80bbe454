use bincode::{deserialize, serialize};
use clap::Parser;
use shared::{
    Direction, GameSnapshot, JoinGameRequest, Packet, SessionToken, UserId, XDirection, YDirection,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless client that walks a player around")]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Session token printed by an earlier run, to resume that player
    #[arg(long)]
    token: Option<SessionToken>,

    /// Server tick length in milliseconds, used to smooth snapshots
    #[arg(long, default_value = "50")]
    tick_ms: u64,
}

struct TestClient {
    socket: UdpSocket,
    server_addr: SocketAddr,
    buf: [u8; 2048],
    user_id: UserId,
    tick_duration: Duration,
    previous: Option<(Instant, GameSnapshot)>,
    latest: Option<(Instant, GameSnapshot)>,
}

impl TestClient {
    async fn send(&self, packet: &Packet) -> Result<(), BoxError> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    /// Waits for the next packet, recording snapshots as they pass by.
    async fn recv(&mut self, wait: Duration) -> Result<Option<Packet>, BoxError> {
        let (len, _) = match timeout(wait, self.socket.recv_from(&mut self.buf)).await {
            Ok(result) => result?,
            Err(_) => return Ok(None),
        };
        let packet: Packet = deserialize(&self.buf[0..len])?;

        if let Packet::GameState { state, .. } = &packet {
            self.previous = self.latest.take();
            self.latest = Some((Instant::now(), state.clone()));
        }
        Ok(Some(packet))
    }

    async fn wait_for_response(&mut self) -> Result<Result<(), String>, BoxError> {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if let Some(Packet::Response { result }) =
                self.recv(Duration::from_millis(500)).await?
            {
                return Ok(result);
            }
        }
        Err("No response from server".into())
    }

    /// Smoothed view of the world between the last two snapshots.
    fn display_state(&self) -> Option<GameSnapshot> {
        match (&self.previous, &self.latest) {
            (Some((_, from)), Some((received, to))) => {
                let pct = received.elapsed().as_secs_f32() / self.tick_duration.as_secs_f32();
                Some(from.interpolate(to, pct))
            }
            (None, Some((_, to))) => Some(to.clone()),
            _ => None,
        }
    }

    async fn hold(
        &mut self,
        label: &str,
        direction: Direction,
        duration: Duration,
    ) -> Result<(), BoxError> {
        println!("{}: {:?}", label, direction);
        self.send(&Packet::SetDirection(direction)).await?;

        let start = Instant::now();
        let mut last_print = Instant::now();
        while start.elapsed() < duration {
            if let Some(Packet::Response { result: Err(reason) }) =
                self.recv(Duration::from_millis(100)).await?
            {
                println!("  Request rejected: {}", reason);
            }

            if last_print.elapsed() >= Duration::from_millis(250) {
                last_print = Instant::now();
                if let Some(state) = self.display_state() {
                    if let Some(me) = state.player(&self.user_id) {
                        println!(
                            "  {} at ({:.1}, {:.1}) moving {:?}/{:?}, {} players",
                            me.id,
                            me.x,
                            me.y,
                            me.horizontal_direction,
                            me.vertical_direction,
                            state.players.len()
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    println!("Client socket bound to {}", socket.local_addr()?);
    let server_addr = args.server.parse::<SocketAddr>()?;

    let mut client = TestClient {
        socket,
        server_addr,
        buf: [0u8; 2048],
        user_id: UserId::new(),
        tick_duration: Duration::from_millis(args.tick_ms.max(1)),
        previous: None,
        latest: None,
    };

    println!("Sending connection request to {}", server_addr);
    client
        .send(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
            token: args.token,
        })
        .await?;

    match client.recv(Duration::from_secs(2)).await? {
        Some(Packet::Connected { user_id, token }) => {
            println!("Connected as {}", user_id);
            println!("Resume this player later with --token {}", token);
            client.user_id = user_id;
        }
        Some(other) => return Err(format!("Expected Connected but got {:?}", other).into()),
        None => return Err("Server did not answer".into()),
    }

    client.send(&Packet::JoinGame(JoinGameRequest)).await?;
    match client.wait_for_response().await? {
        Ok(()) => println!("Joined the match"),
        Err(reason) => println!("Join rejected: {}", reason),
    }

    let script = [
        ("Walk right", Direction::new(XDirection::Right, YDirection::None), 1500),
        ("Jump", Direction::new(XDirection::Right, YDirection::Up), 500),
        ("Walk left", Direction::new(XDirection::Left, YDirection::None), 1500),
        ("Stand still", Direction::default(), 1000),
    ];
    for (label, direction, millis) in script {
        client
            .hold(label, direction, Duration::from_millis(millis))
            .await?;
    }

    println!("Sending disconnect request");
    client.send(&Packet::Disconnect).await?;
    println!("Test client finished");

    Ok(())
}
