//! Session tracking for the match server
//!
//! This module owns the mapping between network addresses and user ids:
//! - Connection lifecycle (connect, reconnect, disconnect, timeout)
//! - Identity assignment for anonymous clients
//! - Capacity management and address lookup for snapshot delivery
//!
//! The simulation never generates identities itself; every id it sees comes
//! from here.

use log::{debug, info};
use rand::Rng;
use shared::{SessionToken, UserId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected client session
#[derive(Debug)]
pub struct Client {
    /// Identity used by the simulation
    pub user_id: UserId,
    /// Network address for sending responses and snapshots
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
}

impl Client {
    pub fn new(user_id: UserId, addr: SocketAddr) -> Self {
        Self {
            user_id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the client has exceeded the connection timeout
    ///
    /// Returns true if no packets have been received from this client
    /// within the specified timeout duration, indicating a likely disconnect.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// What a client receives when its connection is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: UserId,
    pub token: SessionToken,
}

/// Manages all connected sessions
///
/// User ids are public, so they never authorize anything. A client resumes
/// an identity only by presenting the secret token it was issued.
pub struct ClientManager {
    clients: HashMap<UserId, Client>,
    /// Every token ever issued, so ended sessions can be resumed.
    tokens: HashMap<SessionToken, UserId>,
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            tokens: HashMap::new(),
            max_clients,
        }
    }

    /// Binds an address to a session.
    ///
    /// Any session already using `addr` is dropped first. A token issued
    /// earlier resumes its session at the new address; anything else gets a
    /// fresh anonymous identity and token if there is room. Returns None when
    /// the server is full.
    pub fn add_client(&mut self, addr: SocketAddr, token: Option<&str>) -> Option<Session> {
        if let Some(existing) = self.find_client_by_addr(addr) {
            info!("Replacing session {} from {}", existing, addr);
            self.remove_client(&existing);
        }

        let resumed = token.and_then(|token| {
            self.tokens
                .get_key_value(token)
                .map(|(token, user_id)| Session {
                    user_id: user_id.clone(),
                    token: token.clone(),
                })
        });

        match resumed {
            Some(session) => self.resume(addr, session),
            None => {
                if token.is_some() {
                    debug!("Unknown session token from {}, issuing a new identity", addr);
                }
                if self.clients.len() >= self.max_clients {
                    return None;
                }

                let session = Session {
                    user_id: self.generate_id(),
                    token: generate_token(),
                };
                info!("Client {} connected from {}", session.user_id, addr);
                self.tokens
                    .insert(session.token.clone(), session.user_id.clone());
                self.clients.insert(
                    session.user_id.clone(),
                    Client::new(session.user_id.clone(), addr),
                );
                Some(session)
            }
        }
    }

    fn resume(&mut self, addr: SocketAddr, session: Session) -> Option<Session> {
        if let Some(client) = self.clients.get_mut(&session.user_id) {
            info!(
                "Client {} reconnected from {} (was {})",
                client.user_id, addr, client.addr
            );
            client.addr = addr;
            client.last_seen = Instant::now();
            return Some(session);
        }

        if self.clients.len() >= self.max_clients {
            return None;
        }

        info!("Client {} resumed from {}", session.user_id, addr);
        self.clients.insert(
            session.user_id.clone(),
            Client::new(session.user_id.clone(), addr),
        );
        Some(session)
    }

    fn generate_id(&self) -> UserId {
        let mut rng = rand::thread_rng();
        loop {
            let candidate = format!("anon-{:08x}", rng.gen::<u32>());
            if !self.clients.contains_key(&candidate)
                && !self.tokens.values().any(|user_id| *user_id == candidate)
            {
                return candidate;
            }
        }
    }

    /// Removes a session. Returns false if it was already gone.
    pub fn remove_client(&mut self, user_id: &str) -> bool {
        if let Some(client) = self.clients.remove(user_id) {
            info!("Client {} disconnected", client.user_id);
            true
        } else {
            false
        }
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<UserId> {
        self.clients
            .values()
            .find(|client| client.addr == addr)
            .map(|client| client.user_id.clone())
    }

    /// Refreshes liveness for the session at `addr`.
    pub fn touch(&mut self, addr: SocketAddr) -> Option<UserId> {
        self.clients
            .values_mut()
            .find(|client| client.addr == addr)
            .map(|client| {
                client.last_seen = Instant::now();
                client.user_id.clone()
            })
    }

    /// Removes and returns every session silent for longer than `timeout`.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<UserId> {
        let timed_out: Vec<UserId> = self
            .clients
            .values()
            .filter(|client| client.is_timed_out(timeout))
            .map(|client| client.user_id.clone())
            .collect();

        for user_id in &timed_out {
            self.remove_client(user_id);
        }

        timed_out
    }

    /// All sessions sorted by user id, for snapshot delivery.
    pub fn get_client_addrs(&self) -> Vec<(UserId, SocketAddr)> {
        let mut addrs: Vec<(UserId, SocketAddr)> = self
            .clients
            .values()
            .map(|client| (client.user_id.clone(), client.addr))
            .collect();
        addrs.sort_by(|a, b| a.0.cmp(&b.0));
        addrs
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// 128 random bits, hex encoded.
fn generate_token() -> SessionToken {
    format!("{:032x}", rand::thread_rng().gen::<u128>())
}
