//! Client connection management and move queuing for the server
//!
//! This module handles the server-side bookkeeping of connected clients:
//! - Client connection lifecycle (connect, disconnect, timeout)
//! - Per-client move queues in client timestamp order
//! - Duplicate and out-of-order move rejection
//! - Client capacity management and address tracking

use log::{debug, info};
use shared::protocol::MoveData;
use shared::CLIENT_TIMEOUT_SECS;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected client and the moves it sent since the last server tick
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any packet from this client
    pub last_seen: Instant,
    /// Newest client timestamp accepted into the queue
    pub last_queued_timestamp: Option<f32>,
    /// Moves waiting for the next server tick
    pub pending_moves: Vec<MoveData>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_queued_timestamp: None,
            pending_moves: Vec::new(),
        }
    }

    /// Queues a move if it is newer than everything queued so far
    ///
    /// Moves arriving with an older or equal timestamp are duplicates (a resent
    /// important move that already arrived) or were overtaken by a newer packet;
    /// either way they are dropped.
    pub fn add_move(&mut self, data: MoveData) -> bool {
        self.last_seen = Instant::now();
        if let Some(last) = self.last_queued_timestamp {
            if data.timestamp <= last {
                debug!(
                    "Client {}: discarding move at {:.3} (have {:.3})",
                    self.id, data.timestamp, last
                );
                return false;
            }
        }
        self.last_queued_timestamp = Some(data.timestamp);
        self.pending_moves.push(data);
        true
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Checks if the client has exceeded the connection timeout
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected clients and their move queues
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to add a new client connection
    ///
    /// Returns Some(client_id) if successful, None if server is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        let client = Client::new(client_id, addr);
        info!("Client {} connected from {}", client_id, addr);
        self.clients.insert(client_id, client);

        Some(client_id)
    }

    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!("Client {} disconnected", client.id);
            true
        } else {
            false
        }
    }

    /// Finds a client ID by their network address
    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<u32> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    /// Queues the contents of one move packet: the resent important move first,
    /// then the new moves in order. Returns how many moves were accepted.
    pub fn add_moves(
        &mut self,
        client_id: u32,
        old: Option<MoveData>,
        moves: Vec<MoveData>,
    ) -> Option<usize> {
        let client = self.clients.get_mut(&client_id)?;
        client.touch();
        let accepted = old
            .into_iter()
            .chain(moves)
            .map(|data| client.add_move(data))
            .filter(|accepted| *accepted)
            .count();
        Some(accepted)
    }

    /// Drains every client's queue. The result is sorted by client ID so the
    /// server processes clients in a stable order.
    pub fn take_pending_moves(&mut self) -> Vec<(u32, Vec<MoveData>)> {
        let mut batches: Vec<(u32, Vec<MoveData>)> = self
            .clients
            .iter_mut()
            .filter(|(_, client)| !client.pending_moves.is_empty())
            .map(|(id, client)| (*id, std::mem::take(&mut client.pending_moves)))
            .collect();
        batches.sort_by_key(|(id, _)| *id);
        batches
    }

    /// Checks for and removes timed-out clients
    ///
    /// Returns the removed client IDs so the game state can drop their entities.
    pub fn check_timeouts(&mut self) -> Vec<u32> {
        let timeout = Duration::from_secs(CLIENT_TIMEOUT_SECS);
        let timed_out: Vec<u32> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        for client_id in &timed_out {
            self.remove_client(client_id);
        }

        timed_out
    }

    pub fn get_client_addr(&self, client_id: u32) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    /// Gets all client IDs and their network addresses
    pub fn get_client_addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.clients
            .iter()
            .map(|(id, client)| (*id, client.addr))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
