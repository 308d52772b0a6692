//! Peer management for P2P networking
//!
//! The connection registry is owned by the node actor, so it needs no locks.
//! Every send is a non-blocking enqueue onto the connection's writer task.

use crate::network::message::Message;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Identifier of a live connection, assigned when it is opened
pub type ConnId = u64;

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Invalid {mode} payload: {reason}")]
    InvalidPayload { mode: String, reason: String },
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),
    #[error("Send to peer {0} failed: {1}")]
    SendFailed(ConnId, String),
    #[error("Unknown peer {0}")]
    UnknownPeer(ConnId),
    #[error("Node stopped")]
    NodeStopped,
}

/// Write side of one connection
#[derive(Debug, Clone)]
pub struct PeerHandle {
    /// Listening port of the remote node, once known
    pub port: Option<u16>,
    /// Whether this node initiated the connection
    pub outbound: bool,
    tx: mpsc::Sender<Message>,
}

impl PeerHandle {
    pub fn new(port: Option<u16>, outbound: bool, tx: mpsc::Sender<Message>) -> Self {
        Self { port, outbound, tx }
    }
}

/// Live connections keyed by [`ConnId`]
#[derive(Debug, Default)]
pub struct PeerSet {
    peers: BTreeMap<ConnId, PeerHandle>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, id: ConnId, handle: PeerHandle) {
        log::debug!(
            "Registered {} connection {} (port {:?})",
            if handle.outbound { "outbound" } else { "inbound" },
            id,
            handle.port
        );
        self.peers.insert(id, handle);
    }

    pub fn remove(&mut self, id: ConnId) -> Option<PeerHandle> {
        self.peers.remove(&id)
    }

    /// Record the listening port announced over connection `id`
    pub fn set_port(&mut self, id: ConnId, port: u16) {
        if let Some(handle) = self.peers.get_mut(&id) {
            handle.port = Some(port);
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Ports of every connected peer that has announced one
    pub fn ports(&self) -> Vec<u16> {
        self.peers.values().filter_map(|handle| handle.port).collect()
    }

    /// Send a message to a specific peer
    pub fn send_to(&self, id: ConnId, msg: Message) -> Result<(), NetworkError> {
        let handle = self.peers.get(&id).ok_or(NetworkError::UnknownPeer(id))?;
        handle.tx.try_send(msg).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "queue full",
                TrySendError::Closed(_) => "connection closed",
            };
            NetworkError::SendFailed(id, reason.to_string())
        })
    }

    /// Broadcast a message to all peers
    pub fn broadcast(&self, msg: &Message) {
        self.broadcast_filtered(msg, None);
    }

    /// Broadcast a message to all peers except one
    pub fn broadcast_except(&self, msg: &Message, except: ConnId) {
        self.broadcast_filtered(msg, Some(except));
    }

    fn broadcast_filtered(&self, msg: &Message, except: Option<ConnId>) {
        for &id in self.peers.keys() {
            if Some(id) == except {
                continue;
            }
            if let Err(e) = self.send_to(id, msg.clone()) {
                log::warn!("Failed to send {} to {}: {}", msg.type_name(), id, e);
            }
        }
    }
}
