//! P2P Networking module
//!
//! Flooding gossip over framed TCP connections.
//!
//! # Features
//! - Length-prefixed JSON frames
//! - Port-list membership with join and leave notices
//! - Block, transaction and whole-chain gossip
//! - Single-writer node actor driving mining and persistence

pub mod codec;
pub mod message;
pub mod node;
pub mod peer;
pub mod server;

pub use codec::MessageCodec;
pub use message::{BlockAnnouncement, Message, Mode, Payload, Phase, MAGIC, MAX_MESSAGE_SIZE};
pub use node::{start, NodeConfig, NodeHandle};
pub use peer::{ConnId, NetworkError, PeerHandle, PeerSet};
pub use server::{connect_to_peer, handle_connection, ConnectionEvent, Server};
