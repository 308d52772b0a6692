//! Network message types for P2P communication
//!
//! Every frame carries the envelope `{mode, phase, originPort, payload}`.
//! The payload shape depends on the mode, so decoding goes through a raw
//! envelope first and then checks the payload against the mode.

use crate::core::{Block, Transaction};
use crate::network::peer::NetworkError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Magic bytes for message framing
pub const MAGIC: [u8; 4] = [0x47, 0x4C, 0x44, 0x47]; // "GLDG"

/// Maximum encoded message size (whole chains travel in one frame)
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Message kind, as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    InitialPortConnection,
    RequestBlockchain,
    BroadcastBlockchain,
    BroadcastNewNode,
    BroadcastBlock,
    BroadcastTransaction,
    BroadcastDeleteNode,
}

/// Whether a message opens an exchange or answers one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Success,
}

/// A gossiped block together with the port of the node that mined it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockAnnouncement {
    pub original_sender: u16,
    pub block: Block,
}

/// Mode-specific message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Empty when joining; the responder's known ports in the reply
    InitialPortConnection(Vec<u16>),
    RequestBlockchain,
    BroadcastBlockchain(Vec<Block>),
    BroadcastNewNode(Vec<u16>),
    BroadcastBlock(BlockAnnouncement),
    BroadcastTransaction(Transaction),
    /// Port of a node whose connection was lost
    BroadcastDeleteNode(u16),
}

impl Payload {
    pub fn mode(&self) -> Mode {
        match self {
            Payload::InitialPortConnection(_) => Mode::InitialPortConnection,
            Payload::RequestBlockchain => Mode::RequestBlockchain,
            Payload::BroadcastBlockchain(_) => Mode::BroadcastBlockchain,
            Payload::BroadcastNewNode(_) => Mode::BroadcastNewNode,
            Payload::BroadcastBlock(_) => Mode::BroadcastBlock,
            Payload::BroadcastTransaction(_) => Mode::BroadcastTransaction,
            Payload::BroadcastDeleteNode(_) => Mode::BroadcastDeleteNode,
        }
    }
}

/// A gossip message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub struct Message {
    pub phase: Phase,
    /// Listening port of the node that created this envelope
    pub origin_port: u16,
    pub payload: Payload,
}

impl Message {
    /// A `start` message from `origin_port`
    pub fn start(origin_port: u16, payload: Payload) -> Self {
        Self {
            phase: Phase::Start,
            origin_port,
            payload,
        }
    }

    pub fn mode(&self) -> Mode {
        self.payload.mode()
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, NetworkError> {
        serde_json::to_vec(self).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(data).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
    }

    /// Get message type name for logging
    pub fn type_name(&self) -> &'static str {
        match self.mode() {
            Mode::InitialPortConnection => "initialPortConnection",
            Mode::RequestBlockchain => "requestBlockchain",
            Mode::BroadcastBlockchain => "broadcastBlockchain",
            Mode::BroadcastNewNode => "broadcastNewNode",
            Mode::BroadcastBlock => "broadcastBlock",
            Mode::BroadcastTransaction => "broadcastTransaction",
            Mode::BroadcastDeleteNode => "broadcastDeleteNode",
        }
    }
}

/// Wire form of [`Message`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    mode: Mode,
    phase: Phase,
    origin_port: u16,
    #[serde(default)]
    payload: Value,
}

/// Absent, null and `""` all mean "no payload"
fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

impl TryFrom<Envelope> for Message {
    type Error = NetworkError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        let mode = envelope.mode;
        let invalid = |e: serde_json::Error| NetworkError::InvalidPayload {
            mode: format!("{:?}", mode),
            reason: e.to_string(),
        };
        let value = envelope.payload;

        let payload = match mode {
            Mode::InitialPortConnection if is_empty_payload(&value) => {
                Payload::InitialPortConnection(Vec::new())
            }
            Mode::InitialPortConnection => {
                Payload::InitialPortConnection(serde_json::from_value(value).map_err(invalid)?)
            }
            Mode::RequestBlockchain => Payload::RequestBlockchain,
            Mode::BroadcastBlockchain => {
                Payload::BroadcastBlockchain(serde_json::from_value(value).map_err(invalid)?)
            }
            Mode::BroadcastNewNode => {
                Payload::BroadcastNewNode(serde_json::from_value(value).map_err(invalid)?)
            }
            Mode::BroadcastBlock => {
                Payload::BroadcastBlock(serde_json::from_value(value).map_err(invalid)?)
            }
            Mode::BroadcastTransaction => {
                Payload::BroadcastTransaction(serde_json::from_value(value).map_err(invalid)?)
            }
            Mode::BroadcastDeleteNode => {
                Payload::BroadcastDeleteNode(serde_json::from_value(value).map_err(invalid)?)
            }
        };

        Ok(Self {
            phase: envelope.phase,
            origin_port: envelope.origin_port,
            payload,
        })
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let mode = message.mode();
        // Plain data types: serializing them to a Value cannot fail
        let payload = match message.payload {
            Payload::InitialPortConnection(ports) | Payload::BroadcastNewNode(ports) => {
                Value::from(ports)
            }
            Payload::RequestBlockchain => Value::Null,
            Payload::BroadcastBlockchain(blocks) => serde_json::to_value(blocks).unwrap_or_default(),
            Payload::BroadcastBlock(announcement) => {
                serde_json::to_value(announcement).unwrap_or_default()
            }
            Payload::BroadcastTransaction(tx) => serde_json::to_value(tx).unwrap_or_default(),
            Payload::BroadcastDeleteNode(port) => Value::from(port),
        };

        Self {
            mode,
            phase: message.phase,
            origin_port: message.origin_port,
            payload,
        }
    }
}
