//! TCP server and connection handling
//!
//! Accepts incoming peer connections and runs the per-connection reader and
//! writer tasks. Connection tasks never touch node state; they report
//! everything they see as [`ConnectionEvent`]s.

use crate::network::codec::MessageCodec;
use crate::network::message::Message;
use crate::network::peer::{ConnId, NetworkError};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Outgoing frames buffered per connection before sends start failing
pub const PEER_QUEUE_CAPACITY: usize = 256;

/// What a connection task reports to the node
#[derive(Debug)]
pub enum ConnectionEvent {
    /// Always the first event of a connection
    Opened {
        id: ConnId,
        outbound: bool,
        /// The dialled port for outbound connections
        port: Option<u16>,
        tx: mpsc::Sender<Message>,
    },
    Received {
        id: ConnId,
        message: Message,
    },
    /// Always the last event of a connection
    Closed {
        id: ConnId,
    },
}

/// TCP server for accepting peer connections
pub struct Server {
    listener: TcpListener,
    port: u16,
}

impl Server {
    /// Bind to a port and create the server
    pub async fn bind(host: &str, port: u16) -> Result<Self, NetworkError> {
        let addr = format!("{}:{}", host, port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        log::info!("Server listening on {}:{}", host, port);

        Ok(Self { listener, port })
    }

    /// Get the listening port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept incoming connections
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), NetworkError> {
        Ok(self.listener.accept().await?)
    }
}

/// Connect to a peer
pub async fn connect_to_peer(addr: &str) -> Result<TcpStream, NetworkError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))
}

/// Handle a peer connection (both inbound and outbound)
///
/// Reports `Opened`, then every parsed message, then `Closed` when the stream
/// ends, the framing breaks, the writer dies, or the node goes away. A frame
/// whose payload does not parse is logged and skipped.
pub async fn handle_connection<E>(
    stream: TcpStream,
    id: ConnId,
    outbound: bool,
    port: Option<u16>,
    events: mpsc::Sender<E>,
) where
    E: From<ConnectionEvent>,
{
    let addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let framed = Framed::new(stream, MessageCodec);
    let (mut writer, mut reader) = framed.split();

    // Create channel for sending to this peer
    let (tx, mut rx) = mpsc::channel::<Message>(PEER_QUEUE_CAPACITY);

    let opened = ConnectionEvent::Opened {
        id,
        outbound,
        port,
        tx,
    };
    if events.send(opened.into()).await.is_err() {
        return;
    }

    // Spawn writer task
    let mut write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = writer.send(msg).await {
                log::warn!("Error writing to connection {}: {}", id, e);
                break;
            }
        }
    });

    // Read messages
    loop {
        let next = tokio::select! {
            _ = events.closed() => break,
            _ = &mut write_handle => {
                log::warn!("Writer for {} ({}) stopped", addr, id);
                break;
            }
            next = reader.next() => next,
        };
        match next {
            Some(Ok(frame)) => {
                let message = match Message::from_bytes(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        log::warn!("Dropping frame from {} ({}): {}", addr, id, e);
                        continue;
                    }
                };
                log::debug!("Received {} from connection {}", message.type_name(), id);
                let event = ConnectionEvent::Received { id, message };
                if events.send(event.into()).await.is_err() {
                    break;
                }
            }
            Some(Err(e)) => {
                log::warn!("Error reading from {} ({}): {}", addr, id, e);
                break;
            }
            None => {
                log::info!("Peer {} ({}) disconnected", addr, id);
                break;
            }
        }
    }

    // Cleanup
    write_handle.abort();
    let _ = events.send(ConnectionEvent::Closed { id }.into()).await;
}
