//! P2P Node implementation
//!
//! One actor task owns the ledger, the transaction pool, the known-port set
//! and the connection registry. Connection tasks, the accept loop, the mining
//! ticker, the mining worker and [`NodeHandle`] callers only send it events,
//! and each event is handled to completion before the next one.

use crate::core::{
    validate_block_transactions, validate_chain_transactions, Block, Blockchain, Transaction,
    UtxoSet,
};
use crate::mining::{MinedBlock, MiningJob, TransactionPool};
use crate::network::message::{BlockAnnouncement, Message, Payload, Phase};
use crate::network::peer::{ConnId, NetworkError, PeerHandle, PeerSet};
use crate::network::server::{connect_to_peer, handle_connection, ConnectionEvent, Server};
use crate::storage::{BlockStore, StorageConfig};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Events buffered for the actor before senders wait
const EVENT_QUEUE_CAPACITY: usize = 1024;

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Interface to listen on; peers are always dialled on this host
    pub host: String,
    /// Port to listen on (0 picks a free one)
    pub port: u16,
    /// Port of a running node to join
    pub bootstrap_peer: Option<u16>,
    /// Receives the coinbase of every block this node mines
    pub miner_address: String,
    /// Period of the mining trigger
    pub tick_interval: Duration,
    /// Whether this node holds an authoritative chain from the start
    pub initialized: bool,
    /// Where the chain is persisted; `None` keeps it in memory only
    pub data_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6001,
            bootstrap_peer: None,
            miner_address: String::new(),
            tick_interval: Duration::from_secs(5),
            initialized: true,
            data_dir: None,
        }
    }
}

/// Everything the actor reacts to
#[derive(Debug)]
enum Event {
    Connection(ConnectionEvent),
    Tick,
    Mined(Option<MinedBlock>),
    Command(Command),
}

impl From<ConnectionEvent> for Event {
    fn from(event: ConnectionEvent) -> Self {
        Event::Connection(event)
    }
}

#[derive(Debug)]
enum Command {
    Blocks(oneshot::Sender<Vec<Block>>),
    KnownPorts(oneshot::Sender<Vec<u16>>),
    Pending(oneshot::Sender<Vec<Transaction>>),
    UtxoSet(oneshot::Sender<UtxoSet>),
    SubmitTransaction(Transaction, oneshot::Sender<bool>),
    RequestBlockchain(oneshot::Sender<()>),
    Initialize(oneshot::Sender<()>),
    /// Mine now; answered with the appended block once the attempt ends
    Mine(oneshot::Sender<Option<Block>>),
    Shutdown(oneshot::Sender<()>),
}

/// The node actor
struct Node {
    port: u16,
    chain: Blockchain,
    pool: TransactionPool,
    known_ports: BTreeSet<u16>,
    peers: PeerSet,
    initialized: bool,
    store: Option<BlockStore>,
    /// Cancel flag of the running nonce search
    mining: Option<Arc<AtomicBool>>,
    /// Callers waiting for the running attempt
    mine_waiters: Vec<oneshot::Sender<Option<Block>>>,
    events: mpsc::Sender<Event>,
}

impl Node {
    fn new(
        config: &NodeConfig,
        port: u16,
        chain: Blockchain,
        store: Option<BlockStore>,
        events: mpsc::Sender<Event>,
    ) -> Self {
        Self {
            port,
            chain,
            pool: TransactionPool::new(&config.miner_address),
            known_ports: BTreeSet::new(),
            peers: PeerSet::new(),
            initialized: config.initialized,
            store,
            mining: None,
            mine_waiters: Vec::new(),
            events,
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        log::info!(
            "Node {} running at height {} ({})",
            self.port,
            self.chain.height(),
            if self.initialized { "initialized" } else { "relay only" }
        );

        while let Some(event) = events.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }

        self.cancel_mining();
        log::info!("Node {} stopped", self.port);
    }

    /// Process one event; `false` stops the actor
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Connection(ConnectionEvent::Opened {
                id,
                outbound,
                port,
                tx,
            }) => self.on_opened(id, outbound, port, tx),
            Event::Connection(ConnectionEvent::Received { id, message }) => {
                self.handle_message(id, message)
            }
            Event::Connection(ConnectionEvent::Closed { id }) => self.on_closed(id),
            Event::Tick => self.on_tick(),
            Event::Mined(result) => self.on_mined(result),
            Event::Command(command) => return self.on_command(command),
        }
        true
    }

    fn message(&self, payload: Payload) -> Message {
        Message::start(self.port, payload)
    }

    fn chain_message(&self) -> Message {
        self.message(Payload::BroadcastBlockchain(self.chain.blocks().to_vec()))
    }

    fn known_ports(&self) -> Vec<u16> {
        self.known_ports.iter().copied().collect()
    }

    fn merge_ports(&mut self, ports: &[u16]) {
        let own = self.port;
        self.known_ports
            .extend(ports.iter().copied().filter(|&port| port != own));
    }

    // =========================================================================
    // Connections
    // =========================================================================

    fn on_opened(&mut self, id: ConnId, outbound: bool, port: Option<u16>, tx: mpsc::Sender<Message>) {
        self.peers.add(id, PeerHandle::new(port, outbound, tx));

        if outbound {
            if let Some(port) = port {
                self.known_ports.insert(port);
            }
            let join = self.message(Payload::InitialPortConnection(Vec::new()));
            if let Err(e) = self.peers.send_to(id, join) {
                log::warn!("Failed to send join request: {}", e);
            }
        }
    }

    fn on_closed(&mut self, id: ConnId) {
        let Some(handle) = self.peers.remove(id) else {
            return;
        };

        match (handle.outbound, handle.port) {
            (true, Some(lost)) => {
                log::warn!("Lost connection to node {}", lost);
                self.known_ports.remove(&lost);
                let notice = self.message(Payload::BroadcastDeleteNode(lost));
                self.peers.broadcast(&notice);
            }
            _ => log::info!("Connection {} closed (port {:?})", id, handle.port),
        }
    }

    // =========================================================================
    // Gossip
    // =========================================================================

    /// Handle incoming messages
    fn handle_message(&mut self, from: ConnId, msg: Message) {
        log::debug!(
            "Received {} ({:?}) from node {} over {}",
            msg.type_name(),
            msg.phase,
            msg.origin_port,
            from
        );

        if msg.phase == Phase::Success {
            self.handle_reply(msg);
            return;
        }

        match &msg.payload {
            Payload::InitialPortConnection(_) => {
                let joined = msg.origin_port;
                let reply = Message {
                    phase: Phase::Success,
                    origin_port: self.port,
                    payload: Payload::InitialPortConnection(self.known_ports()),
                };
                if let Err(e) = self.peers.send_to(from, reply) {
                    log::warn!("Failed to answer join from {}: {}", joined, e);
                }

                self.peers.set_port(from, joined);
                self.known_ports.insert(joined);
                log::info!("Node {} joined", joined);

                let announce = self.message(Payload::BroadcastNewNode(self.known_ports()));
                self.peers.broadcast_except(&announce, from);
            }

            Payload::RequestBlockchain => {
                self.peers.broadcast_except(&msg, from);
                if self.initialized {
                    self.peers.broadcast(&self.chain_message());
                }
            }

            Payload::BroadcastBlockchain(blocks) => {
                if !self.initialized {
                    self.peers.broadcast_except(&msg, from);
                } else if self.accept_chain(blocks.clone()) && msg.origin_port != self.port {
                    self.peers.broadcast(&self.chain_message());
                }
            }

            Payload::BroadcastNewNode(ports) => {
                self.merge_ports(ports);
                self.peers.broadcast_except(&msg, from);
            }

            Payload::BroadcastBlock(announcement) => {
                if self.initialized {
                    self.accept_block(announcement.block.clone());
                }
                if announcement.original_sender != self.port {
                    self.peers.broadcast_except(&msg, from);
                }
            }

            Payload::BroadcastTransaction(tx) => {
                self.pool.receive(tx.clone());
                self.peers.broadcast_except(&msg, from);
            }

            Payload::BroadcastDeleteNode(lost) => {
                if self.known_ports.remove(lost) {
                    log::info!("Node {} left the network", lost);
                }
                if msg.origin_port != self.port {
                    self.peers.broadcast_except(&msg, from);
                }
            }
        }
    }

    fn handle_reply(&mut self, msg: Message) {
        match &msg.payload {
            Payload::InitialPortConnection(ports) => {
                log::info!("Joined network via node {}", msg.origin_port);
                self.merge_ports(ports);
                let request = self.message(Payload::RequestBlockchain);
                self.peers.broadcast(&request);
            }
            _ => log::debug!("Ignoring {} reply", msg.type_name()),
        }
    }

    // =========================================================================
    // Ledger updates
    // =========================================================================

    /// Validate and append a block; true if the tip moved
    fn accept_block(&mut self, block: Block) -> bool {
        let index = block.index;
        let utxo_set = self.chain.utxo_set();
        if let Err(e) = validate_block_transactions(&block.data, &utxo_set, index) {
            log::warn!("Rejected block {}: {}", index, e);
            return false;
        }
        if let Err(e) = self.chain.append(block) {
            log::warn!("Rejected block {}: {}", index, e);
            return false;
        }

        self.tip_changed();
        true
    }

    /// Replay and adopt a competing chain; true if it replaced ours
    fn accept_chain(&mut self, blocks: Vec<Block>) -> bool {
        if let Err(e) = validate_chain_transactions(&blocks) {
            log::warn!("Rejected chain of {} block(s): {}", blocks.len(), e);
            return false;
        }
        if let Err(e) = self.chain.replace_chain(blocks) {
            log::debug!("Kept current chain: {}", e);
            return false;
        }

        self.tip_changed();
        true
    }

    fn tip_changed(&mut self) {
        self.cancel_mining();
        self.pool.refresh(&self.chain.utxo_set());
        self.persist();
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(self.chain.blocks()) {
                log::error!("Failed to save blockchain: {}", e);
            }
        }
    }

    // =========================================================================
    // Mining
    // =========================================================================

    fn on_tick(&mut self) {
        if !self.initialized {
            return;
        }

        let utxo_set = self.chain.utxo_set();
        self.pool.refresh(&utxo_set);
        if self.mining.is_some() {
            return;
        }

        match self.pool.take_candidate(self.chain.height() + 1, &utxo_set) {
            Ok(Some(txs)) => self.start_mining(txs),
            Ok(None) | Err(_) => {}
        }
    }

    /// Start mining the pool head, or a reward-only block when there is none
    fn mine_now(&mut self) {
        let next_index = self.chain.height() + 1;
        let utxo_set = self.chain.utxo_set();
        let txs = match self.pool.take_candidate(next_index, &utxo_set) {
            Ok(Some(txs)) => txs,
            Ok(None) | Err(_) => {
                vec![Transaction::coinbase(self.pool.miner_address(), next_index)]
            }
        };
        self.start_mining(txs);
    }

    fn start_mining(&mut self, txs: Vec<Transaction>) {
        let job = MiningJob::spawn(self.chain.next_template(txs));
        self.mining = Some(job.canceller());
        self.pool.begin_mining();

        let events = self.events.clone();
        tokio::spawn(async move {
            let result = job.finish().await;
            let _ = events.send(Event::Mined(result)).await;
        });
    }

    fn on_mined(&mut self, result: Option<MinedBlock>) {
        self.mining = None;
        self.pool.finish_mining();

        let accepted = result.and_then(|mined| {
            log::debug!(
                "Block {} took {} attempts in {}ms",
                mined.block.index,
                mined.stats.hash_attempts,
                mined.stats.time_ms
            );
            let block = mined.block;
            self.accept_block(block.clone()).then_some(block)
        });

        if let Some(block) = &accepted {
            let announcement = self.message(Payload::BroadcastBlock(BlockAnnouncement {
                original_sender: self.port,
                block: block.clone(),
            }));
            self.peers.broadcast(&announcement);
        }

        for waiter in self.mine_waiters.drain(..) {
            let _ = waiter.send(accepted.clone());
        }
    }

    fn cancel_mining(&self) {
        if let Some(flag) = &self.mining {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // =========================================================================
    // Control
    // =========================================================================

    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Blocks(reply) => {
                let _ = reply.send(self.chain.blocks().to_vec());
            }
            Command::KnownPorts(reply) => {
                let _ = reply.send(self.known_ports());
            }
            Command::Pending(reply) => {
                let _ = reply.send(self.pool.pending());
            }
            Command::UtxoSet(reply) => {
                let _ = reply.send(self.chain.utxo_set());
            }
            Command::SubmitTransaction(tx, reply) => {
                let accepted = self.pool.receive(tx.clone());
                let gossip = self.message(Payload::BroadcastTransaction(tx));
                self.peers.broadcast(&gossip);
                let _ = reply.send(accepted);
            }
            Command::RequestBlockchain(reply) => {
                let request = self.message(Payload::RequestBlockchain);
                self.peers.broadcast(&request);
                let _ = reply.send(());
            }
            Command::Initialize(reply) => {
                if !self.initialized {
                    self.initialized = true;
                    log::info!("Node {} initialized", self.port);
                    let request = self.message(Payload::RequestBlockchain);
                    self.peers.broadcast(&request);
                }
                let _ = reply.send(());
            }
            Command::Mine(reply) => {
                if !self.initialized {
                    let _ = reply.send(None);
                    return true;
                }
                if self.mining.is_none() {
                    self.mine_now();
                }
                self.mine_waiters.push(reply);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Cloneable control interface to a running node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    host: String,
    port: u16,
    events: mpsc::Sender<Event>,
    next_conn: Arc<AtomicU64>,
}

impl NodeHandle {
    /// The port this node listens on
    pub fn port(&self) -> u16 {
        self.port
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, NetworkError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command(command(reply)))
            .await
            .map_err(|_| NetworkError::NodeStopped)?;
        response.await.map_err(|_| NetworkError::NodeStopped)
    }

    pub async fn blocks(&self) -> Result<Vec<Block>, NetworkError> {
        self.request(Command::Blocks).await
    }

    pub async fn known_ports(&self) -> Result<Vec<u16>, NetworkError> {
        self.request(Command::KnownPorts).await
    }

    /// Pending pool contents in FIFO order
    pub async fn pending(&self) -> Result<Vec<Transaction>, NetworkError> {
        self.request(Command::Pending).await
    }

    /// Fresh UTXO snapshot of the current chain
    pub async fn utxo_set(&self) -> Result<UtxoSet, NetworkError> {
        self.request(Command::UtxoSet).await
    }

    pub async fn balance(&self, address: &str) -> Result<u64, NetworkError> {
        Ok(self.utxo_set().await?.balance(address))
    }

    /// Pool and gossip a transaction; returns whether the local pool took it
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool, NetworkError> {
        self.request(|reply| Command::SubmitTransaction(tx, reply))
            .await
    }

    pub async fn request_blockchain(&self) -> Result<(), NetworkError> {
        self.request(Command::RequestBlockchain).await
    }

    /// Start treating the local chain as authoritative
    pub async fn initialize(&self) -> Result<(), NetworkError> {
        self.request(Command::Initialize).await
    }

    /// Open an outbound connection to the node listening on `port`
    pub async fn connect(&self, port: u16) -> Result<(), NetworkError> {
        let addr = format!("{}:{}", self.host, port);
        log::info!("Connecting to peer: {}", addr);

        let stream = connect_to_peer(&addr).await?;
        let id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(handle_connection(
            stream,
            id,
            true,
            Some(port),
            self.events.clone(),
        ));
        Ok(())
    }

    /// Mine a block now and wait for it
    ///
    /// Joins the running attempt if there is one. `None` means the attempt was
    /// cancelled or its block rejected, or the node is not initialized.
    pub async fn mine_block(&self) -> Result<Option<Block>, NetworkError> {
        self.request(Command::Mine).await
    }

    pub async fn shutdown(&self) -> Result<(), NetworkError> {
        self.request(Command::Shutdown).await
    }
}

/// Bind, spawn the actor with its accept loop and ticker, and join the bootstrap peer
pub async fn start(
    config: NodeConfig,
    chain: Blockchain,
) -> Result<NodeHandle, Box<dyn std::error::Error + Send + Sync>> {
    let store = match &config.data_dir {
        Some(dir) => Some(StorageConfig::in_dir(dir).open()?.0),
        None => None,
    };

    let server = Server::bind(&config.host, config.port).await?;
    let port = server.port();

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let handle = NodeHandle {
        host: config.host.clone(),
        port,
        events: events_tx.clone(),
        next_conn: Arc::new(AtomicU64::new(0)),
    };

    let node = Node::new(&config, port, chain, store, events_tx.clone());
    node.persist();
    tokio::spawn(node.run(events_rx));
    tokio::spawn(accept_loop(server, handle.clone()));
    tokio::spawn(ticker(config.tick_interval, events_tx));

    if let Some(peer) = config.bootstrap_peer {
        handle.connect(peer).await?;
    }

    Ok(handle)
}

async fn accept_loop(server: Server, handle: NodeHandle) {
    loop {
        tokio::select! {
            _ = handle.events.closed() => break,
            accepted = server.accept() => match accepted {
                Ok((stream, addr)) => {
                    log::info!("Incoming connection from {}", addr);
                    let id = handle.next_conn.fetch_add(1, Ordering::Relaxed);
                    tokio::spawn(handle_connection(stream, id, false, None, handle.events.clone()));
                }
                Err(e) => log::error!("Accept error: {}", e),
            },
        }
    }
}

async fn ticker(period: Duration, events: mpsc::Sender<Event>) {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        if events.send(Event::Tick).await.is_err() {
            break;
        }
    }
}
