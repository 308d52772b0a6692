//! CLI commands for the ledger node
//!
//! Implements all command handlers for the CLI interface.

use crate::api::{create_router, ApiState};
use crate::core::{cumulative_work, Blockchain, UtxoSet};
use crate::network::{self, NodeConfig};
use crate::storage::{BlockStore, KeyStore, StorageConfig};
use crate::wallet::Wallet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options of the `node` command
#[derive(Debug, Clone)]
pub struct NodeOptions {
    pub port: u16,
    pub peer: Option<u16>,
    pub api_port: u16,
    pub password: String,
    pub miner_address: Option<String>,
    pub genesis_address: String,
    pub tick_ms: u64,
    pub await_chain: bool,
}

/// Restore the persisted chain, or start from genesis when nothing is stored
pub fn load_chain(store: &BlockStore, genesis_address: &str) -> CliResult<Blockchain> {
    let blocks = store.load()?;
    let restored = !blocks.is_empty();
    let chain = Blockchain::from_blocks(genesis_address, blocks)?;

    if restored {
        log::info!("Restored chain at height {} from {}", chain.height(), store.path().display());
    }
    Ok(chain)
}

/// Create a new key pair (the first one becomes the wallet address)
pub fn cmd_wallet_new(data_dir: &Path, password: &str) -> CliResult<()> {
    let (_, keys) = StorageConfig::in_dir(data_dir).open()?;
    let had_keys = !keys.load()?.is_empty();

    let mut wallet = Wallet::open(keys, password)?;
    if had_keys {
        wallet.generate_key_pair(password)?;
    }

    let count = wallet.key_pairs().len();
    let newest = wallet.key_pairs().last().map(|kp| kp.address().to_string());

    println!("🔐 New key pair created!");
    if let Some(address) = newest {
        println!("   📍 Address: {}", address);
    }
    println!("   🔑 Key pairs in wallet: {}", count);
    println!("\n   ⚠️  IMPORTANT: The private key is sealed with your password.");
    println!("   Losing the password means losing access to the funds!");

    Ok(())
}

/// List key pairs with their balances on the stored chain
pub fn cmd_wallet_list(data_dir: &Path, genesis_address: &str) -> CliResult<()> {
    let (blocks, keys) = StorageConfig::in_dir(data_dir).open()?;
    let key_pairs = keys.load()?;

    if key_pairs.is_empty() {
        println!("📭 No key pairs found. Create one with: ledger-node wallet new");
        return Ok(());
    }

    let chain = load_chain(&blocks, genesis_address)?;
    let utxo_set = chain.utxo_set();

    println!("📋 Key pairs:");
    for (i, kp) in key_pairs.iter().enumerate() {
        let marker = if i == 0 { "*" } else { " " };
        println!(
            "   {} {} - {} coins",
            marker,
            kp.address(),
            utxo_set.balance(kp.address())
        );
    }

    Ok(())
}

/// Display information about the stored chain
pub fn cmd_chain_info(data_dir: &Path, genesis_address: &str) -> CliResult<()> {
    let (blocks, _) = StorageConfig::in_dir(data_dir).open()?;
    let chain = load_chain(&blocks, genesis_address)?;
    let utxo_set = UtxoSet::build(chain.blocks());

    let total_transactions: usize = chain.blocks().iter().map(|b| b.data.len()).sum();

    println!("⛓️  Ledger Info");
    println!("   ├─ Height: {}", chain.height());
    println!("   ├─ Total transactions: {}", total_transactions);
    println!("   ├─ Unspent outputs: {}", utxo_set.len());
    println!("   ├─ Cumulative work: {}", cumulative_work(chain.blocks()));
    println!("   ├─ Next difficulty: {}", chain.retarget());
    println!("   └─ Latest hash: {}", chain.latest().hash);

    if utxo_set.missed_spends() > 0 {
        println!(
            "\n   ⚠️  {} input(s) referenced no unspent output during replay",
            utxo_set.missed_spends()
        );
    }

    Ok(())
}

/// Run a node with its HTTP control plane until Ctrl+C
pub async fn cmd_node(data_dir: &Path, opts: NodeOptions) -> CliResult<()> {
    let (blocks, keys) = StorageConfig::in_dir(data_dir).open()?;
    let wallet = open_wallet(keys, &opts.password)?;
    let miner_address = match opts.miner_address {
        Some(address) => address,
        None => wallet.address()?,
    };

    let chain = load_chain(&blocks, &opts.genesis_address)?;

    let config = NodeConfig {
        port: opts.port,
        bootstrap_peer: opts.peer,
        miner_address: miner_address.clone(),
        tick_interval: Duration::from_millis(opts.tick_ms),
        initialized: !opts.await_chain,
        data_dir: Some(data_dir.to_path_buf()),
        ..NodeConfig::default()
    };

    println!("🌐 Starting node on port {}...", opts.port);
    let node = network::start(config, chain)
        .await
        .map_err(|e| -> Box<dyn std::error::Error> { e })?;

    println!("   ├─ Wallet address: {}", wallet.address()?);
    println!("   ├─ Miner address: {}", miner_address);
    if let Some(peer) = opts.peer {
        println!("   ├─ Bootstrap peer: {}", peer);
    }
    if opts.await_chain {
        println!("   ├─ Relay only until POST /initialize");
    }
    println!("   └─ API: http://127.0.0.1:{}", opts.api_port);

    let state = ApiState {
        node: node.clone(),
        wallet: Arc::new(wallet),
    };
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", opts.api_port)).await?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down node...");
        })
        .await?;

    node.shutdown().await?;
    Ok(())
}

/// Open the wallet and check the password against its first key pair
fn open_wallet(keys: KeyStore, password: &str) -> CliResult<Wallet> {
    let wallet = Wallet::open(keys, password)?;
    if let Some(kp) = wallet.first_key_pair() {
        kp.decrypt_private_key(password)?;
    }
    Ok(wallet)
}
