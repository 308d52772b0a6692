//! Gossip ledger node CLI
//!
//! Manages the local wallet and runs a peer with its HTTP control plane.

use clap::{Parser, Subcommand};
use gossip_ledger::cli::{self, NodeOptions};
use gossip_ledger::core::DEFAULT_GENESIS_ADDRESS;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(version = "0.1.0")]
#[command(about = "A peer-to-peer proof-of-work ledger with gossip propagation", long_about = None)]
struct Cli {
    /// Data directory for chain and key storage
    #[arg(short, long, default_value = ".ledger_data")]
    data_dir: PathBuf,

    /// Owner of the genesis output; every peer must agree on it
    #[arg(long, global = true, default_value = DEFAULT_GENESIS_ADDRESS)]
    genesis_address: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Display information about the stored chain
    Chain,

    /// Run a node
    Node {
        /// P2P port to listen on
        #[arg(short, long, default_value = "6001")]
        port: u16,

        /// Port of a running node to join
        #[arg(long)]
        peer: Option<u16>,

        /// Port of the HTTP control plane
        #[arg(long, default_value = "3001")]
        api_port: u16,

        /// Wallet password
        #[arg(long)]
        password: String,

        /// Reward address for mined blocks (defaults to the wallet address)
        #[arg(long)]
        miner_address: Option<String>,

        /// Mining tick period in milliseconds
        #[arg(long, default_value = "5000")]
        tick_ms: u64,

        /// Only relay until the chain is initialized over HTTP
        #[arg(long)]
        await_chain: bool,
    },
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new key pair
    New {
        /// Password sealing the private key
        #[arg(long)]
        password: String,
    },

    /// List key pairs and balances
    List,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Wallet { action } => match action {
            WalletCommands::New { password } => {
                cli::cmd_wallet_new(&cli.data_dir, &password)?;
            }
            WalletCommands::List => {
                cli::cmd_wallet_list(&cli.data_dir, &cli.genesis_address)?;
            }
        },

        Commands::Chain => {
            cli::cmd_chain_info(&cli.data_dir, &cli.genesis_address)?;
        }

        Commands::Node {
            port,
            peer,
            api_port,
            password,
            miner_address,
            tick_ms,
            await_chain,
        } => {
            let opts = NodeOptions {
                port,
                peer,
                api_port,
                password,
                miner_address,
                genesis_address: cli.genesis_address,
                tick_ms,
                await_chain,
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_node(&cli.data_dir, opts))?;
        }
    }

    Ok(())
}
