//! REST API module
//!
//! Thin HTTP control plane over a running node.
//!
//! # Endpoints
//!
//! ## Ledger
//! - `GET /blocks` - Full chain
//! - `GET /peers` - Known peer ports
//! - `GET /pool` - Pending transactions
//!
//! ## Wallet
//! - `GET /address` - Wallet address
//! - `GET /balance/{address}` - Balance of any address
//! - `POST /transactions` - Build and submit a payment (`{receiver, amount, password}`)
//! - `POST /transactions/raw` - Submit a signed transaction
//!
//! ## Node
//! - `POST /mineBlock` - Mine a block now
//! - `POST /requestBlockchain` - Ask peers for their chains
//! - `POST /initialize` - Leave relay-only mode

pub mod handlers;
pub mod routes;

pub use handlers::ApiState;
pub use routes::create_router;
