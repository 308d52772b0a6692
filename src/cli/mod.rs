//! CLI module for the ledger node

pub mod commands;

pub use commands::*;
