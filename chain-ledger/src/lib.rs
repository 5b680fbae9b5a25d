//! Chain Ledger
//!
//! Append-only, hash-chained accounting ledger with proof-of-work blocks,
//! Merkle roots over transactions and full-replay verification at startup.
//!
//! # Architecture
//!
//! - **Hash Chain**: Every block commits to its predecessor and its transactions
//! - **Single Writer**: One actor task owns every balance mutation
//! - **Merkle Tree**: Cryptographic proofs of inclusion
//! - **Replay**: Balances are derived state, rebuilt from the chain on open
//!
//! # Invariants
//!
//! - Money conservation: Σ(balances) == Σ(mints) for all time
//! - No overdraft: a sender's balance never drops below zero
//! - Deterministic replay: Same blocks → same balances
//! - Append-only: Blocks never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod actor;
pub mod balance;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod metrics;
pub mod miner;
pub mod storage;
pub mod types;
pub mod verifier;

// Re-exports
pub use actor::{ChainSummary, TransferRequest};
pub use balance::BalanceCache;
pub use config::Config;
pub use crypto::{compute_hash, meets_difficulty, ZERO_HASH};
pub use error::{BalanceError, Error, Result};
pub use ledger::Ledger;
pub use merkle::{compute_merkle_root, MerkleProof, MerkleTree};
pub use metrics::Metrics;
pub use storage::Storage;
pub use types::{Block, BlockHeader, Order, Page, Transaction, User, Username};
