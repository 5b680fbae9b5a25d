//! Chain verification by full replay
//!
//! Walks every block from height 0, checks linkage, transaction hashes, the
//! reward rule, the merkle root and proof-of-work, and rebuilds balances as it
//! goes. The first failed check is reported as [`Error::BlockchainBroken`].

use crate::balance::BalanceCache;
use crate::config::ChainConfig;
use crate::crypto::{meets_difficulty, ZERO_HASH};
use crate::error::{Error, Result};
use crate::merkle::compute_merkle_root;
use crate::storage::Storage;
use crate::types::{Block, Page, Transaction};
use rust_decimal::Decimal;

/// Outcome of a successful replay of the persisted blocks
#[derive(Debug, Clone)]
pub struct VerifiedChain {
    /// Last verified block, `None` for an empty store
    pub tip: Option<Block>,
    /// Balances after applying every confirmed transaction
    pub balances: BalanceCache,
    /// Confirmed transactions replayed
    pub transactions: usize,
}

impl VerifiedChain {
    /// Height the next block will receive
    pub fn next_height(&self) -> u64 {
        self.tip.as_ref().map(|tip| tip.height + 1).unwrap_or(0)
    }
}

/// Verify every persisted block and rebuild balances from scratch
pub fn verify_blocks(storage: &Storage, chain: &ChainConfig) -> Result<VerifiedChain> {
    let mut balances = BalanceCache::new();
    let mut prev_hash = ZERO_HASH.to_string();
    let mut tip = None;
    let mut replayed = 0;

    for (expected, block) in (0u64..).zip(storage.blocks(Page::all_ascending())?) {
        let transactions = storage.block_transactions(expected)?;
        verify_block(&block, expected, &prev_hash, &transactions, chain)?;

        for tx in &transactions {
            balances.apply_transaction(tx).map_err(|e| {
                Error::broken(
                    expected,
                    format!("transaction {} cannot be applied: {}", tx.seq, e),
                )
            })?;
        }

        replayed += transactions.len();
        prev_hash = block.block_hash.clone();
        tip = Some(block);
    }

    Ok(VerifiedChain {
        tip,
        balances,
        transactions: replayed,
    })
}

/// Check one block against its position in the chain and its body
pub fn verify_block(
    block: &Block,
    expected_height: u64,
    prev_hash: &str,
    transactions: &[Transaction],
    chain: &ChainConfig,
) -> Result<()> {
    let broken = |reason: String| Error::broken(expected_height, reason);

    if block.height != expected_height {
        return Err(broken(format!(
            "height {} where {} was expected",
            block.height, expected_height
        )));
    }
    if block.prev_hash != prev_hash {
        return Err(broken(format!(
            "prev_hash {} does not link to {}",
            block.prev_hash, prev_hash
        )));
    }

    let reward = transactions
        .last()
        .ok_or_else(|| broken("block has no transactions".to_string()))?;

    for tx in transactions {
        verify_transaction(tx, Some(expected_height))?;
    }

    if !reward.is_mint() || reward.to_user != block.miner {
        return Err(broken(format!(
            "last transaction {} is not a reward to miner {}",
            reward.seq, block.miner
        )));
    }

    let hashes: Vec<&str> = transactions.iter().map(|tx| tx.tx_hash.as_str()).collect();
    let merkle_root = compute_merkle_root(&hashes).map_err(|e| broken(e.to_string()))?;
    if merkle_root != block.merkle_root {
        return Err(broken(format!(
            "merkle root {} does not match stored {}",
            merkle_root, block.merkle_root
        )));
    }

    if block.is_genesis() {
        if block.miner.as_str() != chain.genesis_account {
            return Err(broken(format!(
                "genesis mined by {} instead of {}",
                block.miner, chain.genesis_account
            )));
        }
    } else if reward.amount != chain.block_reward {
        return Err(broken(format!(
            "reward {} differs from block reward {}",
            reward.amount, chain.block_reward
        )));
    }

    let hash = block.header().hash()?;
    if hash != block.block_hash {
        return Err(broken(format!(
            "header hashes to {} but block_hash is {}",
            hash, block.block_hash
        )));
    }
    if !meets_difficulty(&hash, chain.difficulty) {
        return Err(broken(format!(
            "block_hash {} does not meet difficulty {}",
            hash, chain.difficulty
        )));
    }

    Ok(())
}

/// Check a transaction's own fields and its block reference
fn verify_transaction(tx: &Transaction, block: Option<u64>) -> Result<()> {
    let height = block.unwrap_or_default();

    if tx.block != block {
        return Err(Error::broken(
            height,
            format!("transaction {} references block {:?}", tx.seq, tx.block),
        ));
    }
    if tx.amount <= Decimal::ZERO {
        return Err(Error::broken(
            height,
            format!("transaction {} has non-positive amount {}", tx.seq, tx.amount),
        ));
    }

    let recomputed = tx.compute_hash()?;
    if recomputed != tx.tx_hash {
        return Err(Error::broken(
            height,
            format!("transaction {} hash mismatch", tx.seq),
        ));
    }

    Ok(())
}

/// Apply still-pending transactions on top of verified balances.
///
/// Failures are reported at `next_height`, the block that would absorb them.
pub fn replay_pending(
    storage: &Storage,
    balances: &mut BalanceCache,
    next_height: u64,
) -> Result<usize> {
    let pending = storage.pending_transactions()?;

    for tx in &pending {
        verify_transaction(tx, None).map_err(|e| match e {
            Error::BlockchainBroken { reason, .. } => {
                Error::broken(next_height, format!("pending {}", reason))
            }
            other => other,
        })?;
        balances.apply_transaction(tx).map_err(|e| {
            Error::broken(
                next_height,
                format!("pending transaction {} cannot be applied: {}", tx.seq, e),
            )
        })?;
    }

    Ok(pending.len())
}
