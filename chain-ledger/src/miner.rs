//! Block assembly and proof-of-work
//!
//! Pure functions only; the actor decides when to mine and owns the commit.

use crate::crypto::{meets_difficulty, ZERO_HASH};
use crate::error::{Error, Result};
use crate::merkle::compute_merkle_root;
use crate::types::{Block, BlockHeader, Transaction, Username};
use chrono::{DateTime, Utc};

/// Description of every block reward transaction
pub const BLOCK_REWARD_DESCRIPTION: &str = "Block reward";

/// Description of the genesis mint
pub const GENESIS_DESCRIPTION: &str = "Genesis block";

/// Unsolved block: header with nonce 0 and its ordered body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTemplate {
    /// Header to search a nonce for
    pub header: BlockHeader,
    /// Included transactions, reward last, each referencing the block
    pub transactions: Vec<Transaction>,
}

impl BlockTemplate {
    /// Assemble a block on top of `tip`.
    ///
    /// `included` must already be ordered by ascending `seq`; `reward` is
    /// appended last.
    pub fn assemble(
        tip: Option<&Block>,
        miner: Username,
        timestamp: DateTime<Utc>,
        included: Vec<Transaction>,
        reward: Transaction,
    ) -> Result<Self> {
        let (height, prev_hash) = match tip {
            Some(tip) => (tip.height + 1, tip.block_hash.clone()),
            None => (0, ZERO_HASH.to_string()),
        };

        let transactions: Vec<Transaction> = included
            .into_iter()
            .chain(std::iter::once(reward))
            .map(|mut tx| {
                tx.block = Some(height);
                tx
            })
            .collect();

        let hashes: Vec<&str> = transactions.iter().map(|tx| tx.tx_hash.as_str()).collect();
        let merkle_root = compute_merkle_root(&hashes)?;

        Ok(Self {
            header: BlockHeader {
                height,
                timestamp,
                miner,
                merkle_root,
                nonce: 0,
                prev_hash,
            },
            transactions,
        })
    }

    /// Height of the block being assembled
    pub fn height(&self) -> u64 {
        self.header.height
    }
}

/// Brute-force the nonce from 0 until the header hash meets `difficulty`
pub fn solve(mut header: BlockHeader, difficulty: usize) -> Result<Block> {
    header.nonce = 0;
    loop {
        let hash = header.hash()?;
        if meets_difficulty(&hash, difficulty) {
            tracing::debug!(height = header.height, nonce = header.nonce, "Nonce found");
            return Ok(Block::from_header(header, hash));
        }
        header.nonce = header.nonce.checked_add(1).ok_or_else(|| {
            Error::Concurrency(format!(
                "nonce space exhausted for block {}",
                header.height
            ))
        })?;
    }
}

/// Seal a header with a caller-supplied nonce
pub fn check_nonce(mut header: BlockHeader, nonce: u64, difficulty: usize) -> Result<Block> {
    header.nonce = nonce;
    let hash = header.hash()?;
    if !meets_difficulty(&hash, difficulty) {
        return Err(Error::BlockNotMined {
            height: header.height,
            hash,
        });
    }
    Ok(Block::from_header(header, hash))
}
