//! Core types for the ledger
//!
//! All persisted types are designed for:
//! - Deterministic serialization (bincode on disk, canonical JSON for hashing)
//! - Exact arithmetic (Decimal for money, always whole-valued)
//! - Self-verification (every record can recompute its own hash)

use crate::crypto::compute_hash;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ledger account name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Create new username
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Username {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Truncate an amount to its whole-number part.
///
/// Fractional units are discarded, never rounded.
pub fn whole_amount(amount: Decimal) -> Decimal {
    amount.trunc().normalize()
}

/// Registered ledger user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique username
    pub username: Username,

    /// Default bet amount
    pub bet: Decimal,

    /// Last daily prize claim, [`User::never_claimed`] when unclaimed
    pub daily_prize_time: DateTime<Utc>,
}

impl User {
    /// Claim time of a user who never claimed a daily prize (1980-01-01 UTC)
    pub fn never_claimed() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(1980, 1, 1)
            .unwrap_or_default()
            .and_time(NaiveTime::default())
            .and_utc()
    }

    /// Create a user with the given bet who has never claimed a prize
    pub fn new(username: Username, bet: Decimal) -> Self {
        Self {
            username,
            bet,
            daily_prize_time: Self::never_claimed(),
        }
    }

    /// Whether the last claim falls outside the prize day containing `now`.
    ///
    /// Prize days run from `day_start` (UTC) to the same time next day.
    pub fn daily_prize_available(&self, day_start: NaiveTime, now: DateTime<Utc>) -> bool {
        let today = now.date_naive().and_time(day_start).and_utc();
        let start = if now < today { today - Duration::days(1) } else { today };
        let end = start + Duration::days(1);

        !(start <= self.daily_prize_time && self.daily_prize_time < end)
    }
}

/// A ledger transaction, pending until a block references it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Monotonic sequence number (never reused)
    pub seq: u64,

    /// Height of the containing block, `None` while pending
    pub block: Option<u64>,

    /// Creation time
    pub timestamp: DateTime<Utc>,

    /// Debited account, `None` for mints
    pub from_user: Option<Username>,

    /// Credited account
    pub to_user: Username,

    /// Whole-valued, strictly positive amount
    pub amount: Decimal,

    /// Free-form description
    pub description: Option<String>,

    /// Hash of the canonical payload
    pub tx_hash: String,
}

/// Canonical hash preimage of a transaction.
///
/// `block` and `tx_hash` are excluded: the former changes on confirmation and
/// the latter is the output.
#[derive(Debug, Serialize)]
pub struct TransactionPayload<'a> {
    seq: u64,
    timestamp: &'a DateTime<Utc>,
    from_user: Option<&'a Username>,
    to_user: &'a Username,
    amount: &'a Decimal,
    description: Option<&'a str>,
}

impl Transaction {
    /// Build a pending transaction and compute its hash
    pub fn new_pending(
        seq: u64,
        timestamp: DateTime<Utc>,
        from_user: Option<Username>,
        to_user: Username,
        amount: Decimal,
        description: Option<String>,
    ) -> crate::Result<Self> {
        let mut tx = Self {
            seq,
            block: None,
            timestamp,
            from_user,
            to_user,
            amount,
            description,
            tx_hash: String::new(),
        };
        tx.tx_hash = tx.compute_hash()?;
        Ok(tx)
    }

    /// Canonical hash payload
    pub fn payload(&self) -> TransactionPayload<'_> {
        TransactionPayload {
            seq: self.seq,
            timestamp: &self.timestamp,
            from_user: self.from_user.as_ref(),
            to_user: &self.to_user,
            amount: &self.amount,
            description: self.description.as_deref(),
        }
    }

    /// Recompute the hash from the persisted fields
    pub fn compute_hash(&self) -> crate::Result<String> {
        compute_hash(&self.payload())
    }

    /// True when no sender is debited
    pub fn is_mint(&self) -> bool {
        self.from_user.is_none()
    }

    /// True until attached to a block
    pub fn is_pending(&self) -> bool {
        self.block.is_none()
    }
}

/// Block header: the exact proof-of-work preimage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (0 for genesis)
    pub height: u64,
    /// Assembly time
    pub timestamp: DateTime<Utc>,
    /// Rewarded account
    pub miner: Username,
    /// Merkle root of the block's transaction hashes
    pub merkle_root: String,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Hash of the previous block
    pub prev_hash: String,
}

impl BlockHeader {
    /// Hash of the header fields
    pub fn hash(&self) -> crate::Result<String> {
        compute_hash(self)
    }
}

/// Persisted block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height (0 for genesis)
    pub height: u64,

    /// Assembly time
    pub timestamp: DateTime<Utc>,

    /// Rewarded account
    pub miner: Username,

    /// Merkle root of the block's transaction hashes
    pub merkle_root: String,

    /// Proof-of-work nonce
    pub nonce: u64,

    /// Hash of the previous block
    pub prev_hash: String,

    /// Hash of the header, never part of its own preimage
    pub block_hash: String,
}

impl Block {
    /// Attach a solved hash to a header
    pub fn from_header(header: BlockHeader, block_hash: String) -> Self {
        Self {
            height: header.height,
            timestamp: header.timestamp,
            miner: header.miner,
            merkle_root: header.merkle_root,
            nonce: header.nonce,
            prev_hash: header.prev_hash,
            block_hash,
        }
    }

    /// Header fields as stored
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            height: self.height,
            timestamp: self.timestamp,
            miner: self.miner.clone(),
            merkle_root: self.merkle_root.clone(),
            nonce: self.nonce,
            prev_hash: self.prev_hash.clone(),
        }
    }

    /// True for height 0
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

/// Iteration order for history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Oldest first
    Ascending,
    /// Newest first
    #[default]
    Descending,
}

/// Paging window for history queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// Maximum number of records, `None` for all
    pub limit: Option<usize>,
    /// Records to skip
    pub offset: usize,
    /// Iteration order
    pub order: Order,
}

impl Page {
    /// Newest `limit` records
    pub fn latest(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
            order: Order::Descending,
        }
    }

    /// Everything, oldest first
    pub fn all_ascending() -> Self {
        Self {
            limit: None,
            offset: 0,
            order: Order::Ascending,
        }
    }
}
