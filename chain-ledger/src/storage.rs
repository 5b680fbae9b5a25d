//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `users` - Registered users (key: username)
//! - `blocks` - Mined blocks (key: height, big-endian)
//! - `transactions` - Every transaction, pending or confirmed (key: seq, big-endian)
//! - `pending` - Pending set (key: seq)
//! - `block_txs` - Block membership in stored order (key: height || position, value: seq)
//! - `tx_hashes` - Unique index on `tx_hash` (value: seq)
//! - `block_hashes` - Unique index on `block_hash` (value: height)
//! - `meta` - Sequence counter
//!
//! Every multi-key mutation is a single `WriteBatch`, so a crash leaves either
//! all of it or none of it on disk.

use crate::{
    error::{Error, Result},
    types::{Block, Order, Page, Transaction, User, Username},
    Config,
};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Column family names
const CF_USERS: &str = "users";
const CF_BLOCKS: &str = "blocks";
const CF_TRANSACTIONS: &str = "transactions";
const CF_PENDING: &str = "pending";
const CF_BLOCK_TXS: &str = "block_txs";
const CF_TX_HASHES: &str = "tx_hashes";
const CF_BLOCK_HASHES: &str = "block_hashes";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: [&str; 8] = [
    CF_USERS,
    CF_BLOCKS,
    CF_TRANSACTIONS,
    CF_PENDING,
    CF_BLOCK_TXS,
    CF_TX_HASHES,
    CF_BLOCK_HASHES,
    CF_META,
];

const KEY_NEXT_SEQ: &[u8] = b"next_seq";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
    default_bet: Decimal,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("path", &self.db.path())
            .finish()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = COLUMN_FAMILIES.len(),
            "Opened RocksDB"
        );

        Ok(Self {
            db: Arc::new(db),
            default_bet: config.users.default_bet,
        })
    }

    fn cf_options(name: &str) -> Options {
        let mut opts = Options::default();
        match name {
            CF_TX_HASHES | CF_BLOCK_HASHES | CF_USERS => {
                // Point lookups on every write
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false);
                opts.set_block_based_table_factory(&block_opts);
            }
            CF_TRANSACTIONS | CF_BLOCKS => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            _ => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    // Helper: get column family handle

    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_value<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(&cf, key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn contains(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        let cf = self.cf(cf_name)?;
        Ok(self.db.get_pinned_cf(&cf, key)?.is_some())
    }

    /// Deserialize the values of a column family in key order, windowed by `page`
    fn scan<T: DeserializeOwned>(&self, cf_name: &str, page: Page) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mode = match page.order {
            Order::Ascending => IteratorMode::Start,
            Order::Descending => IteratorMode::End,
        };

        let limit = page.limit.unwrap_or(usize::MAX);
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, mode).skip(page.offset).take(limit) {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    fn count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf(cf_name)?;
        let mut count = 0u64;
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(&cf, key, bincode::serialize(value)?);
        Ok(())
    }

    fn delete(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.delete_cf(&cf, key);
        Ok(())
    }

    // Sequence counter

    /// Sequence number the next transaction will receive (starts at 1)
    pub fn next_seq(&self) -> Result<u64> {
        Ok(self.get_value::<u64>(CF_META, KEY_NEXT_SEQ)?.unwrap_or(1))
    }

    // User operations

    /// Get user by name
    pub fn get_user(&self, username: &Username) -> Result<Option<User>> {
        self.get_value(CF_USERS, username.as_str().as_bytes())
    }

    /// Get user, creating it with the default bet on first reference
    pub fn get_or_create_user(&self, username: &Username) -> Result<User> {
        if let Some(user) = self.get_user(username)? {
            return Ok(user);
        }

        let user = self.new_user(username);
        self.put_user(&user)?;
        tracing::debug!(username = %username, "User created");
        Ok(user)
    }

    /// Insert or replace a user row
    pub fn put_user(&self, user: &User) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_USERS, user.username.as_str().as_bytes(), user)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Number of registered users
    pub fn user_count(&self) -> Result<u64> {
        self.count(CF_USERS)
    }

    fn new_user(&self, username: &Username) -> User {
        User::new(username.clone(), self.default_bet)
    }

    /// Stage user rows for every name not yet registered
    fn stage_users<'a>(
        &self,
        batch: &mut WriteBatch,
        names: impl IntoIterator<Item = &'a Username>,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        for name in names {
            if seen.insert(name) && self.get_user(name)?.is_none() {
                self.put(batch, CF_USERS, name.as_str().as_bytes(), &self.new_user(name))?;
            }
        }
        Ok(())
    }

    // Transaction operations

    /// Persist a pending transaction (atomic with its indices and users)
    pub fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        if tx.block.is_some() {
            return Err(Error::InvalidInput(format!(
                "transaction {} is already confirmed",
                tx.seq
            )));
        }
        if self.contains(CF_TRANSACTIONS, &tx.seq.to_be_bytes())? {
            return Err(Error::UniqueViolation(format!("transaction seq {}", tx.seq)));
        }
        if self.contains(CF_TX_HASHES, tx.tx_hash.as_bytes())? {
            return Err(Error::UniqueViolation(format!("tx_hash {}", tx.tx_hash)));
        }

        let mut batch = WriteBatch::default();
        let key = tx.seq.to_be_bytes();

        self.put(&mut batch, CF_TRANSACTIONS, &key, tx)?;
        self.put(&mut batch, CF_PENDING, &key, &())?;
        self.put(&mut batch, CF_TX_HASHES, tx.tx_hash.as_bytes(), &tx.seq)?;
        self.stage_users(&mut batch, tx.from_user.iter().chain([&tx.to_user]))?;
        self.stage_next_seq(&mut batch, tx.seq)?;

        self.db.write(batch)?;

        tracing::debug!(seq = tx.seq, tx_hash = %tx.tx_hash, "Transaction stored");
        Ok(())
    }

    fn stage_next_seq(&self, batch: &mut WriteBatch, used_seq: u64) -> Result<()> {
        let next = self.next_seq()?.max(used_seq + 1);
        self.put(batch, CF_META, KEY_NEXT_SEQ, &next)
    }

    /// Get transaction by sequence number
    pub fn get_transaction(&self, seq: u64) -> Result<Transaction> {
        self.get_value(CF_TRANSACTIONS, &seq.to_be_bytes())?
            .ok_or_else(|| Error::NotFound(format!("transaction {}", seq)))
    }

    /// Look up a transaction through the hash index
    pub fn get_transaction_by_hash(&self, tx_hash: &str) -> Result<Option<Transaction>> {
        match self.get_value::<u64>(CF_TX_HASHES, tx_hash.as_bytes())? {
            Some(seq) => Ok(Some(self.get_transaction(seq)?)),
            None => Ok(None),
        }
    }

    /// Pending transactions in creation order
    pub fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        let cf = self.cf(CF_PENDING)?;
        let mut pending = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (key, _) = item?;
            pending.push(self.get_transaction(Self::decode_u64(&key)?)?);
        }
        Ok(pending)
    }

    /// Number of pending transactions
    pub fn pending_count(&self) -> Result<u64> {
        self.count(CF_PENDING)
    }

    /// Delete every pending transaction. Returns the number removed.
    pub fn purge_pending(&self) -> Result<usize> {
        let pending = self.pending_transactions()?;

        let mut batch = WriteBatch::default();
        for tx in &pending {
            let key = tx.seq.to_be_bytes();
            self.delete(&mut batch, CF_TRANSACTIONS, &key)?;
            self.delete(&mut batch, CF_PENDING, &key)?;
            self.delete(&mut batch, CF_TX_HASHES, tx.tx_hash.as_bytes())?;
        }
        self.db.write(batch)?;

        Ok(pending.len())
    }

    /// All transactions (pending and confirmed), paged by sequence number
    pub fn transactions(&self, page: Page) -> Result<Vec<Transaction>> {
        self.scan(CF_TRANSACTIONS, page)
    }

    /// Transactions sent or received by `username`, newest first
    pub fn user_transactions(
        &self,
        username: &Username,
        limit: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let cf = self.cf(CF_TRANSACTIONS)?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            if out.len() >= limit {
                break;
            }
            let (_, value) = item?;
            let tx: Transaction = bincode::deserialize(&value)?;
            if tx.from_user.as_ref() == Some(username) || &tx.to_user == username {
                out.push(tx);
            }
        }
        Ok(out)
    }

    /// Number of stored transactions
    pub fn transaction_count(&self) -> Result<u64> {
        self.count(CF_TRANSACTIONS)
    }

    // Block operations

    /// Persist a mined block and confirm its transactions in one atomic write.
    ///
    /// `transactions` is the block body in order; the last entry is the
    /// reward transaction, which is inserted here, while the others must
    /// already be stored as pending.
    pub fn commit_block(&self, block: &Block, transactions: &[Transaction]) -> Result<()> {
        let height_key = block.height.to_be_bytes();
        if self.contains(CF_BLOCKS, &height_key)? {
            return Err(Error::UniqueViolation(format!("block height {}", block.height)));
        }
        if self.contains(CF_BLOCK_HASHES, block.block_hash.as_bytes())? {
            return Err(Error::UniqueViolation(format!(
                "block_hash {}",
                block.block_hash
            )));
        }

        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_BLOCKS, &height_key, block)?;
        self.put(&mut batch, CF_BLOCK_HASHES, block.block_hash.as_bytes(), &block.height)?;

        let mut max_seq = 0;
        for (position, tx) in transactions.iter().enumerate() {
            if tx.block != Some(block.height) {
                return Err(Error::InvalidInput(format!(
                    "transaction {} does not reference block {}",
                    tx.seq, block.height
                )));
            }

            let seq_key = tx.seq.to_be_bytes();
            match self.get_value::<u64>(CF_TX_HASHES, tx.tx_hash.as_bytes())? {
                Some(existing) if existing != tx.seq => {
                    return Err(Error::UniqueViolation(format!("tx_hash {}", tx.tx_hash)));
                }
                _ => {}
            }

            self.put(&mut batch, CF_TRANSACTIONS, &seq_key, tx)?;
            self.delete(&mut batch, CF_PENDING, &seq_key)?;
            self.put(&mut batch, CF_TX_HASHES, tx.tx_hash.as_bytes(), &tx.seq)?;
            self.put(
                &mut batch,
                CF_BLOCK_TXS,
                &Self::block_tx_key(block.height, position as u32),
                &tx.seq,
            )?;
            max_seq = max_seq.max(tx.seq);
        }

        self.stage_users(
            &mut batch,
            std::iter::once(&block.miner).chain(
                transactions
                    .iter()
                    .flat_map(|tx| tx.from_user.iter().chain([&tx.to_user])),
            ),
        )?;
        self.stage_next_seq(&mut batch, max_seq)?;

        self.db.write(batch)?;

        tracing::info!(
            height = block.height,
            block_hash = %block.block_hash,
            transactions = transactions.len(),
            "Block committed"
        );

        Ok(())
    }

    /// Get block by height
    pub fn get_block(&self, height: u64) -> Result<Block> {
        self.get_value(CF_BLOCKS, &height.to_be_bytes())?
            .ok_or_else(|| Error::NotFound(format!("block {}", height)))
    }

    /// Get latest block
    pub fn get_latest_block(&self) -> Result<Option<Block>> {
        Ok(self.scan(CF_BLOCKS, Page::latest(1))?.into_iter().next())
    }

    /// Blocks, paged by height
    pub fn blocks(&self, page: Page) -> Result<Vec<Block>> {
        self.scan(CF_BLOCKS, page)
    }

    /// Number of blocks
    pub fn block_count(&self) -> Result<u64> {
        self.count(CF_BLOCKS)
    }

    /// Transactions of a block in stored order
    pub fn block_transactions(&self, height: u64) -> Result<Vec<Transaction>> {
        let cf = self.cf(CF_BLOCK_TXS)?;
        let prefix = height.to_be_bytes();

        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix[..], Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let seq: u64 = bincode::deserialize(&value)?;
            out.push(self.get_transaction(seq)?);
        }
        Ok(out)
    }

    // Key helpers

    fn block_tx_key(height: u64, position: u32) -> Vec<u8> {
        let mut key = height.to_be_bytes().to_vec();
        key.extend_from_slice(&position.to_be_bytes());
        key
    }

    fn decode_u64(key: &[u8]) -> Result<u64> {
        let bytes: [u8; 8] = key
            .try_into()
            .map_err(|_| Error::Storage(format!("malformed key of {} bytes", key.len())))?;
        Ok(u64::from_be_bytes(bytes))
    }

    // Statistics

    /// Get storage statistics
    pub fn get_stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_blocks: self.block_count()?,
            total_transactions: self.transaction_count()?,
            pending_transactions: self.pending_count()?,
            total_users: self.user_count()?,
        })
    }

    /// Raw rewrite of a stored block, bypassing every check
    #[cfg(test)]
    pub(crate) fn overwrite_block(&self, block: &Block) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_BLOCKS, &block.height.to_be_bytes(), block)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Raw rewrite of a stored transaction, bypassing every check
    #[cfg(test)]
    pub(crate) fn overwrite_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_TRANSACTIONS, &tx.seq.to_be_bytes(), tx)?;
        self.db.write(batch)?;
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Mined blocks
    pub total_blocks: u64,
    /// Pending and confirmed transactions
    pub total_transactions: u64,
    /// Transactions awaiting a block
    pub pending_transactions: u64,
    /// Registered users
    pub total_users: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ZERO_HASH;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        (Storage::open(&config).unwrap(), temp_dir)
    }

    fn test_tx(seq: u64, from: Option<&str>, to: &str, amount: i64) -> Transaction {
        Transaction::new_pending(
            seq,
            Utc::now(),
            from.map(Username::new),
            Username::new(to),
            Decimal::from(amount),
            Some(format!("tx {}", seq)),
        )
        .unwrap()
    }

    fn test_block(height: u64, txs: &[Transaction]) -> Block {
        Block {
            height,
            timestamp: Utc::now(),
            miner: Username::new("admin"),
            merkle_root: ZERO_HASH.to_string(),
            nonce: 0,
            prev_hash: ZERO_HASH.to_string(),
            block_hash: format!("{:064x}", height + txs.len() as u64),
        }
    }

    #[test]
    fn test_storage_open() {
        let (storage, _temp) = test_storage();
        assert_eq!(storage.next_seq().unwrap(), 1);
        assert_eq!(storage.get_latest_block().unwrap(), None);
        assert_eq!(storage.block_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_and_get_transaction() {
        let (storage, _temp) = test_storage();
        let tx = test_tx(1, Some("alice"), "admin", 50);

        storage.insert_transaction(&tx).unwrap();

        assert_eq!(storage.get_transaction(1).unwrap(), tx);
        assert_eq!(storage.get_transaction_by_hash(&tx.tx_hash).unwrap(), Some(tx));
        assert_eq!(storage.next_seq().unwrap(), 2);
        assert_eq!(storage.pending_count().unwrap(), 1);
        assert!(storage.get_user(&Username::new("alice")).unwrap().is_some());
        assert!(storage.get_user(&Username::new("admin")).unwrap().is_some());
    }

    #[test]
    fn test_duplicate_hash_rejected() {
        let (storage, _temp) = test_storage();
        let tx = test_tx(1, None, "admin", 10);
        storage.insert_transaction(&tx).unwrap();

        let mut duplicate = tx.clone();
        duplicate.seq = 2;
        let result = storage.insert_transaction(&duplicate);
        assert!(matches!(result, Err(Error::UniqueViolation(_))));
        assert_eq!(storage.transaction_count().unwrap(), 1);
    }

    #[test]
    fn test_user_defaults_and_updates() {
        let (storage, _temp) = test_storage();
        let alice = Username::new("alice");

        let user = storage.get_or_create_user(&alice).unwrap();
        assert_eq!(user.bet, Decimal::from(100));

        assert_eq!(user.daily_prize_time, User::never_claimed());

        let claimed = Utc::now();
        let mut updated = User::new(alice.clone(), Decimal::from(25));
        updated.daily_prize_time = claimed;
        storage.put_user(&updated).unwrap();

        // Referencing an existing user never resets its bet or prize time
        storage.insert_transaction(&test_tx(1, None, "alice", 5)).unwrap();
        let stored = storage.get_user(&alice).unwrap().unwrap();
        assert_eq!(stored.bet, Decimal::from(25));
        assert_eq!(stored.daily_prize_time, claimed);
    }

    #[test]
    fn test_commit_block_confirms_pending() {
        let (storage, _temp) = test_storage();
        let tx1 = test_tx(1, Some("alice"), "admin", 50);
        let tx2 = test_tx(2, Some("bob"), "admin", 20);
        storage.insert_transaction(&tx1).unwrap();
        storage.insert_transaction(&tx2).unwrap();

        let reward = test_tx(3, None, "admin", 10);
        let body: Vec<Transaction> = [tx2.clone(), tx1.clone(), reward]
            .into_iter()
            .map(|mut tx| {
                tx.block = Some(0);
                tx
            })
            .collect();
        let block = test_block(0, &body);

        storage.commit_block(&block, &body).unwrap();

        assert_eq!(storage.pending_count().unwrap(), 0);
        assert_eq!(storage.transaction_count().unwrap(), 3);
        assert_eq!(storage.next_seq().unwrap(), 4);
        assert_eq!(storage.get_block(0).unwrap(), block);
        assert_eq!(storage.get_latest_block().unwrap(), Some(block.clone()));

        // Stored order is the block order, not sequence order
        let stored = storage.block_transactions(0).unwrap();
        assert_eq!(
            stored.iter().map(|tx| tx.seq).collect::<Vec<_>>(),
            vec![2, 1, 3]
        );
        assert!(stored.iter().all(|tx| tx.block == Some(0)));

        // Height is unique
        let result = storage.commit_block(&block, &[]);
        assert!(matches!(result, Err(Error::UniqueViolation(_))));
    }

    #[test]
    fn test_block_transactions_do_not_leak_between_heights() {
        let (storage, _temp) = test_storage();

        for height in 0..3u64 {
            let mut reward = test_tx(height + 1, None, "admin", 10);
            reward.block = Some(height);
            let block = test_block(height, std::slice::from_ref(&reward));
            storage.commit_block(&block, &[reward]).unwrap();
        }

        for height in 0..3u64 {
            let txs = storage.block_transactions(height).unwrap();
            assert_eq!(txs.len(), 1);
            assert_eq!(txs[0].seq, height + 1);
        }
        assert!(storage.block_transactions(3).unwrap().is_empty());
    }

    #[test]
    fn test_purge_pending_keeps_sequence() {
        let (storage, _temp) = test_storage();
        storage.insert_transaction(&test_tx(1, None, "alice", 5)).unwrap();
        storage.insert_transaction(&test_tx(2, None, "bob", 5)).unwrap();

        assert_eq!(storage.purge_pending().unwrap(), 2);
        assert_eq!(storage.transaction_count().unwrap(), 0);
        assert_eq!(storage.pending_count().unwrap(), 0);
        assert_eq!(storage.next_seq().unwrap(), 3);
    }

    #[test]
    fn test_paging_and_user_history() {
        let (storage, _temp) = test_storage();
        for seq in 1..=5 {
            let to = if seq % 2 == 0 { "alice" } else { "bob" };
            storage.insert_transaction(&test_tx(seq, None, to, 1)).unwrap();
        }

        let newest = storage.transactions(Page::latest(2)).unwrap();
        assert_eq!(newest.iter().map(|tx| tx.seq).collect::<Vec<_>>(), vec![5, 4]);

        let page = Page {
            limit: Some(2),
            offset: 1,
            order: Order::Ascending,
        };
        let middle = storage.transactions(page).unwrap();
        assert_eq!(middle.iter().map(|tx| tx.seq).collect::<Vec<_>>(), vec![2, 3]);

        let alice = storage
            .user_transactions(&Username::new("alice"), None)
            .unwrap();
        assert_eq!(alice.iter().map(|tx| tx.seq).collect::<Vec<_>>(), vec![4, 2]);

        let stats = storage.get_stats().unwrap();
        assert_eq!(stats.total_transactions, 5);
        assert_eq!(stats.total_users, 2);
    }
}
