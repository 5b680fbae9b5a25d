//! Main ledger orchestration layer
//!
//! This module ties together storage, the balance cache and the actor
//! into a high-level API for recording transfers and mining blocks.
//!
//! # Example
//!
//! ```no_run
//! use chain_ledger::{Config, Ledger};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> chain_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     ledger.record_gain("alice", Decimal::from(100), Some("win")).await?;
//!     ledger.record_deposit("alice", Decimal::from(50), Some("bet")).await?;
//!     ledger.mine_block("admin", None).await?;
//!
//!     ledger.shutdown().await
//! }
//! ```

use crate::{
    actor::{prepare_transaction, spawn_ledger_actor, ChainSummary, LedgerHandle, TransferRequest},
    balance::BalanceCache,
    merkle::{MerkleProof, MerkleTree},
    metrics::Metrics,
    storage::StorageStats,
    types::{Block, Page, Transaction, Username},
    BalanceError, Config, Error, Result, Storage,
};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Header row of the transaction CSV format
pub const CSV_HEADER: [&str; 5] = ["from_user", "to_user", "amount", "description", "timestamp"];

/// One row of the transaction CSV format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CsvRow {
    from_user: String,
    to_user: String,
    amount: String,
    description: String,
    timestamp: String,
}

/// Main ledger interface
#[derive(Debug)]
pub struct Ledger {
    /// Actor handle for mutations
    handle: LedgerHandle,

    /// Actor task, awaited on shutdown
    actor: JoinHandle<()>,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Balances maintained by the actor
    balances: Arc<RwLock<BalanceCache>>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration.
    ///
    /// Verifies the whole chain (mining genesis on an empty store) before
    /// returning; a broken chain fails with [`Error::BlockchainBroken`].
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;

        // Open storage
        let storage = Arc::new(Storage::open(&config)?);
        let balances = Arc::new(RwLock::new(BalanceCache::new()));
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to create metrics: {}", e)))?;

        // Spawn actor
        let (handle, actor) = spawn_ledger_actor(
            storage.clone(),
            balances.clone(),
            config.clone(),
            metrics.clone(),
        );

        let summary = match handle.load_and_verify_chain().await {
            Ok(summary) => summary,
            Err(e) => {
                let _ = handle.shutdown().await;
                let _ = actor.await;
                return Err(e);
            }
        };

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            height = summary.tip.height,
            "Ledger opened"
        );

        Ok(Self {
            handle,
            actor,
            storage,
            balances,
            metrics,
            config,
        })
    }

    /// Re-run the startup verification against the current store
    pub async fn load_and_verify_chain(&self) -> Result<ChainSummary> {
        self.handle.load_and_verify_chain().await
    }

    // Recording

    /// Validate and build a pending transaction without recording it
    pub fn create_transaction(
        &self,
        from: Option<&str>,
        to: &str,
        amount: Decimal,
        description: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Transaction> {
        let request = Self::request(from, to, amount, description, timestamp);
        prepare_transaction(&self.storage, &self.balances.read(), request)
    }

    /// Record a transfer (or a mint when `from` is `None`)
    pub async fn record_transaction(
        &self,
        from: Option<&str>,
        to: &str,
        amount: Decimal,
        description: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Transaction> {
        self.handle
            .record_transaction(Self::request(from, to, amount, description, timestamp))
            .await
    }

    /// User pays the genesis account
    pub async fn record_deposit(
        &self,
        username: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction> {
        let genesis = self.config.chain.genesis_account.as_str();
        self.record_transaction(Some(username), genesis, amount, description, None)
            .await
    }

    /// Genesis account pays the user
    pub async fn record_gain(
        &self,
        username: &str,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction> {
        let genesis = self.config.chain.genesis_account.as_str();
        self.record_transaction(Some(genesis), username, amount, description, None)
            .await
    }

    fn request(
        from: Option<&str>,
        to: &str,
        amount: Decimal,
        description: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
    ) -> TransferRequest {
        TransferRequest {
            from: from.map(Username::new),
            to: Username::new(to),
            amount,
            description: description.map(str::to_string),
            timestamp,
        }
    }

    // Mining and administration

    /// Mine every pending transaction into a new block.
    ///
    /// Returns `None` when nothing is pending and no nonce was supplied.
    pub async fn mine_block(&self, miner: &str, nonce: Option<u64>) -> Result<Option<Block>> {
        self.handle.mine_block(Username::new(miner), nonce).await
    }

    /// Delete all pending transactions and rebuild balances. Returns the
    /// number removed.
    pub async fn purge_pending(&self) -> Result<usize> {
        self.handle.purge_pending().await
    }

    /// Default bet of a user, creating the user on first lookup
    pub async fn user_bet(&self, username: &str) -> Result<Decimal> {
        let user = self.handle.get_or_create_user(Username::new(username)).await?;
        Ok(user.bet)
    }

    /// Change a user's default bet
    pub async fn set_user_bet(&self, username: &str, bet: Decimal) -> Result<Decimal> {
        let user = self.handle.set_user_bet(Username::new(username), bet).await?;
        Ok(user.bet)
    }

    /// Claim the daily prize. Returns `false` when already claimed in the
    /// current prize day (starting at `users.day_start` UTC).
    pub async fn available_daily_prize(&self, username: &str) -> Result<bool> {
        self.handle.claim_daily_prize(Username::new(username)).await
    }

    /// Make the daily prize claimable again for an existing user
    pub async fn reset_daily_prize(&self, username: &str) -> Result<()> {
        self.handle.reset_daily_prize(Username::new(username)).await?;
        Ok(())
    }

    // CSV

    /// Record every complete row of a space-delimited CSV. Returns the
    /// number of rows recorded; rows with an empty field are skipped.
    pub async fn import_transactions_csv<R: Read>(&self, reader: R) -> Result<usize> {
        // Parse the whole file before recording anything
        let rows = {
            let mut csv_reader = csv::ReaderBuilder::new()
                .delimiter(b' ')
                .quote(b'"')
                .has_headers(true)
                .flexible(true)
                .from_reader(reader);

            let mut rows = Vec::new();
            for record in csv_reader.records() {
                let record = record?;
                if record.len() < CSV_HEADER.len() || record.iter().any(str::is_empty) {
                    continue;
                }
                rows.push(record);
            }
            rows
        };

        let mut imported = 0;
        for record in rows {
            let amount: Decimal = record[2].parse().map_err(|e| {
                Error::InvalidInput(format!("amount {:?}: {}", &record[2], e))
            })?;
            let timestamp = parse_timestamp(&record[4])?;

            self.record_transaction(
                Some(&record[0]),
                &record[1],
                amount,
                Some(&record[3]),
                Some(timestamp),
            )
            .await?;
            imported += 1;
        }

        tracing::info!(imported, "Transactions imported from CSV");
        Ok(imported)
    }

    /// Every transaction, oldest first, in the import format
    pub fn export_transactions_csv(&self) -> Result<String> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b' ')
            .quote(b'"')
            .has_headers(false)
            .from_writer(Vec::new());

        writer.write_record(CSV_HEADER)?;
        for tx in self.storage.transactions(Page::all_ascending())? {
            writer.serialize(CsvRow {
                from_user: tx.from_user.map(|u| u.to_string()).unwrap_or_default(),
                to_user: tx.to_user.to_string(),
                amount: tx.amount.to_string(),
                description: tx.description.unwrap_or_default(),
                timestamp: tx.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            })?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| Error::InvalidInput(e.to_string()))
    }

    // Queries

    /// Balance of a user (zero when unknown)
    pub fn balance(&self, username: &str) -> Decimal {
        self.balances.read().balance(&Username::new(username))
    }

    /// Every balance, largest first
    pub fn balances(&self) -> Vec<(Username, Decimal)> {
        self.balances.read().sorted()
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> Result<Decimal> {
        Ok(self.balances.read().total()?)
    }

    /// Check money conservation invariant
    ///
    /// Sum of balances must equal the sum of every mint ever recorded.
    pub fn check_conservation(&self) -> Result<bool> {
        let minted = self
            .storage
            .transactions(Page::all_ascending())?
            .iter()
            .filter(|tx| tx.is_mint())
            .try_fold(Decimal::ZERO, |sum, tx| sum.checked_add(tx.amount))
            .ok_or_else(|| BalanceError::Overflow("minted supply".to_string()))?;

        Ok(self.total_supply()? == minted)
    }

    /// Transactions, pending and confirmed
    pub fn transactions(&self, page: Page) -> Result<Vec<Transaction>> {
        self.storage.transactions(page)
    }

    /// Transactions involving a user, newest first
    pub fn user_transactions(&self, username: &str, limit: Option<usize>) -> Result<Vec<Transaction>> {
        self.storage
            .user_transactions(&Username::new(username), limit)
    }

    /// Blocks
    pub fn blocks(&self, page: Page) -> Result<Vec<Block>> {
        self.storage.blocks(page)
    }

    /// Get block by height
    pub fn block(&self, height: u64) -> Result<Block> {
        self.storage.get_block(height)
    }

    /// Get latest block
    pub fn latest_block(&self) -> Result<Option<Block>> {
        self.storage.get_latest_block()
    }

    /// Transactions of a block in stored order
    pub fn block_transactions(&self, height: u64) -> Result<Vec<Transaction>> {
        self.storage.block_transactions(height)
    }

    /// Transactions not yet in a block
    pub fn pending_transactions(&self) -> Result<Vec<Transaction>> {
        self.storage.pending_transactions()
    }

    /// Number of blocks
    pub fn block_count(&self) -> Result<u64> {
        self.storage.block_count()
    }

    /// Number of transactions
    pub fn transaction_count(&self) -> Result<u64> {
        self.storage.transaction_count()
    }

    /// Merkle inclusion proof of a confirmed transaction against its block
    pub fn transaction_proof(&self, seq: u64) -> Result<MerkleProof> {
        let tx = self.storage.get_transaction(seq)?;
        let height = tx
            .block
            .ok_or_else(|| Error::NotFound(format!("transaction {} is still pending", seq)))?;

        let body = self.storage.block_transactions(height)?;
        let index = body
            .iter()
            .position(|candidate| candidate.seq == seq)
            .ok_or_else(|| Error::NotFound(format!("transaction {} in block {}", seq, height)))?;

        let hashes: Vec<&str> = body.iter().map(|tx| tx.tx_hash.as_str()).collect();
        MerkleTree::from_hex_leaves(&hashes)?
            .generate_proof(index)
            .ok_or_else(|| Error::NotFound(format!("proof for transaction {}", seq)))
    }

    /// Storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.get_stats()
    }

    /// Metrics of this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shutdown ledger gracefully and release the store
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await?;
        self.actor.await?;
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp, accepting naive ISO 8601 as UTC
fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::InvalidInput(format!("timestamp {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Order;
    use tempfile::TempDir;

    fn test_config(temp_dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.chain.difficulty = 1;
        config
    }

    async fn create_test_ledger() -> (Ledger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = Ledger::open(test_config(&temp_dir)).await.unwrap();
        (ledger, temp_dir)
    }

    #[tokio::test]
    async fn test_ledger_open_mines_genesis() {
        let (ledger, _temp) = create_test_ledger().await;

        assert_eq!(ledger.block_count().unwrap(), 1);
        let genesis = ledger.latest_block().unwrap().unwrap();
        assert!(genesis.is_genesis());
        assert_eq!(genesis.miner.as_str(), "admin");
        assert_eq!(ledger.balance("admin"), ledger.config().chain.genesis_reward);
        assert!(ledger.check_conservation().unwrap());

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.total_blocks, 1);
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.pending_transactions, 0);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_alice_scenario() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let genesis_reward = config.chain.genesis_reward;

        let ledger = Ledger::open(config.clone()).await.unwrap();
        ledger.record_gain("alice", Decimal::from(100), Some("win")).await.unwrap();
        ledger.record_deposit("alice", Decimal::from(50), Some("bet")).await.unwrap();
        assert_eq!(ledger.balance("alice"), Decimal::from(50));

        let block = ledger.mine_block("admin", None).await.unwrap().unwrap();
        assert_eq!(block.height, 1);
        assert_eq!(ledger.block_transactions(1).unwrap().len(), 3);
        ledger.shutdown().await.unwrap();

        let ledger = Ledger::open(config).await.unwrap();
        assert_eq!(ledger.balance("alice"), Decimal::from(50));
        assert_eq!(ledger.balance("admin"), genesis_reward - Decimal::from(50) + Decimal::from(10));
        assert!(ledger.check_conservation().unwrap());
        assert!(ledger.pending_transactions().unwrap().is_empty());
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_transaction_does_not_mutate() {
        let (ledger, _temp) = create_test_ledger().await;

        let tx = ledger
            .create_transaction(Some("admin"), "bob", Decimal::new(75, 1), None, None)
            .unwrap();
        assert_eq!(tx.amount, Decimal::from(7));
        assert!(tx.is_pending());
        assert_eq!(ledger.transaction_count().unwrap(), 1);
        assert_eq!(ledger.balance("bob"), Decimal::ZERO);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_insufficient_balance() {
        let (ledger, _temp) = create_test_ledger().await;
        ledger.record_gain("alice", Decimal::from(10), None).await.unwrap();

        let result = ledger
            .record_transaction(Some("alice"), "bob", Decimal::from(11), None, None)
            .await;
        match result {
            Err(Error::Balance(BalanceError::InsufficientBalance {
                username,
                needed,
                available,
            })) => {
                assert_eq!(username, "alice");
                assert_eq!(needed, Decimal::from(11));
                assert_eq!(available, Decimal::from(10));
            }
            other => panic!("expected insufficient balance, got {:?}", other),
        }
        assert_eq!(ledger.balance("alice"), Decimal::from(10));
        assert_eq!(ledger.balance("bob"), Decimal::ZERO);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_overflowing_credit_is_rejected_before_persisting() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let ledger = Ledger::open(config.clone()).await.unwrap();

        ledger
            .record_transaction(None, "bob", Decimal::MAX, Some("jackpot"), None)
            .await
            .unwrap();
        let count = ledger.transaction_count().unwrap();

        let result = ledger
            .record_transaction(None, "bob", Decimal::MAX, Some("jackpot"), None)
            .await;
        assert!(matches!(
            result,
            Err(Error::Balance(BalanceError::Overflow(ref user))) if user == "bob"
        ));
        let result = ledger.record_gain("bob", Decimal::ONE, None).await;
        assert!(matches!(result, Err(Error::Balance(BalanceError::Overflow(_)))));

        assert_eq!(ledger.balance("bob"), Decimal::MAX);
        assert_eq!(ledger.transaction_count().unwrap(), count);
        assert!(ledger.total_supply().is_err());

        // The actor still serves writes
        ledger
            .record_transaction(Some("bob"), "alice", Decimal::from(5), None, None)
            .await
            .unwrap();
        ledger.shutdown().await.unwrap();

        // Replays the pending rows, then mines them in the startup pass
        let reopened = Ledger::open(config.clone()).await.unwrap();
        assert_eq!(reopened.balance("bob"), Decimal::MAX - Decimal::from(5));
        assert!(reopened.pending_transactions().unwrap().is_empty());
        reopened.shutdown().await.unwrap();

        // Replays the mined rows
        let reopened = Ledger::open(config).await.unwrap();
        assert_eq!(reopened.balance("bob"), Decimal::MAX - Decimal::from(5));
        assert_eq!(reopened.balance("alice"), Decimal::from(5));
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_pending_restores_balances() {
        let (ledger, _temp) = create_test_ledger().await;
        let before = ledger.balances();

        ledger.record_gain("alice", Decimal::from(10), None).await.unwrap();
        ledger.record_gain("bob", Decimal::from(20), None).await.unwrap();
        assert_eq!(ledger.purge_pending().await.unwrap(), 2);

        assert_eq!(ledger.balances(), before);
        assert!(ledger.pending_transactions().unwrap().is_empty());
        assert_eq!(ledger.block_count().unwrap(), 1);

        // Sequence numbers are never reused
        let tx = ledger.record_gain("carol", Decimal::from(1), None).await.unwrap();
        assert_eq!(tx.seq, 4);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_transaction_proof() {
        let (ledger, _temp) = create_test_ledger().await;
        let tx = ledger.record_gain("alice", Decimal::from(5), None).await.unwrap();

        assert!(matches!(
            ledger.transaction_proof(tx.seq),
            Err(Error::NotFound(_))
        ));

        let block = ledger.mine_block("admin", None).await.unwrap().unwrap();
        let proof = ledger.transaction_proof(tx.seq).unwrap();
        assert!(proof.verify_against(&block.merkle_root));
        assert_eq!(hex::encode(proof.leaf_hash), tx.tx_hash);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_csv_import_skips_incomplete_rows() {
        let (ledger, _temp) = create_test_ledger().await;

        let csv = "from_user to_user amount description timestamp\n\
                   admin alice 30 \"first win\" 2024-01-02T03:04:05Z\n\
                   admin bob 30 \"\" 2024-01-02T03:04:05Z\n";
        let imported = ledger.import_transactions_csv(csv.as_bytes()).await.unwrap();

        assert_eq!(imported, 1);
        assert_eq!(ledger.balance("alice"), Decimal::from(30));
        assert_eq!(ledger.balance("bob"), Decimal::ZERO);

        let tx = &ledger.transactions(Page::latest(1)).unwrap()[0];
        assert_eq!(tx.description.as_deref(), Some("first win"));
        assert_eq!(tx.timestamp.to_rfc3339(), "2024-01-02T03:04:05+00:00");

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_csv_import_stops_on_failure() {
        let (ledger, _temp) = create_test_ledger().await;

        let csv = "from_user to_user amount description timestamp\n\
                   admin alice 5 ok 2024-01-02T03:04:05\n\
                   ghost alice 5 bad 2024-01-02T03:04:05\n\
                   admin bob 5 never 2024-01-02T03:04:05\n";
        let result = ledger.import_transactions_csv(csv.as_bytes()).await;

        assert!(matches!(result, Err(Error::Balance(_))));
        assert_eq!(ledger.balance("alice"), Decimal::from(5));
        assert_eq!(ledger.balance("bob"), Decimal::ZERO);

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_csv_export_round_trips_through_import() {
        let (ledger, temp) = create_test_ledger().await;
        ledger.record_gain("alice", Decimal::from(40), Some("lucky spin")).await.unwrap();
        ledger.record_deposit("alice", Decimal::from(15), Some("bet")).await.unwrap();

        let exported = ledger.export_transactions_csv().unwrap();
        let mut lines = exported.lines();
        assert_eq!(lines.next(), Some("from_user to_user amount description timestamp"));
        // Genesis mint has an empty sender
        assert!(lines.next().unwrap().starts_with(" admin 1000000000000 \"Genesis block\""));
        ledger.shutdown().await.unwrap();

        // Mints are skipped on import, transfers replay
        let other_dir = TempDir::new().unwrap();
        let other = Ledger::open(test_config(&other_dir)).await.unwrap();
        assert_eq!(other.import_transactions_csv(exported.as_bytes()).await.unwrap(), 2);
        assert_eq!(other.balance("alice"), Decimal::from(25));
        other.shutdown().await.unwrap();
        drop(temp);
    }

    #[tokio::test]
    async fn test_user_bets_and_history() {
        let (ledger, _temp) = create_test_ledger().await;

        assert_eq!(ledger.user_bet("dave").await.unwrap(), Decimal::from(100));
        assert_eq!(
            ledger.set_user_bet("dave", Decimal::from(5)).await.unwrap(),
            Decimal::from(5)
        );
        assert_eq!(ledger.user_bet("dave").await.unwrap(), Decimal::from(5));

        ledger.record_gain("dave", Decimal::from(3), None).await.unwrap();
        ledger.record_gain("erin", Decimal::from(3), None).await.unwrap();
        ledger.record_deposit("dave", Decimal::from(1), None).await.unwrap();

        let history = ledger.user_transactions("dave", Some(10)).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].seq > history[1].seq);

        let page = Page {
            limit: Some(2),
            offset: 0,
            order: Order::Ascending,
        };
        let first = ledger.transactions(page).unwrap();
        assert_eq!(first[0].description.as_deref(), Some("Genesis block"));

        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_daily_prize_gate() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        let ledger = Ledger::open(config.clone()).await.unwrap();

        assert!(ledger.available_daily_prize("dave").await.unwrap());
        ledger.record_gain("dave", Decimal::from(50), Some("daily prize")).await.unwrap();
        assert!(!ledger.available_daily_prize("dave").await.unwrap());
        assert_eq!(ledger.balance("dave"), Decimal::from(50));

        let result = ledger.reset_daily_prize("nobody").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        ledger.shutdown().await.unwrap();

        // The claim is persisted with the user
        let reopened = Ledger::open(config).await.unwrap();
        assert!(!reopened.available_daily_prize("dave").await.unwrap());
        reopened.reset_daily_prize("dave").await.unwrap();
        assert!(reopened.available_daily_prize("dave").await.unwrap());
        assert!(!reopened.available_daily_prize("dave").await.unwrap());
        reopened.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_mining_duration_sampled_per_block() {
        let (ledger, _temp) = create_test_ledger().await;
        let histogram = &ledger.metrics().mining_duration;
        assert_eq!(histogram.get_sample_count(), 1);
        let before = histogram.get_sample_sum();

        ledger.record_gain("alice", Decimal::from(10), None).await.unwrap();
        let started = std::time::Instant::now();
        ledger.mine_block("admin", None).await.unwrap().unwrap();
        let call = started.elapsed().as_secs_f64();

        assert_eq!(histogram.get_sample_count(), 2);
        assert_eq!(ledger.metrics().blocks_total.get(), 2);
        assert!(histogram.get_sample_sum() - before <= call);

        ledger.shutdown().await.unwrap();
    }

    /// Two mined blocks on top of genesis plus one pending transfer
    async fn build_chain(config: &Config) {
        let ledger = Ledger::open(config.clone()).await.unwrap();
        ledger.record_gain("alice", Decimal::from(100), Some("win")).await.unwrap();
        ledger.mine_block("admin", None).await.unwrap().unwrap();
        ledger.record_deposit("alice", Decimal::from(40), Some("bet")).await.unwrap();
        ledger.mine_block("bob", None).await.unwrap().unwrap();
        ledger.record_deposit("alice", Decimal::from(5), Some("late bet")).await.unwrap();
        ledger.shutdown().await.unwrap();
    }

    async fn assert_tamper_detected(height: u64, tamper: impl FnOnce(&Storage)) {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        build_chain(&config).await;

        {
            let storage = Storage::open(&config).unwrap();
            tamper(&storage);
        }

        match Ledger::open(config).await {
            Err(Error::BlockchainBroken { height: broken, .. }) => assert_eq!(broken, height),
            other => panic!("expected break at {}, got {:?}", height, other.map(|_| ())),
        }
    }

    fn first_tx(storage: &Storage, height: u64) -> Transaction {
        storage.block_transactions(height).unwrap().remove(0)
    }

    #[tokio::test]
    async fn test_untampered_chain_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(&temp_dir);
        build_chain(&config).await;

        // The startup mining pass absorbs the pending deposit
        let ledger = Ledger::open(config).await.unwrap();
        assert_eq!(ledger.block_count().unwrap(), 4);
        assert_eq!(ledger.balance("alice"), Decimal::from(55));
        assert!(ledger.check_conservation().unwrap());
        ledger.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_transaction_amount() {
        assert_tamper_detected(1, |storage| {
            let mut tx = first_tx(storage, 1);
            tx.amount = Decimal::from(1_000);
            storage.overwrite_transaction(&tx).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_transaction_description() {
        assert_tamper_detected(2, |storage| {
            let mut tx = first_tx(storage, 2);
            tx.description = Some("refund".to_string());
            storage.overwrite_transaction(&tx).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_genesis_timestamp() {
        assert_tamper_detected(0, |storage| {
            let mut block = storage.get_block(0).unwrap();
            block.timestamp = block.timestamp + chrono::Duration::seconds(1);
            storage.overwrite_block(&block).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_nonce() {
        assert_tamper_detected(1, |storage| {
            let mut block = storage.get_block(1).unwrap();
            block.nonce += 1;
            storage.overwrite_block(&block).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_prev_hash() {
        assert_tamper_detected(2, |storage| {
            let mut block = storage.get_block(2).unwrap();
            block.prev_hash = crate::crypto::ZERO_HASH.to_string();
            storage.overwrite_block(&block).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_merkle_root() {
        assert_tamper_detected(1, |storage| {
            let mut block = storage.get_block(1).unwrap();
            block.merkle_root = storage.get_block(2).unwrap().merkle_root;
            storage.overwrite_block(&block).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_block_miner() {
        assert_tamper_detected(2, |storage| {
            let mut block = storage.get_block(2).unwrap();
            block.miner = Username::new("mallory");
            storage.overwrite_block(&block).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_tampered_pending_transaction() {
        assert_tamper_detected(3, |storage| {
            let mut tx = storage.pending_transactions().unwrap().remove(0);
            tx.amount = Decimal::from(6);
            storage.overwrite_transaction(&tx).unwrap();
        })
        .await;
    }

    #[tokio::test]
    async fn test_runtime_break_halts_writes() {
        let (ledger, _temp) = create_test_ledger().await;
        ledger.record_gain("alice", Decimal::from(10), None).await.unwrap();
        ledger.mine_block("admin", None).await.unwrap().unwrap();

        let mut block = ledger.storage.get_block(1).unwrap();
        block.nonce += 1;
        ledger.storage.overwrite_block(&block).unwrap();

        let result = ledger.load_and_verify_chain().await;
        assert!(matches!(
            result,
            Err(Error::BlockchainBroken { height: 1, .. })
        ));

        let result = ledger.record_gain("alice", Decimal::from(1), None).await;
        assert!(matches!(result, Err(Error::LedgerHalted { height: 1, .. })));
        let result = ledger.mine_block("admin", Some(0)).await;
        assert!(matches!(result, Err(Error::LedgerHalted { .. })));
        assert!(result.unwrap_err().is_fatal());
        let result = ledger.available_daily_prize("alice").await;
        assert!(matches!(result, Err(Error::LedgerHalted { .. })));

        // Reads stay available
        assert_eq!(ledger.block_count().unwrap(), 2);
        ledger.shutdown().await.unwrap();
    }

    #[test]
    fn test_parse_timestamp() {
        let parsed = parse_timestamp("2024-05-06T07:08:09.5").unwrap();
        assert_eq!(parsed.to_rfc3339(), "2024-05-06T07:08:09.500+00:00");
        assert!(parse_timestamp("2024-05-06T07:08:09+02:00").is_ok());
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(Error::InvalidInput(_))
        ));
    }
}
