//! Actor-based concurrency for the ledger
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns every balance-mutating path (record, mine, purge, verify)
//! - Balance check and debit happen in the same actor turn
//! - Proof-of-work runs on a blocking worker and is awaited by the actor,
//!   so a mining cycle never interleaves with other writes
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │               LedgerHandle (Clone)                   │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              LedgerActor (Single Task)               │
//! │  ┌────────────────────────────────────────────────┐  │
//! │  │ Halted state after a chain break               │  │
//! │  │ Timer: optional periodic mining pass           │  │
//! │  └────────────────────────────────────────────────┘  │
//! │                       │                              │
//! │                       ▼                              │
//! │   Storage (WriteBatch)  +  RwLock<BalanceCache>      │
//! └──────────────────────────────────────────────────────┘
//! ```

use crate::balance::BalanceCache;
use crate::error::{BalanceError, Error, Result};
use crate::metrics::Metrics;
use crate::miner::{self, BlockTemplate, BLOCK_REWARD_DESCRIPTION, GENESIS_DESCRIPTION};
use crate::storage::Storage;
use crate::types::{whole_amount, Block, BlockHeader, Transaction, User, Username};
use crate::verifier;
use crate::Config;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};

/// A transfer, deposit, gain or mint to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Debited account, `None` to mint
    pub from: Option<Username>,
    /// Credited account
    pub to: Username,
    /// Requested amount, truncated to a whole number
    pub amount: Decimal,
    /// Free-form description
    pub description: Option<String>,
    /// Explicit timestamp (defaults to now)
    pub timestamp: Option<DateTime<Utc>>,
}

/// Summary returned by a verification pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSummary {
    /// Chain tip after verification and the follow-up mining pass
    pub tip: Block,
    /// Pending transactions replayed before the mining pass
    pub pending_replayed: usize,
    /// Block produced by the follow-up mining pass, if any
    pub mined: Option<Block>,
}

/// Validate a request against current balances and build the pending
/// transaction. Nothing is written.
pub(crate) fn prepare_transaction(
    storage: &Storage,
    balances: &BalanceCache,
    request: TransferRequest,
) -> Result<Transaction> {
    let amount = whole_amount(request.amount);
    if amount <= Decimal::ZERO {
        return Err(BalanceError::NonPositiveAmount(amount).into());
    }

    match &request.from {
        Some(from) if *from == request.to => balances.check_debit(from, amount)?,
        Some(from) => {
            balances.check_debit(from, amount)?;
            balances.check_credit(&request.to, amount)?;
        }
        None => {
            balances.check_credit(&request.to, amount)?;
        }
    }

    Transaction::new_pending(
        storage.next_seq()?,
        request.timestamp.unwrap_or_else(Utc::now),
        request.from,
        request.to,
        amount,
        request.description,
    )
}

/// Message sent to the ledger actor
#[derive(Debug)]
pub enum LedgerMessage {
    /// Validate, persist and apply a transaction
    RecordTransaction {
        request: TransferRequest,
        response: oneshot::Sender<Result<Transaction>>,
    },

    /// Mine pending transactions into a new block
    MineBlock {
        miner: Username,
        nonce: Option<u64>,
        response: oneshot::Sender<Result<Option<Block>>>,
    },

    /// Rebuild balances by replaying the whole chain
    VerifyChain {
        response: oneshot::Sender<Result<ChainSummary>>,
    },

    /// Delete every pending transaction and re-verify
    PurgePending {
        response: oneshot::Sender<Result<usize>>,
    },

    /// Get a user, creating it with the default bet
    GetOrCreateUser {
        username: Username,
        response: oneshot::Sender<Result<User>>,
    },

    /// Update a user's default bet
    SetUserBet {
        username: Username,
        bet: Decimal,
        response: oneshot::Sender<Result<User>>,
    },

    /// Claim today's daily prize; answers whether it was still available
    ClaimDailyPrize {
        username: Username,
        response: oneshot::Sender<Result<bool>>,
    },

    /// Make an existing user's daily prize claimable again
    ResetDailyPrize {
        username: Username,
        response: oneshot::Sender<Result<User>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that processes ledger messages
#[derive(Debug)]
pub struct LedgerActor {
    /// Storage backend
    storage: Arc<Storage>,

    /// Balances shared with readers
    balances: Arc<RwLock<BalanceCache>>,

    /// Chain rules and mining settings
    config: Config,

    /// Metrics sink
    metrics: Metrics,

    /// Mailbox for incoming messages
    mailbox: mpsc::Receiver<LedgerMessage>,

    /// Set once verification finds a break
    halted: Option<(u64, String)>,
}

impl LedgerActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        balances: Arc<RwLock<BalanceCache>>,
        config: Config,
        metrics: Metrics,
        mailbox: mpsc::Receiver<LedgerMessage>,
    ) -> Self {
        Self {
            storage,
            balances,
            config,
            metrics,
            mailbox,
            halted: None,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        let mut auto_mine = match self.config.mining.auto_mine_interval_ms {
            0 => None,
            ms => {
                let mut timer = interval(Duration::from_millis(ms));
                timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(timer)
            }
        };

        loop {
            tokio::select! {
                msg = self.mailbox.recv() => match msg {
                    Some(LedgerMessage::Shutdown) | None => break,
                    Some(msg) => self.handle_message(msg).await,
                },

                // Periodic mining pass
                _ = next_tick(&mut auto_mine), if auto_mine.is_some() => {
                    if self.halted.is_some() {
                        continue;
                    }
                    let miner = Username::new(self.config.mining.miner_account.clone());
                    if let Err(e) = self.mine(miner, None).await {
                        tracing::error!(error = %e, "Periodic mining failed");
                    }
                }
            }
        }

        tracing::info!("Ledger actor stopped");
    }

    /// Handle a single message
    async fn handle_message(&mut self, msg: LedgerMessage) {
        match msg {
            LedgerMessage::RecordTransaction { request, response } => {
                let result = self.record(request);
                let _ = response.send(result);
            }

            LedgerMessage::MineBlock {
                miner,
                nonce,
                response,
            } => {
                let result = match self.ensure_running() {
                    Ok(()) => self.mine(miner, nonce).await,
                    Err(e) => Err(e),
                };
                let _ = response.send(result);
            }

            LedgerMessage::VerifyChain { response } => {
                let result = self.load_and_verify_chain().await;
                let _ = response.send(result);
            }

            LedgerMessage::PurgePending { response } => {
                let result = self.purge_pending().await;
                let _ = response.send(result);
            }

            LedgerMessage::GetOrCreateUser { username, response } => {
                let result = self
                    .ensure_running()
                    .and_then(|()| self.storage.get_or_create_user(&username));
                let _ = response.send(result);
            }

            LedgerMessage::SetUserBet {
                username,
                bet,
                response,
            } => {
                let result = self.set_user_bet(username, bet);
                let _ = response.send(result);
            }

            LedgerMessage::ClaimDailyPrize { username, response } => {
                let result = self.claim_daily_prize(username);
                let _ = response.send(result);
            }

            LedgerMessage::ResetDailyPrize { username, response } => {
                let result = self.reset_daily_prize(username);
                let _ = response.send(result);
            }

            LedgerMessage::Shutdown => {
                // Handled in main loop
            }
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match &self.halted {
            Some((height, reason)) => Err(Error::LedgerHalted {
                height: *height,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn record(&mut self, request: TransferRequest) -> Result<Transaction> {
        self.ensure_running()?;

        let tx = prepare_transaction(&self.storage, &self.balances.read(), request)?;
        self.storage.insert_transaction(&tx)?;
        self.balances.write().apply_transaction(&tx)?;

        self.metrics.record_transaction();
        self.refresh_pending_gauge();

        tracing::debug!(
            seq = tx.seq,
            from = ?tx.from_user.as_ref().map(Username::as_str),
            to = %tx.to_user,
            amount = %tx.amount,
            "Transaction recorded"
        );

        Ok(tx)
    }

    /// Mine pending transactions. `Ok(None)` when there is nothing to do.
    async fn mine(&mut self, miner: Username, nonce: Option<u64>) -> Result<Option<Block>> {
        let pending = self.storage.pending_transactions()?;
        if pending.is_empty() && nonce.is_none() {
            return Ok(None);
        }
        // Genesis is only ever mined by chain verification
        if self.storage.get_latest_block()?.is_none() {
            return Err(Error::InvalidInput("chain has no genesis block".to_string()));
        }

        let block = self
            .mine_block_with(
                miner,
                nonce,
                pending,
                self.config.chain.block_reward,
                BLOCK_REWARD_DESCRIPTION,
            )
            .await?;
        Ok(Some(block))
    }

    async fn mine_block_with(
        &mut self,
        miner: Username,
        nonce: Option<u64>,
        included: Vec<Transaction>,
        reward_amount: Decimal,
        reward_description: &str,
    ) -> Result<Block> {
        self.balances.read().check_credit(&miner, reward_amount)?;
        let tip = self.storage.get_latest_block()?;

        let reward = Transaction::new_pending(
            self.storage.next_seq()?,
            Utc::now(),
            None,
            miner.clone(),
            reward_amount,
            Some(reward_description.to_string()),
        )?;

        let template = BlockTemplate::assemble(tip.as_ref(), miner, Utc::now(), included, reward)?;
        let search = Instant::now();
        let block = self.seal(template.header.clone(), nonce).await?;
        let search_secs = search.elapsed().as_secs_f64();

        self.storage.commit_block(&block, &template.transactions)?;

        // Only a persisted reward is credited
        if let Some(reward) = template.transactions.last() {
            self.balances.write().apply_transaction(reward)?;
        }

        self.metrics.record_transaction();
        self.metrics.record_block(search_secs);
        self.refresh_pending_gauge();

        tracing::info!(
            height = block.height,
            block_hash = %block.block_hash,
            nonce = block.nonce,
            miner = %block.miner,
            transactions = template.transactions.len(),
            search_secs,
            "Block mined"
        );

        Ok(block)
    }

    async fn seal(&self, header: BlockHeader, nonce: Option<u64>) -> Result<Block> {
        let difficulty = self.config.chain.difficulty;
        match nonce {
            Some(nonce) => miner::check_nonce(header, nonce, difficulty),
            None => tokio::task::spawn_blocking(move || miner::solve(header, difficulty)).await?,
        }
    }

    /// Verify the chain, mine genesis on an empty store, replay pending
    /// transactions and run one mining pass. A break halts the actor.
    async fn load_and_verify_chain(&mut self) -> Result<ChainSummary> {
        self.ensure_running()?;

        let started = Instant::now();
        self.balances.write().clear();

        let result = self.verify_and_rebuild().await;
        self.metrics.record_verification(started.elapsed().as_secs_f64());

        match &result {
            Ok(summary) => tracing::info!(
                height = summary.tip.height,
                tip = %summary.tip.block_hash,
                pending_replayed = summary.pending_replayed,
                accounts = self.balances.read().len(),
                "Chain verified"
            ),
            Err(Error::BlockchainBroken { height, reason }) => {
                tracing::error!(height, reason = %reason, "Blockchain broken, halting ledger");
                self.halted = Some((*height, reason.clone()));
            }
            Err(e) => tracing::error!(error = %e, "Chain verification failed"),
        }

        result
    }

    async fn verify_and_rebuild(&mut self) -> Result<ChainSummary> {
        let verified = verifier::verify_blocks(&self.storage, &self.config.chain)?;
        let mut balances = verified.balances;

        let tip = match verified.tip {
            Some(tip) => tip,
            None => {
                let genesis = self
                    .mine_block_with(
                        Username::new(self.config.chain.genesis_account.clone()),
                        None,
                        Vec::new(),
                        self.config.chain.genesis_reward,
                        GENESIS_DESCRIPTION,
                    )
                    .await?;
                for tx in self.storage.block_transactions(genesis.height)? {
                    balances.apply_transaction(&tx)?;
                }
                tracing::info!(
                    account = %genesis.miner,
                    reward = %self.config.chain.genesis_reward,
                    "Genesis block created"
                );
                genesis
            }
        };

        let pending_replayed = verifier::replay_pending(&self.storage, &mut balances, tip.height + 1)?;
        *self.balances.write() = balances;

        let miner = Username::new(self.config.mining.miner_account.clone());
        let mined = self.mine(miner, None).await?;

        Ok(ChainSummary {
            tip: mined.clone().unwrap_or(tip),
            pending_replayed,
            mined,
        })
    }

    async fn purge_pending(&mut self) -> Result<usize> {
        self.ensure_running()?;

        let purged = self.storage.purge_pending()?;
        tracing::info!(purged, "Pending transactions purged");

        self.load_and_verify_chain().await?;
        Ok(purged)
    }

    fn set_user_bet(&mut self, username: Username, bet: Decimal) -> Result<User> {
        self.ensure_running()?;

        let bet = whole_amount(bet);
        if bet <= Decimal::ZERO {
            return Err(Error::InvalidInput(format!("bet must be positive, got {}", bet)));
        }

        let mut user = self.storage.get_or_create_user(&username)?;
        user.bet = bet;
        self.storage.put_user(&user)?;
        Ok(user)
    }

    /// Check and stamp in one step, so a prize day yields one claim
    fn claim_daily_prize(&mut self, username: Username) -> Result<bool> {
        self.ensure_running()?;

        let now = Utc::now();
        let mut user = self.storage.get_or_create_user(&username)?;
        if !user.daily_prize_available(self.config.users.day_start, now) {
            return Ok(false);
        }

        user.daily_prize_time = now;
        self.storage.put_user(&user)?;
        tracing::debug!(username = %username, "Daily prize claimed");
        Ok(true)
    }

    fn reset_daily_prize(&mut self, username: Username) -> Result<User> {
        self.ensure_running()?;

        let mut user = self
            .storage
            .get_user(&username)?
            .ok_or_else(|| Error::NotFound(format!("user {}", username)))?;
        user.daily_prize_time = User::never_claimed();
        self.storage.put_user(&user)?;
        tracing::info!(username = %username, "Daily prize reset");
        Ok(user)
    }

    fn refresh_pending_gauge(&self) {
        match self.storage.pending_count() {
            Ok(pending) => self.metrics.set_pending(pending),
            Err(e) => tracing::warn!(error = %e, "Failed to count pending transactions"),
        }
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct LedgerHandle {
    sender: mpsc::Sender<LedgerMessage>,
}

impl LedgerHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<LedgerMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<T>>) -> LedgerMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(message(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Record a transaction
    pub async fn record_transaction(&self, request: TransferRequest) -> Result<Transaction> {
        self.request(|response| LedgerMessage::RecordTransaction { request, response })
            .await
    }

    /// Mine pending transactions
    pub async fn mine_block(&self, miner: Username, nonce: Option<u64>) -> Result<Option<Block>> {
        self.request(|response| LedgerMessage::MineBlock {
            miner,
            nonce,
            response,
        })
        .await
    }

    /// Re-verify the chain
    pub async fn load_and_verify_chain(&self) -> Result<ChainSummary> {
        self.request(|response| LedgerMessage::VerifyChain { response })
            .await
    }

    /// Purge pending transactions
    pub async fn purge_pending(&self) -> Result<usize> {
        self.request(|response| LedgerMessage::PurgePending { response })
            .await
    }

    /// Get or create a user
    pub async fn get_or_create_user(&self, username: Username) -> Result<User> {
        self.request(|response| LedgerMessage::GetOrCreateUser { username, response })
            .await
    }

    /// Update a user's bet
    pub async fn set_user_bet(&self, username: Username, bet: Decimal) -> Result<User> {
        self.request(|response| LedgerMessage::SetUserBet {
            username,
            bet,
            response,
        })
        .await
    }

    /// Claim the daily prize for a user
    pub async fn claim_daily_prize(&self, username: Username) -> Result<bool> {
        self.request(|response| LedgerMessage::ClaimDailyPrize { username, response })
            .await
    }

    /// Reset a user's daily prize claim
    pub async fn reset_daily_prize(&self, username: Username) -> Result<User> {
        self.request(|response| LedgerMessage::ResetDailyPrize { username, response })
            .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LedgerMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }
}

/// Spawn ledger actor
pub fn spawn_ledger_actor(
    storage: Arc<Storage>,
    balances: Arc<RwLock<BalanceCache>>,
    config: Config,
    metrics: Metrics,
) -> (LedgerHandle, JoinHandle<()>) {
    // Bounded channel for backpressure
    let (tx, rx) = mpsc::channel(config.mining.mailbox_capacity);
    let actor = LedgerActor::new(storage, balances, config, metrics, rx);

    let task = tokio::spawn(async move {
        actor.run().await;
    });

    (LedgerHandle::new(tx), task)
}
