// Append-only ledger with batched write-behind persistence

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::database::DurableStore;
use crate::error::WalletError;
use crate::models::{SpinRecord, Transaction, Wallet};

struct QueueState {
    transactions: VecDeque<Transaction>,
    spins: VecDeque<SpinRecord>,
    /// Latest wallet snapshot per user since the last flush; one durable
    /// wallet write per wallet per flush.
    dirty_wallets: HashMap<String, Wallet>,
}

/// Buffers ledger entries and wallet snapshots, flushing them to the durable
/// store on a timer or when the queue reaches the batch threshold. Entries
/// accepted here are never dropped: a failed flush requeues at the head and
/// retries on the next tick. The queue has its own lock, independent of any
/// wallet's, so batching never contends with gameplay.
pub struct Ledger {
    store: Arc<dyn DurableStore>,
    state: Mutex<QueueState>,
    notify: Notify,
    next_id: AtomicI64,
    batch_size: usize,
    queue_capacity: usize,
    flush_interval: Duration,
}

impl Ledger {
    pub async fn new(store: Arc<dyn DurableStore>, config: &Config) -> anyhow::Result<Self> {
        // Ids are handed out in-process so a settlement can return its
        // transaction id without waiting for a flush; seed past anything
        // already persisted.
        let max_id = store.max_transaction_id().await?;
        Ok(Self {
            store,
            state: Mutex::new(QueueState {
                transactions: VecDeque::new(),
                spins: VecDeque::new(),
                dirty_wallets: HashMap::new(),
            }),
            notify: Notify::new(),
            next_id: AtomicI64::new(max_id),
            batch_size: config.batch_size,
            queue_capacity: config.queue_capacity,
            flush_interval: config.flush_interval,
        })
    }

    /// Next id in the process-wide monotonic sequence.
    pub fn next_transaction_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Enqueue a ledger entry together with the wallet snapshot it left
    /// behind. Costs one bounded in-memory push; never blocks on I/O.
    pub async fn append(&self, tx: Transaction, wallet: &Wallet) {
        let mut state = self.state.lock().await;
        state.transactions.push_back(tx);
        state
            .dirty_wallets
            .insert(wallet.user_id.clone(), wallet.clone());
        self.after_push(&state);
    }

    pub async fn append_spin(&self, spin: SpinRecord) {
        let mut state = self.state.lock().await;
        state.spins.push_back(spin);
        self.after_push(&state);
    }

    fn after_push(&self, state: &QueueState) {
        let depth = state.transactions.len() + state.spins.len();
        if depth > self.queue_capacity {
            warn!("Ledger queue over capacity ({depth} entries); flush is lagging");
        }
        if state.transactions.len() >= self.batch_size {
            self.notify.notify_one();
        }
    }

    pub async fn queue_depth(&self) -> usize {
        let state = self.state.lock().await;
        state.transactions.len() + state.spins.len()
    }

    /// Drain the queue and write it through. On failure everything drained
    /// is pushed back at the head, order intact, for the next tick. The
    /// store's keyed inserts make a partially applied batch safe to replay.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        let (txs, spins, wallets) = {
            let mut state = self.state.lock().await;
            (
                state.transactions.drain(..).collect::<Vec<_>>(),
                state.spins.drain(..).collect::<Vec<_>>(),
                state.dirty_wallets.drain().map(|(_, w)| w).collect::<Vec<_>>(),
            )
        };
        if txs.is_empty() && spins.is_empty() && wallets.is_empty() {
            return Ok(0);
        }
        let count = txs.len() + spins.len();

        match self.write_batch(&txs, &spins, &wallets).await {
            Ok(()) => {
                debug!(
                    "Flushed {} transactions, {} spins, {} wallets",
                    txs.len(),
                    spins.len(),
                    wallets.len()
                );
                Ok(count)
            }
            Err(err) => {
                let mut state = self.state.lock().await;
                for tx in txs.into_iter().rev() {
                    state.transactions.push_front(tx);
                }
                for spin in spins.into_iter().rev() {
                    state.spins.push_front(spin);
                }
                for wallet in wallets {
                    match state.dirty_wallets.entry(wallet.user_id.clone()) {
                        Entry::Occupied(mut cur) => {
                            if cur.get().version < wallet.version {
                                cur.insert(wallet);
                            }
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(wallet);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn write_batch(
        &self,
        txs: &[Transaction],
        spins: &[SpinRecord],
        wallets: &[Wallet],
    ) -> anyhow::Result<()> {
        self.store.append_transactions(txs).await?;
        self.store.append_spins(spins).await?;
        self.store.persist_wallet_batch(wallets).await?;
        Ok(())
    }

    /// Synchronous write-through for callers that cannot tolerate the
    /// batcher's durability window (staff adjustments, withdrawal-class
    /// operations). A stale batched snapshot of the same wallet is harmless
    /// afterwards: the store's version guard ignores it.
    pub async fn write_through(&self, tx: Transaction, wallet: &Wallet) -> Result<(), WalletError> {
        self.store
            .append_transactions(std::slice::from_ref(&tx))
            .await
            .map_err(WalletError::persistence)?;
        self.store
            .persist_wallet_batch(std::slice::from_ref(wallet))
            .await
            .map_err(WalletError::persistence)?;
        Ok(())
    }

    /// Flush loop: fixed interval, woken early when the queue hits the
    /// batch threshold. Runs for the life of the process.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.notify.notified() => {}
            }
            if let Err(err) = self.flush().await {
                error!("Ledger flush failed, batch requeued: {err}");
            }
        }
    }
}
