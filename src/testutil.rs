// In-memory fakes and fixture builders shared by the module tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::alerts::{
    AlertDispatcher, NotificationSink, StaticDirectory, UserDirectory,
};
use crate::balance::BalanceStore;
use crate::config::Config;
use crate::database::DurableStore;
use crate::fraud::FraudDetector;
use crate::ledger::Ledger;
use crate::models::{
    AdminAlert, AlertStatus, Currency, SettleRequest, SpinRecord, Transaction, TxKind, TxStatus,
    Wallet,
};
use crate::spin::SpinProcessor;

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
}

pub fn wallet(user: &str, gc: i64, sc: i64) -> Wallet {
    let mut w = Wallet::new(user, 0, fixed_now());
    w.gold_coins = gc;
    w.sweeps_coins = sc;
    w
}

pub fn tx(id: i64, user: &str, amount: i64, before: i64, after: i64) -> Transaction {
    Transaction {
        id,
        wallet_id: user.to_string(),
        kind: if amount < 0 { TxKind::Bet } else { TxKind::Win },
        currency: Currency::Gold,
        amount,
        balance_before: before,
        balance_after: after,
        reference: format!("spin-{id}"),
        status: TxStatus::Completed,
        metadata: serde_json::json!({}),
        created_at: fixed_now(),
    }
}

pub fn spin_at(user: &str, bet: i64, win: i64, at: DateTime<Utc>) -> SpinRecord {
    SpinRecord {
        id: format!("spin-{}", at.timestamp()),
        user_id: user.to_string(),
        game_id: "game-1".to_string(),
        session_id: "session-1".to_string(),
        currency: Currency::Gold,
        bet_amount: bet,
        win_amount: win,
        balance_before: 0,
        balance_after: 0,
        outcome: Value::Null,
        multiplier: if bet > 0 { win as f64 / bet as f64 } else { 0.0 },
        bonus_triggered: false,
        is_jackpot: false,
        created_at: at,
    }
}

pub fn settle_req(user: &str, spin_id: &str, bet: i64, win: i64) -> SettleRequest {
    SettleRequest {
        user_id: user.to_string(),
        game_id: "game-1".to_string(),
        session_id: "session-1".to_string(),
        spin_id: spin_id.to_string(),
        currency: Currency::Gold,
        bet_amount: bet,
        win_amount: win,
        outcome: Value::Null,
        multiplier: None,
        bonus_triggered: false,
        is_jackpot: false,
        device: None,
    }
}

/// In-memory DurableStore with injectable write failures.
pub struct MemoryStore {
    wallets: Mutex<HashMap<String, Wallet>>,
    transactions: Mutex<Vec<Transaction>>,
    spins: Mutex<Vec<SpinRecord>>,
    alerts: Mutex<Vec<AdminAlert>>,
    fail_writes: AtomicUsize,
    wallet_upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            wallets: Mutex::new(HashMap::new()),
            transactions: Mutex::new(Vec::new()),
            spins: Mutex::new(Vec::new()),
            alerts: Mutex::new(Vec::new()),
            fail_writes: AtomicUsize::new(0),
            wallet_upserts: AtomicUsize::new(0),
        }
    }

    pub async fn seed_wallet(&self, user: &str, gc: i64, sc: i64) {
        self.wallets
            .lock()
            .await
            .insert(user.to_string(), wallet(user, gc, sc));
    }

    pub async fn wallet(&self, user: &str) -> Option<Wallet> {
        self.wallets.lock().await.get(user).cloned()
    }

    pub async fn transactions(&self) -> Vec<Transaction> {
        self.transactions.lock().await.clone()
    }

    pub async fn spins(&self) -> Vec<SpinRecord> {
        self.spins.lock().await.clone()
    }

    pub async fn alerts(&self) -> Vec<AdminAlert> {
        self.alerts.lock().await.clone()
    }

    /// Fail the next `n` write calls with an error.
    pub fn fail_next_writes(&self, n: usize) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    /// Number of wallet rows written across all batches.
    pub async fn wallet_writes(&self) -> usize {
        self.wallet_upserts.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        let mut current = self.fail_writes.load(Ordering::SeqCst);
        while current > 0 {
            match self.fail_writes.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        Ok(self.wallets.lock().await.get(user_id).cloned())
    }

    async fn persist_wallet_batch(&self, wallets: &[Wallet]) -> Result<()> {
        if self.take_failure() {
            bail!("injected wallet write failure");
        }
        let mut stored = self.wallets.lock().await;
        for w in wallets {
            self.wallet_upserts.fetch_add(1, Ordering::SeqCst);
            match stored.get(&w.user_id) {
                Some(current) if current.version >= w.version => {}
                _ => {
                    stored.insert(w.user_id.clone(), w.clone());
                }
            }
        }
        Ok(())
    }

    async fn append_transactions(&self, txs: &[Transaction]) -> Result<()> {
        if self.take_failure() {
            bail!("injected transaction write failure");
        }
        let mut stored = self.transactions.lock().await;
        for t in txs {
            if stored.iter().all(|existing| existing.id != t.id) {
                stored.push(t.clone());
            }
        }
        Ok(())
    }

    async fn append_spins(&self, spins: &[SpinRecord]) -> Result<()> {
        if self.take_failure() {
            bail!("injected spin write failure");
        }
        let mut stored = self.spins.lock().await;
        for s in spins {
            let duplicate = stored
                .iter()
                .any(|existing| existing.user_id == s.user_id && existing.id == s.id);
            if !duplicate {
                stored.push(s.clone());
            }
        }
        Ok(())
    }

    async fn max_transaction_id(&self) -> Result<i64> {
        Ok(self
            .transactions
            .lock()
            .await
            .iter()
            .map(|t| t.id)
            .max()
            .unwrap_or(0))
    }

    async fn transaction_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64)> {
        let stored = self.transactions.lock().await;
        let mut matching: Vec<Transaction> = stored
            .iter()
            .filter(|t| t.wallet_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.id.cmp(&a.id));
        let total = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok((page, total))
    }

    async fn insert_alert(&self, alert: &AdminAlert) -> Result<()> {
        if self.take_failure() {
            bail!("injected alert write failure");
        }
        let mut stored = self.alerts.lock().await;
        if stored.iter().all(|existing| existing.id != alert.id) {
            stored.push(alert.clone());
        }
        Ok(())
    }

    async fn find_pending_alert(&self, user_id: &str, kind: &str) -> Result<Option<String>> {
        let stored = self.alerts.lock().await;
        Ok(stored
            .iter()
            .rev()
            .find(|a| {
                a.status == AlertStatus::Pending
                    && a.kind == kind
                    && a.related_user_id.as_deref() == Some(user_id)
            })
            .map(|a| a.id.clone()))
    }

    async fn merge_alert_evidence(
        &self,
        alert_id: &str,
        evidence: &Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut stored = self.alerts.lock().await;
        if let Some(alert) = stored.iter_mut().find(|a| a.id == alert_id) {
            alert.metadata = evidence.clone();
            alert.updated_at = now;
        }
        Ok(())
    }

    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AdminAlert>> {
        let stored = self.alerts.lock().await;
        let mut matching: Vec<AdminAlert> = stored
            .iter()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

/// Notification sink that records deliveries and can be told to fail.
pub struct RecordingSink {
    delivered: Mutex<Vec<String>>,
    attempts: Mutex<HashMap<String, usize>>,
    /// Remaining failures per admin; usize::MAX means fail forever.
    failures: Mutex<HashMap<String, usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            attempts: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub async fn fail_always(&self, admin_id: &str) {
        self.failures
            .lock()
            .await
            .insert(admin_id.to_string(), usize::MAX);
    }

    pub async fn fail_times(&self, admin_id: &str, n: usize) {
        self.failures.lock().await.insert(admin_id.to_string(), n);
    }

    pub async fn delivered(&self) -> Vec<String> {
        self.delivered.lock().await.clone()
    }

    pub async fn attempts_for(&self, admin_id: &str) -> usize {
        self.attempts
            .lock()
            .await
            .get(admin_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, admin_id: &str, _alert: &AdminAlert) -> Result<()> {
        *self
            .attempts
            .lock()
            .await
            .entry(admin_id.to_string())
            .or_insert(0) += 1;

        let mut failures = self.failures.lock().await;
        if let Some(remaining) = failures.get_mut(admin_id) {
            if *remaining == usize::MAX {
                bail!("delivery refused");
            }
            if *remaining > 0 {
                *remaining -= 1;
                bail!("transient delivery failure");
            }
        }
        drop(failures);

        self.delivered.lock().await.push(admin_id.to_string());
        Ok(())
    }
}

/// Fully wired service graph over in-memory fakes.
pub struct TestEnv {
    pub store: Arc<MemoryStore>,
    pub balances: Arc<BalanceStore>,
    pub ledger: Arc<Ledger>,
    pub spins: Arc<SpinProcessor>,
    pub sink: Arc<RecordingSink>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let config = Config {
            lock_timeout: Duration::from_millis(100),
            ..Config::default()
        };

        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn DurableStore> = store.clone();

        let ledger = Arc::new(Ledger::new(dyn_store.clone(), &config).await.unwrap());
        let balances = Arc::new(BalanceStore::new(
            dyn_store.clone(),
            config.lock_timeout,
            config.signup_bonus_gc,
        ));
        let fraud = Arc::new(FraudDetector::new(config.fraud.clone()));

        let sink = Arc::new(RecordingSink::new());
        let directory: Arc<dyn UserDirectory> =
            Arc::new(StaticDirectory::new(vec!["admin".to_string()]));
        let dyn_sink: Arc<dyn NotificationSink> = sink.clone();
        let alerts = Arc::new(AlertDispatcher::new(dyn_store, directory, dyn_sink));

        let spins = Arc::new(SpinProcessor::new(
            Arc::clone(&balances),
            Arc::clone(&ledger),
            fraud,
            alerts,
            config.replay_window,
        ));

        Self {
            store,
            balances,
            ledger,
            spins,
            sink,
        }
    }
}
