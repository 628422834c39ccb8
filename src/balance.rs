// Wallet balance cache with per-wallet exclusive sections

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::info;

use crate::database::DurableStore;
use crate::error::WalletError;
use crate::models::{Currency, Wallet};

impl Wallet {
    pub fn new(user_id: &str, signup_bonus_gc: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            gold_coins: signup_bonus_gc.max(0),
            sweeps_coins: 0,
            daily_spent_gc: 0,
            daily_won_gc: 0,
            daily_spent_sc: 0,
            daily_won_sc: 0,
            counters_date: now.date_naive(),
            version: 0,
            updated_at: now,
        }
    }

    pub fn balance(&self, currency: Currency) -> i64 {
        match currency {
            Currency::Gold => self.gold_coins,
            Currency::Sweeps => self.sweeps_coins,
        }
    }

    fn balance_mut(&mut self, currency: Currency) -> &mut i64 {
        match currency {
            Currency::Gold => &mut self.gold_coins,
            Currency::Sweeps => &mut self.sweeps_coins,
        }
    }

    fn daily_mut(&mut self, currency: Currency) -> (&mut i64, &mut i64) {
        match currency {
            Currency::Gold => (&mut self.daily_spent_gc, &mut self.daily_won_gc),
            Currency::Sweeps => (&mut self.daily_spent_sc, &mut self.daily_won_sc),
        }
    }

    /// Lazy daily-counter reset: runs on the first mutation of a new day.
    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if self.counters_date != today {
            self.daily_spent_gc = 0;
            self.daily_won_gc = 0;
            self.daily_spent_sc = 0;
            self.daily_won_sc = 0;
            self.counters_date = today;
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }

    /// Debit `amount` from the given balance, returning the balance after.
    pub fn try_debit(
        &mut self,
        currency: Currency,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount);
        }
        self.roll_day(now);
        let balance = self.balance_mut(currency);
        if amount > *balance {
            return Err(WalletError::InsufficientFunds {
                available: *balance,
                requested: amount,
            });
        }
        *balance -= amount;
        let after = *balance;
        let (spent, _) = self.daily_mut(currency);
        *spent = spent.saturating_add(amount);
        self.touch(now);
        Ok(after)
    }

    /// Credit `amount` to the given balance, returning the balance after.
    pub fn credit(
        &mut self,
        currency: Currency,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, WalletError> {
        if amount <= 0 {
            return Err(WalletError::InvalidAmount);
        }
        self.roll_day(now);
        let balance = self.balance_mut(currency);
        *balance = balance.checked_add(amount).ok_or(WalletError::Overflow)?;
        let after = *balance;
        let (_, won) = self.daily_mut(currency);
        *won = won.saturating_add(amount);
        self.touch(now);
        Ok(after)
    }

    /// Apply a signed staff adjustment. Daily counters track gameplay only,
    /// so adjustments leave them untouched.
    pub fn adjust(
        &mut self,
        currency: Currency,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, WalletError> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount);
        }
        self.roll_day(now);
        let balance = self.balance_mut(currency);
        let next = balance.checked_add(amount).ok_or(WalletError::Overflow)?;
        if next < 0 {
            return Err(WalletError::InsufficientFunds {
                available: *balance,
                requested: -amount,
            });
        }
        *balance = next;
        self.touch(now);
        Ok(next)
    }
}

/// Authoritative per-user balance cache. Each wallet sits behind its own
/// mutex; there is no global lock, so distinct users never contend.
pub struct BalanceStore {
    wallets: RwLock<HashMap<String, Arc<Mutex<Wallet>>>>,
    store: Arc<dyn DurableStore>,
    lock_timeout: Duration,
    signup_bonus_gc: i64,
}

impl BalanceStore {
    pub fn new(store: Arc<dyn DurableStore>, lock_timeout: Duration, signup_bonus_gc: i64) -> Self {
        Self {
            wallets: RwLock::new(HashMap::new()),
            store,
            lock_timeout,
            signup_bonus_gc,
        }
    }

    /// Fetch the cache entry for a user, loading from the durable store on
    /// first touch and creating a fresh wallet when none exists yet.
    async fn entry(&self, user_id: &str) -> Result<Arc<Mutex<Wallet>>, WalletError> {
        if let Some(entry) = self.wallets.read().await.get(user_id) {
            return Ok(Arc::clone(entry));
        }

        // Load outside the write lock; a concurrent loader may win the
        // insert race, in which case its entry is kept.
        let loaded = self
            .store
            .load_wallet(user_id)
            .await
            .map_err(|e| WalletError::Unavailable(e.to_string()))?;
        let wallet = match loaded {
            Some(wallet) => wallet,
            None => {
                info!("Creating wallet for new user {}", user_id);
                Wallet::new(user_id, self.signup_bonus_gc, Utc::now())
            }
        };

        let mut map = self.wallets.write().await;
        let entry = map
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(wallet)));
        Ok(Arc::clone(entry))
    }

    /// Acquire the wallet's exclusive section, bounded by the configured
    /// timeout. All mutations go through the returned guard.
    pub async fn lock_wallet(&self, user_id: &str) -> Result<OwnedMutexGuard<Wallet>, WalletError> {
        let entry = self.entry(user_id).await?;
        tokio::time::timeout(self.lock_timeout, entry.lock_owned())
            .await
            .map_err(|_| WalletError::Busy)
    }

    /// Read the cached balance; never blocks on durable I/O after the
    /// wallet's first load.
    pub async fn get_balance(&self, user_id: &str, currency: Currency) -> Result<i64, WalletError> {
        let guard = self.lock_wallet(user_id).await?;
        Ok(guard.balance(currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap()
    }

    #[test]
    fn debit_and_credit_roundtrip() {
        let mut w = Wallet::new("u1", 1000, now());
        assert_eq!(w.balance(Currency::Gold), 1000);

        let after = w.try_debit(Currency::Gold, 200, now()).unwrap();
        assert_eq!(after, 800);
        assert_eq!(w.daily_spent_gc, 200);

        let after = w.credit(Currency::Gold, 5000, now()).unwrap();
        assert_eq!(after, 5800);
        assert_eq!(w.daily_won_gc, 5000);
        assert_eq!(w.version, 2);
    }

    #[test]
    fn debit_rejects_bad_amounts() {
        let mut w = Wallet::new("u1", 100, now());
        assert!(matches!(
            w.try_debit(Currency::Gold, 0, now()),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            w.try_debit(Currency::Gold, -5, now()),
            Err(WalletError::InvalidAmount)
        ));
        assert!(matches!(
            w.try_debit(Currency::Gold, 101, now()),
            Err(WalletError::InsufficientFunds {
                available: 100,
                requested: 101
            })
        ));
        // Refused debits leave the wallet untouched.
        assert_eq!(w.balance(Currency::Gold), 100);
        assert_eq!(w.version, 0);
    }

    #[test]
    fn currencies_are_independent() {
        let mut w = Wallet::new("u1", 500, now());
        w.credit(Currency::Sweeps, 300, now()).unwrap();
        w.try_debit(Currency::Sweeps, 100, now()).unwrap();
        assert_eq!(w.balance(Currency::Gold), 500);
        assert_eq!(w.balance(Currency::Sweeps), 200);
        assert_eq!(w.daily_spent_gc, 0);
        assert_eq!(w.daily_spent_sc, 100);
    }

    #[test]
    fn daily_counters_reset_on_new_day() {
        let mut w = Wallet::new("u1", 1000, now());
        w.try_debit(Currency::Gold, 100, now()).unwrap();
        assert_eq!(w.daily_spent_gc, 100);

        let tomorrow = now() + chrono::Duration::days(1);
        w.try_debit(Currency::Gold, 50, tomorrow).unwrap();
        assert_eq!(w.daily_spent_gc, 50);
        assert_eq!(w.counters_date, tomorrow.date_naive());
    }

    #[test]
    fn adjust_honors_balance_floor() {
        let mut w = Wallet::new("u1", 100, now());
        assert!(matches!(
            w.adjust(Currency::Gold, -200, now()),
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert_eq!(w.adjust(Currency::Gold, -100, now()).unwrap(), 0);
        assert_eq!(w.adjust(Currency::Gold, 50, now()).unwrap(), 50);
        // Staff adjustments do not count as gameplay.
        assert_eq!(w.daily_spent_gc, 0);
        assert_eq!(w.daily_won_gc, 0);
    }

    #[tokio::test]
    async fn loads_wallet_once_and_serves_reads_from_cache() {
        let store = Arc::new(MemoryStore::new());
        store.seed_wallet("u1", 750, 25).await;

        let balances = BalanceStore::new(store.clone(), Duration::from_millis(100), 0);
        assert_eq!(balances.get_balance("u1", Currency::Gold).await.unwrap(), 750);
        assert_eq!(
            balances.get_balance("u1", Currency::Sweeps).await.unwrap(),
            25
        );

        // Mutate through the guard; the cache, not the store, answers reads.
        {
            let mut guard = balances.lock_wallet("u1").await.unwrap();
            guard.try_debit(Currency::Gold, 250, Utc::now()).unwrap();
        }
        assert_eq!(balances.get_balance("u1", Currency::Gold).await.unwrap(), 500);
        assert_eq!(store.wallet("u1").await.unwrap().gold_coins, 750);
    }

    #[tokio::test]
    async fn fresh_user_gets_signup_bonus() {
        let store = Arc::new(MemoryStore::new());
        let balances = BalanceStore::new(store, Duration::from_millis(100), 5000);
        assert_eq!(
            balances.get_balance("new", Currency::Gold).await.unwrap(),
            5000
        );
        assert_eq!(
            balances.get_balance("new", Currency::Sweeps).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn contended_wallet_times_out_with_busy() {
        let store = Arc::new(MemoryStore::new());
        store.seed_wallet("u1", 100, 0).await;
        let balances = BalanceStore::new(store, Duration::from_millis(50), 0);

        let held = balances.lock_wallet("u1").await.unwrap();
        let err = balances.lock_wallet("u1").await.unwrap_err();
        assert!(matches!(err, WalletError::Busy));
        drop(held);

        assert!(balances.lock_wallet("u1").await.is_ok());
    }
}
