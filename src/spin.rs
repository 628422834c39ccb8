// Spin settlement: the single choke point for balance mutation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::warn;

use crate::alerts::AlertDispatcher;
use crate::balance::BalanceStore;
use crate::error::WalletError;
use crate::fraud::FraudDetector;
use crate::ledger::Ledger;
use crate::models::{
    AdminAdjustRequest, SettleRequest, SpinRecord, Transaction, TxKind, TxStatus,
};

/// Outcome of a settlement; also what the replay window hands back on a
/// duplicate spin id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settlement {
    pub transaction_id: i64,
    pub balance: i64,
}

type SettleKey = (String, String);

/// Bounded memory of recent settlements for idempotent replay.
struct ReplayWindow {
    settled: HashMap<SettleKey, Settlement>,
    order: VecDeque<SettleKey>,
    capacity: usize,
}

impl ReplayWindow {
    fn new(capacity: usize) -> Self {
        Self {
            settled: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &SettleKey) -> Option<Settlement> {
        self.settled.get(key).cloned()
    }

    fn insert(&mut self, key: SettleKey, settlement: Settlement) {
        if self.settled.insert(key.clone(), settlement).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.settled.remove(&evicted);
            }
        }
    }
}

/// Orchestrates one bet + optional win as a single logical operation against
/// the balance cache and the ledger. Guarantees at most one debit/credit
/// pair per spin id, with the bet always preceding its win in the ledger.
pub struct SpinProcessor {
    balances: Arc<BalanceStore>,
    ledger: Arc<Ledger>,
    fraud: Arc<FraudDetector>,
    alerts: Arc<AlertDispatcher>,
    replay: Mutex<ReplayWindow>,
}

impl SpinProcessor {
    pub fn new(
        balances: Arc<BalanceStore>,
        ledger: Arc<Ledger>,
        fraud: Arc<FraudDetector>,
        alerts: Arc<AlertDispatcher>,
        replay_capacity: usize,
    ) -> Self {
        Self {
            balances,
            ledger,
            fraud,
            alerts,
            replay: Mutex::new(ReplayWindow::new(replay_capacity)),
        }
    }

    pub async fn settle(&self, req: &SettleRequest) -> Result<Settlement, WalletError> {
        if req.bet_amount <= 0 || req.win_amount < 0 {
            return Err(WalletError::InvalidAmount);
        }

        let key: SettleKey = (req.user_id.clone(), req.spin_id.clone());
        if let Some(prior) = self.replay.lock().await.get(&key) {
            return Ok(prior);
        }

        let mut wallet = self.balances.lock_wallet(&req.user_id).await?;

        // A concurrent retry may have settled this spin while we waited on
        // the wallet; the wallet lock makes this re-check authoritative.
        if let Some(prior) = self.replay.lock().await.get(&key) {
            return Ok(prior);
        }

        let now = Utc::now();
        let before = wallet.balance(req.currency);

        // The credit after a successful debit must not be able to fail, or
        // the pair would half-apply; reject unrepresentable wins up front.
        if req.win_amount > 0 && before.checked_add(req.win_amount).is_none() {
            return Err(WalletError::Overflow);
        }

        let after_bet = match wallet.try_debit(req.currency, req.bet_amount, now) {
            Ok(balance) => balance,
            Err(err) => {
                if matches!(err, WalletError::InsufficientFunds { .. }) {
                    // The refused attempt stays on the audit trail.
                    let audit = self.spin_transaction(
                        req,
                        TxKind::Bet,
                        -req.bet_amount,
                        before,
                        before,
                        TxStatus::Failed,
                        now,
                    );
                    self.ledger.append(audit, &wallet).await;
                }
                return Err(err);
            }
        };

        let bet_tx = self.spin_transaction(
            req,
            TxKind::Bet,
            -req.bet_amount,
            before,
            after_bet,
            TxStatus::Completed,
            now,
        );
        let bet_id = bet_tx.id;
        self.ledger.append(bet_tx, &wallet).await;

        let (final_balance, settle_id) = if req.win_amount > 0 {
            let after_win = wallet.credit(req.currency, req.win_amount, now)?;
            let win_tx = self.spin_transaction(
                req,
                TxKind::Win,
                req.win_amount,
                after_bet,
                after_win,
                TxStatus::Completed,
                now,
            );
            let win_id = win_tx.id;
            self.ledger.append(win_tx, &wallet).await;
            (after_win, win_id)
        } else {
            (after_bet, bet_id)
        };

        let record = SpinRecord {
            id: req.spin_id.clone(),
            user_id: req.user_id.clone(),
            game_id: req.game_id.clone(),
            session_id: req.session_id.clone(),
            currency: req.currency,
            bet_amount: req.bet_amount,
            win_amount: req.win_amount,
            balance_before: before,
            balance_after: final_balance,
            outcome: req.outcome.clone(),
            multiplier: req
                .multiplier
                .unwrap_or(req.win_amount as f64 / req.bet_amount as f64),
            bonus_triggered: req.bonus_triggered,
            is_jackpot: req.is_jackpot,
            created_at: now,
        };
        self.ledger.append_spin(record.clone()).await;

        let settlement = Settlement {
            transaction_id: settle_id,
            balance: final_balance,
        };
        self.replay.lock().await.insert(key, settlement.clone());
        drop(wallet);

        // Screening runs off the player's response path.
        let fraud = Arc::clone(&self.fraud);
        let alerts = Arc::clone(&self.alerts);
        tokio::spawn(async move {
            for finding in fraud.evaluate(&record).await {
                if let Err(err) = alerts.raise(&finding).await {
                    warn!(
                        "Failed to raise {} alert for {}: {err}",
                        finding.rule, finding.user_id
                    );
                }
            }
        });

        Ok(settlement)
    }

    /// Staff balance adjustment: bypasses fraud screening and the batcher's
    /// durability window (synchronous write-through).
    pub async fn admin_adjust(&self, req: &AdminAdjustRequest) -> Result<Settlement, WalletError> {
        let mut wallet = self.balances.lock_wallet(&req.user_id).await?;
        let now = Utc::now();
        let before = wallet.balance(req.currency);
        let after = wallet.adjust(req.currency, req.amount, now)?;

        let tx = Transaction {
            id: self.ledger.next_transaction_id(),
            wallet_id: req.user_id.clone(),
            kind: TxKind::AdminAdjustment,
            currency: req.currency,
            amount: req.amount,
            balance_before: before,
            balance_after: after,
            reference: format!("admin:{}", req.admin_id),
            status: TxStatus::Completed,
            metadata: json!({ "reason": req.reason, "admin_id": req.admin_id }),
            created_at: now,
        };
        let transaction_id = tx.id;

        if let Err(err) = self.ledger.write_through(tx.clone(), &wallet).await {
            // The adjustment is already applied in memory; hand the entry to
            // the batcher so durability still catches up, and surface the
            // failure to the staff caller.
            self.ledger.append(tx, &wallet).await;
            return Err(err);
        }

        Ok(Settlement {
            transaction_id,
            balance: after,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn spin_transaction(
        &self,
        req: &SettleRequest,
        kind: TxKind,
        amount: i64,
        before: i64,
        after: i64,
        status: TxStatus,
        now: chrono::DateTime<Utc>,
    ) -> Transaction {
        Transaction {
            id: self.ledger.next_transaction_id(),
            wallet_id: req.user_id.clone(),
            kind,
            currency: req.currency,
            amount,
            balance_before: before,
            balance_after: after,
            reference: req.spin_id.clone(),
            status,
            metadata: json!({
                "game_id": req.game_id,
                "session_id": req.session_id,
                "device": req.device,
            }),
            created_at: now,
        }
    }
}
