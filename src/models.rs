// Domain and API models for the wallet backend

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Platform currency. GC is entertainment-only, SC is redeemable.
///
/// All amounts throughout the crate are i64 minor units (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "GC")]
    Gold,
    #[serde(rename = "SC")]
    Sweeps,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Gold => "GC",
            Currency::Sweeps => "SC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GC" => Some(Currency::Gold),
            "SC" => Some(Currency::Sweeps),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    Bet,
    Win,
    Deposit,
    Withdrawal,
    Bonus,
    AdminAdjustment,
}

impl TxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Bet => "bet",
            TxKind::Win => "win",
            TxKind::Deposit => "deposit",
            TxKind::Withdrawal => "withdrawal",
            TxKind::Bonus => "bonus",
            TxKind::AdminAdjustment => "admin_adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bet" => Some(TxKind::Bet),
            "win" => Some(TxKind::Win),
            "deposit" => Some(TxKind::Deposit),
            "withdrawal" => Some(TxKind::Withdrawal),
            "bonus" => Some(TxKind::Bonus),
            "admin_adjustment" => Some(TxKind::AdminAdjustment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    Completed,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TxStatus::Completed),
            "failed" => Some(TxStatus::Failed),
            _ => None,
        }
    }
}

/// Per-user balance state. The in-memory copy is authoritative between
/// flushes; the durable row is a write-behind snapshot guarded by `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub user_id: String,
    pub gold_coins: i64,
    pub sweeps_coins: i64,
    pub daily_spent_gc: i64,
    pub daily_won_gc: i64,
    pub daily_spent_sc: i64,
    pub daily_won_sc: i64,
    pub counters_date: NaiveDate,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One immutable ledger entry. For completed entries
/// `balance_after == balance_before + amount`; failed entries record the
/// refused attempt and never move a balance.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: i64,
    pub wallet_id: String,
    pub kind: TxKind,
    pub currency: Currency,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub reference: String,
    pub status: TxStatus,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// One settled spin, as fed to the spin log and the fraud detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpinRecord {
    pub id: String,
    pub user_id: String,
    pub game_id: String,
    pub session_id: String,
    pub currency: Currency,
    pub bet_amount: i64,
    pub win_amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub outcome: Value,
    pub multiplier: f64,
    pub bonus_triggered: bool,
    pub is_jackpot: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// A fired fraud rule with its evidence window. Ephemeral: exists only to
/// produce an AdminAlert.
#[derive(Debug, Clone, Serialize)]
pub struct FraudFinding {
    pub user_id: String,
    pub rule: &'static str,
    pub severity: Severity,
    pub evidence: Vec<SpinRecord>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    InProgress,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::InProgress => "in_progress",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AlertStatus::Pending),
            "in_progress" => Some(AlertStatus::InProgress),
            "resolved" => Some(AlertStatus::Resolved),
            "dismissed" => Some(AlertStatus::Dismissed),
            _ => None,
        }
    }
}

/// Staff-facing alert. Created `pending` by the dispatcher; every later
/// status transition is driven by staff tooling, never by this core.
#[derive(Debug, Clone, Serialize)]
pub struct AdminAlert {
    pub id: String,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub related_user_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---- API request/response types ----

/// Settle a single spin. `spin_id` doubles as the idempotency key: replays
/// of the same (user_id, spin_id) return the original settlement.
#[derive(Debug, Clone, Deserialize)]
pub struct SettleRequest {
    pub user_id: String,
    pub game_id: String,
    pub session_id: String,
    pub spin_id: String,
    pub currency: Currency,
    pub bet_amount: i64,
    pub win_amount: i64,
    #[serde(default)]
    pub outcome: Value,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub bonus_triggered: bool,
    #[serde(default)]
    pub is_jackpot: bool,
    #[serde(default)]
    pub device: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SettleResponse {
    pub transaction_id: i64,
    pub balance: i64,
    pub currency: Currency,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub currency: Currency,
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRequest {
    pub user_id: String,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub transactions: Vec<Transaction>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminAdjustRequest {
    pub user_id: String,
    pub currency: Currency,
    /// Signed amount: positive credits, negative debits.
    pub amount: i64,
    pub reason: String,
    pub admin_id: String,
}

#[derive(Debug, Deserialize)]
pub struct AlertsRequest {
    #[serde(default)]
    pub status: Option<AlertStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}
