// Durable storage: the DurableStore port and its Postgres implementation

use crate::models::{
    AdminAlert, AlertStatus, Currency, SpinRecord, Transaction, TxKind, TxStatus, Wallet,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Pool, Postgres, Row};
use tracing::info;

pub type DbPool = Pool<Postgres>;

/// Persistence port. Batch writes must tolerate at-least-once re-application:
/// every insert is keyed so a replayed batch is a no-op.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn load_wallet(&self, user_id: &str) -> Result<Option<Wallet>>;
    async fn persist_wallet_batch(&self, wallets: &[Wallet]) -> Result<()>;
    async fn append_transactions(&self, txs: &[Transaction]) -> Result<()>;
    async fn append_spins(&self, spins: &[SpinRecord]) -> Result<()>;
    async fn max_transaction_id(&self) -> Result<i64>;
    async fn transaction_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64)>;
    async fn insert_alert(&self, alert: &AdminAlert) -> Result<()>;
    async fn find_pending_alert(&self, user_id: &str, kind: &str) -> Result<Option<String>>;
    async fn merge_alert_evidence(
        &self,
        alert_id: &str,
        evidence: &Value,
        now: DateTime<Utc>,
    ) -> Result<()>;
    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AdminAlert>>;
}

pub struct Database;

impl Database {
    /// Initialize database connection pool and run migrations
    pub async fn init(database_url: &str) -> Result<DbPool> {
        info!("Connecting to database: {}", database_url);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        info!("Database initialized successfully");
        Ok(pool)
    }
}

pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn wallet_from_row(row: &PgRow) -> Result<Wallet> {
    Ok(Wallet {
        user_id: row.try_get("user_id")?,
        gold_coins: row.try_get("gold_coins")?,
        sweeps_coins: row.try_get("sweeps_coins")?,
        daily_spent_gc: row.try_get("daily_spent_gc")?,
        daily_won_gc: row.try_get("daily_won_gc")?,
        daily_spent_sc: row.try_get("daily_spent_sc")?,
        daily_won_sc: row.try_get("daily_won_sc")?,
        counters_date: row.try_get("counters_date")?,
        version: row.try_get("version")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let kind: String = row.try_get("kind")?;
    let currency: String = row.try_get("currency")?;
    let status: String = row.try_get("status")?;
    Ok(Transaction {
        id: row.try_get("id")?,
        wallet_id: row.try_get("wallet_id")?,
        kind: TxKind::parse(&kind).ok_or_else(|| anyhow!("unknown transaction kind: {kind}"))?,
        currency: Currency::parse(&currency)
            .ok_or_else(|| anyhow!("unknown currency: {currency}"))?,
        amount: row.try_get("amount")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        reference: row.try_get("reference")?,
        status: TxStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown transaction status: {status}"))?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<AdminAlert> {
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    Ok(AdminAlert {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        severity: crate::models::Severity::parse(&severity)
            .ok_or_else(|| anyhow!("unknown severity: {severity}"))?,
        status: AlertStatus::parse(&status).ok_or_else(|| anyhow!("unknown status: {status}"))?,
        related_user_id: row.try_get("related_user_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl DurableStore for PgStore {
    async fn load_wallet(&self, user_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT * FROM wallets WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(wallet_from_row).transpose()
    }

    async fn persist_wallet_batch(&self, wallets: &[Wallet]) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;
        for w in wallets {
            // Version guard: a stale snapshot from a requeued batch never
            // overwrites a newer write-through.
            sqlx::query(
                r#"
                INSERT INTO wallets (
                    user_id, gold_coins, sweeps_coins,
                    daily_spent_gc, daily_won_gc, daily_spent_sc, daily_won_sc,
                    counters_date, version, updated_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (user_id) DO UPDATE SET
                    gold_coins = EXCLUDED.gold_coins,
                    sweeps_coins = EXCLUDED.sweeps_coins,
                    daily_spent_gc = EXCLUDED.daily_spent_gc,
                    daily_won_gc = EXCLUDED.daily_won_gc,
                    daily_spent_sc = EXCLUDED.daily_spent_sc,
                    daily_won_sc = EXCLUDED.daily_won_sc,
                    counters_date = EXCLUDED.counters_date,
                    version = EXCLUDED.version,
                    updated_at = EXCLUDED.updated_at
                WHERE wallets.version < EXCLUDED.version
                "#,
            )
            .bind(&w.user_id)
            .bind(w.gold_coins)
            .bind(w.sweeps_coins)
            .bind(w.daily_spent_gc)
            .bind(w.daily_won_gc)
            .bind(w.daily_spent_sc)
            .bind(w.daily_won_sc)
            .bind(w.counters_date)
            .bind(w.version)
            .bind(w.updated_at)
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;
        Ok(())
    }

    async fn append_transactions(&self, txs: &[Transaction]) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;
        for t in txs {
            sqlx::query(
                r#"
                INSERT INTO transactions (
                    id, wallet_id, kind, currency, amount,
                    balance_before, balance_after, reference, status, metadata, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(t.id)
            .bind(&t.wallet_id)
            .bind(t.kind.as_str())
            .bind(t.currency.as_str())
            .bind(t.amount)
            .bind(t.balance_before)
            .bind(t.balance_after)
            .bind(&t.reference)
            .bind(t.status.as_str())
            .bind(&t.metadata)
            .bind(t.created_at)
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;
        Ok(())
    }

    async fn append_spins(&self, spins: &[SpinRecord]) -> Result<()> {
        let mut db_tx = self.pool.begin().await?;
        for s in spins {
            sqlx::query(
                r#"
                INSERT INTO spin_logs (
                    id, user_id, game_id, session_id, currency,
                    bet_amount, win_amount, multiplier, bonus_triggered, is_jackpot,
                    balance_before, balance_after, outcome, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                ON CONFLICT (user_id, id) DO NOTHING
                "#,
            )
            .bind(&s.id)
            .bind(&s.user_id)
            .bind(&s.game_id)
            .bind(&s.session_id)
            .bind(s.currency.as_str())
            .bind(s.bet_amount)
            .bind(s.win_amount)
            .bind(s.multiplier)
            .bind(s.bonus_triggered)
            .bind(s.is_jackpot)
            .bind(s.balance_before)
            .bind(s.balance_after)
            .bind(&s.outcome)
            .bind(s.created_at)
            .execute(&mut *db_tx)
            .await?;
        }
        db_tx.commit().await?;
        Ok(())
    }

    async fn max_transaction_id(&self) -> Result<i64> {
        let max: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(id), 0) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(max)
    }

    async fn transaction_history(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Transaction>, i64)> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM transactions
            WHERE wallet_id = $1
            ORDER BY id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE wallet_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        let txs = rows
            .iter()
            .map(transaction_from_row)
            .collect::<Result<Vec<_>>>()?;
        Ok((txs, total))
    }

    async fn insert_alert(&self, alert: &AdminAlert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_alerts (
                id, kind, title, description, severity, status,
                related_user_id, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.kind)
        .bind(&alert.title)
        .bind(&alert.description)
        .bind(alert.severity.as_str())
        .bind(alert.status.as_str())
        .bind(&alert.related_user_id)
        .bind(&alert.metadata)
        .bind(alert.created_at)
        .bind(alert.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_pending_alert(&self, user_id: &str, kind: &str) -> Result<Option<String>> {
        let id = sqlx::query_scalar(
            r#"
            SELECT id FROM admin_alerts
            WHERE related_user_id = $1 AND kind = $2 AND status = 'pending'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn merge_alert_evidence(
        &self,
        alert_id: &str,
        evidence: &Value,
        now: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE admin_alerts SET metadata = $2, updated_at = $3 WHERE id = $1")
            .bind(alert_id)
            .bind(evidence)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_alerts(
        &self,
        status: Option<AlertStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AdminAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM admin_alerts
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(alert_from_row).collect()
    }
}
