// src/store/postgres.rs
//
// PostgreSQL-backed `FundStore`. Schema per spec.md §6.2: four business
// tables plus `audit_log`, fixed-scale NUMERIC columns for money/units/price
// so storage never rounds through binary floats. Grounded on the
// `CREATE TABLE IF NOT EXISTS` + indexed-migration style of
// `ledger/src/adapters/postgres.rs`.
use super::{AuditEntry, FundSnapshot, FundStore, LedgerOp, MutationPlan, TransactionFilter};
use crate::entities::investor::FUND_MANAGER_ID;
use crate::entities::{FeeRecord, Investor, Transaction, TransactionType, Tranche};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::error::FundError;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the four business tables plus the audit log if they don't
    /// already exist. Safe to call on every startup.
    pub async fn init_schema(&self) -> Result<(), FundError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_investors (
                id BIGINT PRIMARY KEY,
                name TEXT NOT NULL,
                phone TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL DEFAULT '',
                address TEXT NOT NULL DEFAULT '',
                join_date DATE NOT NULL,
                is_fund_manager BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_investors_single_fund_manager
            ON fund_investors ((is_fund_manager))
            WHERE is_fund_manager
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_tranches (
                tranche_id TEXT PRIMARY KEY,
                investor_id BIGINT NOT NULL REFERENCES fund_investors(id),
                entry_date TIMESTAMPTZ NOT NULL,
                entry_nav NUMERIC(20,6) NOT NULL,
                original_entry_date TIMESTAMPTZ NOT NULL,
                original_entry_nav NUMERIC(20,6) NOT NULL,
                units NUMERIC(20,8) NOT NULL,
                original_invested_value NUMERIC(15,2) NOT NULL,
                invested_value NUMERIC(15,2) NOT NULL,
                hwm NUMERIC(20,6) NOT NULL,
                cumulative_fees_paid NUMERIC(15,2) NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_tranches_investor_original_entry
            ON fund_tranches(investor_id, original_entry_date ASC, tranche_id ASC)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_transactions (
                id BIGINT PRIMARY KEY,
                investor_id BIGINT NOT NULL REFERENCES fund_investors(id),
                date TIMESTAMPTZ NOT NULL,
                tx_type TEXT NOT NULL CHECK (tx_type IN
                    ('deposit', 'withdrawal', 'nav_update', 'fee', 'fund_manager_withdrawal')),
                amount NUMERIC(15,2) NOT NULL,
                nav NUMERIC(15,2) NOT NULL,
                units_change NUMERIC(20,8) NOT NULL,
                affected_tranches JSONB NOT NULL DEFAULT '[]',
                fee_record_id BIGINT
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_investor
            ON fund_transactions(investor_id)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_date_id
            ON fund_transactions(date DESC, id DESC)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fund_fee_records (
                id BIGINT PRIMARY KEY,
                period TEXT NOT NULL,
                investor_id BIGINT NOT NULL REFERENCES fund_investors(id),
                fee_amount NUMERIC(15,2) NOT NULL,
                fee_units NUMERIC(20,8) NOT NULL,
                calculation_date TIMESTAMPTZ NOT NULL,
                units_before NUMERIC(20,8) NOT NULL,
                units_after NUMERIC(20,8) NOT NULL,
                nav_per_unit NUMERIC(20,6) NOT NULL,
                description TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_fee_records_period_investor
            ON fund_fee_records(period, investor_id)
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id BIGINT PRIMARY KEY,
                timestamp TIMESTAMPTZ NOT NULL,
                actor TEXT NOT NULL,
                action TEXT NOT NULL,
                target TEXT NOT NULL,
                before_hash TEXT NOT NULL,
                after_hash TEXT NOT NULL,
                detail TEXT NOT NULL DEFAULT ''
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn tx_type_to_str(t: TransactionType) -> &'static str {
    match t {
        TransactionType::Deposit => "deposit",
        TransactionType::Withdrawal => "withdrawal",
        TransactionType::NavUpdate => "nav_update",
        TransactionType::Fee => "fee",
        TransactionType::FundManagerWithdrawal => "fund_manager_withdrawal",
    }
}

fn tx_type_from_str(s: &str) -> Result<TransactionType, FundError> {
    match s {
        "deposit" => Ok(TransactionType::Deposit),
        "withdrawal" => Ok(TransactionType::Withdrawal),
        "nav_update" => Ok(TransactionType::NavUpdate),
        "fee" => Ok(TransactionType::Fee),
        "fund_manager_withdrawal" => Ok(TransactionType::FundManagerWithdrawal),
        other => Err(FundError::Storage(format!("unknown tx_type {other}"))),
    }
}

fn row_to_investor(row: &sqlx::postgres::PgRow) -> Result<Investor, FundError> {
    Ok(Investor {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        address: row.try_get("address")?,
        join_date: row.try_get("join_date")?,
        is_fund_manager: row.try_get("is_fund_manager")?,
    })
}

fn row_to_tranche(row: &sqlx::postgres::PgRow) -> Result<Tranche, FundError> {
    Ok(Tranche {
        investor_id: row.try_get("investor_id")?,
        tranche_id: row.try_get("tranche_id")?,
        entry_date: row.try_get("entry_date")?,
        entry_nav: row.try_get("entry_nav")?,
        original_entry_date: row.try_get("original_entry_date")?,
        original_entry_nav: row.try_get("original_entry_nav")?,
        units: row.try_get("units")?,
        original_invested_value: row.try_get("original_invested_value")?,
        invested_value: row.try_get("invested_value")?,
        hwm: row.try_get("hwm")?,
        cumulative_fees_paid: row.try_get("cumulative_fees_paid")?,
    })
}

fn row_to_transaction(row: &sqlx::postgres::PgRow) -> Result<Transaction, FundError> {
    let tx_type_str: String = row.try_get("tx_type")?;
    let affected_json: serde_json::Value = row.try_get("affected_tranches")?;
    Ok(Transaction {
        id: row.try_get::<i64, _>("id")? as u64,
        investor_id: row.try_get("investor_id")?,
        date: row.try_get("date")?,
        tx_type: tx_type_from_str(&tx_type_str)?,
        amount: row.try_get("amount")?,
        nav: row.try_get("nav")?,
        units_change: row.try_get("units_change")?,
        affected_tranches: serde_json::from_value(affected_json)
            .map_err(|e| FundError::Storage(e.to_string()))?,
        fee_record_id: row
            .try_get::<Option<i64>, _>("fee_record_id")?
            .map(|v| v as u64),
    })
}

fn row_to_fee_record(row: &sqlx::postgres::PgRow) -> Result<FeeRecord, FundError> {
    Ok(FeeRecord {
        id: row.try_get::<i64, _>("id")? as u64,
        period: row.try_get("period")?,
        investor_id: row.try_get("investor_id")?,
        fee_amount: row.try_get("fee_amount")?,
        fee_units: row.try_get("fee_units")?,
        calculation_date: row.try_get("calculation_date")?,
        units_before: row.try_get("units_before")?,
        units_after: row.try_get("units_after")?,
        nav_per_unit: row.try_get("nav_per_unit")?,
        description: row.try_get("description")?,
    })
}

fn row_to_audit(row: &sqlx::postgres::PgRow) -> Result<AuditEntry, FundError> {
    Ok(AuditEntry {
        id: row.try_get::<i64, _>("id")? as u64,
        timestamp: row.try_get("timestamp")?,
        actor: row.try_get("actor")?,
        action: row.try_get("action")?,
        target: row.try_get("target")?,
        before_hash: row.try_get("before_hash")?,
        after_hash: row.try_get("after_hash")?,
        detail: row.try_get("detail")?,
    })
}

#[async_trait]
impl FundStore for PostgresStore {
    async fn get_investor(&self, id: i64) -> Result<Investor, FundError> {
        let row = sqlx::query("SELECT * FROM fund_investors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FundError::NotFound(format!("investor {id}")))?;
        row_to_investor(&row)
    }

    async fn list_investors(&self) -> Result<Vec<Investor>, FundError> {
        let rows = sqlx::query("SELECT * FROM fund_investors ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_investor).collect()
    }

    async fn ensure_fund_manager(&self) -> Result<Investor, FundError> {
        if let Ok(fm) = self.get_investor(FUND_MANAGER_ID).await {
            return Ok(fm);
        }
        let fm = Investor::new_fund_manager();
        sqlx::query(
            r#"
            INSERT INTO fund_investors (id, name, phone, email, address, join_date, is_fund_manager)
            VALUES ($1, $2, '', '', '', $3, TRUE)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(fm.id)
        .bind(&fm.name)
        .bind(fm.join_date)
        .execute(&self.pool)
        .await?;
        Ok(fm)
    }

    async fn list_tranches_by_investor(&self, investor_id: i64) -> Result<Vec<Tranche>, FundError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM fund_tranches
            WHERE investor_id = $1
            ORDER BY original_entry_date ASC, tranche_id ASC
            "#,
        )
        .bind(investor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_tranche).collect()
    }

    async fn list_all_tranches(&self) -> Result<Vec<Tranche>, FundError> {
        let rows = sqlx::query("SELECT * FROM fund_tranches")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tranche).collect()
    }

    async fn next_transaction_id(&self) -> Result<u64, FundError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM fund_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) as u64 + 1)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, FundError> {
        let rows = match filter.investor_id {
            Some(id) => {
                sqlx::query("SELECT * FROM fund_transactions WHERE investor_id = $1 ORDER BY date ASC, id ASC")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM fund_transactions ORDER BY date ASC, id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(row_to_transaction).collect()
    }

    async fn latest_transaction(&self) -> Result<Option<Transaction>, FundError> {
        let row = sqlx::query(
            "SELECT * FROM fund_transactions ORDER BY date DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn get_transaction(&self, id: u64) -> Result<Transaction, FundError> {
        let row = sqlx::query("SELECT * FROM fund_transactions WHERE id = $1")
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FundError::NotFound(format!("transaction {id}")))?;
        row_to_transaction(&row)
    }

    async fn next_fee_record_id(&self) -> Result<u64, FundError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM fund_fee_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) as u64 + 1)
    }

    async fn list_fee_records(
        &self,
        period: Option<&str>,
        investor_id: Option<i64>,
    ) -> Result<Vec<FeeRecord>, FundError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM fund_fee_records
            WHERE ($1::TEXT IS NULL OR period = $1)
              AND ($2::BIGINT IS NULL OR investor_id = $2)
            ORDER BY calculation_date ASC
            "#,
        )
        .bind(period)
        .bind(investor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_fee_record).collect()
    }

    async fn next_audit_id(&self) -> Result<u64, FundError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM audit_log")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0) as u64 + 1)
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>, FundError> {
        let rows = sqlx::query("SELECT * FROM audit_log ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_audit).collect()
    }

    async fn execute_plan(&self, plan: &MutationPlan) -> Result<(), FundError> {
        let mut tx = self.pool.begin().await?;

        for op in plan.operations() {
            match op {
                LedgerOp::UpsertInvestor(investor) => {
                    sqlx::query(
                        r#"
                        INSERT INTO fund_investors (id, name, phone, email, address, join_date, is_fund_manager)
                        VALUES ($1, $2, $3, $4, $5, $6, $7)
                        ON CONFLICT (id) DO UPDATE SET
                            name = EXCLUDED.name, phone = EXCLUDED.phone, email = EXCLUDED.email,
                            address = EXCLUDED.address, join_date = EXCLUDED.join_date,
                            is_fund_manager = EXCLUDED.is_fund_manager
                        "#,
                    )
                    .bind(investor.id)
                    .bind(&investor.name)
                    .bind(&investor.phone)
                    .bind(&investor.email)
                    .bind(&investor.address)
                    .bind(investor.join_date)
                    .bind(investor.is_fund_manager)
                    .execute(&mut *tx)
                    .await?;
                }
                LedgerOp::UpsertTranche(t) => {
                    sqlx::query(
                        r#"
                        INSERT INTO fund_tranches
                            (tranche_id, investor_id, entry_date, entry_nav, original_entry_date,
                             original_entry_nav, units, original_invested_value, invested_value,
                             hwm, cumulative_fees_paid)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                        ON CONFLICT (tranche_id) DO UPDATE SET
                            entry_date = EXCLUDED.entry_date,
                            entry_nav = EXCLUDED.entry_nav,
                            units = EXCLUDED.units,
                            invested_value = EXCLUDED.invested_value,
                            hwm = EXCLUDED.hwm,
                            cumulative_fees_paid = EXCLUDED.cumulative_fees_paid
                        "#,
                    )
                    .bind(&t.tranche_id)
                    .bind(t.investor_id)
                    .bind(t.entry_date)
                    .bind(t.entry_nav)
                    .bind(t.original_entry_date)
                    .bind(t.original_entry_nav)
                    .bind(t.units)
                    .bind(t.original_invested_value)
                    .bind(t.invested_value)
                    .bind(t.hwm)
                    .bind(t.cumulative_fees_paid)
                    .execute(&mut *tx)
                    .await?;
                }
                LedgerOp::DeleteTranche(tranche_id) => {
                    sqlx::query("DELETE FROM fund_tranches WHERE tranche_id = $1")
                        .bind(tranche_id)
                        .execute(&mut *tx)
                        .await?;
                }
                LedgerOp::AppendTransaction(t) => {
                    let affected_json = serde_json::to_value(&t.affected_tranches)
                        .map_err(|e| FundError::Storage(e.to_string()))?;
                    sqlx::query(
                        r#"
                        INSERT INTO fund_transactions
                            (id, investor_id, date, tx_type, amount, nav, units_change,
                             affected_tranches, fee_record_id)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                        "#,
                    )
                    .bind(t.id as i64)
                    .bind(t.investor_id)
                    .bind(t.date)
                    .bind(tx_type_to_str(t.tx_type))
                    .bind(t.amount)
                    .bind(t.nav)
                    .bind(t.units_change)
                    .bind(affected_json)
                    .bind(t.fee_record_id.map(|v| v as i64))
                    .execute(&mut *tx)
                    .await?;
                }
                LedgerOp::DeleteTransaction(id) => {
                    sqlx::query("DELETE FROM fund_transactions WHERE id = $1")
                        .bind(*id as i64)
                        .execute(&mut *tx)
                        .await?;
                }
                LedgerOp::AppendFeeRecord(fr) => {
                    sqlx::query(
                        r#"
                        INSERT INTO fund_fee_records
                            (id, period, investor_id, fee_amount, fee_units, calculation_date,
                             units_before, units_after, nav_per_unit, description)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                        "#,
                    )
                    .bind(fr.id as i64)
                    .bind(&fr.period)
                    .bind(fr.investor_id)
                    .bind(fr.fee_amount)
                    .bind(fr.fee_units)
                    .bind(fr.calculation_date)
                    .bind(fr.units_before)
                    .bind(fr.units_after)
                    .bind(fr.nav_per_unit)
                    .bind(&fr.description)
                    .execute(&mut *tx)
                    .await?;
                }
                LedgerOp::DeleteFeeRecord(id) => {
                    sqlx::query("DELETE FROM fund_fee_records WHERE id = $1")
                        .bind(*id as i64)
                        .execute(&mut *tx)
                        .await?;
                }
                LedgerOp::AppendAudit(entry) => {
                    sqlx::query(
                        r#"
                        INSERT INTO audit_log
                            (id, timestamp, actor, action, target, before_hash, after_hash, detail)
                        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                        "#,
                    )
                    .bind(entry.id as i64)
                    .bind(entry.timestamp)
                    .bind(&entry.actor)
                    .bind(&entry.action)
                    .bind(&entry.target)
                    .bind(&entry.before_hash)
                    .bind(&entry.after_hash)
                    .bind(&entry.detail)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self) -> Result<FundSnapshot, FundError> {
        Ok(FundSnapshot {
            investors: self.list_investors().await?,
            tranches: self.list_all_tranches().await?,
            transactions: self
                .list_transactions(&TransactionFilter::default())
                .await?,
            fee_records: self.list_fee_records(None, None).await?,
        })
    }

    async fn replace_all(&self, snapshot: FundSnapshot) -> Result<(), FundError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM fund_fee_records").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM fund_transactions").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM fund_tranches").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM fund_investors").execute(&mut *tx).await?;

        for investor in &snapshot.investors {
            sqlx::query(
                r#"
                INSERT INTO fund_investors (id, name, phone, email, address, join_date, is_fund_manager)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(investor.id)
            .bind(&investor.name)
            .bind(&investor.phone)
            .bind(&investor.email)
            .bind(&investor.address)
            .bind(investor.join_date)
            .bind(investor.is_fund_manager)
            .execute(&mut *tx)
            .await?;
        }

        for t in &snapshot.tranches {
            sqlx::query(
                r#"
                INSERT INTO fund_tranches
                    (tranche_id, investor_id, entry_date, entry_nav, original_entry_date,
                     original_entry_nav, units, original_invested_value, invested_value,
                     hwm, cumulative_fees_paid)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(&t.tranche_id)
            .bind(t.investor_id)
            .bind(t.entry_date)
            .bind(t.entry_nav)
            .bind(t.original_entry_date)
            .bind(t.original_entry_nav)
            .bind(t.units)
            .bind(t.original_invested_value)
            .bind(t.invested_value)
            .bind(t.hwm)
            .bind(t.cumulative_fees_paid)
            .execute(&mut *tx)
            .await?;
        }

        for t in &snapshot.transactions {
            let affected_json = serde_json::to_value(&t.affected_tranches)
                .map_err(|e| FundError::Storage(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO fund_transactions
                    (id, investor_id, date, tx_type, amount, nav, units_change,
                     affected_tranches, fee_record_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(t.id as i64)
            .bind(t.investor_id)
            .bind(t.date)
            .bind(tx_type_to_str(t.tx_type))
            .bind(t.amount)
            .bind(t.nav)
            .bind(t.units_change)
            .bind(affected_json)
            .bind(t.fee_record_id.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;
        }

        for fr in &snapshot.fee_records {
            sqlx::query(
                r#"
                INSERT INTO fund_fee_records
                    (id, period, investor_id, fee_amount, fee_units, calculation_date,
                     units_before, units_after, nav_per_unit, description)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(fr.id as i64)
            .bind(&fr.period)
            .bind(fr.investor_id)
            .bind(fr.fee_amount)
            .bind(fr.fee_units)
            .bind(fr.calculation_date)
            .bind(fr.units_before)
            .bind(fr.units_after)
            .bind(fr.nav_per_unit)
            .bind(&fr.description)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
