// src/store/mod.rs
pub mod memory;
pub mod postgres;

use crate::entities::{FeeRecord, Investor, Transaction, Tranche};
use crate::error::FundError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One durable side effect of a mutating operation. A `MutationPlan` is a
/// sequence of these, built by the pure domain logic in `ledger`/`fees` and
/// executed atomically by a `FundStore::execute_plan` call — mirroring the
/// teacher's `ExecutionPlan`/`Operation` staged-execution pattern
/// (`ledger/src/money.rs`).
#[derive(Debug, Clone)]
pub enum LedgerOp {
    UpsertInvestor(Investor),
    UpsertTranche(Tranche),
    DeleteTranche(String),
    AppendTransaction(Transaction),
    DeleteTransaction(u64),
    AppendFeeRecord(FeeRecord),
    DeleteFeeRecord(u64),
    AppendAudit(AuditEntry),
}

#[derive(Debug, Clone, Default)]
pub struct MutationPlan {
    ops: Vec<LedgerOp>,
}

impl MutationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: LedgerOp) -> &mut Self {
        self.ops.push(op);
        self
    }

    pub fn operations(&self) -> &[LedgerOp] {
        &self.ops
    }
}

/// Append-only audit log row (C8, spec.md §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub before_hash: String,
    pub after_hash: String,
    pub detail: String,
}

/// Filter applied to `FundStore::list_transactions`.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub investor_id: Option<i64>,
}

/// A full, self-consistent dump of the four business tables, used by
/// reporting (C6) and backup/restore (C7). Reads that build a snapshot must
/// never observe a partial mutation (spec.md §4.6, §5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundSnapshot {
    pub investors: Vec<Investor>,
    pub tranches: Vec<Tranche>,
    pub transactions: Vec<Transaction>,
    pub fee_records: Vec<FeeRecord>,
}

impl FundSnapshot {
    pub fn total_units(&self) -> rust_decimal::Decimal {
        self.tranches.iter().map(|t| t.units).sum()
    }

    /// The NAV in effect is the `nav` of the most recent transaction by
    /// `(date, id)` descending, regardless of type (spec.md §4.4.1, I3).
    pub fn latest_nav(&self) -> Option<rust_decimal::Decimal> {
        self.transactions
            .iter()
            .max_by_key(|t| (t.date, t.id))
            .map(|t| t.nav)
    }

    pub fn tranches_of(&self, investor_id: i64) -> Vec<&Tranche> {
        self.tranches
            .iter()
            .filter(|t| t.investor_id == investor_id)
            .collect()
    }
}

/// Persisted access to the four entity collections plus the audit log.
/// Storage-level transactional atomicity for a `MutationPlan` is the
/// implementation's responsibility; the caller (C4/C8) guarantees only one
/// `execute_plan` call is ever in flight at a time via the process-wide
/// write mutex.
#[async_trait]
pub trait FundStore: Send + Sync {
    async fn get_investor(&self, id: i64) -> Result<Investor, FundError>;
    async fn list_investors(&self) -> Result<Vec<Investor>, FundError>;
    async fn ensure_fund_manager(&self) -> Result<Investor, FundError>;

    async fn list_tranches_by_investor(&self, investor_id: i64) -> Result<Vec<Tranche>, FundError>;
    async fn list_all_tranches(&self) -> Result<Vec<Tranche>, FundError>;

    async fn next_transaction_id(&self) -> Result<u64, FundError>;
    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, FundError>;
    async fn latest_transaction(&self) -> Result<Option<Transaction>, FundError>;
    async fn get_transaction(&self, id: u64) -> Result<Transaction, FundError>;

    async fn next_fee_record_id(&self) -> Result<u64, FundError>;
    async fn list_fee_records(
        &self,
        period: Option<&str>,
        investor_id: Option<i64>,
    ) -> Result<Vec<FeeRecord>, FundError>;

    async fn next_audit_id(&self) -> Result<u64, FundError>;
    async fn list_audit(&self) -> Result<Vec<AuditEntry>, FundError>;

    /// Execute every op in `plan` as a single atomic storage transaction.
    /// On any failure, no op in the plan is left persisted (spec.md §4.4
    /// step 8).
    async fn execute_plan(&self, plan: &MutationPlan) -> Result<(), FundError>;

    /// Read all four business tables into one consistent snapshot (C6, C7).
    async fn snapshot(&self) -> Result<FundSnapshot, FundError>;

    /// Replace the full contents of all four tables inside one storage
    /// transaction (C7 restore).
    async fn replace_all(&self, snapshot: FundSnapshot) -> Result<(), FundError>;
}
