// src/entities/transaction.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    NavUpdate,
    Fee,
    FundManagerWithdrawal,
}

/// Per-tranche delta recorded on every mutating transaction so that
/// `delete_transaction`/`undo_transaction` (spec.md §4.4.3, §9) can reverse
/// the exact effect deterministically instead of recomputing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheDelta {
    pub tranche_id: String,
    pub units_delta: Decimal,
    pub invested_value_delta: Decimal,
    pub was_created: bool,
    pub was_deleted: bool,

    /// `(entry_nav, hwm)` before this event, when the event resets basis
    /// (NAV-Update HWM bump, Fee reset). `None` for deposit/withdrawal
    /// deltas, which never touch basis.
    pub basis_before: Option<(Decimal, Decimal)>,
}

impl TrancheDelta {
    pub fn units_only(
        tranche_id: String,
        units_delta: Decimal,
        invested_value_delta: Decimal,
        was_created: bool,
        was_deleted: bool,
    ) -> Self {
        Self {
            tranche_id,
            units_delta,
            invested_value_delta,
            was_created,
            was_deleted,
            basis_before: None,
        }
    }
}

/// Append-only transaction row (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub investor_id: i64,
    pub date: DateTime<Utc>,
    pub tx_type: TransactionType,
    pub amount: Decimal,
    pub nav: Decimal,
    pub units_change: Decimal,

    /// Structured per-tranche effect, required for deterministic undo.
    pub affected_tranches: Vec<TrancheDelta>,

    /// Back-reference to the FeeRecord this transaction produced, if any.
    pub fee_record_id: Option<u64>,
}

impl Transaction {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        investor_id: i64,
        date: DateTime<Utc>,
        tx_type: TransactionType,
        amount: Decimal,
        nav: Decimal,
        units_change: Decimal,
        affected_tranches: Vec<TrancheDelta>,
    ) -> Self {
        Self {
            id,
            investor_id,
            date,
            tx_type,
            amount,
            nav,
            units_change,
            affected_tranches,
            fee_record_id: None,
        }
    }
}
