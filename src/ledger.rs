// src/ledger.rs
//
// C3 tranche ledger: deposit/withdrawal/NAV-update mutation builders and
// their reversal. Pure domain logic over a `FundSnapshot` — every function
// here returns a `MutationPlan` for the caller (C4, `engine.rs`) to execute
// atomically; none of these functions touch a `FundStore` directly, mirroring
// the split between `ledger/src/money.rs`'s `Operation`/`ExecutionPlan`
// builder and `LedgerAdapter::execute_plan`.
use crate::entities::investor::FUND_MANAGER_ID;
use crate::entities::{Transaction, TransactionType, Tranche, TrancheDelta};
use crate::error::FundError;
use crate::money::{is_dust, price_per_unit, round_units, units_for_cash};
use crate::store::{FundSnapshot, LedgerOp, MutationPlan};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A built mutation plus the transaction row it will append, returned to the
/// caller so it can assign audit metadata before executing the plan.
pub struct MutationOutcome {
    pub plan: MutationPlan,
    pub transaction: Transaction,
}

fn fifo_tranches(snapshot: &FundSnapshot, investor_id: i64) -> Vec<Tranche> {
    let mut tranches: Vec<Tranche> = snapshot
        .tranches_of(investor_id)
        .into_iter()
        .cloned()
        .collect();
    tranches.sort_by(|a, b| {
        a.original_entry_date
            .cmp(&b.original_entry_date)
            .then_with(|| a.tranche_id.cmp(&b.tranche_id))
    });
    tranches
}

/// §4.3.1 — mint a new tranche for `investor_id` at the pre-deposit price.
pub fn build_deposit(
    snapshot: &FundSnapshot,
    investor_id: i64,
    cash_amount: Decimal,
    new_total_nav: Decimal,
    date: DateTime<Utc>,
    next_tx_id: u64,
) -> Result<MutationOutcome, FundError> {
    if cash_amount <= Decimal::ZERO {
        return Err(FundError::Validation(
            "deposit cash_amount must be positive".into(),
        ));
    }
    if new_total_nav <= Decimal::ZERO {
        return Err(FundError::Validation(
            "deposit new_total_nav must be positive".into(),
        ));
    }
    let pre_total_nav = new_total_nav - cash_amount;
    if pre_total_nav < Decimal::ZERO {
        return Err(FundError::Validation(
            "new_total_nav cannot be less than the deposited cash".into(),
        ));
    }

    let pre_total_units = snapshot.total_units();
    let price = price_per_unit(pre_total_nav, pre_total_units);
    let minted = round_units(units_for_cash(cash_amount, price));

    let tranche_id = Uuid::now_v7().to_string();
    let tranche = Tranche::new_from_deposit(investor_id, tranche_id.clone(), date, price, minted, cash_amount);

    let delta = TrancheDelta::units_only(tranche_id, minted, cash_amount, true, false);
    let transaction = Transaction::new(
        next_tx_id,
        investor_id,
        date,
        TransactionType::Deposit,
        cash_amount,
        new_total_nav,
        minted,
        vec![delta],
    );

    let mut plan = MutationPlan::new();
    plan.push(LedgerOp::UpsertTranche(tranche));
    plan.push(LedgerOp::AppendTransaction(transaction.clone()));

    Ok(MutationOutcome { plan, transaction })
}

/// §4.3.2 — FIFO burn of `investor_id`'s tranches to fund `cash_amount`.
/// Shared by regular withdrawals and Fund-Manager withdrawals (§4.4.2), which
/// pass `FUND_MANAGER_ID` and a transaction type of
/// `FundManagerWithdrawal`.
pub fn build_withdrawal(
    snapshot: &FundSnapshot,
    investor_id: i64,
    cash_amount: Decimal,
    new_total_nav: Decimal,
    date: DateTime<Utc>,
    next_tx_id: u64,
    tx_type: TransactionType,
) -> Result<MutationOutcome, FundError> {
    if cash_amount <= Decimal::ZERO {
        return Err(FundError::Validation(
            "withdrawal cash_amount must be positive".into(),
        ));
    }
    if new_total_nav < Decimal::ZERO {
        return Err(FundError::Validation(
            "withdrawal new_total_nav cannot be negative".into(),
        ));
    }

    let pre_total_nav = new_total_nav + cash_amount;
    let pre_total_units = snapshot.total_units();
    let price = price_per_unit(pre_total_nav, pre_total_units);
    let units_to_burn = units_for_cash(cash_amount, price);

    let tranches = fifo_tranches(snapshot, investor_id);
    let available: Decimal = tranches.iter().map(|t| t.units).sum();
    if available + crate::money::DUST_UNITS < units_to_burn {
        return Err(FundError::InsufficientUnits {
            requested: units_to_burn.to_string(),
            available: available.to_string(),
        });
    }

    let mut remaining = units_to_burn;
    let mut deltas = Vec::new();
    let mut plan = MutationPlan::new();

    for tranche in tranches {
        if remaining <= crate::money::DUST_UNITS {
            break;
        }
        let consume = remaining.min(tranche.units);
        let new_units = tranche.units - consume;

        if is_dust(new_units) {
            deltas.push(TrancheDelta::units_only(
                tranche.tranche_id.clone(),
                -tranche.units,
                -tranche.invested_value,
                false,
                true,
            ));
            plan.push(LedgerOp::DeleteTranche(tranche.tranche_id.clone()));
        } else {
            let proportion = new_units / tranche.units;
            let new_invested = tranche.invested_value * proportion;
            deltas.push(TrancheDelta::units_only(
                tranche.tranche_id.clone(),
                -consume,
                new_invested - tranche.invested_value,
                false,
                false,
            ));
            let mut updated = tranche.clone();
            updated.units = new_units;
            updated.invested_value = new_invested;
            plan.push(LedgerOp::UpsertTranche(updated));
        }

        remaining -= consume;
    }

    if remaining > crate::money::DUST_UNITS {
        return Err(FundError::Internal(
            "withdrawal could not be fully allocated across tranches".into(),
        ));
    }

    let transaction = Transaction::new(
        next_tx_id,
        investor_id,
        date,
        tx_type,
        cash_amount,
        new_total_nav,
        -units_to_burn,
        deltas,
    );
    plan.push(LedgerOp::AppendTransaction(transaction.clone()));

    Ok(MutationOutcome { plan, transaction })
}

pub enum FmWithdrawalMode {
    Partial(Decimal),
    Full,
}

/// §4.4.2 — Fund-Manager withdrawal, restricted to FM-owned tranches. `Full`
/// mode prices the drain off the fund's currently-effective NAV (before this
/// withdrawal's cash leaves), then derives `cash_amount` and the resulting
/// `new_total_nav` from it so the same FIFO routine as a regular withdrawal
/// applies unchanged.
pub fn build_fund_manager_withdrawal(
    snapshot: &FundSnapshot,
    current_total_nav: Decimal,
    date: DateTime<Utc>,
    next_tx_id: u64,
    mode: FmWithdrawalMode,
) -> Result<MutationOutcome, FundError> {
    let fm_units: Decimal = snapshot
        .tranches_of(FUND_MANAGER_ID)
        .iter()
        .map(|t| t.units)
        .sum();
    if is_dust(fm_units) {
        return Err(FundError::Validation(
            "fund manager has no units to withdraw".into(),
        ));
    }

    let (cash_amount, new_total_nav) = match mode {
        FmWithdrawalMode::Partial(cash_amount) => (cash_amount, current_total_nav - cash_amount),
        FmWithdrawalMode::Full => {
            let pre_total_units = snapshot.total_units();
            let price = price_per_unit(current_total_nav, pre_total_units);
            let cash_amount = fm_units * price;
            (cash_amount, current_total_nav - cash_amount)
        }
    };

    if new_total_nav < Decimal::ZERO {
        return Err(FundError::Validation(
            "fund manager withdrawal exceeds current total NAV".into(),
        ));
    }

    build_withdrawal(
        snapshot,
        FUND_MANAGER_ID,
        cash_amount,
        new_total_nav,
        date,
        next_tx_id,
        TransactionType::FundManagerWithdrawal,
    )
}

/// §4.3.4 — revalue every tranche fund-wide and bump HWMs that the new price
/// exceeds. Recorded against the Fund Manager id since a NAV update has no
/// single owning investor.
pub fn build_nav_update(
    snapshot: &FundSnapshot,
    new_total_nav: Decimal,
    date: DateTime<Utc>,
    next_tx_id: u64,
) -> Result<MutationOutcome, FundError> {
    if new_total_nav < Decimal::ZERO {
        return Err(FundError::Validation(
            "total NAV cannot be negative".into(),
        ));
    }

    let price = price_per_unit(new_total_nav, snapshot.total_units());
    let mut plan = MutationPlan::new();
    let mut deltas = Vec::new();

    for tranche in &snapshot.tranches {
        if price > tranche.hwm {
            let basis_before = (tranche.entry_nav, tranche.hwm);
            let mut updated = tranche.clone();
            updated.bump_hwm(price);
            deltas.push(TrancheDelta {
                tranche_id: tranche.tranche_id.clone(),
                units_delta: Decimal::ZERO,
                invested_value_delta: Decimal::ZERO,
                was_created: false,
                was_deleted: false,
                basis_before: Some(basis_before),
            });
            plan.push(LedgerOp::UpsertTranche(updated));
        }
    }

    let transaction = Transaction::new(
        next_tx_id,
        FUND_MANAGER_ID,
        date,
        TransactionType::NavUpdate,
        Decimal::ZERO,
        new_total_nav,
        Decimal::ZERO,
        deltas,
    );
    plan.push(LedgerOp::AppendTransaction(transaction.clone()));

    Ok(MutationOutcome { plan, transaction })
}

/// §4.4.3 — reverse `tx`'s effect on the tranche table using its recorded
/// per-tranche deltas, then drop the transaction row itself. The caller
/// (`engine.rs`) is responsible for checking that `tx` is the latest
/// transaction of its investor before calling this.
///
/// A Fee transaction's `affected_tranches` only records the debited
/// investor's side of the mutation — the Fund Manager's minted fee tranche
/// is not attributed to any single investor's transaction, so reversing one
/// Fee transaction from its deltas alone would leave the FM's minted units
/// in place and break unit conservation (I1). Reject it here rather than
/// silently reverse half of a cross-investor mutation.
pub fn build_reversal(snapshot: &FundSnapshot, tx: &Transaction) -> Result<MutationPlan, FundError> {
    if tx.tx_type == TransactionType::Fee {
        return Err(FundError::NotReversible(format!(
            "transaction {} is a Fee application and cannot be undone",
            tx.id
        )));
    }

    let mut plan = MutationPlan::new();

    for delta in &tx.affected_tranches {
        if delta.was_created {
            // Undo a deposit: the tranche it minted is removed outright.
            plan.push(LedgerOp::DeleteTranche(delta.tranche_id.clone()));
            continue;
        }

        if delta.was_deleted {
            // Undo a withdrawal that fully retired a tranche: it must be
            // reconstructed from the reversed delta, since it no longer
            // exists in the snapshot.
            let restored_units = -delta.units_delta;
            let restored_invested = -delta.invested_value_delta;
            // The tranche's basis (entry_nav/hwm/dates) was lost when it was
            // retired; reconstructing it exactly requires it to still be
            // present, so this path only ever occurs for the terminal
            // transaction on an otherwise-untouched tranche. If it is not
            // recoverable from the current snapshot, fail rather than
            // fabricate a basis.
            return Err(FundError::NotReversible(format!(
                "tranche {} was retired by this transaction and cannot be reconstructed (units {restored_units}, invested {restored_invested})",
                delta.tranche_id
            )));
        }

        let current = snapshot
            .tranches
            .iter()
            .find(|t| t.tranche_id == delta.tranche_id)
            .ok_or_else(|| {
                FundError::NotReversible(format!(
                    "tranche {} referenced by transaction no longer exists",
                    delta.tranche_id
                ))
            })?;

        let mut restored = current.clone();
        restored.units -= delta.units_delta;
        restored.invested_value -= delta.invested_value_delta;
        if let Some((entry_nav_before, hwm_before)) = delta.basis_before {
            restored.entry_nav = entry_nav_before;
            restored.hwm = hwm_before;
        }
        plan.push(LedgerOp::UpsertTranche(restored));
    }

    plan.push(LedgerOp::DeleteTransaction(tx.id));
    if let Some(fee_record_id) = tx.fee_record_id {
        plan.push(LedgerOp::DeleteFeeRecord(fee_record_id));
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn first_deposit_mints_at_seed_price() {
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![],
            transactions: vec![],
            fee_records: vec![],
        };
        let outcome = build_deposit(
            &snapshot,
            1,
            dec!(10000000),
            dec!(10000000),
            date(2024, 1, 1),
            1,
        )
        .unwrap();
        assert_eq!(outcome.transaction.units_change, dec!(1000.00000000));
        assert_eq!(outcome.transaction.nav, dec!(10000000));
    }

    #[test]
    fn second_deposit_prices_off_existing_book() {
        let tranche = Tranche::new_from_deposit(
            1,
            "t1".into(),
            date(2024, 1, 1),
            dec!(10000),
            dec!(1000),
            dec!(10000000),
        );
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![tranche],
            transactions: vec![],
            fee_records: vec![],
        };
        let outcome = build_deposit(
            &snapshot,
            2,
            dec!(20000000),
            dec!(33000000),
            date(2024, 6, 1),
            2,
        )
        .unwrap();
        // pre-deposit price = (33,000,000 - 20,000,000) / 1000 = 13,000
        assert_eq!(outcome.transaction.units_change, dec!(1538.46153846));
    }

    #[test]
    fn withdrawal_burns_fifo_and_scales_invested_value() {
        let t1 = Tranche::new_from_deposit(
            1,
            "t1".into(),
            date(2024, 1, 1),
            dec!(10000),
            dec!(1000),
            dec!(10000000),
        );
        let t2 = Tranche::new_from_deposit(
            2,
            "t2".into(),
            date(2024, 6, 1),
            dec!(13000),
            dec!(1538.46153846),
            dec!(20000000),
        );
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![t1, t2],
            transactions: vec![],
            fee_records: vec![],
        };
        let outcome = build_withdrawal(
            &snapshot,
            1,
            dec!(6500000),
            dec!(28500000),
            date(2024, 9, 1),
            3,
            TransactionType::Withdrawal,
        )
        .unwrap();
        assert_eq!(outcome.transaction.investor_id, 1);
        assert_eq!(outcome.transaction.affected_tranches.len(), 1);
        assert_eq!(outcome.transaction.affected_tranches[0].tranche_id, "t1");
    }

    #[test]
    fn withdrawal_rejects_insufficient_units() {
        let t1 = Tranche::new_from_deposit(
            1,
            "t1".into(),
            date(2024, 1, 1),
            dec!(10000),
            dec!(10),
            dec!(100000),
        );
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![t1],
            transactions: vec![],
            fee_records: vec![],
        };
        let err = build_withdrawal(
            &snapshot,
            1,
            dec!(999999999),
            dec!(1),
            date(2024, 2, 1),
            2,
            TransactionType::Withdrawal,
        )
        .unwrap_err();
        assert!(matches!(err, FundError::InsufficientUnits { .. }));
    }

    #[test]
    fn nav_update_only_raises_hwm() {
        let mut t1 = Tranche::new_from_deposit(
            1,
            "t1".into(),
            date(2024, 1, 1),
            dec!(10000),
            dec!(1000),
            dec!(10000000),
        );
        t1.hwm = dec!(12000);
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![t1],
            transactions: vec![],
            fee_records: vec![],
        };
        // New price (11,000) is below the existing HWM (12,000): no bump.
        let outcome = build_nav_update(&snapshot, dec!(11000000), date(2024, 12, 31), 2).unwrap();
        assert!(outcome.transaction.affected_tranches.is_empty());
    }
}
