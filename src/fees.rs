// src/fees.rs
//
// C5 high-water-mark performance fee engine. Pure computation over a
// `FundSnapshot` (§4.5.1, §4.5.4) plus the stateful preview/apply pair
// (§4.5.2, §4.5.3) that the confirm-token protects against a snapshot that
// moved between the two calls.
use crate::entities::investor::FUND_MANAGER_ID;
use crate::entities::{FeeRecord, Transaction, TransactionType, Tranche, TrancheDelta};
use crate::error::FundError;
use crate::money::{is_dust, price_per_unit};
use crate::store::{FundSnapshot, LedgerOp, MutationPlan};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use std::collections::HashMap;

/// Fee engine parameters (spec.md §4.5, §6.4).
#[derive(Debug, Clone, Copy)]
pub struct FeeParams {
    pub fee_rate: Decimal,
    pub hurdle_rate: Decimal,
}

impl Default for FeeParams {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.20),
            hurdle_rate: dec!(0.06),
        }
    }
}

/// §4.5.1 computation for a single tranche.
#[derive(Debug, Clone)]
pub struct TrancheFee {
    pub tranche_id: String,
    pub investor_id: i64,
    pub excess_per_unit: Decimal,
    pub fee_amount: Decimal,
    pub fee_units: Decimal,
}

/// Per-investor rollup of §4.5.1, used by both preview and individual
/// planning (§4.5.4).
#[derive(Debug, Clone)]
pub struct InvestorFeeSummary {
    pub investor_id: i64,
    pub fee_amount: Decimal,
    pub fee_units: Decimal,
    pub units_before: Decimal,
    pub units_after: Decimal,
    pub performance_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct FeePreview {
    pub end_date: DateTime<Utc>,
    pub total_nav: Decimal,
    pub per_tranche: Vec<TrancheFee>,
    pub per_investor: Vec<InvestorFeeSummary>,
    pub total_fee_amount: Decimal,
    pub total_fee_units: Decimal,
    pub confirm_token: String,
}

fn year_fraction(entry: DateTime<Utc>, end: DateTime<Utc>) -> Decimal {
    let days = (end - entry).num_milliseconds() as f64 / 86_400_000.0;
    Decimal::from_f64_retain(days / 365.25).unwrap_or(Decimal::ZERO)
}

/// §4.5.1 steps 1-7, run for every tranche fund-wide.
pub fn compute_tranche_fees(
    tranches: &[Tranche],
    total_nav: Decimal,
    total_units: Decimal,
    end_date: DateTime<Utc>,
    params: FeeParams,
) -> Vec<TrancheFee> {
    let price = price_per_unit(total_nav, total_units);

    tranches
        .iter()
        .filter(|t| t.investor_id != FUND_MANAGER_ID)
        .map(|t| {
            let years = year_fraction(t.entry_date, end_date);
            let hurdle_price = t.entry_nav * (Decimal::ONE + params.hurdle_rate).powd(years);
            let threshold = hurdle_price.max(t.hwm);
            let excess_per_unit = (price - threshold).max(Decimal::ZERO);
            let fee_amount = excess_per_unit * t.units * params.fee_rate;
            let fee_units = if price > Decimal::ZERO {
                fee_amount / price
            } else {
                Decimal::ZERO
            };
            TrancheFee {
                tranche_id: t.tranche_id.clone(),
                investor_id: t.investor_id,
                excess_per_unit,
                fee_amount,
                fee_units,
            }
        })
        .collect()
}

fn rollup_per_investor(per_tranche: &[TrancheFee], tranches: &[Tranche]) -> Vec<InvestorFeeSummary> {
    let mut by_investor: HashMap<i64, (Decimal, Decimal)> = HashMap::new();
    for tf in per_tranche {
        let entry = by_investor.entry(tf.investor_id).or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += tf.fee_amount;
        entry.1 += tf.fee_units;
    }

    by_investor
        .into_iter()
        .map(|(investor_id, (fee_amount, fee_units))| {
            let units_before: Decimal = tranches
                .iter()
                .filter(|t| t.investor_id == investor_id)
                .map(|t| t.units)
                .sum();
            let units_after = units_before - fee_units;
            let performance_pct = if !units_before.is_zero() {
                (fee_units / units_before) * dec!(100)
            } else {
                Decimal::ZERO
            };
            InvestorFeeSummary {
                investor_id,
                fee_amount,
                fee_units,
                units_before,
                units_after,
                performance_pct,
            }
        })
        .collect()
}

/// Opaque hash over `(end_date, total_nav, snapshot_version)` that `apply`
/// must receive unchanged (§4.5.2). `snapshot_version` is derived from every
/// tranche's id/units/hwm so any intervening mutation invalidates it.
pub fn confirm_token(end_date: DateTime<Utc>, total_nav: Decimal, snapshot: &FundSnapshot) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(end_date.to_rfc3339().as_bytes());
    hasher.update(total_nav.to_string().as_bytes());

    let mut tranche_fingerprints: Vec<String> = snapshot
        .tranches
        .iter()
        .map(|t| format!("{}:{}:{}:{}", t.tranche_id, t.units, t.hwm, t.entry_nav))
        .collect();
    tranche_fingerprints.sort();
    for fp in tranche_fingerprints {
        hasher.update(fp.as_bytes());
    }

    hasher.finalize().to_hex().to_string()
}

/// §4.5.2 — deterministic, read-only preview.
pub fn preview(
    snapshot: &FundSnapshot,
    end_date: DateTime<Utc>,
    total_nav: Decimal,
    params: FeeParams,
) -> FeePreview {
    let total_units = snapshot.total_units();
    let per_tranche = compute_tranche_fees(&snapshot.tranches, total_nav, total_units, end_date, params);
    let per_investor = rollup_per_investor(&per_tranche, &snapshot.tranches);

    let total_fee_amount = per_tranche.iter().map(|t| t.fee_amount).sum();
    let total_fee_units = per_tranche.iter().map(|t| t.fee_units).sum();

    FeePreview {
        end_date,
        total_nav,
        confirm_token: confirm_token(end_date, total_nav, snapshot),
        per_tranche,
        per_investor,
        total_fee_amount,
        total_fee_units,
    }
}

/// §4.5.4 — per-investor variant used for prospective withdrawal planning.
/// No state change; simply filters a freshly computed preview.
pub fn individual_fee(
    snapshot: &FundSnapshot,
    investor_id: i64,
    end_date: DateTime<Utc>,
    total_nav: Decimal,
    params: FeeParams,
) -> Option<InvestorFeeSummary> {
    preview(snapshot, end_date, total_nav, params)
        .per_investor
        .into_iter()
        .find(|s| s.investor_id == investor_id)
}

pub struct ApplyOutcome {
    pub plan: MutationPlan,
    pub transactions: Vec<Transaction>,
    pub fee_records: Vec<FeeRecord>,
}

/// §4.5.3 — apply a previously computed preview. The caller (`engine.rs`)
/// must recompute `confirm_token` against the latest snapshot and compare it
/// to the token the caller supplied before calling this; by the time we get
/// here the match has already been verified.
#[allow(clippy::too_many_arguments)]
pub fn apply(
    snapshot: &FundSnapshot,
    period: &str,
    end_date: DateTime<Utc>,
    total_nav: Decimal,
    params: FeeParams,
    next_tx_id: u64,
    next_fee_record_id: u64,
) -> Result<ApplyOutcome, FundError> {
    let total_units = snapshot.total_units();
    let price = price_per_unit(total_nav, total_units);
    let per_tranche = compute_tranche_fees(&snapshot.tranches, total_nav, total_units, end_date, params);

    let mut plan = MutationPlan::new();
    let mut deltas_by_investor: HashMap<i64, Vec<TrancheDelta>> = HashMap::new();
    let mut fee_cash_by_investor: HashMap<i64, Decimal> = HashMap::new();
    let mut fee_units_by_investor: HashMap<i64, Decimal> = HashMap::new();
    let mut total_fee_units = Decimal::ZERO;

    for tf in &per_tranche {
        if tf.fee_units <= Decimal::ZERO || is_dust(tf.fee_units) {
            continue;
        }
        let tranche = snapshot
            .tranches
            .iter()
            .find(|t| t.tranche_id == tf.tranche_id)
            .ok_or_else(|| FundError::Internal(format!("tranche {} vanished mid-apply", tf.tranche_id)))?;

        let units_after = tranche.units - tf.fee_units;
        let basis_before = (tranche.entry_nav, tranche.hwm);

        let mut updated = tranche.clone();
        updated.units = units_after;
        updated.entry_nav = price;
        updated.hwm = price;
        updated.invested_value = units_after * price;
        updated.cumulative_fees_paid += tf.fee_amount;
        plan.push(LedgerOp::UpsertTranche(updated));

        deltas_by_investor
            .entry(tf.investor_id)
            .or_default()
            .push(TrancheDelta {
                tranche_id: tf.tranche_id.clone(),
                units_delta: -tf.fee_units,
                invested_value_delta: units_after * price - tranche.invested_value,
                was_created: false,
                was_deleted: false,
                basis_before: Some(basis_before),
            });

        *fee_cash_by_investor.entry(tf.investor_id).or_default() += tf.fee_amount;
        *fee_units_by_investor.entry(tf.investor_id).or_default() += tf.fee_units;
        total_fee_units += tf.fee_units;
    }

    if total_fee_units > Decimal::ZERO {
        let fm_tranche_id = format!("fm-fee-{}", end_date.format("%Y%m%d"));
        let fm_tranche = Tranche::new_from_deposit(
            FUND_MANAGER_ID,
            fm_tranche_id.clone(),
            end_date,
            price,
            total_fee_units,
            fee_cash_by_investor.values().copied().sum(),
        );
        plan.push(LedgerOp::UpsertTranche(fm_tranche));
    }

    let mut transactions = Vec::new();
    let mut fee_records = Vec::new();
    let mut next_tx_id = next_tx_id;
    let mut next_fee_record_id = next_fee_record_id;

    let mut investor_ids: Vec<i64> = deltas_by_investor.keys().copied().collect();
    investor_ids.sort();

    for investor_id in investor_ids {
        let deltas = deltas_by_investor.remove(&investor_id).unwrap_or_default();
        let fee_amount = fee_cash_by_investor.get(&investor_id).copied().unwrap_or_default();
        let fee_units = fee_units_by_investor.get(&investor_id).copied().unwrap_or_default();

        let units_before: Decimal = snapshot
            .tranches_of(investor_id)
            .iter()
            .map(|t| t.units)
            .sum();
        let units_after = units_before - fee_units;

        let mut transaction = Transaction::new(
            next_tx_id,
            investor_id,
            end_date,
            TransactionType::Fee,
            fee_amount,
            total_nav,
            -fee_units,
            deltas,
        );
        transaction.fee_record_id = Some(next_fee_record_id);
        plan.push(LedgerOp::AppendTransaction(transaction.clone()));
        transactions.push(transaction);

        let fee_record = FeeRecord {
            id: next_fee_record_id,
            period: period.to_string(),
            investor_id,
            fee_amount,
            fee_units,
            calculation_date: end_date,
            units_before,
            units_after,
            nav_per_unit: price,
            description: format!("{period} performance fee"),
        };
        plan.push(LedgerOp::AppendFeeRecord(fee_record.clone()));
        fee_records.push(fee_record);

        next_tx_id += 1;
        next_fee_record_id += 1;
    }

    Ok(ApplyOutcome {
        plan,
        transactions,
        fee_records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn tranche(entry_date: DateTime<Utc>, entry_nav: Decimal, units: Decimal, hwm: Decimal) -> Tranche {
        Tranche::new_from_deposit(1, "t1".into(), entry_date, entry_nav, units, entry_nav * units)
            .tap_hwm(hwm)
    }

    trait TapHwm {
        fn tap_hwm(self, hwm: Decimal) -> Self;
    }
    impl TapHwm for Tranche {
        fn tap_hwm(mut self, hwm: Decimal) -> Self {
            self.hwm = hwm;
            self
        }
    }

    #[test]
    fn no_excess_below_hurdle_yields_zero_fee() {
        let t = tranche(date(2024, 1, 1), dec!(10000), dec!(1000), dec!(12000));
        let fees = compute_tranche_fees(&[t], dec!(12000000), dec!(1000), date(2024, 12, 31), FeeParams::default());
        assert_eq!(fees[0].fee_amount, Decimal::ZERO);
    }

    #[test]
    fn excess_above_hwm_charges_fee_rate() {
        let t = tranche(date(2024, 1, 1), dec!(10000), dec!(1000), dec!(12000));
        let fees = compute_tranche_fees(&[t], dec!(13000000), dec!(1000), date(2024, 12, 31), FeeParams::default());
        // price = 13,000, threshold = max(hurdle, hwm) = 12,000, excess = 1,000
        // fee_amount = 1000 * 1000 * 0.20 = 200,000
        assert_eq!(fees[0].fee_amount, dec!(200000));
    }
}
