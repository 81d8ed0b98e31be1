// src/reporting.rs
//
// C6 reporting projection. Pure functions over a `FundSnapshot`; no I/O, no
// mutation, safe to call with any consistent read snapshot (§4.6).
use crate::entities::investor::FUND_MANAGER_ID;
use crate::entities::TransactionType;
use crate::money::price_per_unit;
use crate::store::FundSnapshot;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// `Σ(tranche.units * price_per_unit(total_nav))` for one investor.
pub fn investor_balance(snapshot: &FundSnapshot, investor_id: i64, total_nav: Decimal) -> Decimal {
    let price = price_per_unit(total_nav, snapshot.total_units());
    snapshot
        .tranches_of(investor_id)
        .iter()
        .map(|t| t.units * price)
        .sum()
}

#[derive(Debug, Clone)]
pub struct LifetimePerformance {
    pub investor_id: i64,
    pub current_value: Decimal,
    pub original_invested: Decimal,
    pub total_withdrawn_cash: Decimal,
    pub total_fees_paid: Decimal,
    pub gross: Decimal,
    pub net: Decimal,
    pub gross_return: Decimal,
    pub net_return: Decimal,
}

/// §4.6: `gross = current − original_invested + withdrawn`,
/// `net = gross − fees_paid`, returns expressed as fractions of
/// `original_invested`.
pub fn lifetime_performance(
    snapshot: &FundSnapshot,
    investor_id: i64,
    total_nav: Decimal,
) -> LifetimePerformance {
    let current_value = investor_balance(snapshot, investor_id, total_nav);

    let original_invested: Decimal = snapshot
        .tranches_of(investor_id)
        .iter()
        .map(|t| t.original_invested_value)
        .sum();

    let investor_txs: Vec<_> = snapshot
        .transactions
        .iter()
        .filter(|t| t.investor_id == investor_id)
        .collect();

    let total_withdrawn_cash: Decimal = investor_txs
        .iter()
        .filter(|t| matches!(t.tx_type, TransactionType::Withdrawal | TransactionType::FundManagerWithdrawal))
        .map(|t| t.amount)
        .sum();

    let total_fees_paid: Decimal = investor_txs
        .iter()
        .filter(|t| t.tx_type == TransactionType::Fee)
        .map(|t| t.amount)
        .sum();

    let gross = current_value - original_invested + total_withdrawn_cash;
    let net = gross - total_fees_paid;

    let (gross_return, net_return) = if !original_invested.is_zero() {
        (gross / original_invested, net / original_invested)
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };

    LifetimePerformance {
        investor_id,
        current_value,
        original_invested,
        total_withdrawn_cash,
        total_fees_paid,
        gross,
        net,
        gross_return,
        net_return,
    }
}

#[derive(Debug, Clone)]
pub struct DashboardKpis {
    pub total_nav: Decimal,
    pub total_units: Decimal,
    pub investor_count: usize,
    pub total_fees_paid: Decimal,
    pub fund_manager_value: Decimal,
    pub gross_return_since_inception: Decimal,
}

/// §4.6: fund-wide summary for the manager's dashboard.
pub fn dashboard_kpis(snapshot: &FundSnapshot, total_nav: Decimal) -> DashboardKpis {
    let total_units = snapshot.total_units();

    let investor_count = snapshot
        .investors
        .iter()
        .filter(|i| !i.is_fund_manager)
        .count();

    let total_fees_paid: Decimal = snapshot
        .transactions
        .iter()
        .filter(|t| t.tx_type == TransactionType::Fee)
        .map(|t| t.amount)
        .sum();

    let total_deposited: Decimal = snapshot
        .transactions
        .iter()
        .filter(|t| t.tx_type == TransactionType::Deposit)
        .map(|t| t.amount)
        .sum();

    let gross_return_since_inception = if !total_deposited.is_zero() {
        (total_nav - total_deposited) / total_deposited
    } else {
        Decimal::ZERO
    };

    DashboardKpis {
        total_nav,
        total_units,
        investor_count,
        total_fees_paid,
        fund_manager_value: investor_balance(snapshot, FUND_MANAGER_ID, total_nav),
        gross_return_since_inception,
    }
}

#[derive(Debug, Clone)]
pub struct NavPoint {
    pub date: DateTime<Utc>,
    pub nav: Decimal,
    pub tx_type: TransactionType,
}

/// Chronological `(date, nav, type)` sequence from the transaction log.
pub fn nav_history(snapshot: &FundSnapshot) -> Vec<NavPoint> {
    let mut points: Vec<NavPoint> = snapshot
        .transactions
        .iter()
        .map(|t| NavPoint {
            date: t.date,
            nav: t.nav,
            tx_type: t.tx_type,
        })
        .collect();
    points.sort_by(|a, b| a.date.cmp(&b.date));
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Tranche;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn investor_balance_prices_units_at_given_nav() {
        let tranche = Tranche::new_from_deposit(1, "t1".into(), date(2024, 1, 1), dec!(10000), dec!(1000), dec!(10000000));
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![tranche],
            transactions: vec![],
            fee_records: vec![],
        };
        let balance = investor_balance(&snapshot, 1, dec!(12000000));
        assert_eq!(balance, dec!(12000000));
    }

    #[test]
    fn dashboard_kpis_with_no_activity_is_zeroed() {
        let snapshot = FundSnapshot {
            investors: vec![],
            tranches: vec![],
            transactions: vec![],
            fee_records: vec![],
        };
        let kpis = dashboard_kpis(&snapshot, dec!(0));
        assert_eq!(kpis.total_units, Decimal::ZERO);
        assert_eq!(kpis.gross_return_since_inception, Decimal::ZERO);
    }
}
