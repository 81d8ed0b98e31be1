// src/entities/tranche.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A lot created by one deposit, mutated by withdrawals and fee applications
/// (spec.md §3, C3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tranche {
    pub investor_id: i64,
    pub tranche_id: String,

    /// Current basis; reset on fee application.
    pub entry_date: DateTime<Utc>,
    pub entry_nav: Decimal,

    /// Immutable basis, used for lifetime-return reporting (never mutated
    /// after creation).
    pub original_entry_date: DateTime<Utc>,
    pub original_entry_nav: Decimal,

    pub units: Decimal,

    pub original_invested_value: Decimal,
    pub invested_value: Decimal,

    /// Highest price-per-unit this tranche has ever been revalued at; floor
    /// for fee calculations. Never decreases (I2).
    pub hwm: Decimal,

    pub cumulative_fees_paid: Decimal,
}

impl Tranche {
    pub fn new_from_deposit(
        investor_id: i64,
        tranche_id: String,
        date: DateTime<Utc>,
        price: Decimal,
        minted_units: Decimal,
        cash_amount: Decimal,
    ) -> Self {
        Self {
            investor_id,
            tranche_id,
            entry_date: date,
            entry_nav: price,
            original_entry_date: date,
            original_entry_nav: price,
            units: minted_units,
            original_invested_value: cash_amount,
            invested_value: cash_amount,
            hwm: price,
            cumulative_fees_paid: Decimal::ZERO,
        }
    }

    /// HWM is a floor; it may only rise (spec.md §4.3.4, invariant I2/#8.2).
    pub fn bump_hwm(&mut self, current_price: Decimal) {
        if current_price > self.hwm {
            self.hwm = current_price;
        }
    }
}
