// src/entities/fee_record.rs
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Immutable record of a single investor's performance-fee charge for one
/// period (spec.md §3, §4.5.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRecord {
    pub id: u64,
    pub period: String,
    pub investor_id: i64,
    pub fee_amount: Decimal,
    pub fee_units: Decimal,
    pub calculation_date: DateTime<Utc>,
    pub units_before: Decimal,
    pub units_after: Decimal,
    pub nav_per_unit: Decimal,
    pub description: String,
}
