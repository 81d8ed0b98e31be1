// src/config.rs
//
// Typed configuration surface for the fund core (§6.4). The API layer
// assembles one of these from its own environment/config loading and hands
// it to `FundEngine::new`; this crate never reads environment variables or
// files itself.
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Postgres,
}

#[derive(Debug, Clone)]
pub struct FundConfig {
    /// Gates the stricter validations in `FundEngine` (fee-safety
    /// acknowledgment, mandatory safety backup before restore) that a
    /// production deployment always wants and a developer may not.
    pub environment: Environment,
    pub data_source: DataSource,
    pub auto_backup_on_new_transaction: bool,
    pub feature_backup_restore: bool,
    pub feature_fee_safety: bool,
    pub fee_rate: Decimal,
    pub hurdle_rate: Decimal,
    pub seed_price: Decimal,
    pub dust_units: Decimal,
    pub write_lock_timeout: Duration,
}

impl Default for FundConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            data_source: DataSource::Postgres,
            auto_backup_on_new_transaction: false,
            feature_backup_restore: true,
            feature_fee_safety: true,
            fee_rate: dec!(0.20),
            hurdle_rate: dec!(0.06),
            seed_price: crate::money::SEED_PRICE,
            dust_units: crate::money::DUST_UNITS,
            write_lock_timeout: Duration::from_secs(10),
        }
    }
}

impl FundConfig {
    pub fn fee_params(&self) -> crate::fees::FeeParams {
        crate::fees::FeeParams {
            fee_rate: self.fee_rate,
            hurdle_rate: self.hurdle_rate,
        }
    }
}
