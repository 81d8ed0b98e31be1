//! Core of a private investment-fund accounting engine: tranche ledger,
//! NAV-based unitization, and a high-water-mark performance-fee engine,
//! together with the transaction pipeline that mutates the ledger and the
//! backup/restore machinery that guarantees its durability.
//!
//! [`FundEngine`] is the sole public facade (§6.1 of the design spec); every
//! mutating operation runs under its process-wide write mutex (§5, §8) and
//! produces at least one [`entities::Transaction`] row plus one
//! [`store::AuditEntry`] (I6). Reporting (`reporting`) is pure functions
//! over a [`store::FundSnapshot`] and never takes the write mutex.

pub mod backup;
pub mod config;
pub mod engine;
pub mod entities;
pub mod error;
pub mod fees;
pub mod ledger;
pub mod money;
pub mod reporting;
pub mod store;

pub use config::{DataSource, Environment, FundConfig};
pub use engine::FundEngine;
pub use error::FundError;
pub use ledger::FmWithdrawalMode;
pub use store::{FundSnapshot, FundStore};
