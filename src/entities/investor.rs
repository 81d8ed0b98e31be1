// src/entities/investor.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Investor id reserved for the Fund Manager (spec.md §3, I4).
pub const FUND_MANAGER_ID: i64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Investor {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub address: String,
    pub join_date: NaiveDate,
    pub is_fund_manager: bool,
}

impl Investor {
    pub fn new_fund_manager() -> Self {
        Self {
            id: FUND_MANAGER_ID,
            name: "Fund Manager".to_string(),
            phone: String::new(),
            email: String::new(),
            address: String::new(),
            join_date: chrono::Utc::now().date_naive(),
            is_fund_manager: true,
        }
    }
}
