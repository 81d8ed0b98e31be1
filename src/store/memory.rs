// src/store/memory.rs
use super::{AuditEntry, FundSnapshot, FundStore, LedgerOp, MutationPlan, TransactionFilter};
use crate::entities::{FeeRecord, Investor, Transaction, Tranche};
use crate::entities::investor::FUND_MANAGER_ID;
use crate::error::FundError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
struct Tables {
    investors: HashMap<i64, Investor>,
    tranches: HashMap<String, Tranche>,
    transactions: HashMap<u64, Transaction>,
    fee_records: HashMap<u64, FeeRecord>,
    audit: Vec<AuditEntry>,
    next_tx_id: u64,
    next_fee_id: u64,
    next_audit_id: u64,
}

/// In-memory `FundStore` used by tests and by `cargo test` scenarios that
/// don't need Postgres, mirroring `ledger/src/adapters/memory.rs`: one
/// `Mutex` held for the entire operation acts as this adapter's equivalent
/// of BEGIN/COMMIT.
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FundStore for MemoryStore {
    async fn get_investor(&self, id: i64) -> Result<Investor, FundError> {
        let tables = self.tables.lock().unwrap();
        tables
            .investors
            .get(&id)
            .cloned()
            .ok_or_else(|| FundError::NotFound(format!("investor {id}")))
    }

    async fn list_investors(&self) -> Result<Vec<Investor>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.investors.values().cloned().collect())
    }

    async fn ensure_fund_manager(&self) -> Result<Investor, FundError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(fm) = tables.investors.get(&FUND_MANAGER_ID) {
            return Ok(fm.clone());
        }
        let fm = Investor::new_fund_manager();
        tables.investors.insert(FUND_MANAGER_ID, fm.clone());
        Ok(fm)
    }

    async fn list_tranches_by_investor(&self, investor_id: i64) -> Result<Vec<Tranche>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .tranches
            .values()
            .filter(|t| t.investor_id == investor_id)
            .cloned()
            .collect())
    }

    async fn list_all_tranches(&self) -> Result<Vec<Tranche>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.tranches.values().cloned().collect())
    }

    async fn next_transaction_id(&self) -> Result<u64, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.next_tx_id + 1)
    }

    async fn list_transactions(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .values()
            .filter(|tx| {
                filter
                    .investor_id
                    .map(|id| id == tx.investor_id)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn latest_transaction(&self) -> Result<Option<Transaction>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .transactions
            .values()
            .max_by_key(|t| (t.date, t.id))
            .cloned())
    }

    async fn get_transaction(&self, id: u64) -> Result<Transaction, FundError> {
        let tables = self.tables.lock().unwrap();
        tables
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| FundError::NotFound(format!("transaction {id}")))
    }

    async fn next_fee_record_id(&self) -> Result<u64, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.next_fee_id + 1)
    }

    async fn list_fee_records(
        &self,
        period: Option<&str>,
        investor_id: Option<i64>,
    ) -> Result<Vec<FeeRecord>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .fee_records
            .values()
            .filter(|fr| period.map(|p| p == fr.period).unwrap_or(true))
            .filter(|fr| investor_id.map(|id| id == fr.investor_id).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn next_audit_id(&self) -> Result<u64, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.next_audit_id + 1)
    }

    async fn list_audit(&self) -> Result<Vec<AuditEntry>, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.audit.clone())
    }

    async fn execute_plan(&self, plan: &MutationPlan) -> Result<(), FundError> {
        // Hold the lock for the whole plan — our equivalent of a storage
        // transaction. Either every op below lands, or (since we never
        // return early once mutation starts) the plan was pre-validated by
        // the caller before being handed to us.
        let mut tables = self.tables.lock().unwrap();

        for op in plan.operations() {
            match op {
                LedgerOp::UpsertInvestor(investor) => {
                    tables.investors.insert(investor.id, investor.clone());
                }
                LedgerOp::UpsertTranche(tranche) => {
                    tables
                        .tranches
                        .insert(tranche.tranche_id.clone(), tranche.clone());
                }
                LedgerOp::DeleteTranche(tranche_id) => {
                    tables.tranches.remove(tranche_id);
                }
                LedgerOp::AppendTransaction(tx) => {
                    tables.next_tx_id = tables.next_tx_id.max(tx.id);
                    tables.transactions.insert(tx.id, tx.clone());
                }
                LedgerOp::DeleteTransaction(id) => {
                    tables.transactions.remove(id);
                }
                LedgerOp::AppendFeeRecord(fr) => {
                    tables.next_fee_id = tables.next_fee_id.max(fr.id);
                    tables.fee_records.insert(fr.id, fr.clone());
                }
                LedgerOp::DeleteFeeRecord(id) => {
                    tables.fee_records.remove(id);
                }
                LedgerOp::AppendAudit(entry) => {
                    tables.next_audit_id = tables.next_audit_id.max(entry.id);
                    tables.audit.push(entry.clone());
                }
            }
        }

        Ok(())
    }

    async fn snapshot(&self) -> Result<FundSnapshot, FundError> {
        let tables = self.tables.lock().unwrap();
        Ok(FundSnapshot {
            investors: tables.investors.values().cloned().collect(),
            tranches: tables.tranches.values().cloned().collect(),
            transactions: tables.transactions.values().cloned().collect(),
            fee_records: tables.fee_records.values().cloned().collect(),
        })
    }

    async fn replace_all(&self, snapshot: FundSnapshot) -> Result<(), FundError> {
        let mut tables = self.tables.lock().unwrap();
        tables.investors = snapshot.investors.into_iter().map(|i| (i.id, i)).collect();
        tables.tranches = snapshot
            .tranches
            .into_iter()
            .map(|t| (t.tranche_id.clone(), t))
            .collect();
        tables.next_tx_id = snapshot.transactions.iter().map(|t| t.id).max().unwrap_or(0);
        tables.transactions = snapshot.transactions.into_iter().map(|t| (t.id, t)).collect();
        tables.next_fee_id = snapshot.fee_records.iter().map(|f| f.id).max().unwrap_or(0);
        tables.fee_records = snapshot.fee_records.into_iter().map(|f| (f.id, f)).collect();
        Ok(())
    }
}
