// src/engine.rs
//
// C4 transaction pipeline + C8 audit log/concurrency gate. `FundEngine` is
// the sole public facade (§6.1): one method per command, each acquiring the
// process-wide write mutex, building a `MutationPlan` from the pure C3/C5
// builders, appending an audit entry, and executing the plan as one storage
// transaction. Grounded on `ousia/src/lib.rs`'s `Engine` (an adapter-wrapping
// facade type) and on `ledger/src/money.rs`'s stage-then-execute pattern:
// domain logic never touches the store directly, it only ever returns a
// plan for this facade to run.
use crate::backup::{self, BackupArchive, BackupKind, BackupSummary};
use crate::config::{Environment, FundConfig};
use crate::entities::investor::FUND_MANAGER_ID;
use crate::entities::{Investor, Transaction, TransactionType, Tranche};
use crate::error::FundError;
use crate::fees::{self, ApplyOutcome, FeePreview, InvestorFeeSummary};
use crate::ledger::{self, FmWithdrawalMode, MutationOutcome};
use crate::money::SEED_PRICE;
use crate::reporting::{self, DashboardKpis, LifetimePerformance, NavPoint};
use crate::store::{AuditEntry, FundSnapshot, FundStore, LedgerOp, MutationPlan, TransactionFilter};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use metrics::{counter, histogram};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

/// The fund core's single public entry point. Holds the storage adapter, the
/// process-wide write mutex (§5, §8) and the backup export directory.
/// Cheap to clone (everything behind it is `Arc`) so callers can hand copies
/// to concurrent request handlers.
#[derive(Clone)]
pub struct FundEngine {
    store: Arc<dyn FundStore>,
    config: FundConfig,
    write_gate: Arc<AsyncMutex<()>>,
    backup_dir: PathBuf,
    audit_seq: Arc<AtomicU64>,
}

impl FundEngine {
    pub fn new(store: Arc<dyn FundStore>, config: FundConfig, backup_dir: PathBuf) -> Self {
        Self {
            store,
            config,
            write_gate: Arc::new(AsyncMutex::new(())),
            backup_dir,
            audit_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &FundConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FundStore> {
        &self.store
    }

    /// Acquire the write mutex with the configured timeout, yielding `Busy`
    /// on expiry (§5). Reads never go through this.
    async fn acquire_write_gate(&self) -> Result<tokio::sync::MutexGuard<'_, ()>, FundError> {
        tokio::time::timeout(self.config.write_lock_timeout, self.write_gate.lock())
            .await
            .map_err(|_| FundError::Busy)
    }

    async fn next_audit_id(&self) -> Result<u64, FundError> {
        let from_store = self.store.next_audit_id().await?;
        let local = self.audit_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(from_store.max(local))
    }

    fn hash_snapshot(snapshot: &FundSnapshot) -> String {
        let bytes = serde_json::to_vec(snapshot).unwrap_or_default();
        blake3::hash(&bytes).to_hex().to_string()
    }

    async fn build_audit_entry(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        detail: String,
        before: &FundSnapshot,
        after: &FundSnapshot,
    ) -> Result<AuditEntry, FundError> {
        Ok(AuditEntry {
            id: self.next_audit_id().await?,
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            before_hash: Self::hash_snapshot(before),
            after_hash: Self::hash_snapshot(after),
            detail,
        })
    }

    /// The NAV used by every operation that doesn't receive one explicitly:
    /// the `nav` of the most recent transaction by `(date, id)` descending,
    /// regardless of type, falling back to the seed price when the fund has
    /// never transacted (§4.4.1, I3).
    #[instrument(skip(self))]
    pub async fn current_nav(&self) -> Result<Decimal, FundError> {
        match self.store.latest_transaction().await? {
            Some(tx) => Ok(tx.nav),
            None => Ok(self.config.seed_price.max(SEED_PRICE)),
        }
    }

    // ==================== C1 investor commands ====================

    #[instrument(skip(self, investor))]
    pub async fn add_investor(&self, investor: Investor) -> Result<Investor, FundError> {
        let _gate = self.acquire_write_gate().await?;
        let before = self.store.snapshot().await?;
        if before.investors.iter().any(|i| i.id == investor.id) {
            return Err(FundError::Conflict(format!("investor {} already exists", investor.id)));
        }

        let mut plan = MutationPlan::new();
        plan.push(LedgerOp::UpsertInvestor(investor.clone()));

        let mut after = before.clone();
        after.investors.push(investor.clone());
        let audit = self
            .build_audit_entry(
                &investor.id.to_string(),
                "add_investor",
                &investor.id.to_string(),
                format!("created investor {}", investor.name),
                &before,
                &after,
            )
            .await?;
        plan.push(LedgerOp::AppendAudit(audit));

        self.store.execute_plan(&plan).await?;
        counter!("fund.investors_added").increment(1);
        Ok(investor)
    }

    #[instrument(skip(self, investor))]
    pub async fn update_investor(&self, investor: Investor) -> Result<Investor, FundError> {
        let _gate = self.acquire_write_gate().await?;
        let before = self.store.snapshot().await?;
        if !before.investors.iter().any(|i| i.id == investor.id) {
            return Err(FundError::NotFound(format!("investor {}", investor.id)));
        }

        let mut plan = MutationPlan::new();
        plan.push(LedgerOp::UpsertInvestor(investor.clone()));

        let mut after = before.clone();
        if let Some(slot) = after.investors.iter_mut().find(|i| i.id == investor.id) {
            *slot = investor.clone();
        }
        let audit = self
            .build_audit_entry(
                &investor.id.to_string(),
                "update_investor",
                &investor.id.to_string(),
                format!("updated investor {}", investor.name),
                &before,
                &after,
            )
            .await?;
        plan.push(LedgerOp::AppendAudit(audit));

        self.store.execute_plan(&plan).await?;
        Ok(investor)
    }

    /// I4 — creates investor id 0 if it does not yet exist; a no-op read
    /// otherwise. Not gated by the write mutex when the manager already
    /// exists, since no mutation occurs.
    #[instrument(skip(self))]
    pub async fn ensure_fund_manager(&self) -> Result<Investor, FundError> {
        if let Ok(fm) = self.store.get_investor(FUND_MANAGER_ID).await {
            return Ok(fm);
        }
        let _gate = self.acquire_write_gate().await?;
        self.store.ensure_fund_manager().await
    }

    // ==================== C4 transaction commands ====================

    async fn commit_mutation(
        &self,
        before: &FundSnapshot,
        outcome: MutationOutcome,
        actor: String,
        action: &str,
    ) -> Result<Transaction, FundError> {
        let mut plan = outcome.plan;
        let transaction = outcome.transaction;

        let mut after = before.clone();
        Self::apply_plan_to_snapshot(&mut after, &plan);

        let audit = self
            .build_audit_entry(
                &actor,
                action,
                &transaction.id.to_string(),
                format!("{action} investor={} amount={}", transaction.investor_id, transaction.amount),
                before,
                &after,
            )
            .await?;
        plan.push(LedgerOp::AppendAudit(audit));

        self.store.execute_plan(&plan).await?;
        self.maybe_schedule_auto_backup();
        Ok(transaction)
    }

    /// Mirror a `MutationPlan`'s effect onto an in-memory snapshot so the
    /// audit entry's `after_hash` reflects the post-mutation state without a
    /// second round trip to storage.
    fn apply_plan_to_snapshot(snapshot: &mut FundSnapshot, plan: &MutationPlan) {
        for op in plan.operations() {
            match op {
                LedgerOp::UpsertInvestor(investor) => {
                    snapshot.investors.retain(|i| i.id != investor.id);
                    snapshot.investors.push(investor.clone());
                }
                LedgerOp::UpsertTranche(tranche) => {
                    snapshot.tranches.retain(|t| t.tranche_id != tranche.tranche_id);
                    snapshot.tranches.push(tranche.clone());
                }
                LedgerOp::DeleteTranche(id) => {
                    snapshot.tranches.retain(|t| &t.tranche_id != id);
                }
                LedgerOp::AppendTransaction(tx) => {
                    snapshot.transactions.retain(|t| t.id != tx.id);
                    snapshot.transactions.push(tx.clone());
                }
                LedgerOp::DeleteTransaction(id) => {
                    snapshot.transactions.retain(|t| &t.id != id);
                }
                LedgerOp::AppendFeeRecord(fr) => {
                    snapshot.fee_records.retain(|f| f.id != fr.id);
                    snapshot.fee_records.push(fr.clone());
                }
                LedgerOp::DeleteFeeRecord(id) => {
                    snapshot.fee_records.retain(|f| &f.id != id);
                }
                LedgerOp::AppendAudit(_) => {}
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn deposit(
        &self,
        investor_id: i64,
        cash_amount: Decimal,
        new_total_nav: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Transaction, FundError> {
        let _gate = self.acquire_write_gate().await?;
        self.store.get_investor(investor_id).await?;

        let before = self.store.snapshot().await?;
        let next_id = self.store.next_transaction_id().await?;
        let outcome = ledger::build_deposit(&before, investor_id, cash_amount, new_total_nav, date, next_id)?;

        let tx = self
            .commit_mutation(&before, outcome, investor_id.to_string(), "deposit")
            .await?;
        histogram!("fund.deposit.cash_amount").record(cash_amount.to_f64().unwrap_or(0.0));
        info!(investor_id, %cash_amount, %new_total_nav, "deposit committed");
        Ok(tx)
    }

    #[instrument(skip(self))]
    pub async fn withdraw(
        &self,
        investor_id: i64,
        cash_amount: Decimal,
        new_total_nav: Decimal,
        date: DateTime<Utc>,
    ) -> Result<Transaction, FundError> {
        let _gate = self.acquire_write_gate().await?;
        self.store.get_investor(investor_id).await?;

        let before = self.store.snapshot().await?;
        let next_id = self.store.next_transaction_id().await?;
        let outcome = ledger::build_withdrawal(
            &before,
            investor_id,
            cash_amount,
            new_total_nav,
            date,
            next_id,
            TransactionType::Withdrawal,
        )?;

        self.commit_mutation(&before, outcome, investor_id.to_string(), "withdraw").await
    }

    #[instrument(skip(self))]
    pub async fn nav_update(&self, new_total_nav: Decimal, date: DateTime<Utc>) -> Result<Transaction, FundError> {
        let _gate = self.acquire_write_gate().await?;
        self.store.ensure_fund_manager().await?;

        let before = self.store.snapshot().await?;
        let next_id = self.store.next_transaction_id().await?;
        let outcome = ledger::build_nav_update(&before, new_total_nav, date, next_id)?;

        self.commit_mutation(&before, outcome, "system".to_string(), "nav_update").await
    }

    /// §4.4.2 — Fund-Manager withdrawal in either `partial` or `full` mode.
    #[instrument(skip(self))]
    pub async fn fund_manager_withdraw(
        &self,
        mode: FmWithdrawalMode,
        date: DateTime<Utc>,
    ) -> Result<Transaction, FundError> {
        let _gate = self.acquire_write_gate().await?;
        self.store.ensure_fund_manager().await?;

        let before = self.store.snapshot().await?;
        let current_total_nav = before
            .latest_nav()
            .unwrap_or(self.config.seed_price.max(SEED_PRICE));
        let next_id = self.store.next_transaction_id().await?;
        let outcome = ledger::build_fund_manager_withdrawal(&before, current_total_nav, date, next_id, mode)?;

        self.commit_mutation(&before, outcome, FUND_MANAGER_ID.to_string(), "fund_manager_withdraw")
            .await
    }

    // ==================== §4.4.3 delete / undo ====================

    async fn reverse_transaction(&self, id: u64, action: &str) -> Result<(), FundError> {
        let _gate = self.acquire_write_gate().await?;
        let before = self.store.snapshot().await?;
        let tx = before
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| FundError::NotFound(format!("transaction {id}")))?;

        // A Fee transaction's mutation spans two investors: the debited
        // investor (tracked via `affected_tranches`) and the Fund Manager,
        // whose minted fee tranche is not attributed to any single
        // transaction's delta list. The "latest transaction of the affected
        // investor" rule below cannot soundly reverse it — doing so would
        // restore the debited investor's units while leaving the FM's
        // minted units in place, violating unit conservation (I1). Reject
        // outright rather than reverse half of a cross-investor mutation.
        if tx.tx_type == TransactionType::Fee {
            return Err(FundError::NotReversible(format!(
                "transaction {id} is a Fee application and cannot be undone"
            )));
        }

        let latest_for_investor = before
            .transactions
            .iter()
            .filter(|t| t.investor_id == tx.investor_id)
            .max_by_key(|t| (t.date, t.id))
            .map(|t| t.id);
        if latest_for_investor != Some(id) {
            return Err(FundError::NotReversible(format!(
                "transaction {id} is not the latest transaction for investor {}",
                tx.investor_id
            )));
        }

        let mut plan = ledger::build_reversal(&before, &tx)?;

        let mut after = before.clone();
        Self::apply_plan_to_snapshot(&mut after, &plan);

        let audit = self
            .build_audit_entry(
                &tx.investor_id.to_string(),
                action,
                &id.to_string(),
                format!("{action} of transaction {id} ({:?})", tx.tx_type),
                &before,
                &after,
            )
            .await?;
        plan.push(LedgerOp::AppendAudit(audit));

        self.store.execute_plan(&plan).await?;
        self.maybe_schedule_auto_backup();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_transaction(&self, id: u64) -> Result<(), FundError> {
        self.reverse_transaction(id, "delete_transaction").await
    }

    #[instrument(skip(self))]
    pub async fn undo_transaction(&self, id: u64) -> Result<(), FundError> {
        self.reverse_transaction(id, "undo_transaction").await
    }

    // ==================== C5 fee engine ====================

    #[instrument(skip(self))]
    pub async fn preview_fees(&self, end_date: DateTime<Utc>, total_nav: Decimal) -> Result<FeePreview, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(fees::preview(&snapshot, end_date, total_nav, self.config.fee_params()))
    }

    #[instrument(skip(self))]
    pub async fn calculate_individual_fee(
        &self,
        investor_id: i64,
        end_date: DateTime<Utc>,
        total_nav: Decimal,
    ) -> Result<Option<InvestorFeeSummary>, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(fees::individual_fee(&snapshot, investor_id, end_date, total_nav, self.config.fee_params()))
    }

    /// §4.5.3 — gated on `feature.fee_safety`: the caller must supply both
    /// acknowledgments when that feature is enabled.
    #[instrument(skip(self, confirm_token))]
    #[allow(clippy::too_many_arguments)]
    pub async fn apply_fees(
        &self,
        period: &str,
        end_date: DateTime<Utc>,
        total_nav: Decimal,
        confirm_token: &str,
        acknowledge_risk: bool,
        acknowledge_backup: bool,
    ) -> Result<ApplyOutcome, FundError> {
        let fee_safety_required = self.config.feature_fee_safety || self.config.environment == Environment::Production;
        if fee_safety_required && !(acknowledge_risk && acknowledge_backup) {
            return Err(FundError::PreconditionFailed(
                "apply_fees requires explicit risk and backup acknowledgment".into(),
            ));
        }

        let _gate = self.acquire_write_gate().await?;
        let before = self.store.snapshot().await?;

        let recomputed = fees::confirm_token(end_date, total_nav, &before);
        if recomputed != confirm_token {
            return Err(FundError::StaleConfirmation);
        }

        let next_tx_id = self.store.next_transaction_id().await?;
        let next_fee_record_id = self.store.next_fee_record_id().await?;
        let outcome = fees::apply(
            &before,
            period,
            end_date,
            total_nav,
            self.config.fee_params(),
            next_tx_id,
            next_fee_record_id,
        )?;

        let mut plan = outcome.plan;
        let mut after = before.clone();
        Self::apply_plan_to_snapshot(&mut after, &plan);

        let audit = self
            .build_audit_entry(
                "fund-manager",
                "apply_fees",
                period,
                format!(
                    "applied {} fee records totalling {} cash / {} units",
                    outcome.fee_records.len(),
                    outcome.fee_records.iter().map(|f| f.fee_amount).sum::<Decimal>(),
                    outcome.fee_records.iter().map(|f| f.fee_units).sum::<Decimal>()
                ),
                &before,
                &after,
            )
            .await?;
        plan.push(LedgerOp::AppendAudit(audit));

        self.store.execute_plan(&plan).await?;
        self.maybe_schedule_auto_backup();

        Ok(ApplyOutcome {
            plan,
            transactions: outcome.transactions,
            fee_records: outcome.fee_records,
        })
    }

    // ==================== C6 reporting ====================

    #[instrument(skip(self))]
    pub async fn investor_balance(&self, investor_id: i64, total_nav: Decimal) -> Result<Decimal, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(reporting::investor_balance(&snapshot, investor_id, total_nav))
    }

    #[instrument(skip(self))]
    pub async fn lifetime_performance(
        &self,
        investor_id: i64,
        total_nav: Decimal,
    ) -> Result<LifetimePerformance, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(reporting::lifetime_performance(&snapshot, investor_id, total_nav))
    }

    #[instrument(skip(self))]
    pub async fn dashboard_kpis(&self, total_nav: Decimal) -> Result<DashboardKpis, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(reporting::dashboard_kpis(&snapshot, total_nav))
    }

    #[instrument(skip(self))]
    pub async fn nav_history(&self) -> Result<Vec<NavPoint>, FundError> {
        let snapshot = self.store.snapshot().await?;
        Ok(reporting::nav_history(&snapshot))
    }

    pub async fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>, FundError> {
        self.store.list_transactions(filter).await
    }

    pub async fn list_fee_records(
        &self,
        period: Option<&str>,
        investor_id: Option<i64>,
    ) -> Result<Vec<crate::entities::FeeRecord>, FundError> {
        self.store.list_fee_records(period, investor_id).await
    }

    pub async fn list_tranches_by_investor(&self, investor_id: i64) -> Result<Vec<Tranche>, FundError> {
        self.store.list_tranches_by_investor(investor_id).await
    }

    pub async fn list_audit(&self) -> Result<Vec<AuditEntry>, FundError> {
        self.store.list_audit().await
    }

    // ==================== C7 backup / restore ====================

    #[instrument(skip(self))]
    pub async fn manual_backup(&self) -> Result<BackupSummary, FundError> {
        let _gate = self.acquire_write_gate().await?;
        let snapshot = self.store.snapshot().await?;
        self.write_backup(snapshot, BackupKind::Manual).await
    }

    async fn write_backup(&self, snapshot: FundSnapshot, kind: BackupKind) -> Result<BackupSummary, FundError> {
        let archive = BackupArchive::new(snapshot, kind, Utc::now())?;
        backup::write_archive(&self.backup_dir, &archive).await?;
        Ok(BackupSummary {
            id: archive.manifest.id,
            created_at: archive.manifest.created_at,
            kind: archive.manifest.kind,
            row_counts: archive.manifest.row_counts,
        })
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupSummary>, FundError> {
        backup::list_backups(&self.backup_dir).await
    }

    /// §4.7 restore — requires the literal confirm phrase, optionally takes
    /// a `safety` snapshot first, replaces every table inside one storage
    /// transaction, and emits a single `restore` audit entry.
    #[instrument(skip(self, confirm_phrase))]
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        confirm_phrase: &str,
        create_safety_backup: bool,
    ) -> Result<(), FundError> {
        if !self.config.feature_backup_restore {
            return Err(FundError::PreconditionFailed("restore is disabled by configuration".into()));
        }
        if confirm_phrase != "RESTORE" {
            return Err(FundError::PreconditionFailed(
                "confirm_phrase must be exactly \"RESTORE\"".into(),
            ));
        }
        if self.config.environment == Environment::Production && !create_safety_backup {
            return Err(FundError::PreconditionFailed(
                "production environment requires create_safety_backup=true before restore".into(),
            ));
        }

        let _gate = self.acquire_write_gate().await?;
        let before = self.store.snapshot().await?;

        if create_safety_backup {
            self.write_backup(before.clone(), BackupKind::Safety).await?;
        }

        let archive = backup::read_archive(&self.backup_dir, backup_id).await?;
        archive.verify_checksum()?;

        self.store.replace_all(archive.snapshot.clone()).await?;

        let audit = self
            .build_audit_entry(
                "system",
                "restore",
                backup_id,
                format!("restored backup {backup_id} (safety_snapshot={create_safety_backup})"),
                &before,
                &archive.snapshot,
            )
            .await?;
        let mut plan = MutationPlan::new();
        plan.push(LedgerOp::AppendAudit(audit));
        self.store.execute_plan(&plan).await?;

        Ok(())
    }

    /// §4.7 `auto_backup_on_new_transaction` — fire-and-forget; a failure
    /// here is logged and never propagates into the originating mutation.
    fn maybe_schedule_auto_backup(&self) {
        if !self.config.auto_backup_on_new_transaction {
            return;
        }
        let store = Arc::clone(&self.store);
        let backup_dir = self.backup_dir.clone();
        tokio::spawn(async move {
            let snapshot = match store.snapshot().await {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "auto-backup snapshot read failed");
                    return;
                }
            };
            let archive = match BackupArchive::new(snapshot, BackupKind::Auto, Utc::now()) {
                Ok(a) => a,
                Err(e) => {
                    warn!(error = %e, "auto-backup archive build failed");
                    return;
                }
            };
            if let Err(e) = backup::write_archive(&backup_dir, &archive).await {
                warn!(error = %e, "auto-backup write failed");
            }
        });
    }
}
