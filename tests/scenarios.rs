// tests/scenarios.rs
//
// End-to-end scenarios against a fresh `MemoryStore`, mirroring the teacher's
// `ledger/tests/integration_tests.rs` style (a `setup()` helper returning a
// ready-to-use engine, one `#[tokio::test]` per scenario).
use chrono::{DateTime, TimeZone, Utc};
use fund_ledger::config::{Environment, FundConfig};
use fund_ledger::engine::FundEngine;
use fund_ledger::entities::Investor;
use fund_ledger::error::FundError;
use fund_ledger::ledger::FmWithdrawalMode;
use fund_ledger::store::memory::MemoryStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// A fresh scratch directory per test for the backup archive writer; removed
/// on drop so repeated test runs don't accumulate files.
struct ScratchDir(PathBuf);

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn setup() -> (FundEngine, ScratchDir) {
    let dir = std::env::temp_dir().join(format!("fund-ledger-test-{}", Uuid::now_v7()));
    let store = Arc::new(MemoryStore::new());
    let engine = FundEngine::new(store, FundConfig::default(), dir.clone());
    (engine, ScratchDir(dir))
}

fn setup_with_config(config: FundConfig) -> (FundEngine, ScratchDir) {
    let dir = std::env::temp_dir().join(format!("fund-ledger-test-{}", Uuid::now_v7()));
    let store = Arc::new(MemoryStore::new());
    let engine = FundEngine::new(store, config, dir.clone());
    (engine, ScratchDir(dir))
}

fn investor(id: i64, name: &str) -> Investor {
    Investor {
        id,
        name: name.to_string(),
        phone: String::new(),
        email: String::new(),
        address: String::new(),
        join_date: date(2024, 1, 1).date_naive(),
        is_fund_manager: false,
    }
}

#[tokio::test]
async fn s1_bootstrap_and_first_deposit() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();

    let tx = engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();

    assert_eq!(tx.units_change, dec!(1000.00000000));
    assert_eq!(tx.nav, dec!(10000000));

    let tranches = engine.list_tranches_by_investor(1).await.unwrap();
    assert_eq!(tranches.len(), 1);
    assert_eq!(tranches[0].units, dec!(1000.00000000));
    assert_eq!(tranches[0].entry_nav, dec!(10000));
    assert_eq!(tranches[0].hwm, dec!(10000));
    assert_eq!(tranches[0].invested_value, dec!(10000000));

    assert_eq!(engine.current_nav().await.unwrap(), dec!(10000000));
}

#[tokio::test]
async fn s2_two_deposit_book_fifo_withdraw() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine.add_investor(investor(2, "B")).await.unwrap();

    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();

    let dep2 = engine
        .deposit(2, dec!(20000000), dec!(33000000), date(2024, 6, 1))
        .await
        .unwrap();
    // pre-deposit price = (33,000,000 - 20,000,000)/1000 = 13,000
    assert_eq!(dep2.units_change, dec!(1538.46153846));

    let withdraw = engine
        .withdraw(1, dec!(6500000), dec!(28500000), date(2024, 9, 1))
        .await
        .unwrap();
    // pre-withdraw price = 35,000,000 / 2538.46153846 ~= 13,787.878790
    assert_eq!(withdraw.nav, dec!(28500000));

    let tranches = engine.list_tranches_by_investor(1).await.unwrap();
    assert_eq!(tranches.len(), 1);
    // 1000 units minus ~471.428571 burned
    assert!((tranches[0].units - dec!(528.571429)).abs() < dec!(0.001));
}

#[tokio::test]
async fn s3_nav_update_then_fee_apply() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();

    engine.nav_update(dec!(12000000), date(2024, 12, 31)).await.unwrap();

    let tranches = engine.list_tranches_by_investor(1).await.unwrap();
    assert_eq!(tranches[0].hwm, dec!(12000));

    // At total_nav 12,000,000 the threshold equals the price: zero fee.
    let zero_preview = engine.preview_fees(date(2024, 12, 31), dec!(12000000)).await.unwrap();
    assert_eq!(zero_preview.total_fee_amount, Decimal::ZERO);

    let preview = engine.preview_fees(date(2024, 12, 31), dec!(13000000)).await.unwrap();
    assert_eq!(preview.total_fee_amount, dec!(200000));

    let outcome = engine
        .apply_fees("FY2024", date(2024, 12, 31), dec!(13000000), &preview.confirm_token, true, true)
        .await
        .unwrap();
    assert_eq!(outcome.fee_records.len(), 1);
    assert_eq!(outcome.fee_records[0].fee_amount, dec!(200000));

    let tranches = engine.list_tranches_by_investor(1).await.unwrap();
    assert_eq!(tranches[0].entry_nav, dec!(13000));
    assert_eq!(tranches[0].hwm, dec!(13000));

    let fm_tranches = engine.list_tranches_by_investor(0).await.unwrap();
    assert_eq!(fm_tranches.len(), 1);
    assert!((fm_tranches[0].units - dec!(15.384615)).abs() < dec!(0.001));
}

#[tokio::test]
async fn s4_stale_confirmation_rejected() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();

    let preview = engine.preview_fees(date(2024, 12, 31), dec!(13000000)).await.unwrap();

    engine.add_investor(investor(2, "B")).await.unwrap();
    engine
        .deposit(2, dec!(5000000), dec!(18000000), date(2024, 7, 1))
        .await
        .unwrap();

    let err = engine
        .apply_fees("FY2024", date(2024, 12, 31), dec!(13000000), &preview.confirm_token, true, true)
        .await
        .unwrap_err();
    assert!(matches!(err, FundError::StaleConfirmation));
}

#[tokio::test]
async fn s5_undo_of_latest_deposit() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    let tx = engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();

    engine.undo_transaction(tx.id).await.unwrap();

    let tranches = engine.list_tranches_by_investor(1).await.unwrap();
    assert!(tranches.is_empty());

    let audit = engine.list_audit().await.unwrap();
    assert!(audit.iter().any(|a| a.action == "undo_transaction"));
}

#[tokio::test]
async fn s6_backup_round_trip() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    engine.nav_update(dec!(12000000), date(2024, 12, 31)).await.unwrap();

    let backup = engine.manual_backup().await.unwrap();
    let snapshot_before = engine.store().snapshot().await.unwrap();

    engine
        .deposit(1, dec!(1000000), dec!(13000000), date(2025, 1, 1))
        .await
        .unwrap();

    engine.restore_backup(&backup.id, "RESTORE", true).await.unwrap();

    let snapshot_after = engine.store().snapshot().await.unwrap();
    assert_eq!(snapshot_after.transactions.len(), snapshot_before.transactions.len());

    let backups = engine.list_backups().await.unwrap();
    assert!(backups.iter().any(|b| matches!(b.kind, fund_ledger::backup::BackupKind::Safety)));
}

#[tokio::test]
async fn non_terminal_undo_is_rejected() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    let first = engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    engine
        .deposit(1, dec!(1000000), dec!(11000000), date(2024, 2, 1))
        .await
        .unwrap();

    let err = engine.undo_transaction(first.id).await.unwrap_err();
    assert!(matches!(err, FundError::NotReversible(_)));
}

#[tokio::test]
async fn fund_manager_withdrawal_drains_fee_tranches() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    engine.nav_update(dec!(12000000), date(2024, 12, 31)).await.unwrap();

    let preview = engine.preview_fees(date(2024, 12, 31), dec!(13000000)).await.unwrap();
    engine
        .apply_fees("FY2024", date(2024, 12, 31), dec!(13000000), &preview.confirm_token, true, true)
        .await
        .unwrap();

    let tx = engine
        .fund_manager_withdraw(FmWithdrawalMode::Full, date(2025, 1, 1))
        .await
        .unwrap();
    assert!(tx.amount > Decimal::ZERO);

    let fm_tranches = engine.list_tranches_by_investor(0).await.unwrap();
    assert!(fm_tranches.is_empty());
}

#[tokio::test]
async fn fee_transaction_cannot_be_undone() {
    let (engine, _dir) = setup();
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    engine.nav_update(dec!(12000000), date(2024, 12, 31)).await.unwrap();

    let preview = engine.preview_fees(date(2024, 12, 31), dec!(13000000)).await.unwrap();
    let outcome = engine
        .apply_fees("FY2024", date(2024, 12, 31), dec!(13000000), &preview.confirm_token, true, true)
        .await
        .unwrap();
    let fee_tx_id = outcome.transactions[0].id;

    let err = engine.undo_transaction(fee_tx_id).await.unwrap_err();
    assert!(matches!(err, FundError::NotReversible(_)));

    // The Fund-Manager's minted fee tranche must still be intact: rejecting
    // the undo up front means unit conservation was never put at risk.
    let fm_tranches = engine.list_tranches_by_investor(0).await.unwrap();
    assert_eq!(fm_tranches.len(), 1);
}

#[tokio::test]
async fn production_environment_requires_safety_backup_before_restore() {
    let (engine, _dir) = setup_with_config(FundConfig {
        environment: Environment::Production,
        ..FundConfig::default()
    });
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    let backup = engine.manual_backup().await.unwrap();

    let err = engine
        .restore_backup(&backup.id, "RESTORE", false)
        .await
        .unwrap_err();
    assert!(matches!(err, FundError::PreconditionFailed(_)));

    engine.restore_backup(&backup.id, "RESTORE", true).await.unwrap();
}

#[tokio::test]
async fn production_environment_always_requires_fee_acknowledgment() {
    let (engine, _dir) = setup_with_config(FundConfig {
        environment: Environment::Production,
        feature_fee_safety: false,
        ..FundConfig::default()
    });
    engine.add_investor(investor(1, "A")).await.unwrap();
    engine
        .deposit(1, dec!(10000000), dec!(10000000), date(2024, 1, 1))
        .await
        .unwrap();
    engine.nav_update(dec!(12000000), date(2024, 12, 31)).await.unwrap();
    let preview = engine.preview_fees(date(2024, 12, 31), dec!(13000000)).await.unwrap();

    let err = engine
        .apply_fees("FY2024", date(2024, 12, 31), dec!(13000000), &preview.confirm_token, false, false)
        .await
        .unwrap_err();
    assert!(matches!(err, FundError::PreconditionFailed(_)));
}

#[tokio::test]
async fn concurrent_deposits_on_distinct_investors_all_commit() {
    let (engine, _dir) = setup();
    for id in 1..=8 {
        engine.add_investor(investor(id, "A")).await.unwrap();
    }

    let mut handles = Vec::new();
    for id in 1..=8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .deposit(id, dec!(1000000), dec!(1000000) * Decimal::from(id), date(2024, 1, 1))
                .await
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for h in handles {
        ids.push(h.await.unwrap().id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8, "transaction ids must be distinct, no lost writes");
}
