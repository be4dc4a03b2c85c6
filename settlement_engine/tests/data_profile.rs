//! The data-quality profile over wallets, orders and the ledger, plus the wallet repair path.
use lbp_common::Cents;
use settlement_engine::{
    db_types::{Direction, MemberId, NewLedgerEntry, OrderStatus, TxType},
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seed,
    },
    traits::{IssueCategory, LedgerManagement, ProfileTable, SettlementDatabase},
    ProfileApi,
    SqliteDatabase,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database");
    seed::seed_merchant(db.pool(), "acme-rewards", "Acme Rewards").await;
    db
}

fn has_category(report: &settlement_engine::traits::ProfileReport, category: IssueCategory) -> bool {
    report.critical_issues.iter().any(|i| i.category == category)
}

#[tokio::test]
async fn wallet_profile_flags_every_inherited_defect() {
    let db = new_db().await;
    let pool = db.pool();
    // A clean wallet: points and cash agree, and the ledger backs the balance.
    let clean = MemberId::from("mem-clean");
    seed::seed_wallet(pool, &clean, "acme-rewards", 1000, Cents::from(1000), 1.0, None).await;
    db.insert_ledger_entry(NewLedgerEntry::new(clean.clone(), TxType::CashIn, Direction::Inbound, Cents::from(1000)))
        .await
        .unwrap();
    // points × rate says $50.00 but the stored balance says $99.00.
    seed::seed_wallet(pool, &MemberId::from("mem-mismatch"), "acme-rewards", 5000, Cents::from(9900), 1.0, None).await;
    // Two rows for one member.
    for _ in 0..2 {
        seed::seed_wallet(pool, &MemberId::from("mem-dup"), "acme-rewards", 0, Cents::from(0), 1.0, None).await;
    }
    // A negative balance.
    seed::seed_wallet(pool, &MemberId::from("mem-neg"), "acme-rewards", -50, Cents::from(-100), 1.0, None).await;
    // A merchant nobody has heard of.
    seed::seed_wallet(pool, &MemberId::from("mem-ghost"), "ghost-mart", 0, Cents::from(0), 1.0, None).await;

    let report = ProfileApi::new(db.clone()).run_data_profile(ProfileTable::MemberWallets).await.unwrap();
    assert!(has_category(&report, IssueCategory::ConversionMismatch));
    assert!(has_category(&report, IssueCategory::DuplicateWallet));
    assert!(has_category(&report, IssueCategory::NegativeBalance));
    assert!(has_category(&report, IssueCategory::OrphanedMerchant));
    assert!(has_category(&report, IssueCategory::LedgerDrift));
    assert!(report.completeness_score < 1.0);
    assert!(report.affected_members.contains(&MemberId::from("mem-mismatch")));
    assert!(!report.affected_members.contains(&clean));
}

#[tokio::test]
async fn a_clean_store_scores_a_perfect_profile() {
    let db = new_db().await;
    let member = MemberId::from("mem-clean");
    seed::seed_wallet(db.pool(), &member, "acme-rewards", 2500, Cents::from(2500), 1.0, None).await;
    db.insert_ledger_entry(NewLedgerEntry::new(member, TxType::CashIn, Direction::Inbound, Cents::from(2500)))
        .await
        .unwrap();

    for table in [ProfileTable::MemberWallets, ProfileTable::Orders, ProfileTable::Ledger] {
        let report = ProfileApi::new(db.clone()).run_data_profile(table).await.unwrap();
        assert_eq!(report.completeness_score, 1.0, "table {table} should be clean");
        assert!(report.critical_issues.is_empty());
        assert!(report.affected_members.is_empty());
    }
}

#[tokio::test]
async fn repair_recomputes_the_wallet_from_the_ledger() {
    let db = new_db().await;
    let member = MemberId::from("mem-drift");
    // The projection says $90.00 but the confirmed ledger sums to $61.50.
    seed::seed_wallet(db.pool(), &member, "acme-rewards", 9000, Cents::from(9000), 1.0, None).await;
    db.insert_ledger_entry(NewLedgerEntry::new(member.clone(), TxType::CashIn, Direction::Inbound, Cents::from(7000)))
        .await
        .unwrap();
    db.insert_ledger_entry(NewLedgerEntry::new(member.clone(), TxType::CashOut, Direction::Outbound, Cents::from(850)))
        .await
        .unwrap();
    // Pending entries do not count towards the authoritative balance.
    db.insert_ledger_entry(
        NewLedgerEntry::new(member.clone(), TxType::CashIn, Direction::Inbound, Cents::from(123_456)).pending(),
    )
    .await
    .unwrap();

    let api = ProfileApi::new(db.clone());
    let report = api.run_data_profile(ProfileTable::MemberWallets).await.unwrap();
    assert!(has_category(&report, IssueCategory::LedgerDrift));

    let wallet = api.repair_wallet(&member).await.unwrap();
    assert_eq!(wallet.cash_balance, Cents::from(6150));
    assert_eq!(db.balance_for_member(&member).await.unwrap(), Cents::from(6150));
}

#[tokio::test]
async fn order_profile_catches_integrity_breaks() {
    let db = new_db().await;
    let pool = db.pool();
    // Executed status without execution financials.
    let (bare, _) = db.insert_order(seed::new_order("ord-p1", "bsk-p", "mem-a", Cents::from(100))).await.unwrap();
    seed::force_status(pool, &bare.order_id, OrderStatus::Executed).await;
    // Paid flag on a never-executed order.
    let (early, _) = db.insert_order(seed::new_order("ord-p2", "bsk-p", "mem-b", Cents::from(200))).await.unwrap();
    sqlx::query("UPDATE orders SET paid_flag = TRUE WHERE order_id = $1")
        .bind(early.order_id.as_str())
        .execute(pool)
        .await
        .unwrap();
    // Journaled status without a journal timestamp.
    let journaled = seed::new_order("ord-p3", "bsk-p", "mem-c", Cents::from(300));
    seed::seed_order_with_status(&db, journaled, OrderStatus::Journaled).await;
    // And one healthy order.
    seed::seed_order_with_status(&db, seed::new_order("ord-p4", "bsk-p", "mem-d", Cents::from(400)), OrderStatus::Confirmed)
        .await;

    let report = ProfileApi::new(db.clone()).run_data_profile(ProfileTable::Orders).await.unwrap();
    assert!(has_category(&report, IssueCategory::MissingExecution));
    assert!(has_category(&report, IssueCategory::PaidPreExecution));
    assert!(has_category(&report, IssueCategory::MissingJournalTimestamp));
    assert_eq!(report.completeness_score, 0.25);
    assert!(!report.affected_members.contains(&MemberId::from("mem-d")));
}

#[tokio::test]
async fn ledger_profile_catches_negative_amounts() {
    let db = new_db().await;
    let member = MemberId::from("mem-raw");
    db.insert_ledger_entry(NewLedgerEntry::new(member.clone(), TxType::CashIn, Direction::Inbound, Cents::from(500)))
        .await
        .unwrap();
    // A corrupt row imported from an upstream feed: negative cash with direction still inbound.
    sqlx::query(
        "INSERT INTO transactions_ledger (member_id, tx_type, direction, channel, status, amount_cash) VALUES ($1, \
         'cash_in', 'inbound', 'import', 'confirmed', -250)",
    )
    .bind(member.as_str())
    .execute(db.pool())
    .await
    .unwrap();

    let report = ProfileApi::new(db.clone()).run_data_profile(ProfileTable::Ledger).await.unwrap();
    assert!(has_category(&report, IssueCategory::NegativeLedgerAmount));
    assert_eq!(report.completeness_score, 0.5);
    assert_eq!(report.affected_members, vec![member]);
}
