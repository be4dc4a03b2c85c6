//! The journal engine: exact cent aggregation, idempotent runs, per-member failure isolation and timeouts.
use std::{sync::Arc, time::Duration};

use lbp_common::Cents;
use settlement_engine::{
    db_types::{JournalStatus, MemberId, OrderStatus, TxType},
    events::EventProducers,
    test_utils::{
        mock_brokerage::MockBrokerage,
        prepare_env::{prepare_test_env, random_db_path},
        seed,
    },
    traits::{JournalScope, JournalSkipReason, LedgerManagement, SettlementDatabase, TransferError},
    JournalApi,
    JournalConfig,
    SqliteDatabase,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

async fn seed_member(db: &SqliteDatabase, member: &str, account: Option<impl Into<String>>, amounts: &[i64]) {
    let account = account.map(Into::into);
    seed::seed_wallet(db.pool(), &MemberId::from(member), "acme-rewards", 0, Cents::from(0), 1.0, account.as_deref())
        .await;
    for (i, cents) in amounts.iter().enumerate() {
        let order = seed::new_order(&format!("ord-{member}-{i}"), &format!("bsk-{member}"), member, Cents::from(*cents));
        seed::seed_order_with_status(db, order, OrderStatus::Settled).await;
    }
}

fn journal_api(db: &SqliteDatabase, brokerage: Arc<MockBrokerage>) -> JournalApi<SqliteDatabase, MockBrokerage> {
    JournalApi::new(db.clone(), brokerage, EventProducers::default())
}

#[tokio::test]
async fn journal_amounts_sum_exactly_in_cents() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    // $40.00 and $10.10 must journal as exactly $50.10.
    seed_member(&db, "mem-alice", Some("ACC-1"), &[4000, 1010]).await;

    let result = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(result.total_journaled, Cents::from(5010));
    assert_eq!(result.members_funded, 1);
    assert_eq!(result.journals_created, 1);
    assert!(result.skipped.is_empty());

    let calls = brokerage.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].account_id, "ACC-1");
    assert_eq!(calls[0].amount, Cents::from(5010));

    let journals = db.recent_journals(10).await.unwrap();
    assert_eq!(journals.len(), 1);
    assert_eq!(journals[0].status, JournalStatus::Journaled);
    assert_eq!(journals[0].journal_id.as_deref(), Some("BJ-0001"));
    assert_eq!(journals[0].order_count, 2);

    // Each contributing order is journaled with the timestamp set.
    let orders = db.settled_unjournaled_orders(&JournalScope::All).await.unwrap();
    assert!(orders.is_empty());
    let entries = db.entries_for_member(&MemberId::from("mem-alice")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].tx_type, TxType::CashOut);
    assert_eq!(entries[0].amount_cash, Cents::from(5010));
    assert_eq!(entries[0].client_tx_id.as_deref(), Some(format!("journal-{}", journals[0].id).as_str()));
}

#[tokio::test]
async fn rerunning_a_journal_moves_nothing() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    seed_member(&db, "mem-alice", Some("ACC-1"), &[2500]).await;

    api.run_journal(JournalScope::All).await.unwrap();
    let second = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(second.total_journaled, Cents::from(0));
    assert_eq!(second.members_funded, 0);
    assert_eq!(second.journals_created, 0);
    assert_eq!(brokerage.call_count(), 1);
}

#[tokio::test]
async fn one_failed_member_never_blocks_the_others() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    for member in ["mem-a", "mem-b", "mem-c"] {
        seed_member(&db, member, Some(format!("ACC-{member}")), &[1000]).await;
    }
    brokerage.fail_member("mem-b", TransferError::Rejected("account frozen".to_string()));

    let result = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(result.members_funded, 2);
    assert_eq!(result.total_journaled, Cents::from(2000));
    // The failed member still created (and failed) a journal record.
    assert_eq!(result.journals_created, 3);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].member_id, MemberId::from("mem-b"));
    assert!(matches!(result.skipped[0].reason, JournalSkipReason::TransferFailed(_)));

    // mem-b's orders stay settled and are retried on the next run.
    let pending = db.settled_unjournaled_orders(&JournalScope::All).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].member_id, MemberId::from("mem-b"));

    let retry_brokerage = Arc::new(MockBrokerage::new());
    let retry = journal_api(&db, retry_brokerage).run_journal(JournalScope::All).await.unwrap();
    assert_eq!(retry.members_funded, 1);
    assert_eq!(retry.total_journaled, Cents::from(1000));
}

#[tokio::test]
async fn members_without_a_linked_account_are_reported() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    seed_member(&db, "mem-nolink", None::<&str>, &[3000]).await;

    let result = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(result.members_funded, 0);
    assert_eq!(result.journals_created, 0);
    assert_eq!(result.skipped.len(), 1);
    assert!(matches!(result.skipped[0].reason, JournalSkipReason::NoLinkedAccount));
    assert_eq!(brokerage.call_count(), 0);
    // The orders stay settled; linking an account later picks them up.
    let pending = db.settled_unjournaled_orders(&JournalScope::All).await.unwrap();
    assert_eq!(pending.len(), 1);
}

#[tokio::test]
async fn a_transfer_timeout_is_a_failure() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    brokerage.set_delay(Duration::from_millis(250));
    let config =
        JournalConfig { concurrency: 2, transfer_timeout: Duration::from_millis(50), recent_journal_limit: 10 };
    let api = journal_api(&db, brokerage.clone()).with_config(config);
    seed_member(&db, "mem-slow", Some("ACC-9"), &[4200]).await;

    let result = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(result.members_funded, 0);
    assert_eq!(result.skipped.len(), 1);
    assert!(matches!(result.skipped[0].reason, JournalSkipReason::TransferFailed(_)));

    let journals = db.recent_journals(10).await.unwrap();
    assert_eq!(journals.len(), 1);
    assert_eq!(journals[0].status, JournalStatus::Failed);
    // No money movement was recorded for the timed-out transfer.
    let entries = db.entries_for_member(&MemberId::from("mem-slow")).await.unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn overlapping_runs_fund_a_member_once() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    // A slow transfer holds one run in flight while the other starts.
    brokerage.set_delay(Duration::from_millis(200));
    seed_member(&db, "mem-race", Some("ACC-R"), &[5010]).await;

    let api_a = journal_api(&db, brokerage.clone());
    let api_b = journal_api(&db, brokerage.clone());
    let (a, b) = tokio::join!(api_a.run_journal(JournalScope::All), api_b.run_journal(JournalScope::All));
    let (a, b) = (a.unwrap(), b.unwrap());

    // Exactly one transfer went out, however the two runs interleaved. The loser either found nothing to do
    // or reported the member as claimed/in flight.
    assert_eq!(brokerage.call_count(), 1);
    assert_eq!(a.members_funded + b.members_funded, 1);
    assert_eq!(a.total_journaled + b.total_journaled, Cents::from(5010));
    assert_eq!(a.journals_created + b.journals_created, 1);

    let journals = db.recent_journals(10).await.unwrap();
    assert_eq!(journals.len(), 1);
    assert_eq!(journals[0].status, JournalStatus::Journaled);
    let entries = db.entries_for_member(&MemberId::from("mem-race")).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount_cash, Cents::from(5010));
}

#[tokio::test]
async fn a_stalled_queued_journal_blocks_its_member_until_resolved() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    seed_member(&db, "mem-stall", Some("ACC-S"), &[2500]).await;
    // A run that died between the transfer and its completion leaves a queued journal claiming the orders.
    let pending = db.settled_unjournaled_orders(&JournalScope::All).await.unwrap();
    let ids: Vec<_> = pending.iter().map(|o| o.order_id.clone()).collect();
    let stalled = db
        .create_queued_journal(&MemberId::from("mem-stall"), Cents::from(2500), &ids)
        .await
        .unwrap()
        .expect("Unclaimed settled orders should be claimable");

    let result = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(result.members_funded, 0);
    assert_eq!(result.journals_created, 0);
    assert_eq!(brokerage.call_count(), 0);
    assert_eq!(result.skipped.len(), 1);
    assert!(matches!(result.skipped[0].reason, JournalSkipReason::PendingJournal(id) if id == stalled.id));

    // Failing the stalled record releases the claim; the next run funds the member normally.
    db.fail_journal(stalled.id, "resolved by operator").await.unwrap();
    let retry = api.run_journal(JournalScope::All).await.unwrap();
    assert_eq!(retry.members_funded, 1);
    assert_eq!(retry.total_journaled, Cents::from(2500));
    assert_eq!(brokerage.call_count(), 1);
}

#[tokio::test]
async fn scoped_runs_only_touch_the_named_members() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage.clone());
    seed_member(&db, "mem-in", Some("ACC-in"), &[1100]).await;
    seed_member(&db, "mem-out", Some("ACC-out"), &[2200]).await;

    let result = api.run_journal(JournalScope::members(["mem-in"])).await.unwrap();
    assert_eq!(result.members_funded, 1);
    assert_eq!(result.total_journaled, Cents::from(1100));
    let pending = db.settled_unjournaled_orders(&JournalScope::All).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].member_id, MemberId::from("mem-out"));
}

#[tokio::test]
async fn journal_status_reports_the_omnibus_balance() {
    let db = new_db().await;
    let brokerage = Arc::new(MockBrokerage::new());
    let api = journal_api(&db, brokerage);
    seed_member(&db, "mem-a", Some("ACC-a"), &[1000, 2000]).await;
    seed_member(&db, "mem-b", None::<&str>, &[500]).await;

    let report = api.journal_status().await.unwrap();
    assert_eq!(report.firm_balance, Cents::from(3500));
    assert_eq!(report.pending.len(), 3);
    assert_eq!(report.member_summary.len(), 2);
    let b = report.member_summary.iter().find(|m| m.member_id == MemberId::from("mem-b")).unwrap();
    assert!(b.brokerage_account_id.is_none());
    assert_eq!(b.total_amount, Cents::from(500));
}
