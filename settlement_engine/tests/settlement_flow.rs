//! End-to-end coverage of the main order lifecycle: sweep, execution, confirmation, broker payment and batch
//! settlement.
use chrono::Utc;
use lbp_common::Cents;
use settlement_engine::{
    db_types::{BasketId, ExecutionConfirmation, OrderId, OrderStatus},
    events::EventProducers,
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seed,
    },
    traits::{LedgerManagement, SettlementDatabase},
    SettlementApi,
    SettlementError,
    SqliteDatabase,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

fn api(db: &SqliteDatabase) -> SettlementApi<SqliteDatabase> {
    SettlementApi::new(db.clone(), EventProducers::default())
}

#[tokio::test]
async fn order_insert_is_idempotent() {
    let db = new_db().await;
    let order = seed::new_order("ord-1001", "bsk-1", "mem-alice", Cents::from(4000));
    let (first, inserted) = db.insert_order(order.clone()).await.unwrap();
    assert!(inserted);
    assert_eq!(first.status, OrderStatus::Placed);
    let (second, inserted) = db.insert_order(order).await.unwrap();
    assert!(!inserted);
    assert_eq!(first.id, second.id);
}

#[tokio::test]
async fn sweep_queues_every_placed_order_in_the_basket() {
    let db = new_db().await;
    let api = api(&db);
    for i in 0..3 {
        let order = seed::new_order(&format!("ord-20{i}"), "bsk-7", "mem-alice", Cents::from(1000));
        db.insert_order(order).await.unwrap();
    }
    // An order in another basket must be untouched.
    db.insert_order(seed::new_order("ord-299", "bsk-8", "mem-bob", Cents::from(500))).await.unwrap();

    let queued = api.sweep_basket(&BasketId::from("bsk-7")).await.unwrap();
    assert_eq!(queued.len(), 3);
    assert!(queued.iter().all(|o| o.status == OrderStatus::Queued));
    let other = db.fetch_order_by_order_id(&OrderId::from("ord-299")).await.unwrap().unwrap();
    assert_eq!(other.status, OrderStatus::Placed);

    // Sweeping again finds nothing placed.
    let queued = api.sweep_basket(&BasketId::from("bsk-7")).await.unwrap();
    assert!(queued.is_empty());
}

#[tokio::test]
async fn sweeping_a_missing_basket_fails() {
    let db = new_db().await;
    let err = api(&db).sweep_basket(&BasketId::from("no-such-basket")).await.unwrap_err();
    assert!(matches!(err, SettlementError::BasketNotFound(_)));
}

#[tokio::test]
async fn execution_report_is_applied_exactly_once() {
    let db = new_db().await;
    let api = api(&db);
    db.insert_order(seed::new_order("ord-300", "bsk-30", "mem-carol", Cents::from(5000))).await.unwrap();
    api.sweep_basket(&BasketId::from("bsk-30")).await.unwrap();

    let confirmation = ExecutionConfirmation {
        order_id: OrderId::from("ord-300"),
        price: Cents::from(5010),
        shares: 1.0,
        amount: Cents::from(5010),
        executed_at: Utc::now(),
        broker_ref: Some("FILL-88".to_string()),
    };
    let order = api.record_execution(confirmation.clone()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Executed);
    assert_eq!(order.executed_amount, Some(Cents::from(5010)));

    // A replayed report is a transition error, and the financials are untouched.
    let err = api.record_execution(confirmation).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    let order = db.fetch_order_by_order_id(&OrderId::from("ord-300")).await.unwrap().unwrap();
    assert_eq!(order.executed_amount, Some(Cents::from(5010)));
    assert_eq!(order.status, OrderStatus::Executed);
}

#[tokio::test]
async fn execution_mismatch_beyond_tolerance_is_rejected() {
    let db = new_db().await;
    let api = api(&db);
    db.insert_order(seed::new_order("ord-310", "bsk-31", "mem-carol", Cents::from(5000))).await.unwrap();
    api.sweep_basket(&BasketId::from("bsk-31")).await.unwrap();

    // Default tolerance is $1.00; a $2.00 drift must be rejected.
    let confirmation = ExecutionConfirmation {
        order_id: OrderId::from("ord-310"),
        price: Cents::from(5200),
        shares: 1.0,
        amount: Cents::from(5200),
        executed_at: Utc::now(),
        broker_ref: None,
    };
    let err = api.record_execution(confirmation).await.unwrap_err();
    assert!(matches!(err, SettlementError::ExecutionMismatch { .. }));
    let order = db.fetch_order_by_order_id(&OrderId::from("ord-310")).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Queued);
    assert!(order.executed_amount.is_none());
}

#[tokio::test]
async fn confirming_twice_loses_the_second_update() {
    let db = new_db().await;
    let api = api(&db);
    let order = seed::new_order("ord-320", "bsk-32", "mem-dave", Cents::from(2500));
    seed::seed_order_with_status(&db, order, OrderStatus::Executed).await;

    let confirmed = api.confirm_order(&OrderId::from("ord-320")).await.unwrap();
    assert_eq!(confirmed.status, OrderStatus::Confirmed);
    let err = api.confirm_order(&OrderId::from("ord-320")).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidTransition { .. }));
}

#[tokio::test]
async fn paid_batch_settles_atomically() {
    let db = new_db().await;
    let api = api(&db);
    for i in 0..3 {
        let order = seed::new_order(&format!("ord-40{i}"), "bsk-40", "mem-erin", Cents::from(1000));
        seed::seed_order_with_status(&db, order, OrderStatus::Confirmed).await;
    }
    let (batch_id, paid) = api.mark_batch_paid("acme-rewards", "alpaca").await.unwrap();
    assert_eq!(paid.len(), 3);
    assert!(paid.iter().all(|o| o.paid_flag && o.paid_batch_id.as_deref() == Some(batch_id.as_str())));

    // Force one order out of a settleable status: the whole batch must roll back.
    seed::force_status(db.pool(), &OrderId::from("ord-401"), OrderStatus::Failed).await;
    let err = api.settle_paid_batch(&batch_id).await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidTransition { .. }));
    let untouched = db.fetch_order_by_order_id(&OrderId::from("ord-400")).await.unwrap().unwrap();
    assert_eq!(untouched.status, OrderStatus::Confirmed);

    // Restore it and the batch settles as a unit.
    seed::force_status(db.pool(), &OrderId::from("ord-401"), OrderStatus::Confirmed).await;
    let settled = api.settle_paid_batch(&batch_id).await.unwrap();
    assert_eq!(settled.len(), 3);
    assert!(settled.iter().all(|o| o.status == OrderStatus::Settled));
}

#[tokio::test]
async fn mark_batch_paid_skips_already_paid_and_unexecuted_orders() {
    let db = new_db().await;
    let api = api(&db);
    seed::seed_order_with_status(&db, seed::new_order("ord-500", "bsk-50", "mem-fay", Cents::from(1000)), OrderStatus::Executed)
        .await;
    seed::seed_order_with_status(&db, seed::new_order("ord-501", "bsk-50", "mem-fay", Cents::from(1000)), OrderStatus::Queued)
        .await;
    let (_, first) = api.mark_batch_paid("acme-rewards", "alpaca").await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].order_id, OrderId::from("ord-500"));

    // The second pass finds nothing unpaid.
    let (_, second) = api.mark_batch_paid("acme-rewards", "alpaca").await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn failed_and_cancelled_orders_are_terminal() {
    let db = new_db().await;
    let api = api(&db);
    db.insert_order(seed::new_order("ord-600", "bsk-60", "mem-gus", Cents::from(700))).await.unwrap();
    let failed = api.fail_order(&OrderId::from("ord-600"), "broker rejected symbol").await.unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    let err = api.cancel_order(&OrderId::from("ord-600"), "too late").await.unwrap_err();
    assert!(matches!(err, SettlementError::InvalidTransition { .. }));
}
