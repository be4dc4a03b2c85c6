//! The two-file broker payment export and its parse-back reconciliation.
use lbp_common::Cents;
use rand::{rngs::StdRng, Rng, SeedableRng};
use settlement_engine::{
    db_types::{Order, OrderStatus},
    test_utils::{
        prepare_env::{prepare_test_env, random_db_path},
        seed,
    },
    traits::{LedgerManagement, SettlementDatabase},
    PaymentsApi,
    SettlementError,
    SqliteDatabase,
};

async fn new_db() -> SqliteDatabase {
    let url = random_db_path();
    prepare_test_env(&url).await;
    SqliteDatabase::new_with_url(&url, 5).await.expect("Error creating database")
}

/// Seeds `count` executed orders with awkward, varied cent amounts (never round dollars).
async fn seed_unpaid(db: &SqliteDatabase, count: usize) -> Cents {
    let mut total = Cents::from(0);
    for i in 0..count {
        let cents = 97 + (i as i64 * 1337) % 9791;
        let order = seed::new_order(&format!("ord-x{i:03}"), "bsk-x", &format!("mem-{}", i % 7), Cents::from(cents));
        seed::seed_order_with_status(db, order, OrderStatus::Executed).await;
        total += Cents::from(cents);
    }
    total
}

#[tokio::test]
async fn export_reconciles_to_the_cent() {
    let db = new_db().await;
    let expected = seed_unpaid(&db, 50).await;
    let api = PaymentsApi::new(db.clone());

    let export = api.export_broker_payment("acme-rewards", "alpaca").await.unwrap();
    assert_eq!(export.total, expected);
    assert_eq!(export.order_count, 50);
    assert!(!export.mixed_amount_sources);

    // One header plus one row per order; the ACH file has exactly one data row.
    assert_eq!(export.detail_csv.trim().lines().count(), 51);
    assert_eq!(export.ach_csv.trim().lines().count(), 2);
    let ach_row = export.ach_csv.trim().lines().nth(1).unwrap();
    assert!(ach_row.contains(&expected.to_decimal_string()));
}

#[tokio::test]
async fn randomized_order_sets_reconcile_every_time() {
    let db = new_db().await;
    let api = PaymentsApi::new(db.clone());
    // Log the seed so a reconciliation failure can be replayed.
    let seed: u64 = rand::random();
    println!("order set seed: {seed}");
    let mut rng = StdRng::seed_from_u64(seed);

    // Each iteration is an independent order set under its own broker, with varying counts, odd-cent
    // amounts, and a random sprinkling of fee-only orders that fall back to the requested amount.
    for set in 0..50 {
        let broker = format!("broker-{set:02}");
        let count = rng.gen_range(1..=12);
        let mut expected = Cents::from(0);
        let mut fee_only = 0;
        for i in 0..count {
            let cents = {
                let c: i64 = rng.gen_range(1..=999_983);
                if c % 100 == 0 { c + 37 } else { c }
            };
            let mut order =
                seed::new_order(&format!("ord-r{set:02}-{i:02}"), &format!("bsk-r{set:02}"), &format!("mem-{i}"), Cents::from(cents));
            order.broker = broker.clone();
            if rng.gen_bool(0.25) {
                // Confirmed without execution financials, so the requested amount stands in.
                let (inserted, _) = db.insert_order(order).await.unwrap();
                seed::force_status(db.pool(), &inserted.order_id, OrderStatus::Confirmed).await;
                fee_only += 1;
            } else {
                seed::seed_order_with_status(&db, order, OrderStatus::Executed).await;
            }
            expected += Cents::from(cents);
        }

        let export = api.export_broker_payment("acme-rewards", &broker).await.unwrap();
        assert_eq!(export.total, expected, "set {set} must reconcile to the cent");
        assert_eq!(export.order_count, count);
        assert_eq!(export.mixed_amount_sources, fee_only > 0 && fee_only < count, "set {set}");
        let ach_row = export.ach_csv.trim().lines().nth(1).unwrap();
        assert!(ach_row.contains(&expected.to_decimal_string()), "set {set}");
    }
}

#[tokio::test]
async fn exporting_changes_nothing_in_the_store() {
    let db = new_db().await;
    seed_unpaid(&db, 5).await;
    let api = PaymentsApi::new(db.clone());

    let first = api.export_broker_payment("acme-rewards", "alpaca").await.unwrap();
    // No paid_flag was flipped, so a regenerated export is identical in content.
    let orders = db.search_orders(Default::default()).await.unwrap();
    assert!(orders.iter().all(|o| !o.paid_flag && o.paid_batch_id.is_none()));
    let second = api.export_broker_payment("acme-rewards", "alpaca").await.unwrap();
    assert_eq!(first.total, second.total);
    assert_eq!(first.detail_csv, second.detail_csv);
}

#[tokio::test]
async fn mixed_amount_sources_are_flagged() {
    let db = new_db().await;
    // One order with executed financials, one confirmed without them (fee-only flow).
    seed::seed_order_with_status(&db, seed::new_order("ord-m1", "bsk-m", "mem-a", Cents::from(2000)), OrderStatus::Executed)
        .await;
    let (fee_only, _) =
        db.insert_order(seed::new_order("ord-m2", "bsk-m", "mem-b", Cents::from(1500))).await.unwrap();
    seed::force_status(db.pool(), &fee_only.order_id, OrderStatus::Confirmed).await;

    let export = PaymentsApi::new(db.clone()).export_broker_payment("acme-rewards", "alpaca").await.unwrap();
    assert!(export.mixed_amount_sources);
    // The requested amount stands in for the missing execution.
    assert_eq!(export.total, Cents::from(3500));
    assert!(export.detail_csv.contains("requested"));
    assert!(export.detail_csv.contains("executed"));
}

#[tokio::test]
async fn an_empty_export_is_an_error() {
    let db = new_db().await;
    let err = PaymentsApi::new(db).export_broker_payment("acme-rewards", "alpaca").await.unwrap_err();
    assert!(matches!(err, SettlementError::NothingToExport { .. }));
}

#[tokio::test]
async fn paid_and_settled_orders_are_excluded() {
    let db = new_db().await;
    seed_unpaid(&db, 3).await;
    // Already-paid and already-settled orders never appear in a new export.
    let paid = seed::seed_order_with_status(
        &db,
        seed::new_order("ord-paid", "bsk-x", "mem-z", Cents::from(9999)),
        OrderStatus::Confirmed,
    )
    .await;
    sqlx::query("UPDATE orders SET paid_flag = TRUE, paid_batch_id = 'ach-old' WHERE order_id = $1")
        .bind(paid.order_id.as_str())
        .execute(db.pool())
        .await
        .unwrap();
    seed::seed_order_with_status(&db, seed::new_order("ord-stl", "bsk-x", "mem-z", Cents::from(8888)), OrderStatus::Settled)
        .await;

    let export = PaymentsApi::new(db.clone()).export_broker_payment("acme-rewards", "alpaca").await.unwrap();
    assert_eq!(export.order_count, 3);
    assert!(!export.detail_csv.contains("ord-paid"));
    assert!(!export.detail_csv.contains("ord-stl"));
    let report = PaymentsApi::new(db).get_payments("acme-rewards").await.unwrap();
    assert_eq!(report.summary.len(), 1);
    assert_eq!(report.summary[0].order_count, 3);
    let per_order: Cents = report.orders.iter().map(Order::payment_amount).sum();
    assert_eq!(per_order, report.summary[0].total_due);
}
