//! Seed helpers for integration tests.
//!
//! These write directly against the pool, bypassing the lifecycle rules, so tests can construct any starting
//! state the production code would only reach through a full flow.
use chrono::Utc;
use lbp_common::Cents;
use sqlx::SqlitePool;

use crate::{
    db_types::{MemberId, NewOrder, Order, OrderId, OrderStatus, OrderType},
    traits::SettlementDatabase,
    SqliteDatabase,
};

/// A fully-populated order intent. Tests override fields as needed before inserting.
pub fn new_order(order_id: &str, basket_id: &str, member_id: &str, amount: Cents) -> NewOrder {
    NewOrder {
        order_id: OrderId::from(order_id),
        basket_id: basket_id.into(),
        member_id: member_id.into(),
        merchant_id: "acme-rewards".to_string(),
        symbol: "VTI".to_string(),
        broker: "alpaca".to_string(),
        order_type: OrderType::Market,
        shares: 1.0,
        amount,
        points_used: amount.value(),
        placed_at: Utc::now(),
    }
}

/// Inserts an order and forces it into the given status, setting executed financials where the status implies an
/// execution has happened.
pub async fn seed_order_with_status(db: &SqliteDatabase, order: NewOrder, status: OrderStatus) -> Order {
    let amount = order.amount;
    let (order, inserted) = db.insert_order(order).await.expect("Error inserting seed order");
    assert!(inserted, "Seed order {} already existed", order.order_id);
    if status == OrderStatus::Placed {
        return order;
    }
    let executed = matches!(
        status,
        OrderStatus::Executed |
            OrderStatus::Confirmed |
            OrderStatus::Settled |
            OrderStatus::Sell |
            OrderStatus::Sold |
            OrderStatus::Journaled
    );
    if executed {
        set_executed(db.pool(), &order.order_id, amount).await;
    }
    force_status(db.pool(), &order.order_id, status).await
}

/// Overwrites the status column directly. No lifecycle checks.
pub async fn force_status(pool: &SqlitePool, order_id: &OrderId, status: OrderStatus) -> Order {
    sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 RETURNING *")
        .bind(status.to_string())
        .bind(order_id.as_str())
        .fetch_one(pool)
        .await
        .expect("Error forcing order status")
}

/// Stamps the executed financials as if the broker filled the order exactly as requested.
pub async fn set_executed(pool: &SqlitePool, order_id: &OrderId, amount: Cents) {
    sqlx::query(
        r#"
        UPDATE orders SET
            executed_price = $1,
            executed_shares = shares,
            executed_amount = $1,
            executed_at = CURRENT_TIMESTAMP
        WHERE order_id = $2
        "#,
    )
    .bind(amount)
    .bind(order_id.as_str())
    .execute(pool)
    .await
    .expect("Error setting executed fields");
}

pub async fn seed_merchant(pool: &SqlitePool, merchant_id: &str, name: &str) {
    sqlx::query("INSERT OR IGNORE INTO merchants (merchant_id, name) VALUES ($1, $2)")
        .bind(merchant_id)
        .bind(name)
        .execute(pool)
        .await
        .expect("Error seeding merchant");
}

pub async fn seed_wallet(
    pool: &SqlitePool,
    member_id: &MemberId,
    merchant_id: &str,
    points: i64,
    cash_balance: Cents,
    tier_rate: f64,
    brokerage_account_id: Option<&str>,
) {
    sqlx::query(
        r#"
        INSERT INTO member_wallets (member_id, merchant_id, points, cash_balance, tier_rate, brokerage_account_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(member_id.as_str())
    .bind(merchant_id)
    .bind(points)
    .bind(cash_balance)
    .bind(tier_rate)
    .bind(brokerage_account_id)
    .execute(pool)
    .await
    .expect("Error seeding wallet");
}
