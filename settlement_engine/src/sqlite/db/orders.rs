use log::{debug, trace};
use lbp_common::Cents;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{BasketId, ExecutionConfirmation, NewOrder, Order, OrderId, OrderStatus},
    lifecycle::{next_status, OrderEvent},
    se_api::OrderQueryFilter,
    traits::{JournalScope, SettlementError},
};

/// Inserts the order into the database, returning `false` in the second parameter if the order already exists.
pub async fn idempotent_insert(order: NewOrder, conn: &mut SqliteConnection) -> Result<(Order, bool), SettlementError> {
    let inserted = match fetch_order_by_order_id(&order.order_id, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order {} inserted with id {}", order.order_id, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new order using the given connection. This is not atomic. You can embed this call inside a transaction
/// if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
///
/// All orders enter the store as `placed`.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, SettlementError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                basket_id,
                member_id,
                merchant_id,
                symbol,
                broker,
                order_type,
                shares,
                amount,
                points_used,
                status,
                placed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'placed', $11)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.basket_id)
    .bind(order.member_id)
    .bind(order.merchant_id)
    .bind(order.symbol)
    .bind(order.broker)
    .bind(order.order_type.to_string())
    .bind(order.shares)
    .bind(order.amount)
    .bind(order.points_used)
    .bind(order.placed_at)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`.
///
/// Resulting orders are ordered by `order_id` in ascending order, so result sets (and the files rendered from
/// them) are stable across runs.
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.as_str().to_string());
    }
    if let Some(basket_id) = query.basket_id {
        where_clause.push("basket_id = ");
        where_clause.push_bind_unseparated(basket_id.as_str().to_string());
    }
    if let Some(member_id) = query.member_id {
        where_clause.push("member_id = ");
        where_clause.push_bind_unseparated(member_id.as_str().to_string());
    }
    if let Some(merchant_id) = query.merchant_id {
        where_clause.push("merchant_id = ");
        where_clause.push_bind_unseparated(merchant_id);
    }
    if let Some(broker) = query.broker {
        where_clause.push("broker = ");
        where_clause.push_bind_unseparated(broker);
    }
    if let Some(paid) = query.paid {
        where_clause.push("paid_flag = ");
        where_clause.push_bind_unseparated(paid);
    }
    if let Some(batch_id) = query.paid_batch_id {
        where_clause.push("paid_batch_id = ");
        where_clause.push_bind_unseparated(batch_id);
    }
    if query.unjournaled.unwrap_or(false) {
        where_clause.push("journaled_at IS NULL");
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push("placed_at >= ");
        where_clause.push_bind_unseparated(since);
    }
    if let Some(until) = query.until {
        where_clause.push("placed_at <= ");
        where_clause.push_bind_unseparated(until);
    }
    builder.push(" ORDER BY order_id ASC");

    trace!("📝️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("📝️ Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

/// The compare-and-swap primitive for status transitions: the row is only updated if it still carries `from`.
/// Returns `None` when another writer got there first.
pub(crate) async fn cas_update_status(
    id: i64,
    from: OrderStatus,
    to: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let result = sqlx::query_as(
        "UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 AND status = $3 RETURNING *",
    )
    .bind(to.to_string())
    .bind(id)
    .bind(from.to_string())
    .fetch_optional(conn)
    .await?;
    Ok(result)
}

/// Applies `event` to the order, deciding the target status through the lifecycle table and committing it with a
/// compare-and-swap. If the order moved under our feet, the error reports the status it actually has now.
pub(crate) async fn transition_status(
    order: &Order,
    event: OrderEvent,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let target = next_status(order.status, event)
        .map_err(|source| SettlementError::InvalidTransition { order_id: order.order_id.clone(), source })?;
    match cas_update_status(order.id, order.status, target, conn).await? {
        Some(updated) => Ok(updated),
        None => {
            let current = fetch_order_by_order_id(&order.order_id, conn)
                .await?
                .ok_or_else(|| SettlementError::OrderNotFound(order.order_id.clone()))?;
            trace!("📝️ Lost the race on order {}: now {}, wanted {event}", order.order_id, current.status);
            Err(SettlementError::invalid_transition(&order.order_id, current.status, event))
        },
    }
}

/// Sweeps a basket: every `placed` order in it becomes `queued` in a single statement. Run this inside a
/// transaction when the sweep must be atomic with other work.
pub async fn queue_basket(basket_id: &BasketId, conn: &mut SqliteConnection) -> Result<Vec<Order>, SettlementError> {
    let exists: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE basket_id = $1")
        .bind(basket_id.as_str())
        .fetch_one(&mut *conn)
        .await?;
    if exists == 0 {
        return Err(SettlementError::BasketNotFound(basket_id.as_str().to_string()));
    }
    let mut orders: Vec<Order> = sqlx::query_as(
        "UPDATE orders SET status = 'queued', updated_at = CURRENT_TIMESTAMP WHERE basket_id = $1 AND status = \
         'placed' RETURNING *",
    )
    .bind(basket_id.as_str())
    .fetch_all(conn)
    .await?;
    orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
    Ok(orders)
}

/// Applies a broker execution report to its order: `queued → executed`, writing the executed financials exactly
/// once. The `executed_amount IS NULL` guard makes a replayed report a transition error, never a second write.
pub async fn record_execution(
    confirmation: ExecutionConfirmation,
    tolerance: Cents,
    conn: &mut SqliteConnection,
) -> Result<Order, SettlementError> {
    let order = fetch_order_by_order_id(&confirmation.order_id, &mut *conn)
        .await?
        .ok_or_else(|| SettlementError::OrderNotFound(confirmation.order_id.clone()))?;
    next_status(order.status, OrderEvent::Execute)
        .map_err(|source| SettlementError::InvalidTransition { order_id: order.order_id.clone(), source })?;

    let diff = (confirmation.amount - order.amount).value().abs();
    if diff > tolerance.value() {
        return Err(SettlementError::ExecutionMismatch {
            order_id: order.order_id.clone(),
            detail: format!(
                "executed amount {} differs from requested {} by more than {tolerance}",
                confirmation.amount, order.amount
            ),
        });
    }
    if confirmation.shares > order.shares {
        return Err(SettlementError::ExecutionMismatch {
            order_id: order.order_id.clone(),
            detail: format!("executed shares {} exceed requested {}", confirmation.shares, order.shares),
        });
    }

    let updated: Option<Order> = sqlx::query_as(
        r#"
        UPDATE orders SET
            status = 'executed',
            executed_price = $1,
            executed_shares = $2,
            executed_amount = $3,
            executed_at = $4,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $5 AND status = 'queued' AND executed_amount IS NULL
        RETURNING *
        "#,
    )
    .bind(confirmation.price)
    .bind(confirmation.shares)
    .bind(confirmation.amount)
    .bind(confirmation.executed_at)
    .bind(order.id)
    .fetch_optional(conn)
    .await?;
    updated.ok_or_else(|| SettlementError::invalid_transition(&order.order_id, order.status, OrderEvent::Execute))
}

/// Stamps the paid markers on every unpaid executed/confirmed order for the broker under the merchant. Statuses
/// are untouched here; the batch settles separately once the payment clears.
pub async fn mark_batch_paid(
    merchant_id: &str,
    broker: &str,
    batch_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, SettlementError> {
    let mut orders: Vec<Order> = sqlx::query_as(
        r#"
        UPDATE orders SET
            paid_flag = TRUE,
            paid_batch_id = $1,
            paid_at = CURRENT_TIMESTAMP,
            updated_at = CURRENT_TIMESTAMP
        WHERE merchant_id = $2 AND broker = $3 AND paid_flag = FALSE AND status IN ('executed', 'confirmed')
        RETURNING *
        "#,
    )
    .bind(batch_id)
    .bind(merchant_id)
    .bind(broker)
    .fetch_all(conn)
    .await?;
    orders.sort_by(|a, b| a.order_id.cmp(&b.order_id));
    Ok(orders)
}

pub async fn fetch_batch(batch_id: &str, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let orders = sqlx::query_as("SELECT * FROM orders WHERE paid_batch_id = $1 ORDER BY order_id ASC")
        .bind(batch_id)
        .fetch_all(conn)
        .await?;
    Ok(orders)
}

/// Settles every order in a paid batch. Call this inside a transaction: the first ineligible order aborts with an
/// error, and rolling the transaction back leaves the whole batch untouched.
pub async fn settle_batch(batch_id: &str, conn: &mut SqliteConnection) -> Result<Vec<Order>, SettlementError> {
    let orders = fetch_batch(batch_id, &mut *conn).await?;
    if orders.is_empty() {
        return Err(SettlementError::BatchNotFound(batch_id.to_string()));
    }
    let mut settled = Vec::with_capacity(orders.len());
    for order in &orders {
        let updated = transition_status(order, OrderEvent::Settle, &mut *conn).await?;
        settled.push(updated);
    }
    Ok(settled)
}

/// All `settled` orders that have never been journaled and are not claimed by an in-flight journal,
/// optionally restricted to a member set. The `journaled_at IS NULL` predicate is what makes journal runs
/// idempotent; the `journal_pk IS NULL` predicate keeps orders claimed by a concurrent or crashed run out of
/// a new selection.
pub async fn settled_unjournaled(
    scope: &JournalScope,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        "SELECT * FROM orders WHERE status = 'settled' AND journaled_at IS NULL AND journal_pk IS NULL",
    );
    if let JournalScope::Members(members) = scope {
        builder.push(" AND member_id IN (");
        let mut ids = builder.separated(", ");
        for member in members {
            ids.push_bind(member.as_str().to_string());
        }
        builder.push(")");
    }
    builder.push(" ORDER BY order_id ASC");
    trace!("📝️ Executing query: {}", builder.sql());
    let orders = builder.build_query_as::<Order>().fetch_all(conn).await?;
    Ok(orders)
}

/// Claims settled orders for a queued journal by stamping `journal_pk` on each one. Run inside the same
/// transaction that inserts the queued journal record: if any order is no longer settled, was journaled, or
/// already carries a claim from another run, this returns `false` and the caller must roll the whole
/// transaction back. The claim is what guarantees an order funds at most one external transfer.
pub(crate) async fn claim_for_journal(
    journal_pk: i64,
    order_ids: &[OrderId],
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    for order_id in order_ids {
        let claimed = sqlx::query(
            r#"
            UPDATE orders SET journal_pk = $1, updated_at = CURRENT_TIMESTAMP
            WHERE order_id = $2 AND status = 'settled' AND journaled_at IS NULL AND journal_pk IS NULL
            "#,
        )
        .bind(journal_pk)
        .bind(order_id.as_str())
        .execute(&mut *conn)
        .await?;
        if claimed.rows_affected() == 0 {
            trace!("📝️ Order {order_id} could not be claimed for journal {journal_pk}");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Releases the claim a failed journal holds on its orders, returning them to the journalable pool.
pub(crate) async fn release_claim(journal_pk: i64, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let released = sqlx::query(
        "UPDATE orders SET journal_pk = NULL, updated_at = CURRENT_TIMESTAMP WHERE journal_pk = $1 AND \
         journaled_at IS NULL",
    )
    .bind(journal_pk)
    .execute(conn)
    .await?;
    Ok(released.rows_affected())
}

/// Flips every order claimed by the journal to `journaled` and stamps `journaled_at`. Run inside the journal
/// completion transaction. The claim, not the status, selects the rows: the money has moved by the time this
/// runs, so `journaled` is the truth even if an administrator toggled an order to `sell` in the meantime
/// (a transition the lifecycle table permits from `sell` as well).
pub(crate) async fn mark_journaled(journal_pk: i64, conn: &mut SqliteConnection) -> Result<Vec<Order>, SettlementError> {
    let mut updated: Vec<Order> = sqlx::query_as(
        r#"
        UPDATE orders SET
            status = 'journaled',
            journaled_at = CURRENT_TIMESTAMP,
            updated_at = CURRENT_TIMESTAMP
        WHERE journal_pk = $1 AND journaled_at IS NULL
        RETURNING *
        "#,
    )
    .bind(journal_pk)
    .fetch_all(conn)
    .await?;
    if updated.is_empty() {
        return Err(SettlementError::JournalNotFound(journal_pk));
    }
    updated.sort_by(|a, b| a.order_id.cmp(&b.order_id));
    Ok(updated)
}
