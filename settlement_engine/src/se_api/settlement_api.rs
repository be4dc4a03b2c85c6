use std::fmt::Debug;

use lbp_common::Cents;
use log::*;

use crate::{
    db_types::{BasketId, ExecutionConfirmation, Order, OrderId, OrderStatus},
    events::{EventProducers, OrderTransitionEvent},
    helpers,
    se_api::OrderQueryFilter,
    traits::{SettlementDatabase, SettlementError},
};

/// Engine tunables for the settlement flows.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Maximum absolute difference between the requested amount and the broker's executed amount before an
    /// execution report is rejected as a mismatch.
    pub execution_tolerance: Cents,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { execution_tolerance: Cents::from(100) }
    }
}

/// `SettlementApi` advances orders along the main lifecycle: sweep, execution, confirmation, broker payment and
/// batch settlement.
pub struct SettlementApi<B> {
    db: B,
    config: SettlementConfig,
    producers: EventProducers,
}

impl<B> Debug for SettlementApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B> SettlementApi<B>
where B: SettlementDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, config: SettlementConfig::default(), producers }
    }

    pub fn with_config(mut self, config: SettlementConfig) -> Self {
        self.config = config;
        self
    }

    /// Sweeps a basket to its broker. Every `placed` order in the basket becomes `queued` atomically.
    pub async fn sweep_basket(&self, basket_id: &BasketId) -> Result<Vec<Order>, SettlementError> {
        let orders = self.db.queue_basket(basket_id).await?;
        debug!("⚙️📦️ Basket {basket_id} swept: {} order(s) queued", orders.len());
        for order in &orders {
            self.publish_transition(OrderStatus::Placed, order).await;
        }
        Ok(orders)
    }

    /// Applies a broker execution report to its order.
    ///
    /// The executed financials are written exactly once here; a report that disagrees with the request beyond the
    /// configured tolerance is rejected with `ExecutionMismatch` and the order stays `queued`.
    pub async fn record_execution(&self, confirmation: ExecutionConfirmation) -> Result<Order, SettlementError> {
        let order = self.db.record_execution(confirmation, self.config.execution_tolerance).await?;
        debug!("⚙️📦️ Order {} executed for {}", order.order_id, order.payment_amount());
        self.publish_transition(OrderStatus::Queued, &order).await;
        Ok(order)
    }

    /// Post-trade confirmation from the broker: `executed → confirmed`.
    pub async fn confirm_order(&self, order_id: &OrderId) -> Result<Order, SettlementError> {
        let order = self.db.confirm_order(order_id).await?;
        trace!("⚙️📦️ Order {order_id} confirmed");
        self.publish_transition(OrderStatus::Executed, &order).await;
        Ok(order)
    }

    /// Records that the merchant's ACH payment for a broker invoice has been submitted: stamps a fresh
    /// `paid_batch_id` on every unpaid executed/confirmed order for the broker and returns it with the stamped
    /// orders. Statuses do not change until the payment clears and [`Self::settle_paid_batch`] runs.
    pub async fn mark_batch_paid(
        &self,
        merchant_id: &str,
        broker: &str,
    ) -> Result<(String, Vec<Order>), SettlementError> {
        let batch_id = helpers::new_batch_id(merchant_id, broker);
        let orders = self.db.mark_batch_paid(merchant_id, broker, &batch_id).await?;
        info!("⚙️💵️ Batch {batch_id}: {} order(s) marked paid for broker {broker}", orders.len());
        Ok((batch_id, orders))
    }

    /// Settles a cleared paid batch, all-or-nothing. Partially-funded baskets are impossible by construction: one
    /// ineligible order rolls the entire batch back.
    pub async fn settle_paid_batch(&self, batch_id: &str) -> Result<Vec<Order>, SettlementError> {
        // Snapshot the pre-settlement statuses so the transition events carry the real old status.
        let before = self.db.search_orders(OrderQueryFilter::default().with_paid_batch_id(batch_id)).await?;
        let orders = self.db.settle_paid_batch(batch_id).await?;
        info!("⚙️💵️ Batch {batch_id} settled: {} order(s)", orders.len());
        for order in &orders {
            let old = before
                .iter()
                .find(|o| o.order_id == order.order_id)
                .map(|o| o.status)
                .unwrap_or(OrderStatus::Confirmed);
            self.publish_transition(old, order).await;
        }
        Ok(orders)
    }

    pub async fn fail_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError> {
        let before = self.current_status(order_id).await?;
        let order = self.db.fail_order(order_id, reason).await?;
        warn!("⚙️📦️ Order {order_id} failed: {reason}");
        self.publish_transition(before, &order).await;
        Ok(order)
    }

    pub async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError> {
        let before = self.current_status(order_id).await?;
        let order = self.db.cancel_order(order_id, reason).await?;
        info!("⚙️📦️ Order {order_id} cancelled: {reason}");
        self.publish_transition(before, &order).await;
        Ok(order)
    }

    /// Orders eligible for the sell workflow screens: `settled`, `sell` and (display-only) `sold`.
    pub async fn list_sell_eligible_orders(&self) -> Result<Vec<Order>, SettlementError> {
        let query = OrderQueryFilter::default().with_statuses([
            OrderStatus::Settled,
            OrderStatus::Sell,
            OrderStatus::Sold,
        ]);
        let orders = self.db.search_orders(query).await?;
        Ok(orders)
    }

    async fn current_status(&self, order_id: &OrderId) -> Result<OrderStatus, SettlementError> {
        let order = self
            .db
            .fetch_order_by_order_id(order_id)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))?;
        Ok(order.status)
    }

    async fn publish_transition(&self, old_status: OrderStatus, order: &Order) {
        for producer in &self.producers.order_transition_producer {
            let event = OrderTransitionEvent::new(old_status, order.clone());
            producer.publish_event(event).await;
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
