use std::{collections::BTreeMap, fmt::Debug};

use chrono::Utc;
use lbp_common::Cents;
use log::*;

use crate::{
    db_types::{Order, OrderStatus},
    helpers::ach,
    se_api::OrderQueryFilter,
    traits::{BrokerPaymentExport, BrokerSummary, PaymentsReport, SettlementDatabase, SettlementError},
};

/// Broker payment reporting and the two-file ACH export.
///
/// Everything here is a pure read over the order store: generating an export does not flip `paid_flag` (that is
/// the separate confirmed-payment step on [`crate::SettlementApi`]), so an export that was generated but never
/// sent can be regenerated without side effects.
pub struct PaymentsApi<B> {
    db: B,
}

impl<B> Debug for PaymentsApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentsApi")
    }
}

impl<B> PaymentsApi<B>
where B: SettlementDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Unpaid executed/confirmed orders for the merchant, with per-broker totals.
    pub async fn get_payments(&self, merchant_id: &str) -> Result<PaymentsReport, SettlementError> {
        let orders = self.unpaid_orders(merchant_id, None).await?;
        let mut brokers: BTreeMap<String, BrokerSummary> = BTreeMap::new();
        for order in &orders {
            let entry = brokers.entry(order.broker.clone()).or_insert_with(|| BrokerSummary {
                broker: order.broker.clone(),
                order_count: 0,
                total_due: Cents::default(),
            });
            entry.order_count += 1;
            entry.total_due += order.payment_amount();
        }
        Ok(PaymentsReport {
            merchant_id: merchant_id.to_string(),
            orders,
            summary: brokers.into_values().collect(),
        })
    }

    /// Generates the broker payment files: per-order detail plus the single aggregated ACH instruction.
    ///
    /// The rendered files are parsed back and cross-checked before being returned; a sum mismatch fails the whole
    /// export with `ReconciliationError` rather than emitting inconsistent files.
    pub async fn export_broker_payment(
        &self,
        merchant_id: &str,
        broker: &str,
    ) -> Result<BrokerPaymentExport, SettlementError> {
        let orders = self.unpaid_orders(merchant_id, Some(broker)).await?;
        if orders.is_empty() {
            return Err(SettlementError::NothingToExport {
                merchant_id: merchant_id.to_string(),
                broker: broker.to_string(),
            });
        }
        let total: Cents = orders.iter().map(Order::payment_amount).sum();
        let mixed_amount_sources =
            orders.iter().any(Order::is_amount_executed) && !orders.iter().all(Order::is_amount_executed);
        if mixed_amount_sources {
            // Some rows fall back to the requested amount; the amount_source column lets auditors tell them apart.
            warn!("🏦️ Export for broker {broker} mixes executed and requested amounts");
        }
        let detail_csv = ach::render_detail_csv(&orders)?;
        let ach_csv = ach::render_ach_csv(merchant_id, broker, orders.len(), total, Utc::now())?;
        let reconciled = ach::verify_reconciliation(&detail_csv, &ach_csv)?;
        debug!("🏦️ Export for broker {broker}: {} order(s), {reconciled} reconciled", orders.len());
        Ok(BrokerPaymentExport {
            merchant_id: merchant_id.to_string(),
            broker: broker.to_string(),
            detail_csv,
            ach_csv,
            total: reconciled,
            order_count: orders.len(),
            mixed_amount_sources,
        })
    }

    /// Unpaid orders eligible for broker payment, in stable `order_id` order.
    async fn unpaid_orders(&self, merchant_id: &str, broker: Option<&str>) -> Result<Vec<Order>, SettlementError> {
        let mut query = OrderQueryFilter::default()
            .with_merchant_id(merchant_id)
            .paid(false)
            .with_statuses([OrderStatus::Executed, OrderStatus::Confirmed]);
        if let Some(broker) = broker {
            query = query.with_broker(broker);
        }
        let orders = self.db.search_orders(query).await?;
        Ok(orders)
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
