use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{BasketId, MemberId, OrderId, OrderStatus};

/// Criteria for searching the order store.
///
/// An empty filter matches everything. Results are always ordered by `order_id` ascending so that bulk operations
/// and exports are deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderQueryFilter {
    pub order_id: Option<OrderId>,
    pub basket_id: Option<BasketId>,
    pub member_id: Option<MemberId>,
    pub merchant_id: Option<String>,
    pub broker: Option<String>,
    pub paid: Option<bool>,
    pub paid_batch_id: Option<String>,
    /// When true, only orders that have never been journaled (`journaled_at IS NULL`).
    pub unjournaled: Option<bool>,
    pub status: Option<Vec<OrderStatus>>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl OrderQueryFilter {
    pub fn with_order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    pub fn with_basket_id(mut self, basket_id: BasketId) -> Self {
        self.basket_id = Some(basket_id);
        self
    }

    pub fn with_member_id(mut self, member_id: MemberId) -> Self {
        self.member_id = Some(member_id);
        self
    }

    pub fn with_merchant_id<S: Into<String>>(mut self, merchant_id: S) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    pub fn with_broker<S: Into<String>>(mut self, broker: S) -> Self {
        self.broker = Some(broker.into());
        self
    }

    pub fn paid(mut self, paid: bool) -> Self {
        self.paid = Some(paid);
        self
    }

    pub fn with_paid_batch_id<S: Into<String>>(mut self, batch_id: S) -> Self {
        self.paid_batch_id = Some(batch_id.into());
        self
    }

    pub fn unjournaled(mut self) -> Self {
        self.unjournaled = Some(true);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status.get_or_insert_with(Vec::new).push(status);
        self
    }

    pub fn with_statuses<I: IntoIterator<Item = OrderStatus>>(mut self, statuses: I) -> Self {
        self.status.get_or_insert_with(Vec::new).extend(statuses);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    /// True when the filter constrains nothing and the search degenerates to a full scan. Every field that
    /// produces a WHERE clause must be reflected here, and only those fields.
    pub fn is_empty(&self) -> bool {
        self.order_id.is_none() &&
            self.basket_id.is_none() &&
            self.member_id.is_none() &&
            self.merchant_id.is_none() &&
            self.broker.is_none() &&
            self.paid.is_none() &&
            self.paid_batch_id.is_none() &&
            // `Some(false)` means "no journaling constraint", the same as `None`: the query builder only
            // emits a clause for `Some(true)`, and this predicate must agree with it.
            !self.unjournaled.unwrap_or(false) &&
            self.status.as_ref().map(|s| s.is_empty()).unwrap_or(true) &&
            self.since.is_none() &&
            self.until.is_none()
    }
}
