use serde::{Deserialize, Serialize};

use crate::db_types::{JournalRecord, MemberId, Order, OrderStatus};

/// Emitted once per successful order status transition.
///
/// The notification dispatcher (an external collaborator) subscribes to these to fire merchant and broker
/// webhooks; the core itself does nothing further with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTransitionEvent {
    pub order: Order,
    pub old_status: OrderStatus,
    pub new_status: OrderStatus,
}

impl OrderTransitionEvent {
    pub fn new(old_status: OrderStatus, order: Order) -> Self {
        let new_status = order.status;
        Self { order, old_status, new_status }
    }
}

/// Emitted when a journal run successfully funds a member's sub-account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalCompletedEvent {
    pub member_id: MemberId,
    pub journal: JournalRecord,
}

impl JournalCompletedEvent {
    pub fn new(journal: JournalRecord) -> Self {
        let member_id = journal.member_id.clone();
        Self { member_id, journal }
    }
}
