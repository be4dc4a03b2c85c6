use std::{collections::HashSet, fmt::Debug};

use log::*;

use crate::{
    db_types::{OrderId, OrderStatus},
    events::{EventProducers, OrderTransitionEvent},
    traits::{SettlementDatabase, SettlementError, ToggleOutcome, ToggleSkipReason},
};

/// The administrator bulk sell/settle toggle.
///
/// Reversibly moves orders between `settled` and `sell`. This is a pre-payment reclassification: no money moves,
/// no ledger entries are written, and the financial fields and order type are untouched.
pub struct ToggleApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for ToggleApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ToggleApi")
    }
}

impl<B> ToggleApi<B>
where B: SettlementDatabase
{
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    /// Applies the toggle with partial-success semantics.
    ///
    /// An id present in both sets rejects the whole request with `AmbiguousToggleRequest` before anything is
    /// written. After that, each id stands alone: ids in the wrong state are skipped and reported, never fatal,
    /// and re-requesting an id already in its target state is a counted-out no-op. The returned counts are rows
    /// actually changed.
    pub async fn toggle_sell_status(
        &self,
        to_sell: &[OrderId],
        to_settled: &[OrderId],
    ) -> Result<ToggleOutcome, SettlementError> {
        let sell_set: HashSet<&OrderId> = to_sell.iter().collect();
        if let Some(dup) = to_settled.iter().find(|id| sell_set.contains(id)) {
            warn!("🔀️ Toggle request lists {dup} in both directions. Rejecting the whole request.");
            return Err(SettlementError::AmbiguousToggleRequest(dup.clone()));
        }
        let outcome = self.db.toggle_sell_status(to_sell, to_settled).await?;
        info!(
            "🔀️ Toggle complete: {} marked sell, {} marked settled, {} skipped",
            outcome.marked_sell,
            outcome.marked_settled,
            outcome.skipped.len()
        );
        for skip in &outcome.skipped {
            match skip.reason {
                // Policy: toggling a sold order is a silent no-op for the caller, but it may be masking a lost
                // admin edit, so it gets its own log line rather than disappearing into the skip list.
                ToggleSkipReason::SoldOrder => {
                    warn!("🔀️ Order {} is sold; toggle request ignored (no-op by policy)", skip.order_id)
                },
                _ => trace!("🔀️ Order {} skipped: {}", skip.order_id, skip.reason),
            }
        }
        for order in &outcome.changed {
            let old = match order.status {
                OrderStatus::Sell => OrderStatus::Settled,
                _ => OrderStatus::Sell,
            };
            for producer in &self.producers.order_transition_producer {
                producer.publish_event(OrderTransitionEvent::new(old, order.clone())).await;
            }
        }
        Ok(outcome)
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
