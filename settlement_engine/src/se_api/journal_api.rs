use std::{collections::BTreeMap, fmt::Debug, sync::Arc, time::Duration};

use futures_util::{stream, StreamExt};
use lbp_common::Cents;
use log::*;
use tokio::time::timeout;

use crate::{
    db_types::{JournalRecord, MemberId, Order, OrderId, OrderStatus},
    events::{EventProducers, JournalCompletedEvent, OrderTransitionEvent},
    traits::{
        BrokerageClient,
        JournalRunResult,
        JournalScope,
        JournalSkipReason,
        JournalStatusReport,
        MemberJournalSummary,
        SettlementDatabase,
        SettlementError,
        SkippedMember,
        TransferError,
    },
};

/// Tunables for the journal engine.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Maximum number of member transfers in flight at once.
    pub concurrency: usize,
    /// Per-member wall-clock limit on the external brokerage transfer call. A timeout is a transfer failure,
    /// never a success.
    pub transfer_timeout: Duration,
    /// How many recent journal records the status report returns.
    pub recent_journal_limit: i64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { concurrency: 4, transfer_timeout: Duration::from_secs(30), recent_journal_limit: 20 }
    }
}

/// One member's work for a journal run.
struct MemberBatch {
    member_id: MemberId,
    account_id: String,
    amount: Cents,
    orders: Vec<Order>,
}

enum MemberOutcome {
    Funded { journal: JournalRecord, orders: Vec<Order> },
    /// A journal record was created and subsequently failed.
    Failed(SkippedMember),
    /// A concurrent run claimed the orders first; no journal record exists for this member in this run.
    ClaimLost(SkippedMember),
}

/// `JournalApi` moves settled cash from the platform's omnibus sweep account into members' individual brokerage
/// sub-accounts.
///
/// Each member is an independent unit of work with its own transaction boundary: the engine runs the member groups
/// on a bounded worker pool, and one member's failed or timed-out transfer never blocks or rolls back another's.
pub struct JournalApi<B, C> {
    db: B,
    brokerage: Arc<C>,
    config: JournalConfig,
    producers: EventProducers,
}

impl<B, C> Debug for JournalApi<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JournalApi")
    }
}

impl<B, C> JournalApi<B, C>
where
    B: SettlementDatabase,
    C: BrokerageClient,
{
    pub fn new(db: B, brokerage: Arc<C>, producers: EventProducers) -> Self {
        Self { db, brokerage, config: JournalConfig::default(), producers }
    }

    pub fn with_config(mut self, config: JournalConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a journal pass over the given member scope.
    ///
    /// Only orders with `status = settled` that have never been journaled and are not claimed by an in-flight
    /// journal are considered, which makes re-running the pass safe: with no new settlements, the second run
    /// finds nothing and creates no journals, and two overlapping runs can never fund the same order twice.
    /// Members without a linked brokerage sub-account, members whose journalable amount is not positive, and
    /// members blocked by an unresolved queued journal are reported in the skip list, never silently dropped.
    pub async fn run_journal(&self, scope: JournalScope) -> Result<JournalRunResult, SettlementError> {
        let mut result = JournalRunResult::default();
        // A queued journal means a transfer is in flight, or a run crashed between the transfer and its
        // completion. Either way the member's orders are already claimed and the record must be completed or
        // failed before the member can be journaled again.
        let mut blocked = Vec::new();
        for stale in self.db.queued_journals(&scope).await? {
            warn!("📒️ Member {} has unresolved queued journal {}. Excluded from this run.", stale.member_id, stale.id);
            blocked.push(stale.member_id.clone());
            result.skipped.push(SkippedMember {
                member_id: stale.member_id,
                reason: JournalSkipReason::PendingJournal(stale.id),
            });
        }

        let orders = self.db.settled_unjournaled_orders(&scope).await?;
        debug!("📒️ Journal run over {} settled order(s)", orders.len());
        let mut groups: BTreeMap<MemberId, Vec<Order>> = BTreeMap::new();
        for order in orders {
            groups.entry(order.member_id.clone()).or_default().push(order);
        }

        let mut eligible = Vec::new();
        for (member_id, orders) in groups {
            if blocked.contains(&member_id) {
                continue;
            }
            let linked_account = self.db.fetch_wallet(&member_id).await?.and_then(|w| w.brokerage_account_id);
            let Some(account_id) = linked_account else {
                warn!("📒️ Member {member_id} has no linked brokerage sub-account. Excluded from this run.");
                result.skipped.push(SkippedMember { member_id, reason: JournalSkipReason::NoLinkedAccount });
                continue;
            };
            let amount: Cents = orders.iter().map(Order::payment_amount).sum();
            if !amount.is_positive() {
                trace!("📒️ Member {member_id} has nothing to journal ({amount}). Skipping.");
                result.skipped.push(SkippedMember { member_id, reason: JournalSkipReason::NothingToJournal });
                continue;
            }
            eligible.push(MemberBatch { member_id, account_id, amount, orders });
        }

        let outcomes: Vec<Result<MemberOutcome, SettlementError>> =
            stream::iter(eligible.into_iter().map(|batch| self.process_member(batch)))
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        for outcome in outcomes {
            match outcome? {
                MemberOutcome::Funded { journal, orders } => {
                    result.total_journaled += journal.amount;
                    result.members_funded += 1;
                    result.journals_created += 1;
                    self.publish_completion(&journal, &orders).await;
                },
                MemberOutcome::Failed(skip) => {
                    // A failed transfer still created (and failed) a journal record.
                    result.journals_created += 1;
                    result.skipped.push(skip);
                },
                MemberOutcome::ClaimLost(skip) => {
                    result.skipped.push(skip);
                },
            }
        }
        result.skipped.sort_by(|a, b| a.member_id.cmp(&b.member_id));
        info!(
            "📒️ Journal run complete: {} journaled across {} member(s), {} skipped",
            result.total_journaled,
            result.members_funded,
            result.skipped.len()
        );
        Ok(result)
    }

    /// Funds a single member: queued journal record claiming the orders, external transfer under a timeout,
    /// then completion or failure bookkeeping. The claim commits before the transfer goes out, so a second
    /// run racing on the same member loses the claim and never reaches the brokerage. Store-level errors
    /// propagate and abort the run; transfer-level errors are contained to this member.
    async fn process_member(&self, batch: MemberBatch) -> Result<MemberOutcome, SettlementError> {
        let MemberBatch { member_id, account_id, amount, orders } = batch;
        let order_ids: Vec<OrderId> = orders.iter().map(|o| o.order_id.clone()).collect();
        let Some(journal) = self.db.create_queued_journal(&member_id, amount, &order_ids).await? else {
            debug!("📒️ Member {member_id}'s orders were claimed by a concurrent run. Nothing to do.");
            return Ok(MemberOutcome::ClaimLost(SkippedMember {
                member_id,
                reason: JournalSkipReason::OrdersClaimed,
            }));
        };
        let reference = format!("journal-{}", journal.id);
        trace!("📒️ Journal {} queued: {amount} to {member_id} ({} order(s))", journal.id, orders.len());

        let transfer = self.brokerage.transfer_to_sub_account(&member_id, &account_id, amount, &reference);
        let transfer_result = match timeout(self.config.transfer_timeout, transfer).await {
            Ok(r) => r,
            Err(_) => Err(TransferError::Timeout),
        };

        match transfer_result {
            Ok(external_id) => {
                let (journal, updated) = self.db.complete_journal(journal.id, &external_id).await?;
                debug!("📒️ Journal {} complete: {amount} to member {member_id} as {external_id}", journal.id);
                Ok(MemberOutcome::Funded { journal, orders: updated })
            },
            Err(e) => {
                warn!("📒️ Transfer for member {member_id} failed: {e}. Orders stay settled for the next run.");
                self.db.fail_journal(journal.id, &e.to_string()).await?;
                Ok(MemberOutcome::Failed(SkippedMember {
                    member_id,
                    reason: JournalSkipReason::TransferFailed(e.to_string()),
                }))
            },
        }
    }

    /// The journal screen's status snapshot: the omnibus balance awaiting journaling, pending orders, recent
    /// journal records and a per-member breakdown.
    pub async fn journal_status(&self) -> Result<JournalStatusReport, SettlementError> {
        let pending = self.db.settled_unjournaled_orders(&JournalScope::All).await?;
        let firm_balance: Cents = pending.iter().map(Order::payment_amount).sum();
        let mut groups: BTreeMap<MemberId, Vec<Order>> = BTreeMap::new();
        for order in &pending {
            groups.entry(order.member_id.clone()).or_default().push(order.clone());
        }
        let mut member_summary = Vec::with_capacity(groups.len());
        for (member_id, orders) in groups {
            let brokerage_account_id =
                self.db.fetch_wallet(&member_id).await?.and_then(|w| w.brokerage_account_id);
            member_summary.push(MemberJournalSummary {
                member_id,
                total_amount: orders.iter().map(Order::payment_amount).sum(),
                order_count: orders.len(),
                brokerage_account_id,
                orders,
            });
        }
        let recent_journals = self.db.recent_journals(self.config.recent_journal_limit).await?;
        Ok(JournalStatusReport { firm_balance, pending, recent_journals, member_summary })
    }

    async fn publish_completion(&self, journal: &JournalRecord, orders: &[Order]) {
        for producer in &self.producers.journal_completed_producer {
            producer.publish_event(JournalCompletedEvent::new(journal.clone())).await;
        }
        for order in orders {
            for producer in &self.producers.order_transition_producer {
                producer.publish_event(OrderTransitionEvent::new(OrderStatus::Settled, order.clone())).await;
            }
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
