use lbp_common::Cents;
use thiserror::Error;

use crate::{
    db_types::{BasketId, ExecutionConfirmation, JournalRecord, MemberId, NewOrder, Order, OrderId, OrderStatus},
    lifecycle::{InvalidTransition, OrderEvent},
    traits::{JournalScope, LedgerApiError, LedgerManagement, ToggleOutcome, TransferError},
};

/// The highest-level behaviour contract for settlement engine backends.
///
/// Four components mutate order state through this trait - the settlement engine, the sell/settle toggle, the
/// journal engine and the broker payment step - and each owns a disjoint set of transitions. Every transition is
/// decided by [`crate::lifecycle::next_status`] and applied with a compare-and-swap on the current status, so two
/// components (or two copies of the same job) racing on one order produce an [`SettlementError::InvalidTransition`]
/// for the loser instead of a lost update.
#[allow(async_fn_in_trait)]
pub trait SettlementDatabase: Clone + LedgerManagement {
    /// The URL of the backing store.
    fn url(&self) -> &str;

    /// Stores an order handed over by the conversion flow. Idempotent: returns `false` in the second element if an
    /// order with the same `order_id` already exists.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementError>;

    /// Sweeps a basket to its broker: every `placed` order in the basket becomes `queued`, atomically.
    async fn queue_basket(&self, basket_id: &BasketId) -> Result<Vec<Order>, SettlementError>;

    /// Applies a broker execution report: `queued → executed`, setting `executed_price/shares/amount` exactly once.
    ///
    /// Fails with [`SettlementError::ExecutionMismatch`] when the report differs from the requested order by more
    /// than `tolerance` (amount) or reports shares exceeding the request.
    async fn record_execution(
        &self,
        confirmation: ExecutionConfirmation,
        tolerance: Cents,
    ) -> Result<Order, SettlementError>;

    /// Post-trade confirmation: `executed → confirmed`.
    async fn confirm_order(&self, order_id: &OrderId) -> Result<Order, SettlementError>;

    /// The confirmed-payment step after an ACH export: stamps `paid_flag`, `paid_at` and `paid_batch_id` on every
    /// unpaid executed/confirmed order for the broker under the merchant. Statuses do not change here.
    async fn mark_batch_paid(&self, merchant_id: &str, broker: &str, batch_id: &str)
        -> Result<Vec<Order>, SettlementError>;

    /// Settles every order carrying `paid_batch_id`, all-or-nothing: a single ineligible order rolls the whole
    /// batch back, so a basket is never left partially funded.
    async fn settle_paid_batch(&self, batch_id: &str) -> Result<Vec<Order>, SettlementError>;

    async fn fail_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError>;

    async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError>;

    /// The administrator bulk toggle: `settled → sell` for `to_sell`, `sell → settled` for `to_settled`.
    ///
    /// Ids are processed in stable sorted order with per-id compare-and-swap; ineligible ids are skipped and
    /// reported, not fatal. Disjointness of the two sets is the caller's contract and is checked at the API layer
    /// before this is invoked. No ledger entries are written; this is a pre-payment reclassification.
    async fn toggle_sell_status(
        &self,
        to_sell: &[OrderId],
        to_settled: &[OrderId],
    ) -> Result<ToggleOutcome, SettlementError>;

    /// All orders with `status = settled`, `journaled_at IS NULL` and no journal claim, optionally restricted
    /// to a member set. The `journaled_at IS NULL` filter is what makes journal runs idempotent; excluding
    /// claimed orders keeps a concurrent (or crashed) run's selection out of a new one.
    async fn settled_unjournaled_orders(&self, scope: &JournalScope) -> Result<Vec<Order>, SettlementError>;

    /// All `queued` journal records in scope. A queued record is an in-flight or crashed transfer; its member
    /// must not be journaled again until it is completed or failed.
    async fn queued_journals(&self, scope: &JournalScope) -> Result<Vec<JournalRecord>, SettlementError>;

    /// Creates a `queued` journal record for the member and claims every listed order for it, atomically.
    /// Committed before the external transfer call is made, so a crash between the two is visible and
    /// resolvable, and a concurrent run can never select the same orders.
    ///
    /// Returns `None` (and writes nothing) when any order could not be claimed: it is no longer settled, was
    /// journaled, or already belongs to another in-flight journal.
    async fn create_queued_journal(
        &self,
        member_id: &MemberId,
        amount: Cents,
        order_ids: &[OrderId],
    ) -> Result<Option<JournalRecord>, SettlementError>;

    /// Completes a journal after a successful brokerage transfer, in one transaction:
    /// * the journal record becomes `journaled` and stores the broker-assigned id;
    /// * exactly one confirmed `cash_out` ledger entry is appended (idempotency key `journal-{id}`);
    /// * every order the journal claimed flips to `journaled` with `journaled_at` set.
    ///
    /// Returns the completed record along with the updated order rows.
    async fn complete_journal(
        &self,
        journal_pk: i64,
        external_id: &str,
    ) -> Result<(JournalRecord, Vec<Order>), SettlementError>;

    /// Marks a journal `failed` after a transfer failure and releases its claim on the contributing orders,
    /// which stay `settled` so the next run retries them. No ledger entry is written.
    async fn fail_journal(&self, journal_pk: i64, reason: &str) -> Result<JournalRecord, SettlementError>;

    /// Closes the store connection.
    async fn close(&mut self) -> Result<(), SettlementError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum SettlementError {
    #[error("Internal database engine error: {0}")]
    DatabaseError(String),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("Illegal status transition for order {order_id}: {source}")]
    InvalidTransition {
        order_id: OrderId,
        #[source]
        source: InvalidTransition,
    },
    #[error("Order {0} appears in both toggle sets")]
    AmbiguousToggleRequest(OrderId),
    #[error("Execution report for order {order_id} does not match the request: {detail}")]
    ExecutionMismatch { order_id: OrderId, detail: String },
    #[error("ACH export reconciliation failed: {0}")]
    ReconciliationError(String),
    #[error("Brokerage transfer failed: {0}")]
    TransferFailure(#[from] TransferError),
    #[error("Member {0} has no linked brokerage sub-account")]
    NoLinkedAccount(MemberId),
    #[error("The requested journal record {0} does not exist")]
    JournalNotFound(i64),
    #[error("No orders carry paid batch id '{0}'")]
    BatchNotFound(String),
    #[error("No unpaid orders for broker '{broker}' under merchant '{merchant_id}'")]
    NothingToExport { merchant_id: String, broker: String },
    #[error("No basket '{0}' exists, or it has no sweepable orders")]
    BasketNotFound(String),
    #[error("{0}")]
    LedgerError(#[from] LedgerApiError),
}

impl SettlementError {
    pub(crate) fn invalid_transition(order_id: &OrderId, from: OrderStatus, event: OrderEvent) -> Self {
        SettlementError::InvalidTransition { order_id: order_id.clone(), source: InvalidTransition { from, event } }
    }
}

impl From<sqlx::Error> for SettlementError {
    fn from(e: sqlx::Error) -> Self {
        SettlementError::DatabaseError(e.to_string())
    }
}
