use lbp_common::Cents;
use thiserror::Error;

use crate::db_types::{
    JournalRecord,
    LedgerEntry,
    LedgerStatus,
    MemberId,
    MemberWallet,
    Merchant,
    NewLedgerEntry,
    Order,
    OrderId,
};
use crate::se_api::OrderQueryFilter;

/// Query-side access to the order, ledger, wallet and journal stores.
///
/// Everything here is read-only except the ledger append and the two explicitly sanctioned mutations: the ledger
/// status transition and the wallet projection refresh.
#[allow(async_fn_in_trait)]
pub trait LedgerManagement {
    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerApiError>;

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, LedgerApiError>;

    async fn fetch_wallet(&self, member_id: &MemberId) -> Result<Option<MemberWallet>, LedgerApiError>;

    async fn fetch_wallets(&self) -> Result<Vec<MemberWallet>, LedgerApiError>;

    /// The authoritative cash balance for a member: the sum of confirmed ledger movements, signed by direction.
    ///
    /// This is what financial decisions use. The `cash_balance` column on the wallet row is a display projection
    /// and may be stale.
    async fn balance_for_member(&self, member_id: &MemberId) -> Result<Cents, LedgerApiError>;

    async fn entries_for_member(&self, member_id: &MemberId) -> Result<Vec<LedgerEntry>, LedgerApiError>;

    async fn fetch_all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerApiError>;

    /// Appends a ledger entry. Idempotent on `client_tx_id`: if an entry with the same key already exists, it is
    /// returned unchanged and the second element is `false`.
    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> Result<(LedgerEntry, bool), LedgerApiError>;

    /// Applies one of the sanctioned ledger status transitions (`pending → confirmed | failed`,
    /// `confirmed → reversed`). Anything else is an illegal mutation of an immutable record.
    async fn update_ledger_status(&self, tx_id: i64, status: LedgerStatus) -> Result<LedgerEntry, LedgerApiError>;

    async fn recent_journals(&self, limit: i64) -> Result<Vec<JournalRecord>, LedgerApiError>;

    async fn fetch_journal(&self, id: i64) -> Result<Option<JournalRecord>, LedgerApiError>;

    async fn fetch_merchants(&self) -> Result<Vec<Merchant>, LedgerApiError>;

    /// Recomputes the wallet row's `cash_balance` from the confirmed ledger. This is the repair operation for the
    /// materialized view; the profile pass reports drift, this fixes it.
    async fn refresh_wallet_cash(&self, member_id: &MemberId) -> Result<MemberWallet, LedgerApiError>;
}

#[derive(Debug, Clone, Error)]
pub enum LedgerApiError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("User error constructing query: {0}")]
    QueryError(String),
    #[error("Ledger entry {0} does not exist")]
    EntryNotFound(i64),
    #[error("Illegal ledger status change: {0}")]
    IllegalStatusChange(String),
    #[error("No wallet exists for member {0}")]
    WalletNotFound(MemberId),
}

impl From<sqlx::Error> for LedgerApiError {
    fn from(e: sqlx::Error) -> Self {
        LedgerApiError::DatabaseError(e.to_string())
    }
}
