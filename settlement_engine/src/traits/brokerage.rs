use lbp_common::Cents;
use thiserror::Error;

use crate::db_types::MemberId;

/// Client for the external brokerage ledger.
///
/// This is the only operation in the pipeline that is expected to block for meaningful wall-clock time. Callers
/// wrap it in a timeout and treat a timeout as a failure, never as success (the journal record stays `failed` and
/// the orders stay `settled`, so a transfer that actually landed will be caught as a duplicate by the brokerage's
/// own idempotency on the reference we pass).
#[allow(async_fn_in_trait)]
pub trait BrokerageClient: Send + Sync {
    /// Moves `amount` from the platform's omnibus sweep account into the member's individual sub-account.
    ///
    /// `reference` is our journal record id, passed through for idempotency on the brokerage side.
    /// Returns the broker-assigned journal id.
    async fn transfer_to_sub_account(
        &self,
        member_id: &MemberId,
        account_id: &str,
        amount: Cents,
        reference: &str,
    ) -> Result<String, TransferError>;
}

#[derive(Debug, Clone, Error)]
pub enum TransferError {
    #[error("The brokerage rejected the transfer: {0}")]
    Rejected(String),
    #[error("The transfer call timed out")]
    Timeout,
    #[error("The brokerage is unreachable: {0}")]
    Unavailable(String),
}
