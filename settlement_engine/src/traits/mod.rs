//! Backend contracts for the settlement engine.
//!
//! The core is written against these traits rather than a concrete store so that the SQLite backend in
//! [`crate::sqlite`] stays swappable and the external brokerage stays mockable in tests.
//!
//! * [`SettlementDatabase`] owns every mutating flow: order lifecycle transitions, the sell/settle toggle, the
//!   journal bookkeeping and the paid-batch stamps. All of its transitions go through [`crate::lifecycle`] and are
//!   applied with a compare-and-swap on the current status.
//! * [`LedgerManagement`] is the query side: orders, wallets, ledger entries, journals and the merchant master.
//! * [`BrokerageClient`] is the one external collaborator that blocks for real wall-clock time: the transfer call
//!   that moves settled cash from the omnibus account into a member's sub-account.
mod brokerage;
mod data_objects;
mod ledger_management;
mod settlement_database;

pub use brokerage::{BrokerageClient, TransferError};
pub use data_objects::{
    BrokerPaymentExport,
    BrokerSummary,
    IssueCategory,
    JournalRunResult,
    JournalScope,
    JournalSkipReason,
    JournalStatusReport,
    MemberJournalSummary,
    PaymentsReport,
    ProfileIssue,
    ProfileReport,
    ProfileTable,
    SkippedMember,
    SkippedToggle,
    ToggleOutcome,
    ToggleSkipReason,
};
pub use ledger_management::{LedgerApiError, LedgerManagement};
pub use settlement_database::{SettlementDatabase, SettlementError};
