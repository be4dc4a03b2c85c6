use std::{fmt::Display, str::FromStr};

use lbp_common::Cents;
use serde::{Deserialize, Serialize};

use crate::db_types::{ConversionError, JournalRecord, MemberId, Order, OrderId, OrderStatus};

//--------------------------------------    JournalScope     ---------------------------------------------------------
/// Which members a journal run covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalScope {
    All,
    Members(Vec<MemberId>),
}

impl JournalScope {
    pub fn members<I, M>(ids: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<MemberId>,
    {
        Self::Members(ids.into_iter().map(Into::into).collect())
    }

    pub fn includes(&self, member_id: &MemberId) -> bool {
        match self {
            JournalScope::All => true,
            JournalScope::Members(ids) => ids.contains(member_id),
        }
    }
}

//--------------------------------------    ToggleOutcome    ---------------------------------------------------------
/// Result of a bulk sell/settle toggle. Counts reflect rows actually changed, never rows requested.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToggleOutcome {
    pub marked_sell: usize,
    pub marked_settled: usize,
    /// Ids that were not changed, each with the reason. A batch never fails because of one bad id.
    pub skipped: Vec<SkippedToggle>,
    /// The post-toggle order records, for event publication and display refresh.
    pub changed: Vec<Order>,
}

impl ToggleOutcome {
    pub fn total_changed(&self) -> usize {
        self.marked_sell + self.marked_settled
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedToggle {
    pub order_id: OrderId,
    pub reason: ToggleSkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToggleSkipReason {
    /// The order is already in the requested state; re-toggling is a no-op.
    AlreadyInTargetState,
    /// Sold orders are display-only; toggling one is a silent no-op by policy, but it is reported
    /// distinctly so lost admin edits stay visible.
    SoldOrder,
    /// The order is in a state the toggle does not own.
    IneligibleStatus(OrderStatus),
    NotFound,
}

impl Display for ToggleSkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToggleSkipReason::AlreadyInTargetState => write!(f, "already in the requested state"),
            ToggleSkipReason::SoldOrder => write!(f, "order is sold and display-only"),
            ToggleSkipReason::IneligibleStatus(s) => write!(f, "order status '{s}' is not toggleable"),
            ToggleSkipReason::NotFound => write!(f, "order does not exist"),
        }
    }
}

//--------------------------------------   JournalRunResult  ---------------------------------------------------------
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalRunResult {
    pub total_journaled: Cents,
    pub members_funded: usize,
    pub journals_created: usize,
    /// Members in scope that were not funded, each with the reason.
    pub skipped: Vec<SkippedMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMember {
    pub member_id: MemberId,
    pub reason: JournalSkipReason,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalSkipReason {
    /// The member has no linked brokerage sub-account. Reported, not retried automatically.
    NoLinkedAccount,
    /// The member's journalable amount is zero or negative; no journal record is created.
    NothingToJournal,
    /// The external transfer failed or timed out. The orders stay settled and retry on the next run.
    TransferFailed(String),
    /// A queued journal (by record id) already exists for the member: an earlier run is still in flight, or
    /// crashed between the transfer and completion. The member is blocked until an operator completes or
    /// fails that record.
    PendingJournal(i64),
    /// A concurrent run claimed the member's orders first. Nothing was written for this member.
    OrdersClaimed,
}

impl Display for JournalSkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JournalSkipReason::NoLinkedAccount => write!(f, "no linked brokerage sub-account"),
            JournalSkipReason::NothingToJournal => write!(f, "nothing to journal"),
            JournalSkipReason::TransferFailed(e) => write!(f, "transfer failed: {e}"),
            JournalSkipReason::PendingJournal(id) => write!(f, "queued journal {id} is still unresolved"),
            JournalSkipReason::OrdersClaimed => write!(f, "orders were claimed by a concurrent journal run"),
        }
    }
}

//-------------------------------------- JournalStatusReport ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalStatusReport {
    /// The settled-but-unjournaled total currently sitting in the omnibus sweep account.
    pub firm_balance: Cents,
    pub pending: Vec<Order>,
    pub recent_journals: Vec<JournalRecord>,
    pub member_summary: Vec<MemberJournalSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberJournalSummary {
    pub member_id: MemberId,
    pub total_amount: Cents,
    pub order_count: usize,
    pub brokerage_account_id: Option<String>,
    pub orders: Vec<Order>,
}

//--------------------------------------    PaymentsReport   ---------------------------------------------------------
/// Unpaid executed/confirmed orders for a merchant, with per-broker aggregates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsReport {
    pub merchant_id: String,
    pub orders: Vec<Order>,
    pub summary: Vec<BrokerSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSummary {
    pub broker: String,
    pub order_count: usize,
    pub total_due: Cents,
}

//-------------------------------------- BrokerPaymentExport ---------------------------------------------------------
/// The two-file broker payment export: per-order detail plus a single aggregated ACH instruction.
///
/// The aggregate amount equals the sum of the detail rows to the cent; the export fails closed with a
/// reconciliation error before either file is returned otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPaymentExport {
    pub merchant_id: String,
    pub broker: String,
    pub detail_csv: String,
    pub ach_csv: String,
    pub total: Cents,
    pub order_count: usize,
    /// True when the rows mix executed amounts with requested-amount fallbacks; flagged for auditability.
    pub mixed_amount_sources: bool,
}

//--------------------------------------     ProfileTable    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileTable {
    MemberWallets,
    Orders,
    Ledger,
}

impl Display for ProfileTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProfileTable::MemberWallets => "member_wallets",
            ProfileTable::Orders => "orders",
            ProfileTable::Ledger => "transactions_ledger",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ProfileTable {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member_wallets" => Ok(Self::MemberWallets),
            "orders" => Ok(Self::Orders),
            "transactions_ledger" | "ledger" => Ok(Self::Ledger),
            s => Err(ConversionError(format!("Unknown profile table: {s}"))),
        }
    }
}

//--------------------------------------    ProfileReport    ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileReport {
    pub table: ProfileTable,
    /// Fraction of profiled rows with no issues, in [0, 1].
    pub completeness_score: f64,
    /// Per-check row counts and parameters, for the data-quality dashboard.
    pub field_analysis: serde_json::Value,
    pub critical_issues: Vec<ProfileIssue>,
    pub affected_members: Vec<MemberId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileIssue {
    pub category: IssueCategory,
    /// Human-readable description of what is wrong, so a caller can jump straight to the offending records.
    pub detail: String,
    pub member_ids: Vec<MemberId>,
    /// Offending record ids (order ids, ledger tx ids or wallet row ids, depending on the table).
    pub record_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    ConversionMismatch,
    DuplicateWallet,
    NegativeBalance,
    OrphanedMerchant,
    LedgerDrift,
    MissingExecution,
    PaidPreExecution,
    MissingJournalTimestamp,
    NegativeLedgerAmount,
    DuplicateClientTxId,
}

impl Display for IssueCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IssueCategory::ConversionMismatch => "conversion rate mismatch",
            IssueCategory::DuplicateWallet => "duplicate wallet row",
            IssueCategory::NegativeBalance => "negative balance",
            IssueCategory::OrphanedMerchant => "orphaned merchant reference",
            IssueCategory::LedgerDrift => "wallet cash drifted from ledger",
            IssueCategory::MissingExecution => "executed order without execution record",
            IssueCategory::PaidPreExecution => "paid flag on unexecuted order",
            IssueCategory::MissingJournalTimestamp => "journaled order without journal timestamp",
            IssueCategory::NegativeLedgerAmount => "negative ledger amount",
            IssueCategory::DuplicateClientTxId => "duplicate idempotency key",
        };
        write!(f, "{s}")
    }
}
