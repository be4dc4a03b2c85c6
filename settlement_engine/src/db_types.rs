//! Record types for the order/basket store, the transactions ledger and the journal table.
//!
//! Everything in this module maps 1:1 onto a database row. The status enums are stored as their lowercase string
//! form, so the `Display`/`FromStr` pairs here are part of the storage format, not just cosmetics.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use lbp_common::Cents;
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ConversionError(pub String);

//--------------------------------------       OrderId       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl OrderId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      BasketId       ---------------------------------------------------------
/// Groups the orders a member submitted together in one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct BasketId(pub String);

impl<S: Into<String>> From<S> for BasketId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for BasketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl BasketId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      MemberId       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct MemberId(pub String);

impl<S: Into<String>> From<S> for MemberId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}

impl Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl MemberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------     OrderStatus     ---------------------------------------------------------
/// The lifecycle state of an order.
///
/// The legal transitions between these states are defined in [`crate::lifecycle`]; nothing else in the codebase may
/// decide that a transition is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created by the conversion flow; not yet swept to a broker.
    Placed,
    /// Swept to the broker as part of its basket, awaiting execution.
    Queued,
    /// The broker has executed the trade. `executed_*` fields are set at this transition, exactly once.
    Executed,
    /// Post-trade confirmation received from the broker.
    Confirmed,
    /// The merchant's ACH payment for the broker invoice has cleared. Eligible for journaling.
    Settled,
    /// Administratively reclassified for the sell workflow. Reversible back to `Settled`.
    Sell,
    /// The sell completed. Display-only.
    Sold,
    /// Funds moved into the member's brokerage sub-account. Display-only.
    Journaled,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states reject all further mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Sold | OrderStatus::Journaled | OrderStatus::Failed | OrderStatus::Cancelled)
    }

    /// States in which an order may carry `paid_flag = true`.
    pub fn is_payable(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed |
                OrderStatus::Confirmed |
                OrderStatus::Settled |
                OrderStatus::Sell |
                OrderStatus::Sold |
                OrderStatus::Journaled
        )
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Queued => "queued",
            OrderStatus::Executed => "executed",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Settled => "settled",
            OrderStatus::Sell => "sell",
            OrderStatus::Sold => "sold",
            OrderStatus::Journaled => "journaled",
            OrderStatus::Failed => "failed",
            OrderStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "placed" => Ok(Self::Placed),
            "queued" => Ok(Self::Queued),
            "executed" => Ok(Self::Executed),
            "confirmed" => Ok(Self::Confirmed),
            "settled" => Ok(Self::Settled),
            "sell" => Ok(Self::Sell),
            "sold" => Ok(Self::Sold),
            "journaled" => Ok(Self::Journaled),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl From<String> for OrderStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status in store: {value}. This conversion cannot fail. Defaulting to Placed");
            OrderStatus::Placed
        })
    }
}

//--------------------------------------      OrderType      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
    Gtc,
}

impl Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
            OrderType::Stop => "stop",
            OrderType::StopLimit => "stop_limit",
            OrderType::Gtc => "gtc",
        };
        write!(f, "{s}")
    }
}

impl FromStr for OrderType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "market" => Ok(Self::Market),
            "limit" => Ok(Self::Limit),
            "stop" => Ok(Self::Stop),
            "stop_limit" => Ok(Self::StopLimit),
            "gtc" => Ok(Self::Gtc),
            s => Err(ConversionError(format!("Invalid order type: {s}"))),
        }
    }
}

impl From<String> for OrderType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order type in store: {value}. Defaulting to market");
            OrderType::Market
        })
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub basket_id: BasketId,
    pub member_id: MemberId,
    pub merchant_id: String,
    pub symbol: String,
    pub broker: String,
    pub order_type: OrderType,
    pub shares: f64,
    /// The requested purchase amount.
    pub amount: Cents,
    pub points_used: i64,
    pub executed_price: Option<Cents>,
    pub executed_shares: Option<f64>,
    /// Set exactly once, at the `executed` transition. Immutable thereafter.
    pub executed_amount: Option<Cents>,
    pub status: OrderStatus,
    pub placed_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub paid_flag: bool,
    pub paid_batch_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub journaled_at: Option<DateTime<Utc>>,
    /// The journal record that has claimed this order. Set when the journal is queued and cleared if the
    /// journal fails, so a settled order can belong to at most one in-flight journal at a time.
    pub journal_pk: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// The amount this order contributes to a journal or broker payment.
    ///
    /// `executed_amount` is preferred; orders that settled without a distinct execution record (fee-only flows)
    /// fall back to the requested amount. Callers that need to audit the sourcing should check
    /// [`Order::is_amount_executed`].
    pub fn payment_amount(&self) -> Cents {
        self.executed_amount.unwrap_or(self.amount)
    }

    pub fn is_amount_executed(&self) -> bool {
        self.executed_amount.is_some()
    }
}

//--------------------------------------       NewOrder      ---------------------------------------------------------
/// A purchase intent as handed over by the (out-of-scope) conversion/basket-submission flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub basket_id: BasketId,
    pub member_id: MemberId,
    pub merchant_id: String,
    pub symbol: String,
    pub broker: String,
    pub order_type: OrderType,
    pub shares: f64,
    pub amount: Cents,
    pub points_used: i64,
    pub placed_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new(order_id: OrderId, basket_id: BasketId, member_id: MemberId, amount: Cents) -> Self {
        Self {
            order_id,
            basket_id,
            member_id,
            merchant_id: String::new(),
            symbol: String::new(),
            broker: String::new(),
            order_type: OrderType::Market,
            shares: 0.0,
            amount,
            points_used: 0,
            placed_at: Utc::now(),
        }
    }
}

//--------------------------------------ExecutionConfirmation---------------------------------------------------------
/// The broker's execution report for a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfirmation {
    pub order_id: OrderId,
    pub price: Cents,
    pub shares: f64,
    pub amount: Cents,
    pub executed_at: DateTime<Utc>,
    /// The broker's own reference for the fill, kept for audit trails.
    pub broker_ref: Option<String>,
}

//--------------------------------------        TxType       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum TxType {
    PointsReceived,
    RedeemPoints,
    AdjustPoints,
    CashIn,
    CashOut,
    CashFee,
}

impl Display for TxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TxType::PointsReceived => "points_received",
            TxType::RedeemPoints => "redeem_points",
            TxType::AdjustPoints => "adjust_points",
            TxType::CashIn => "cash_in",
            TxType::CashOut => "cash_out",
            TxType::CashFee => "cash_fee",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TxType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "points_received" => Ok(Self::PointsReceived),
            "redeem_points" => Ok(Self::RedeemPoints),
            "adjust_points" => Ok(Self::AdjustPoints),
            "cash_in" => Ok(Self::CashIn),
            "cash_out" => Ok(Self::CashOut),
            "cash_fee" => Ok(Self::CashFee),
            s => Err(ConversionError(format!("Invalid ledger tx type: {s}"))),
        }
    }
}

impl From<String> for TxType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid tx type in ledger: {value}. Defaulting to adjust_points");
            TxType::AdjustPoints
        })
    }
}

//--------------------------------------      Direction      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

impl From<String> for Direction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "inbound" => Self::Inbound,
            "outbound" => Self::Outbound,
            _ => {
                error!("Invalid ledger direction: {value}. Defaulting to inbound");
                Self::Inbound
            },
        }
    }
}

//--------------------------------------    LedgerStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum LedgerStatus {
    Pending,
    Confirmed,
    Failed,
    Reversed,
}

impl Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LedgerStatus::Pending => "pending",
            LedgerStatus::Confirmed => "confirmed",
            LedgerStatus::Failed => "failed",
            LedgerStatus::Reversed => "reversed",
        };
        write!(f, "{s}")
    }
}

impl From<String> for LedgerStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pending" => Self::Pending,
            "confirmed" => Self::Confirmed,
            "failed" => Self::Failed,
            "reversed" => Self::Reversed,
            _ => {
                error!("Invalid ledger status: {value}. Defaulting to pending");
                Self::Pending
            },
        }
    }
}

//--------------------------------------     LedgerEntry     ---------------------------------------------------------
/// One immutable balance-affecting event for a member.
///
/// Amounts are never updated once written. The only legal in-place change is the status transitions
/// `pending → confirmed | failed` and `confirmed → reversed`.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub tx_id: i64,
    pub member_id: MemberId,
    pub order_id: Option<OrderId>,
    pub tx_type: TxType,
    pub direction: Direction,
    pub channel: String,
    pub status: LedgerStatus,
    pub amount_points: i64,
    pub amount_cash: Cents,
    pub created_at: DateTime<Utc>,
    /// Caller-supplied idempotency key. Unique when present.
    pub client_tx_id: Option<String>,
}

impl LedgerEntry {
    /// The entry's cash contribution to the member balance: positive inbound, negative outbound.
    pub fn signed_cash(&self) -> Cents {
        match self.direction {
            Direction::Inbound => self.amount_cash,
            Direction::Outbound => -self.amount_cash,
        }
    }
}

//--------------------------------------   NewLedgerEntry    ---------------------------------------------------------
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub member_id: MemberId,
    pub order_id: Option<OrderId>,
    pub tx_type: TxType,
    pub direction: Direction,
    pub channel: String,
    pub status: LedgerStatus,
    pub amount_points: i64,
    pub amount_cash: Cents,
    pub client_tx_id: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(member_id: MemberId, tx_type: TxType, direction: Direction, amount_cash: Cents) -> Self {
        Self {
            member_id,
            order_id: None,
            tx_type,
            direction,
            channel: "platform".to_string(),
            status: LedgerStatus::Confirmed,
            amount_points: 0,
            amount_cash,
            client_tx_id: None,
        }
    }

    pub fn on_channel<S: Into<String>>(mut self, channel: S) -> Self {
        self.channel = channel.into();
        self
    }

    pub fn with_client_tx_id<S: Into<String>>(mut self, client_tx_id: S) -> Self {
        self.client_tx_id = Some(client_tx_id.into());
        self
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.amount_points = points;
        self
    }

    pub fn pending(mut self) -> Self {
        self.status = LedgerStatus::Pending;
        self
    }
}

//--------------------------------------    JournalStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum JournalStatus {
    Queued,
    Journaled,
    Failed,
}

impl Display for JournalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalStatus::Queued => "queued",
            JournalStatus::Journaled => "journaled",
            JournalStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl From<String> for JournalStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "queued" => Self::Queued,
            "journaled" => Self::Journaled,
            "failed" => Self::Failed,
            _ => {
                error!("Invalid journal status: {value}. Defaulting to failed");
                Self::Failed
            },
        }
    }
}

//--------------------------------------    JournalRecord    ---------------------------------------------------------
/// One fund-transfer instruction from the omnibus sweep account into a member's brokerage sub-account.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct JournalRecord {
    pub id: i64,
    /// Assigned by the external brokerage once the transfer is acknowledged.
    pub journal_id: Option<String>,
    pub member_id: MemberId,
    pub amount: Cents,
    pub order_count: i64,
    pub status: JournalStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub journaled_at: Option<DateTime<Utc>>,
}

//--------------------------------------    MemberWallet     ---------------------------------------------------------
/// The per-member balance projection.
///
/// This is a materialized view over the ledger: good enough for display, never authoritative for a financial
/// decision. [`crate::ProfileApi`] recomputes and flags rows that have drifted.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct MemberWallet {
    pub id: i64,
    pub member_id: MemberId,
    pub merchant_id: String,
    pub points: i64,
    pub cash_balance: Cents,
    /// The member's current tier conversion rate, in cents per point.
    pub tier_rate: f64,
    /// The member's individual brokerage sub-account, if one has been linked.
    pub brokerage_account_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      Merchant       ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Merchant {
    pub merchant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
