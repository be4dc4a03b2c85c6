//! Rendering and verification for the two-file broker ACH export.
//!
//! The detail file carries one row per unpaid order; the ACH file carries exactly one aggregated payment
//! instruction. The aggregate must equal the sum of the detail rows to the cent, and the check is performed on the
//! *rendered* files (parse back, re-sum, compare) so that a rendering bug can never ship inconsistent files.
use chrono::{DateTime, Utc};
use lbp_common::Cents;
use log::trace;

use crate::{db_types::Order, traits::SettlementError};

pub const DETAIL_HEADERS: [&str; 8] =
    ["order_id", "member_id", "symbol", "shares", "amount", "amount_source", "status", "placed_at"];

pub const ACH_HEADERS: [&str; 5] = ["merchant_id", "broker", "order_count", "amount", "effective_date"];

/// Renders the per-order detail file. Rows are emitted in the order given; callers sort by `order_id` first so the
/// output is deterministic.
pub fn render_detail_csv(orders: &[Order]) -> Result<String, SettlementError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(DETAIL_HEADERS).map_err(render_error)?;
    for order in orders {
        let source = if order.is_amount_executed() { "executed" } else { "requested" };
        writer
            .write_record(&[
                order.order_id.as_str().to_string(),
                order.member_id.as_str().to_string(),
                order.symbol.clone(),
                format!("{}", order.executed_shares.unwrap_or(order.shares)),
                order.payment_amount().to_decimal_string(),
                source.to_string(),
                order.status.to_string(),
                order.placed_at.to_rfc3339(),
            ])
            .map_err(render_error)?;
    }
    let bytes = writer.into_inner().map_err(|e| SettlementError::ReconciliationError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SettlementError::ReconciliationError(e.to_string()))
}

/// Renders the single-row aggregated ACH payment instruction.
pub fn render_ach_csv(
    merchant_id: &str,
    broker: &str,
    order_count: usize,
    total: Cents,
    effective_date: DateTime<Utc>,
) -> Result<String, SettlementError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(ACH_HEADERS).map_err(render_error)?;
    writer
        .write_record(&[
            merchant_id.to_string(),
            broker.to_string(),
            order_count.to_string(),
            total.to_decimal_string(),
            effective_date.format("%Y-%m-%d").to_string(),
        ])
        .map_err(render_error)?;
    let bytes = writer.into_inner().map_err(|e| SettlementError::ReconciliationError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| SettlementError::ReconciliationError(e.to_string()))
}

/// Parses both rendered files back and checks that the detail amounts sum to the ACH aggregate exactly.
///
/// Returns the reconciled total. Any mismatch, malformed row or missing aggregate fails the whole export; no
/// caller ever sees one file without the other reconciling.
pub fn verify_reconciliation(detail_csv: &str, ach_csv: &str) -> Result<Cents, SettlementError> {
    let amount_col = DETAIL_HEADERS.iter().position(|h| *h == "amount").unwrap_or_default();
    let mut detail_total = Cents::default();
    let mut reader = csv::Reader::from_reader(detail_csv.as_bytes());
    for record in reader.records() {
        let record = record.map_err(|e| SettlementError::ReconciliationError(e.to_string()))?;
        let raw = record
            .get(amount_col)
            .ok_or_else(|| SettlementError::ReconciliationError("detail row is missing an amount".to_string()))?;
        detail_total += parse_decimal(raw)
            .ok_or_else(|| SettlementError::ReconciliationError(format!("unparseable detail amount '{raw}'")))?;
    }

    let ach_amount_col = ACH_HEADERS.iter().position(|h| *h == "amount").unwrap_or_default();
    let mut reader = csv::Reader::from_reader(ach_csv.as_bytes());
    let mut rows = reader.records();
    let aggregate_row = rows
        .next()
        .transpose()
        .map_err(|e| SettlementError::ReconciliationError(e.to_string()))?
        .ok_or_else(|| SettlementError::ReconciliationError("ACH file has no payment instruction row".to_string()))?;
    if rows.next().is_some() {
        return Err(SettlementError::ReconciliationError("ACH file must contain exactly one row".to_string()));
    }
    let raw = aggregate_row
        .get(ach_amount_col)
        .ok_or_else(|| SettlementError::ReconciliationError("ACH row is missing an amount".to_string()))?;
    let aggregate = parse_decimal(raw)
        .ok_or_else(|| SettlementError::ReconciliationError(format!("unparseable ACH amount '{raw}'")))?;

    if detail_total != aggregate {
        return Err(SettlementError::ReconciliationError(format!(
            "detail rows sum to {detail_total} but the ACH instruction says {aggregate}"
        )));
    }
    trace!("🏦️ ACH export reconciled at {detail_total}");
    Ok(aggregate)
}

/// Parses a plain decimal amount ("50.10", "-1.99", "7") into cents. Rejects more than two fractional digits
/// rather than silently rounding an amount that is about to be wired.
fn parse_decimal(raw: &str) -> Option<Cents> {
    let raw = raw.trim();
    let (negative, raw) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let (whole, frac) = match raw.split_once('.') {
        Some((w, f)) => (w, f),
        None => (raw, ""),
    };
    if frac.len() > 2 || whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = whole.parse().ok()?;
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac_cents)?;
    Some(Cents::from(if negative { -cents } else { cents }))
}

fn render_error(e: csv::Error) -> SettlementError {
    SettlementError::ReconciliationError(format!("failed to render export: {e}"))
}
