use lbp_common::Cents;
use log::{debug, trace};
use sqlx::SqliteConnection;

use crate::{
    db_types::{LedgerEntry, LedgerStatus, MemberId, NewLedgerEntry},
    traits::LedgerApiError,
};

/// Appends a ledger entry, returning `false` in the second parameter when an entry with the same `client_tx_id`
/// already exists. Entries without a key are always appended.
pub async fn idempotent_insert(
    entry: NewLedgerEntry,
    conn: &mut SqliteConnection,
) -> Result<(LedgerEntry, bool), LedgerApiError> {
    if let Some(key) = entry.client_tx_id.as_deref() {
        if let Some(existing) = fetch_by_client_tx_id(key, &mut *conn).await? {
            trace!("🗃️ Ledger entry with key {key} already exists (tx {}). Not appending.", existing.tx_id);
            return Ok((existing, false));
        }
    }
    let inserted = insert_entry(entry, conn).await?;
    debug!("🗃️ Ledger entry {} appended for member {}", inserted.tx_id, inserted.member_id);
    Ok((inserted, true))
}

async fn insert_entry(entry: NewLedgerEntry, conn: &mut SqliteConnection) -> Result<LedgerEntry, LedgerApiError> {
    let entry = sqlx::query_as(
        r#"
            INSERT INTO transactions_ledger (
                member_id,
                order_id,
                tx_type,
                direction,
                channel,
                status,
                amount_points,
                amount_cash,
                client_tx_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(entry.member_id)
    .bind(entry.order_id)
    .bind(entry.tx_type.to_string())
    .bind(entry.direction.to_string())
    .bind(entry.channel)
    .bind(entry.status.to_string())
    .bind(entry.amount_points)
    .bind(entry.amount_cash)
    .bind(entry.client_tx_id)
    .fetch_one(conn)
    .await?;
    Ok(entry)
}

pub async fn fetch_by_client_tx_id(
    client_tx_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    let entry = sqlx::query_as("SELECT * FROM transactions_ledger WHERE client_tx_id = $1")
        .bind(client_tx_id)
        .fetch_optional(conn)
        .await?;
    Ok(entry)
}

pub async fn fetch_entry(tx_id: i64, conn: &mut SqliteConnection) -> Result<Option<LedgerEntry>, sqlx::Error> {
    let entry =
        sqlx::query_as("SELECT * FROM transactions_ledger WHERE tx_id = $1").bind(tx_id).fetch_optional(conn).await?;
    Ok(entry)
}

pub async fn entries_for_member(
    member_id: &MemberId,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM transactions_ledger WHERE member_id = $1 ORDER BY tx_id ASC")
        .bind(member_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

pub async fn fetch_all_entries(conn: &mut SqliteConnection) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM transactions_ledger ORDER BY tx_id ASC").fetch_all(conn).await?;
    Ok(entries)
}

/// The authoritative cash balance: confirmed entries only, signed by direction, summed in integer cents.
pub async fn confirmed_balance(member_id: &MemberId, conn: &mut SqliteConnection) -> Result<Cents, sqlx::Error> {
    let balance: i64 = sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(CASE direction WHEN 'inbound' THEN amount_cash ELSE -amount_cash END), 0)
        FROM transactions_ledger
        WHERE member_id = $1 AND status = 'confirmed'
        "#,
    )
    .bind(member_id.as_str())
    .fetch_one(conn)
    .await?;
    Ok(Cents::from(balance))
}

/// Applies one of the sanctioned status transitions. Amounts are immutable; this is the only legal in-place change
/// to a ledger row.
pub async fn update_status(
    tx_id: i64,
    status: LedgerStatus,
    conn: &mut SqliteConnection,
) -> Result<LedgerEntry, LedgerApiError> {
    let entry = fetch_entry(tx_id, &mut *conn).await?.ok_or(LedgerApiError::EntryNotFound(tx_id))?;
    let legal = matches!(
        (entry.status, status),
        (LedgerStatus::Pending, LedgerStatus::Confirmed) |
            (LedgerStatus::Pending, LedgerStatus::Failed) |
            (LedgerStatus::Confirmed, LedgerStatus::Reversed)
    );
    if !legal {
        return Err(LedgerApiError::IllegalStatusChange(format!(
            "ledger entry {tx_id} cannot move from {} to {status}",
            entry.status
        )));
    }
    let updated: Option<LedgerEntry> =
        sqlx::query_as("UPDATE transactions_ledger SET status = $1 WHERE tx_id = $2 AND status = $3 RETURNING *")
            .bind(status.to_string())
            .bind(tx_id)
            .bind(entry.status.to_string())
            .fetch_optional(conn)
            .await?;
    updated.ok_or_else(|| {
        LedgerApiError::IllegalStatusChange(format!("ledger entry {tx_id} changed status under a concurrent writer"))
    })
}
