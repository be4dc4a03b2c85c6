use lbp_common::Cents;
use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{JournalRecord, MemberId},
    traits::{JournalScope, SettlementError},
};

/// Creates a `queued` journal record. This is committed before the external transfer call goes out, so a crash
/// between the two leaves a visible, re-runnable queued record rather than an invisible half-transfer.
pub async fn create_queued(
    member_id: &MemberId,
    amount: Cents,
    order_count: i64,
    conn: &mut SqliteConnection,
) -> Result<JournalRecord, SettlementError> {
    let journal: JournalRecord = sqlx::query_as(
        r#"
            INSERT INTO journals (member_id, amount, order_count, status)
            VALUES ($1, $2, $3, 'queued')
            RETURNING *;
        "#,
    )
    .bind(member_id.as_str())
    .bind(amount)
    .bind(order_count)
    .fetch_one(conn)
    .await?;
    trace!("🗃️ Journal {} queued for member {member_id}: {amount}", journal.id);
    Ok(journal)
}

/// Marks a queued journal `journaled` and stores the broker-assigned transfer id.
pub async fn complete(
    journal_pk: i64,
    external_id: &str,
    conn: &mut SqliteConnection,
) -> Result<JournalRecord, SettlementError> {
    let journal: Option<JournalRecord> = sqlx::query_as(
        r#"
        UPDATE journals SET
            status = 'journaled',
            journal_id = $1,
            journaled_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND status = 'queued'
        RETURNING *
        "#,
    )
    .bind(external_id)
    .bind(journal_pk)
    .fetch_optional(conn)
    .await?;
    let journal = journal.ok_or(SettlementError::JournalNotFound(journal_pk))?;
    debug!("🗃️ Journal {journal_pk} completed as {external_id}");
    Ok(journal)
}

/// Marks a queued journal `failed`, recording the transfer error for the operator.
pub async fn fail(journal_pk: i64, reason: &str, conn: &mut SqliteConnection) -> Result<JournalRecord, SettlementError> {
    let journal: Option<JournalRecord> = sqlx::query_as(
        "UPDATE journals SET status = 'failed', reason = $1 WHERE id = $2 AND status = 'queued' RETURNING *",
    )
    .bind(reason)
    .bind(journal_pk)
    .fetch_optional(conn)
    .await?;
    let journal = journal.ok_or(SettlementError::JournalNotFound(journal_pk))?;
    debug!("🗃️ Journal {journal_pk} marked failed: {reason}");
    Ok(journal)
}

/// All `queued` journal records, optionally restricted to a member set. A queued record is an in-flight (or
/// crashed) transfer and blocks its member from new journal runs until it resolves.
pub async fn queued_for_scope(
    scope: &JournalScope,
    conn: &mut SqliteConnection,
) -> Result<Vec<JournalRecord>, sqlx::Error> {
    let mut builder = QueryBuilder::new("SELECT * FROM journals WHERE status = 'queued'");
    if let JournalScope::Members(members) = scope {
        builder.push(" AND member_id IN (");
        let mut ids = builder.separated(", ");
        for member in members {
            ids.push_bind(member.as_str().to_string());
        }
        builder.push(")");
    }
    builder.push(" ORDER BY id ASC");
    let journals = builder.build_query_as::<JournalRecord>().fetch_all(conn).await?;
    Ok(journals)
}

pub async fn fetch(id: i64, conn: &mut SqliteConnection) -> Result<Option<JournalRecord>, sqlx::Error> {
    let journal = sqlx::query_as("SELECT * FROM journals WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(journal)
}

pub async fn recent(limit: i64, conn: &mut SqliteConnection) -> Result<Vec<JournalRecord>, sqlx::Error> {
    let journals = sqlx::query_as("SELECT * FROM journals ORDER BY created_at DESC, id DESC LIMIT $1")
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(journals)
}
