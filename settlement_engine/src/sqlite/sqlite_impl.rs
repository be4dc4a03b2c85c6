//! `SqliteDatabase` is a concrete implementation of a settlement engine backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use lbp_common::Cents;
use log::*;
use sqlx::SqlitePool;

use super::db::{db_url, journals, ledger, new_pool, orders, wallets};
use crate::{
    db_types::{
        BasketId,
        Direction,
        ExecutionConfirmation,
        JournalRecord,
        LedgerEntry,
        LedgerStatus,
        MemberId,
        MemberWallet,
        Merchant,
        NewLedgerEntry,
        NewOrder,
        Order,
        OrderId,
        OrderStatus,
        TxType,
    },
    lifecycle::OrderEvent,
    se_api::OrderQueryFilter,
    traits::{
        JournalScope,
        LedgerApiError,
        LedgerManagement,
        SettlementDatabase,
        SettlementError,
        SkippedToggle,
        ToggleOutcome,
        ToggleSkipReason,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Connects to the database given by the `SE_DATABASE_URL` environment variable (or the default store path).
    pub async fn new(max_connections: u32) -> Result<Self, SettlementError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, SettlementError> {
        let pool = new_pool(url, max_connections).await?;
        debug!("🗃️ Connected to database at {url}");
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// One direction of the bulk toggle. Each id stands alone: a connection is taken per id and an ineligible id
    /// becomes a reported skip, never a rollback of the others.
    async fn toggle_direction(
        &self,
        ids: &[OrderId],
        from: OrderStatus,
        to: OrderStatus,
        outcome: &mut ToggleOutcome,
    ) -> Result<usize, SettlementError> {
        let mut ids = ids.to_vec();
        ids.sort();
        let mut flipped = 0;
        for order_id in ids {
            let mut conn = self.pool.acquire().await?;
            let Some(order) = orders::fetch_order_by_order_id(&order_id, &mut conn).await? else {
                outcome.skipped.push(SkippedToggle { order_id, reason: ToggleSkipReason::NotFound });
                continue;
            };
            if order.status == to {
                outcome.skipped.push(SkippedToggle { order_id, reason: ToggleSkipReason::AlreadyInTargetState });
                continue;
            }
            if order.status == OrderStatus::Sold {
                outcome.skipped.push(SkippedToggle { order_id, reason: ToggleSkipReason::SoldOrder });
                continue;
            }
            if order.status != from {
                outcome
                    .skipped
                    .push(SkippedToggle { order_id, reason: ToggleSkipReason::IneligibleStatus(order.status) });
                continue;
            }
            match orders::cas_update_status(order.id, from, to, &mut conn).await? {
                Some(updated) => {
                    flipped += 1;
                    outcome.changed.push(updated);
                },
                None => {
                    // Lost a race; report whatever the order is now rather than guessing.
                    let current = orders::fetch_order_by_order_id(&order_id, &mut conn)
                        .await?
                        .map(|o| o.status)
                        .unwrap_or(order.status);
                    outcome
                        .skipped
                        .push(SkippedToggle { order_id, reason: ToggleSkipReason::IneligibleStatus(current) });
                },
            }
        }
        Ok(flipped)
    }
}

impl LedgerManagement for SqliteDatabase {
    async fn fetch_order_by_order_id(&self, order_id: &OrderId) -> Result<Option<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::search_orders(query, &mut conn).await?;
        Ok(orders)
    }

    async fn fetch_wallet(&self, member_id: &MemberId) -> Result<Option<MemberWallet>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let wallet = wallets::fetch_wallet(member_id, &mut conn).await?;
        Ok(wallet)
    }

    async fn fetch_wallets(&self) -> Result<Vec<MemberWallet>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let wallets = wallets::fetch_wallets(&mut conn).await?;
        Ok(wallets)
    }

    async fn balance_for_member(&self, member_id: &MemberId) -> Result<Cents, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let balance = ledger::confirmed_balance(member_id, &mut conn).await?;
        Ok(balance)
    }

    async fn entries_for_member(&self, member_id: &MemberId) -> Result<Vec<LedgerEntry>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let entries = ledger::entries_for_member(member_id, &mut conn).await?;
        Ok(entries)
    }

    async fn fetch_all_entries(&self) -> Result<Vec<LedgerEntry>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let entries = ledger::fetch_all_entries(&mut conn).await?;
        Ok(entries)
    }

    async fn insert_ledger_entry(&self, entry: NewLedgerEntry) -> Result<(LedgerEntry, bool), LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        ledger::idempotent_insert(entry, &mut conn).await
    }

    async fn update_ledger_status(&self, tx_id: i64, status: LedgerStatus) -> Result<LedgerEntry, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        ledger::update_status(tx_id, status, &mut conn).await
    }

    async fn recent_journals(&self, limit: i64) -> Result<Vec<JournalRecord>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let journals = journals::recent(limit, &mut conn).await?;
        Ok(journals)
    }

    async fn fetch_journal(&self, id: i64) -> Result<Option<JournalRecord>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let journal = journals::fetch(id, &mut conn).await?;
        Ok(journal)
    }

    async fn fetch_merchants(&self) -> Result<Vec<Merchant>, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        let merchants = wallets::fetch_merchants(&mut conn).await?;
        Ok(merchants)
    }

    async fn refresh_wallet_cash(&self, member_id: &MemberId) -> Result<MemberWallet, LedgerApiError> {
        let mut conn = self.pool.acquire().await?;
        wallets::refresh_wallet_cash(member_id, &mut conn).await
    }
}

impl SettlementDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), SettlementError> {
        let mut conn = self.pool.acquire().await?;
        orders::idempotent_insert(order, &mut conn).await
    }

    async fn queue_basket(&self, basket_id: &BasketId) -> Result<Vec<Order>, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let queued = orders::queue_basket(basket_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Basket {basket_id} queued: {} order(s)", queued.len());
        Ok(queued)
    }

    async fn record_execution(
        &self,
        confirmation: ExecutionConfirmation,
        tolerance: Cents,
    ) -> Result<Order, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        orders::record_execution(confirmation, tolerance, &mut conn).await
    }

    async fn confirm_order(&self, order_id: &OrderId) -> Result<Order, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))?;
        orders::transition_status(&order, OrderEvent::Confirm, &mut conn).await
    }

    async fn mark_batch_paid(
        &self,
        merchant_id: &str,
        broker: &str,
        batch_id: &str,
    ) -> Result<Vec<Order>, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let orders = orders::mark_batch_paid(merchant_id, broker, batch_id, &mut tx).await?;
        tx.commit().await?;
        Ok(orders)
    }

    async fn settle_paid_batch(&self, batch_id: &str) -> Result<Vec<Order>, SettlementError> {
        // All-or-nothing: the first ineligible order aborts and the rollback leaves the batch untouched.
        let mut tx = self.pool.begin().await?;
        let settled = orders::settle_batch(batch_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Batch {batch_id} settled: {} order(s)", settled.len());
        Ok(settled)
    }

    async fn fail_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))?;
        let updated = orders::transition_status(&order, OrderEvent::Fail, &mut conn).await?;
        warn!("🗃️ Order {order_id} failed: {reason}");
        Ok(updated)
    }

    async fn cancel_order(&self, order_id: &OrderId, reason: &str) -> Result<Order, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn)
            .await?
            .ok_or_else(|| SettlementError::OrderNotFound(order_id.clone()))?;
        let updated = orders::transition_status(&order, OrderEvent::Cancel, &mut conn).await?;
        debug!("🗃️ Order {order_id} cancelled: {reason}");
        Ok(updated)
    }

    async fn toggle_sell_status(
        &self,
        to_sell: &[OrderId],
        to_settled: &[OrderId],
    ) -> Result<ToggleOutcome, SettlementError> {
        let mut outcome = ToggleOutcome::default();
        outcome.marked_sell =
            self.toggle_direction(to_sell, OrderStatus::Settled, OrderStatus::Sell, &mut outcome).await?;
        outcome.marked_settled =
            self.toggle_direction(to_settled, OrderStatus::Sell, OrderStatus::Settled, &mut outcome).await?;
        outcome.skipped.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        outcome.changed.sort_by(|a, b| a.order_id.cmp(&b.order_id));
        Ok(outcome)
    }

    async fn settled_unjournaled_orders(&self, scope: &JournalScope) -> Result<Vec<Order>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let orders = orders::settled_unjournaled(scope, &mut conn).await?;
        Ok(orders)
    }

    async fn queued_journals(&self, scope: &JournalScope) -> Result<Vec<JournalRecord>, SettlementError> {
        let mut conn = self.pool.acquire().await?;
        let journals = journals::queued_for_scope(scope, &mut conn).await?;
        Ok(journals)
    }

    async fn create_queued_journal(
        &self,
        member_id: &MemberId,
        amount: Cents,
        order_ids: &[OrderId],
    ) -> Result<Option<JournalRecord>, SettlementError> {
        // The journal row and the claims commit together: if any order is already claimed or has moved on,
        // the rollback leaves no trace and the caller reports the member as skipped.
        let mut tx = self.pool.begin().await?;
        let journal = journals::create_queued(member_id, amount, order_ids.len() as i64, &mut tx).await?;
        if !orders::claim_for_journal(journal.id, order_ids, &mut tx).await? {
            tx.rollback().await?;
            debug!("🗃️ Journal for member {member_id} abandoned: orders already claimed by another run");
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(journal))
    }

    async fn complete_journal(
        &self,
        journal_pk: i64,
        external_id: &str,
    ) -> Result<(JournalRecord, Vec<Order>), SettlementError> {
        let mut tx = self.pool.begin().await?;
        let journal = journals::complete(journal_pk, external_id, &mut tx).await?;
        let entry = NewLedgerEntry::new(journal.member_id.clone(), TxType::CashOut, Direction::Outbound, journal.amount)
            .on_channel("brokerage")
            .with_client_tx_id(format!("journal-{journal_pk}"));
        let (ledger_entry, appended) = ledger::idempotent_insert(entry, &mut tx).await?;
        if !appended {
            trace!("🗃️ Ledger entry {} for journal {journal_pk} already existed", ledger_entry.tx_id);
        }
        let updated = orders::mark_journaled(journal_pk, &mut tx).await?;
        tx.commit().await?;
        debug!(
            "🗃️ Journal {journal_pk} complete: {} moved for member {}, {} order(s) journaled",
            journal.amount,
            journal.member_id,
            updated.len()
        );
        Ok((journal, updated))
    }

    async fn fail_journal(&self, journal_pk: i64, reason: &str) -> Result<JournalRecord, SettlementError> {
        let mut tx = self.pool.begin().await?;
        let journal = journals::fail(journal_pk, reason, &mut tx).await?;
        let released = orders::release_claim(journal_pk, &mut tx).await?;
        tx.commit().await?;
        trace!("🗃️ Journal {journal_pk} failed; {released} order claim(s) released");
        Ok(journal)
    }

    async fn close(&mut self) -> Result<(), SettlementError> {
        self.pool.close().await;
        Ok(())
    }
}
