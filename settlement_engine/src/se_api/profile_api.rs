use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Debug,
};

use lbp_common::Cents;
use log::*;
use serde_json::json;

use crate::{
    db_types::{MemberId, MemberWallet, OrderStatus},
    se_api::OrderQueryFilter,
    traits::{IssueCategory, LedgerApiError, ProfileIssue, ProfileReport, ProfileTable, SettlementDatabase},
};

/// Tunables for the data-quality profile pass.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Tolerated difference between a wallet's stored cash balance and `points × tier_rate` before the row is
    /// flagged as a conversion mismatch. Rounding at conversion time makes a one-cent slack the useful default.
    pub epsilon: Cents,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self { epsilon: Cents::from(1) }
    }
}

/// The deterministic profiling pass over the wallet projection, the order store and the ledger.
///
/// The wallet projection is a materialized view; this pass is its formal reconciliation job. Every check reports
/// the offending ids and a human-readable category so a caller can jump straight to the bad records, and
/// [`ProfileApi::repair_wallet`] is the explicit repair operation for drifted rows.
pub struct ProfileApi<B> {
    db: B,
    config: ProfileConfig,
}

impl<B> Debug for ProfileApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProfileApi")
    }
}

impl<B> ProfileApi<B>
where B: SettlementDatabase
{
    pub fn new(db: B) -> Self {
        Self { db, config: ProfileConfig::default() }
    }

    pub fn with_config(mut self, config: ProfileConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn run_data_profile(&self, table: ProfileTable) -> Result<ProfileReport, LedgerApiError> {
        let report = match table {
            ProfileTable::MemberWallets => self.profile_wallets().await?,
            ProfileTable::Orders => self.profile_orders().await?,
            ProfileTable::Ledger => self.profile_ledger().await?,
        };
        info!(
            "🔍️ Profile of {table}: score {:.3}, {} issue categor(ies), {} member(s) affected",
            report.completeness_score,
            report.critical_issues.len(),
            report.affected_members.len()
        );
        Ok(report)
    }

    /// Recomputes a drifted wallet row's cash balance from the confirmed ledger.
    pub async fn repair_wallet(&self, member_id: &MemberId) -> Result<MemberWallet, LedgerApiError> {
        let wallet = self.db.refresh_wallet_cash(member_id).await?;
        info!("🔍️ Wallet for {member_id} repaired: cash balance now {}", wallet.cash_balance);
        Ok(wallet)
    }

    async fn profile_wallets(&self) -> Result<ProfileReport, LedgerApiError> {
        let wallets = self.db.fetch_wallets().await?;
        let merchants: BTreeSet<String> =
            self.db.fetch_merchants().await?.into_iter().map(|m| m.merchant_id).collect();

        let mut row_counts: BTreeMap<&MemberId, usize> = BTreeMap::new();
        for wallet in &wallets {
            *row_counts.entry(&wallet.member_id).or_default() += 1;
        }
        let duplicates: Vec<MemberId> =
            row_counts.iter().filter(|(_, n)| **n > 1).map(|(id, _)| (*id).clone()).collect();

        let mut mismatched = Vec::new();
        let mut negative = Vec::new();
        let mut orphaned = Vec::new();
        let mut drifted = Vec::new();
        for wallet in &wallets {
            let expected = Cents::from_points(wallet.points, wallet.tier_rate);
            let diff = (wallet.cash_balance - expected).value().abs();
            if diff > self.config.epsilon.value() {
                mismatched.push(wallet.member_id.clone());
            }
            if wallet.points < 0 || wallet.cash_balance < Cents::default() {
                negative.push(wallet.member_id.clone());
            }
            if !merchants.contains(&wallet.merchant_id) {
                orphaned.push(wallet.member_id.clone());
            }
            // Conservation check: the projection must agree with the confirmed ledger exactly.
            let ledger_balance = self.db.balance_for_member(&wallet.member_id).await?;
            if ledger_balance != wallet.cash_balance {
                drifted.push(wallet.member_id.clone());
            }
        }

        let mut issues = Vec::new();
        push_member_issue(
            &mut issues,
            IssueCategory::ConversionMismatch,
            format!("stored cash differs from points × tier rate by more than {}", self.config.epsilon),
            &mismatched,
        );
        push_member_issue(
            &mut issues,
            IssueCategory::DuplicateWallet,
            "more than one wallet row for the member".to_string(),
            &duplicates,
        );
        push_member_issue(
            &mut issues,
            IssueCategory::NegativeBalance,
            "negative points or cash balance".to_string(),
            &negative,
        );
        push_member_issue(
            &mut issues,
            IssueCategory::OrphanedMerchant,
            "wallet references a merchant missing from the merchant master".to_string(),
            &orphaned,
        );
        push_member_issue(
            &mut issues,
            IssueCategory::LedgerDrift,
            "stored cash balance disagrees with the confirmed ledger".to_string(),
            &drifted,
        );

        let affected = affected_members(&issues);
        let clean_rows = wallets.iter().filter(|w| !affected.contains(&w.member_id)).count();
        let field_analysis = json!({
            "rows_profiled": wallets.len(),
            "epsilon_cents": self.config.epsilon.value(),
            "checks": {
                "conversion_mismatch": mismatched.len(),
                "duplicate_wallet": duplicates.len(),
                "negative_balance": negative.len(),
                "orphaned_merchant": orphaned.len(),
                "ledger_drift": drifted.len(),
            },
        });
        Ok(ProfileReport {
            table: ProfileTable::MemberWallets,
            completeness_score: score(clean_rows, wallets.len()),
            field_analysis,
            critical_issues: issues,
            affected_members: affected.into_iter().collect(),
        })
    }

    async fn profile_orders(&self) -> Result<ProfileReport, LedgerApiError> {
        let orders = self.db.search_orders(OrderQueryFilter::default()).await?;
        let mut missing_execution = Vec::new();
        let mut paid_pre_execution = Vec::new();
        let mut missing_journal_ts = Vec::new();
        for order in &orders {
            // Settled-without-execution is the sanctioned fee-only fallback; executed/confirmed without an
            // execution record is a genuine integrity break.
            if matches!(order.status, OrderStatus::Executed | OrderStatus::Confirmed) && !order.is_amount_executed() {
                missing_execution.push(order);
            }
            if order.paid_flag && !order.status.is_payable() {
                paid_pre_execution.push(order);
            }
            if order.status == OrderStatus::Journaled && order.journaled_at.is_none() {
                missing_journal_ts.push(order);
            }
        }

        let mut issues = Vec::new();
        for (category, detail, offenders) in [
            (
                IssueCategory::MissingExecution,
                "order reached an executed status without execution financials",
                &missing_execution,
            ),
            (IssueCategory::PaidPreExecution, "paid flag set on an order that was never executed", &paid_pre_execution),
            (
                IssueCategory::MissingJournalTimestamp,
                "journaled order without a journal timestamp",
                &missing_journal_ts,
            ),
        ] {
            if !offenders.is_empty() {
                issues.push(ProfileIssue {
                    category,
                    detail: format!("{detail} ({} row(s))", offenders.len()),
                    member_ids: offenders.iter().map(|o| o.member_id.clone()).collect(),
                    record_ids: offenders.iter().map(|o| o.order_id.as_str().to_string()).collect(),
                });
            }
        }

        let affected = affected_members(&issues);
        let bad_ids: BTreeSet<&str> =
            issues.iter().flat_map(|i| i.record_ids.iter().map(String::as_str)).collect();
        let clean_rows = orders.iter().filter(|o| !bad_ids.contains(o.order_id.as_str())).count();
        let field_analysis = json!({
            "rows_profiled": orders.len(),
            "checks": {
                "missing_execution": missing_execution.len(),
                "paid_pre_execution": paid_pre_execution.len(),
                "missing_journal_timestamp": missing_journal_ts.len(),
            },
        });
        Ok(ProfileReport {
            table: ProfileTable::Orders,
            completeness_score: score(clean_rows, orders.len()),
            field_analysis,
            critical_issues: issues,
            affected_members: affected.into_iter().collect(),
        })
    }

    async fn profile_ledger(&self) -> Result<ProfileReport, LedgerApiError> {
        let entries = self.db.fetch_all_entries().await?;
        let mut negative = Vec::new();
        let mut key_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in &entries {
            if entry.amount_cash < Cents::default() || entry.amount_points < 0 {
                negative.push(entry);
            }
            if let Some(key) = &entry.client_tx_id {
                *key_counts.entry(key.as_str()).or_default() += 1;
            }
        }
        let duplicate_keys: BTreeSet<&str> =
            key_counts.iter().filter(|(_, n)| **n > 1).map(|(k, _)| *k).collect();
        let duplicates: Vec<_> = entries
            .iter()
            .filter(|e| e.client_tx_id.as_deref().map(|k| duplicate_keys.contains(k)).unwrap_or(false))
            .collect();

        let mut issues = Vec::new();
        for (category, detail, offenders) in [
            (
                IssueCategory::NegativeLedgerAmount,
                "ledger amounts must be non-negative; direction carries the sign",
                &negative,
            ),
            (IssueCategory::DuplicateClientTxId, "idempotency key appears on more than one entry", &duplicates),
        ] {
            if !offenders.is_empty() {
                issues.push(ProfileIssue {
                    category,
                    detail: format!("{detail} ({} row(s))", offenders.len()),
                    member_ids: offenders.iter().map(|e| e.member_id.clone()).collect(),
                    record_ids: offenders.iter().map(|e| e.tx_id.to_string()).collect(),
                });
            }
        }

        let affected = affected_members(&issues);
        let bad_ids: BTreeSet<String> = issues.iter().flat_map(|i| i.record_ids.iter().cloned()).collect();
        let clean_rows = entries.iter().filter(|e| !bad_ids.contains(&e.tx_id.to_string())).count();
        let field_analysis = json!({
            "rows_profiled": entries.len(),
            "checks": {
                "negative_ledger_amount": negative.len(),
                "duplicate_client_tx_id": duplicates.len(),
            },
        });
        Ok(ProfileReport {
            table: ProfileTable::Ledger,
            completeness_score: score(clean_rows, entries.len()),
            field_analysis,
            critical_issues: issues,
            affected_members: affected.into_iter().collect(),
        })
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

fn push_member_issue(
    issues: &mut Vec<ProfileIssue>,
    category: IssueCategory,
    detail: String,
    members: &[MemberId],
) {
    if !members.is_empty() {
        issues.push(ProfileIssue {
            category,
            detail: format!("{detail} ({} member(s))", members.len()),
            member_ids: members.to_vec(),
            record_ids: members.iter().map(|m| m.as_str().to_string()).collect(),
        });
    }
}

fn affected_members(issues: &[ProfileIssue]) -> BTreeSet<MemberId> {
    issues.iter().flat_map(|i| i.member_ids.iter().cloned()).collect()
}

#[allow(clippy::cast_precision_loss)]
fn score(clean: usize, total: usize) -> f64 {
    if total == 0 {
        1.0
    } else {
        clean as f64 / total as f64
    }
}
