use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{MemberId, MemberWallet, Merchant},
    sqlite::db::ledger,
    traits::LedgerApiError,
};

pub async fn fetch_wallet(
    member_id: &MemberId,
    conn: &mut SqliteConnection,
) -> Result<Option<MemberWallet>, sqlx::Error> {
    let wallet = sqlx::query_as("SELECT * FROM member_wallets WHERE member_id = $1 ORDER BY id ASC LIMIT 1")
        .bind(member_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(wallet)
}

pub async fn fetch_wallets(conn: &mut SqliteConnection) -> Result<Vec<MemberWallet>, sqlx::Error> {
    let wallets = sqlx::query_as("SELECT * FROM member_wallets ORDER BY member_id ASC, id ASC").fetch_all(conn).await?;
    Ok(wallets)
}

pub async fn fetch_merchants(conn: &mut SqliteConnection) -> Result<Vec<Merchant>, sqlx::Error> {
    let merchants = sqlx::query_as("SELECT * FROM merchants ORDER BY merchant_id ASC").fetch_all(conn).await?;
    Ok(merchants)
}

/// Recomputes the wallet's `cash_balance` projection from the confirmed ledger. The ledger is the source of
/// truth; this writes its answer back into the display column.
pub async fn refresh_wallet_cash(
    member_id: &MemberId,
    conn: &mut SqliteConnection,
) -> Result<MemberWallet, LedgerApiError> {
    let balance = ledger::confirmed_balance(member_id, &mut *conn).await?;
    let wallet: Option<MemberWallet> = sqlx::query_as(
        "UPDATE member_wallets SET cash_balance = $1, updated_at = CURRENT_TIMESTAMP WHERE member_id = $2 RETURNING *",
    )
    .bind(balance)
    .bind(member_id.as_str())
    .fetch_optional(&mut *conn)
    .await?;
    let wallet = wallet.ok_or_else(|| LedgerApiError::WalletNotFound(member_id.clone()))?;
    debug!("🗃️ Wallet cash for {member_id} refreshed to {balance}");
    Ok(wallet)
}
