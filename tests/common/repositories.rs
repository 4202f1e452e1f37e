#![allow(dead_code)]

use sqlx::{PgPool, Row};
use uuid::Uuid;

use transaction_scope::{PostgresMember, TransactionResult};

use super::entities::{Account, LedgerEntry};

/// Account repository joining the ambient transaction on every call
pub struct AccountRepository {
    pool: PgPool,
}

impl AccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, account: &Account) -> TransactionResult<()> {
        let member = PostgresMember::attach("main", &self.pool)?;
        let mut guard = member.executor().lock().await?;
        let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        sqlx::query("INSERT INTO accounts (id, owner, balance) VALUES ($1, $2, $3)")
            .bind(account.id)
            .bind(&account.owner)
            .bind(account.balance)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> TransactionResult<Option<Account>> {
        let member = PostgresMember::attach("main", &self.pool)?;
        let mut guard = member.executor().lock().await?;
        let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        let row = sqlx::query("SELECT id, owner, balance FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| Account {
            id: r.get("id"),
            owner: r.get("owner"),
            balance: r.get("balance"),
        }))
    }
}

/// Ledger repository sharing the account repository's connection
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, entry: &LedgerEntry) -> TransactionResult<()> {
        let member = PostgresMember::attach("main", &self.pool)?;
        let mut guard = member.executor().lock().await?;
        let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        sqlx::query("INSERT INTO ledger (id, account_id, amount) VALUES ($1, $2, $3)")
            .bind(entry.id)
            .bind(entry.account_id)
            .bind(entry.amount)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    pub async fn count_for(&self, account_id: Uuid) -> TransactionResult<i64> {
        let member = PostgresMember::attach("main", &self.pool)?;
        let mut guard = member.executor().lock().await?;
        let tx = guard.as_mut().ok_or(sqlx::Error::PoolClosed)?;
        let row = sqlx::query("SELECT COUNT(*) AS count FROM ledger WHERE account_id = $1")
            .bind(account_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(row.get("count"))
    }
}
