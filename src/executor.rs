use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::{
    context, CommitVote, TransactionError, TransactionMember, TransactionResult, TransactionScope,
};

pub type PgTransaction = Transaction<'static, Postgres>;

/// Executor hands out the database transaction of one [`PostgresMember`].
///
/// The database transaction is begun lazily on the first [`lock`](Self::lock),
/// so a member that is registered but never used costs no connection.
#[derive(Clone, Debug)]
pub struct Executor {
    pool: PgPool,
    tx: Arc<Mutex<Option<PgTransaction>>>,
    begun: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl Executor {
    /// Creates an Executor drawing its connection from `pool`.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Arc::new(Mutex::new(None)),
            begun: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Locks the database transaction, beginning it on first use.
    ///
    /// The returned guard holds `Some`. Fails once the owning transaction has
    /// completed.
    pub async fn lock(&self) -> TransactionResult<MutexGuard<'_, Option<PgTransaction>>> {
        let mut guard = self.tx.lock().await;
        if guard.is_none() {
            if self.finished.load(Ordering::Acquire) {
                return Err(sqlx::Error::PoolClosed.into());
            }
            *guard = Some(self.pool.begin().await?);
            self.begun.store(true, Ordering::Release);
        }
        Ok(guard)
    }

    /// Whether a database transaction was begun and not yet finished.
    pub fn is_open(&self) -> bool {
        self.begun.load(Ordering::Acquire) && !self.finished.load(Ordering::Acquire)
    }

    /// Takes ownership of the transaction, leaving None in its place.
    /// No new transaction is begun afterwards.
    async fn take_transaction(&self) -> Option<PgTransaction> {
        let mut guard = self.tx.lock().await;
        self.finished.store(true, Ordering::Release);
        guard.take()
    }
}

/// Transaction member backed by a PostgreSQL connection.
pub struct PostgresMember {
    id: String,
    executor: Executor,
}

impl PostgresMember {
    pub fn new(id: impl Into<String>, pool: PgPool) -> Self {
        Self {
            id: id.into(),
            executor: Executor::new(pool),
        }
    }

    /// Joins the ambient transaction, reusing the member already registered
    /// under `postgres:{name}` if there is one.
    pub fn attach(name: &str, pool: &PgPool) -> TransactionResult<Arc<Self>> {
        let tx = context::current()
            .ok_or(TransactionError::TransactionRequired(TransactionScope::Mandatory))?;
        tx.register_member_if_absent(&format!("postgres:{name}"), |id| {
            Ok(Arc::new(PostgresMember::new(id, pool.clone())))
        })
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }
}

#[async_trait]
impl TransactionMember for PostgresMember {
    fn id(&self) -> &str {
        &self.id
    }

    fn needs_commit(&self) -> bool {
        self.executor.is_open()
    }

    async fn commit_phase1(&self) -> CommitVote {
        let mut guard = self.executor.tx.lock().await;
        let Some(tx) = guard.as_mut() else {
            return CommitVote::Reject;
        };
        // The connection must still be usable for the commit to succeed.
        match sqlx::query("SELECT 1").execute(&mut **tx).await {
            Ok(_) => CommitVote::Ok,
            Err(e) => CommitVote::Error(e.into()),
        }
    }

    async fn commit_phase2(&self) -> TransactionResult<()> {
        let tx = self
            .executor
            .take_transaction()
            .await
            .ok_or(sqlx::Error::PoolClosed)?;
        tx.commit().await?;
        debug!(member = %self.id, "database transaction committed");
        Ok(())
    }

    async fn rollback(&self) -> TransactionResult<()> {
        if let Some(tx) = self.executor.take_transaction().await {
            tx.rollback().await?;
            debug!(member = %self.id, "database transaction rolled back");
        }
        Ok(())
    }

    async fn release(&self) -> TransactionResult<()> {
        // Dropping an unfinished sqlx transaction rolls it back.
        drop(self.executor.take_transaction().await);
        Ok(())
    }
}
