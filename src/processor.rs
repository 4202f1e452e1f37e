//! Transaction-scoped chain link.

use async_trait::async_trait;
use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::chain::{CallableChain, Next, Processor};
use crate::{
    context, BasicUnitOfWork, CommitVote, Transaction, TransactionError, TransactionMember,
    TransactionResult, TransactionScope, TransactionState, UnitOfWork,
};

/// How a processor came by the transaction it runs the call in.
enum Resolved {
    /// Caller's transaction; completion stays with its creator.
    Reused(Arc<Transaction>),
    /// Begun by this processor, which commits or rolls back and releases it.
    Owned(Arc<Transaction>),
}

/// Chain link that runs the rest of the chain inside a transaction chosen by
/// its [`TransactionScope`].
///
/// | scope          | caller transaction | behaviour                 |
/// |----------------|--------------------|---------------------------|
/// | `Mandatory`    | absent             | `TransactionRequired`     |
/// | `Mandatory`    | present            | reuse, no completion      |
/// | `Required`     | present            | reuse, no completion      |
/// | `Required`     | absent             | begin, own and complete   |
/// | `RequiresNew`  | any                | begin, own and complete   |
///
/// The caller transaction is the one configured with
/// [`with_caller`](Self::with_caller), or else the ambient one from
/// [`context::current`]. Whatever transaction is chosen is bound as ambient
/// for the wrapped call.
pub struct TransactionProcessor {
    scope: TransactionScope,
    caller: Option<Arc<Transaction>>,
    members: Vec<Arc<dyn TransactionMember>>,
    unit_of_work: Arc<dyn UnitOfWork>,
}

impl TransactionProcessor {
    pub fn new(scope: TransactionScope) -> Self {
        Self {
            scope,
            caller: None,
            members: Vec::new(),
            unit_of_work: Arc::new(BasicUnitOfWork::default()),
        }
    }

    /// Sets the caller transaction, taking precedence over the ambient one.
    #[must_use]
    pub fn with_caller(mut self, caller: Option<Arc<Transaction>>) -> Self {
        self.caller = caller;
        self
    }

    /// Seeds `member` into every transaction this processor begins.
    #[must_use]
    pub fn with_member(mut self, member: Arc<dyn TransactionMember>) -> Self {
        self.members.push(member);
        self
    }

    #[must_use]
    pub fn with_members(mut self, members: impl IntoIterator<Item = Arc<dyn TransactionMember>>) -> Self {
        self.members.extend(members);
        self
    }

    /// Replaces the factory used to begin owned transactions.
    #[must_use]
    pub fn with_unit_of_work(mut self, unit_of_work: Arc<dyn UnitOfWork>) -> Self {
        self.unit_of_work = unit_of_work;
        self
    }

    pub fn scope(&self) -> TransactionScope {
        self.scope
    }

    async fn resolve(&self) -> TransactionResult<Resolved> {
        let caller = self.caller.clone().or_else(context::current);
        match (self.scope, caller) {
            (TransactionScope::Mandatory, None) => Err(TransactionError::TransactionRequired(self.scope)),
            (TransactionScope::Mandatory | TransactionScope::Required, Some(tx)) => {
                if !self.members.is_empty() {
                    return Err(TransactionError::MembersOnReusedTransaction(self.scope));
                }
                Ok(Resolved::Reused(tx))
            }
            (TransactionScope::Required, None) | (TransactionScope::RequiresNew, _) => {
                let tx = self.unit_of_work.begin().await?;
                for member in &self.members {
                    if let Err(e) = tx.register_member(member.clone()) {
                        release_quietly(&tx).await;
                        return Err(e);
                    }
                }
                Ok(Resolved::Owned(tx))
            }
        }
    }

    async fn call_reused<T, E>(&self, tx: Arc<Transaction>, next: Next<'_, T, E>) -> Result<T, E>
    where
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        debug!(tx_id = %tx.id(), scope = %self.scope, "joining caller transaction");
        let outcome = AssertUnwindSafe(context::scope(tx.clone(), next.run()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tx.add_failure(&e);
                Err(e)
            }
            Err(payload) => {
                tx.add_failure("unit of work panicked");
                panic::resume_unwind(payload)
            }
        }
    }

    async fn call_owned<T, E>(&self, tx: Arc<Transaction>, next: Next<'_, T, E>) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<TransactionError> + Display + Send + 'static,
    {
        debug!(tx_id = %tx.id(), name = ?tx.name(), scope = %self.scope, "transaction begun");
        let guard = AbandonGuard::new(tx.clone());
        let outcome = AssertUnwindSafe(context::scope(tx.clone(), next.run()))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(value)) => {
                let completed = complete(&tx).await;
                guard.disarm();
                completed.map(|()| value).map_err(E::from)
            }
            Ok(Err(e)) => {
                debug!(tx_id = %tx.id(), error = %e, "unit of work failed");
                abort(&tx).await;
                guard.disarm();
                Err(e)
            }
            Err(payload) => {
                warn!(tx_id = %tx.id(), "unit of work panicked");
                abort(&tx).await;
                guard.disarm();
                panic::resume_unwind(payload)
            }
        }
    }
}

#[async_trait]
impl<T, E> Processor<T, E> for TransactionProcessor
where
    T: Send + 'static,
    E: From<TransactionError> + Display + Send + 'static,
{
    async fn call(&self, next: Next<'_, T, E>) -> Result<T, E> {
        match self.resolve().await? {
            Resolved::Reused(tx) => self.call_reused(tx, next).await,
            Resolved::Owned(tx) => self.call_owned(tx, next).await,
        }
    }
}

/// Completes an owned transaction whose call was dropped before finishing.
///
/// Cleanup is spawned onto the current tokio runtime; without one the
/// members are left unreleased and the transaction's drop warning fires.
struct AbandonGuard {
    tx: Option<Arc<Transaction>>,
}

impl AbandonGuard {
    fn new(tx: Arc<Transaction>) -> Self {
        Self { tx: Some(tx) }
    }

    fn disarm(mut self) {
        self.tx = None;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        warn!(tx_id = %tx.id(), "call dropped before completion, rolling back");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    // Dropped during release, after phase 2: only release is left.
                    if tx.completion() != Some(TransactionState::Committed) {
                        rollback_quietly(&tx).await;
                    }
                    release_quietly(&tx).await;
                });
            }
            Err(_) => {
                warn!(tx_id = %tx.id(), "no runtime to complete the dropped transaction");
            }
        }
    }
}

/// Two-phase completion of an owned transaction after the work succeeded.
async fn complete(tx: &Transaction) -> TransactionResult<()> {
    let result = match tx.commit_phase1().await {
        CommitVote::Ok => tx.commit_phase2().await,
        CommitVote::Reject => {
            rollback_quietly(tx).await;
            Err(TransactionError::RolledBack(tx.rejected_by().unwrap_or_default()))
        }
        CommitVote::Error(e) => {
            rollback_quietly(tx).await;
            Err(e)
        }
    };

    match (result, tx.release().await) {
        (Ok(()), Ok(())) => {
            debug!(tx_id = %tx.id(), "transaction committed");
            Ok(())
        }
        // Committed work stays committed; the release failure is only reported.
        (Ok(()), Err(released)) => {
            warn!(tx_id = %tx.id(), error = %released, "release failed after commit");
            tx.add_failure(&released);
            Ok(())
        }
        (Err(e), released) => {
            if let Err(released) = released {
                warn!(tx_id = %tx.id(), error = %released, "release failed after rollback");
                tx.add_failure(&released);
            }
            Err(e)
        }
    }
}

/// Rolls back and releases an owned transaction whose work failed.
async fn abort(tx: &Transaction) {
    rollback_quietly(tx).await;
    release_quietly(tx).await;
}

async fn rollback_quietly(tx: &Transaction) {
    if let Err(e) = tx.rollback().await {
        warn!(tx_id = %tx.id(), error = %e, "rollback failed");
        tx.add_failure(&e);
    }
}

async fn release_quietly(tx: &Transaction) {
    if let Err(e) = tx.release().await {
        warn!(tx_id = %tx.id(), error = %e, "release failed");
        tx.add_failure(&e);
    }
}

/// Runs `work` in a single-link chain with the given scope.
pub async fn run_in_scope<T, E, F, Fut>(scope: TransactionScope, work: F) -> Result<T, E>
where
    T: Send + 'static,
    E: From<TransactionError> + Display + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
{
    CallableChain::new()
        .with(TransactionProcessor::new(scope))
        .call(work)
        .await
}
