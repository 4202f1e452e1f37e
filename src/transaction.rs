//! Transaction: member registry and two-phase completion driver.

use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{CommitVote, TransactionConfig, TransactionError, TransactionMember, TransactionResult};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting member registrations.
    Active,
    /// Phase 1 has begun.
    Completing,
    /// Phase 1 passed; phase 2 has run.
    Committed,
    RolledBack,
    /// Every member has been released.
    Released,
}

struct Entry {
    member: Arc<dyn TransactionMember>,
    // Same allocation as `member`, kept for typed lookups. Absent for members
    // registered through the untyped `register_member`.
    typed: Option<Arc<dyn Any + Send + Sync>>,
}

struct Inner {
    members: BTreeMap<String, Entry>,
    state: TransactionState,
    cancelled: bool,
    interrupted: bool,
    // Members asked to prepare in phase 1; phase 2 visits exactly these.
    prepared: Vec<Arc<dyn TransactionMember>>,
    phase1_passed: bool,
    rejected_by: Option<String>,
    // Committed or RolledBack, kept after release.
    completion: Option<TransactionState>,
    failures: Vec<String>,
}

/// One logical unit of work's resource scope.
///
/// A transaction is shared as `Arc<Transaction>` and compared by identity.
/// Registration, cancellation and the start of completion are serialized by a
/// single lock, so no member can slip in after the transaction was cancelled
/// or after phase 1 began. Member callbacks are never invoked while that lock
/// is held, except for the factory passed to
/// [`register_member_if_absent`](Self::register_member_if_absent).
pub struct Transaction {
    id: Uuid,
    config: TransactionConfig,
    inner: Mutex<Inner>,
    interrupt: Notify,
}

impl Transaction {
    /// Creates an empty, active transaction.
    pub fn new(config: TransactionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            inner: Mutex::new(Inner {
                members: BTreeMap::new(),
                state: TransactionState::Active,
                cancelled: false,
                interrupted: false,
                prepared: Vec::new(),
                phase1_passed: false,
                rejected_by: None,
                completion: None,
                failures: Vec::new(),
            }),
            interrupt: Notify::new(),
        }
    }

    /// The transaction bound to the current task, if any.
    pub fn current() -> Option<Arc<Transaction>> {
        crate::context::current()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.config.name.as_deref()
    }

    /// Referential identity.
    pub fn same_as(self: &Arc<Self>, other: &Arc<Transaction>) -> bool {
        Arc::ptr_eq(self, other)
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// How the transaction completed: `Committed`, `RolledBack`, or `None` if
    /// neither phase 2 nor rollback ran.
    pub fn completion(&self) -> Option<TransactionState> {
        self.inner.lock().completion
    }

    /// Adds `member`, replacing any member registered under the same id.
    pub fn register_member(&self, member: Arc<dyn TransactionMember>) -> TransactionResult<()> {
        let mut inner = self.inner.lock();
        self.check_accepting(&inner)?;
        let id = member.id().to_string();
        debug!(tx_id = %self.id, member = %id, "member registered");
        inner.members.insert(id, Entry { member, typed: None });
        Ok(())
    }

    /// Returns the member registered under `id`, or registers the one built by
    /// `factory`.
    ///
    /// A cancelled transaction fails with [`TransactionError::Cancelled`] and
    /// the factory is not invoked. The lookup, the factory call and the insert
    /// happen under one lock; the factory must not call back into this
    /// transaction.
    pub fn register_member_if_absent<M, F>(
        &self,
        id: &str,
        factory: F,
    ) -> TransactionResult<Arc<M>>
    where
        M: TransactionMember + 'static,
        F: FnOnce(&str) -> TransactionResult<Arc<M>>,
    {
        let mut inner = self.inner.lock();
        self.check_accepting(&inner)?;
        self.lookup_or_insert(&mut inner, id, factory)
    }

    /// Like [`register_member_if_absent`](Self::register_member_if_absent), but a
    /// cancelled transaction yields `Ok(None)` instead of an error.
    pub fn register_member_if_absent_and_not_cancelled<M, F>(
        &self,
        id: &str,
        factory: F,
    ) -> TransactionResult<Option<Arc<M>>>
    where
        M: TransactionMember + 'static,
        F: FnOnce(&str) -> TransactionResult<Arc<M>>,
    {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            debug!(tx_id = %self.id, member = %id, "registration skipped, transaction cancelled");
            return Ok(None);
        }
        self.check_accepting(&inner)?;
        self.lookup_or_insert(&mut inner, id, factory).map(Some)
    }

    fn lookup_or_insert<M, F>(
        &self,
        inner: &mut Inner,
        id: &str,
        factory: F,
    ) -> TransactionResult<Arc<M>>
    where
        M: TransactionMember + 'static,
        F: FnOnce(&str) -> TransactionResult<Arc<M>>,
    {
        if let Some(entry) = inner.members.get(id) {
            return downcast_entry(id, entry);
        }
        let member = factory(id)?;
        debug!(tx_id = %self.id, member = %id, "member created and registered");
        inner.members.insert(
            id.to_string(),
            Entry {
                member: member.clone() as Arc<dyn TransactionMember>,
                typed: Some(member.clone() as Arc<dyn Any + Send + Sync>),
            },
        );
        Ok(member)
    }

    fn check_accepting(&self, inner: &Inner) -> TransactionResult<()> {
        if inner.cancelled {
            return Err(TransactionError::Cancelled(self.id));
        }
        if inner.state != TransactionState::Active {
            return Err(TransactionError::Completing(self.id));
        }
        Ok(())
    }

    pub fn get_member(&self, id: &str) -> Option<Arc<dyn TransactionMember>> {
        self.inner.lock().members.get(id).map(|e| e.member.clone())
    }

    /// Typed lookup of a member registered through `register_member_if_absent*`.
    pub fn get_member_as<M: TransactionMember + 'static>(&self, id: &str) -> Option<Arc<M>> {
        let inner = self.inner.lock();
        inner.members.get(id).and_then(|e| downcast_entry(id, e).ok())
    }

    pub fn member_ids(&self) -> Vec<String> {
        self.inner.lock().members.keys().cloned().collect()
    }

    pub fn member_count(&self) -> usize {
        self.inner.lock().members.len()
    }

    /// Marks the transaction cancelled so that later registrations are refused.
    ///
    /// Registered members are left untouched. With `interrupt` set, tasks
    /// waiting in [`interrupted`](Self::interrupted) are woken.
    pub fn cancel(&self, interrupt: bool) {
        {
            let mut inner = self.inner.lock();
            inner.cancelled = true;
            inner.interrupted |= interrupt;
        }
        debug!(tx_id = %self.id, interrupt, "transaction cancelled");
        if interrupt {
            self.interrupt.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.lock().interrupted
    }

    /// Resolves once the transaction is cancelled with `interrupt` set.
    pub async fn interrupted(&self) {
        loop {
            let notified = self.interrupt.notified();
            if self.is_interrupted() {
                return;
            }
            notified.await;
        }
    }

    /// Phase 1: asks every member that needs commit to prepare.
    ///
    /// Returns [`CommitVote::Ok`] only if all of them voted `Ok`. Closes the
    /// transaction to further registration.
    pub async fn commit_phase1(&self) -> CommitVote {
        let members = {
            let mut inner = self.inner.lock();
            if inner.state != TransactionState::Active {
                return CommitVote::Error(TransactionError::Completing(self.id));
            }
            inner.state = TransactionState::Completing;
            inner.members.values().map(|e| e.member.clone()).collect::<Vec<_>>()
        };

        let mut outcome = CommitVote::Ok;
        let mut prepared = Vec::new();
        for member in members {
            let vote = match panic::catch_unwind(AssertUnwindSafe(|| member.needs_commit())) {
                Ok(false) => continue,
                Ok(true) => {
                    prepared.push(member.clone());
                    match shielded(member.commit_phase1()).await {
                        Ok(vote) => vote,
                        Err(message) => CommitVote::Error(panicked(member.as_ref(), &message)),
                    }
                }
                Err(payload) => {
                    // Unknown pending state: it still gets rolled back and released.
                    CommitVote::Error(panicked(member.as_ref(), &panic_message(&*payload)))
                }
            };
            debug!(tx_id = %self.id, member = %member.id(), ?vote, "phase 1 vote");
            match vote {
                CommitVote::Ok => {}
                CommitVote::Reject => {
                    if outcome.is_ok() {
                        self.inner.lock().rejected_by = Some(member.id().to_string());
                        outcome = CommitVote::Reject;
                    }
                }
                CommitVote::Error(e) => {
                    if let CommitVote::Error(_) = outcome {
                        warn!(
                            tx_id = %self.id,
                            member = %member.id(),
                            error = %e,
                            "additional phase 1 failure"
                        );
                    } else {
                        outcome = CommitVote::Error(e);
                    }
                }
            }
            if !outcome.is_ok() && self.config.fail_fast {
                break;
            }
        }

        let mut inner = self.inner.lock();
        inner.phase1_passed = outcome.is_ok();
        inner.prepared = prepared;
        outcome
    }

    /// Id of the first member that voted [`CommitVote::Reject`] in phase 1.
    pub fn rejected_by(&self) -> Option<String> {
        self.inner.lock().rejected_by.clone()
    }

    /// Phase 2: finalizes every member prepared in phase 1.
    ///
    /// Valid only after [`commit_phase1`](Self::commit_phase1) voted `Ok`. All
    /// prepared members are visited even if one fails; the failures are
    /// returned together as [`TransactionError::CommitFailed`].
    pub async fn commit_phase2(&self) -> TransactionResult<()> {
        let prepared = {
            let mut inner = self.inner.lock();
            if inner.state != TransactionState::Completing || !inner.phase1_passed {
                return Err(TransactionError::CommitFailed(format!(
                    "transaction {} has not passed phase 1",
                    self.id
                )));
            }
            inner.state = TransactionState::Committed;
            inner.completion = Some(TransactionState::Committed);
            inner.prepared.clone()
        };

        let mut failures = Vec::new();
        for member in prepared {
            if let Err(e) = settle(member.as_ref(), member.commit_phase2()).await {
                error!(tx_id = %self.id, member = %member.id(), error = %e, "phase 2 failed");
                failures.push(format!("{}: {}", member.id(), e));
            }
        }
        collect(failures, TransactionError::CommitFailed)
    }

    /// Rolls back every registered member, continuing past individual failures.
    ///
    /// Fails without touching any member once phase 2 has run.
    pub async fn rollback(&self) -> TransactionResult<()> {
        let members = {
            let mut inner = self.inner.lock();
            if inner.completion == Some(TransactionState::Committed) {
                return Err(TransactionError::RollbackFailed(format!(
                    "transaction {} is already committed",
                    self.id
                )));
            }
            if inner.state == TransactionState::Released {
                return Ok(());
            }
            inner.state = TransactionState::RolledBack;
            inner.completion = Some(TransactionState::RolledBack);
            inner.members.values().map(|e| e.member.clone()).collect::<Vec<_>>()
        };

        debug!(tx_id = %self.id, members = members.len(), "rolling back");
        let mut failures = Vec::new();
        for member in members {
            if let Err(e) = settle(member.as_ref(), member.rollback()).await {
                warn!(tx_id = %self.id, member = %member.id(), error = %e, "rollback failed");
                failures.push(format!("{}: {}", member.id(), e));
            }
        }
        collect(failures, TransactionError::RollbackFailed)
    }

    /// Releases every registered member exactly once.
    ///
    /// Safe to call on a transaction that never completed; later calls are
    /// no-ops.
    pub async fn release(&self) -> TransactionResult<()> {
        let members = {
            let mut inner = self.inner.lock();
            if inner.state == TransactionState::Released {
                return Ok(());
            }
            inner.state = TransactionState::Released;
            inner.prepared.clear();
            inner.members.values().map(|e| e.member.clone()).collect::<Vec<_>>()
        };

        let mut failures = Vec::new();
        for member in members {
            if let Err(e) = settle(member.as_ref(), member.release()).await {
                warn!(tx_id = %self.id, member = %member.id(), error = %e, "release failed");
                failures.push(format!("{}: {}", member.id(), e));
            }
        }
        debug!(tx_id = %self.id, "transaction released");
        collect(failures, TransactionError::ReleaseFailed)
    }

    /// Records a failure for later inspection. Has no effect on completion.
    pub fn add_failure(&self, failure: impl fmt::Display) {
        let failure = failure.to_string();
        debug!(tx_id = %self.id, failure = %failure, "failure recorded");
        self.inner.lock().failures.push(failure);
    }

    pub fn failures(&self) -> Vec<String> {
        self.inner.lock().failures.clone()
    }

    pub fn has_failures(&self) -> bool {
        !self.inner.lock().failures.is_empty()
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new(TransactionConfig::default())
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("state", &inner.state)
            .field("cancelled", &inner.cancelled)
            .field("members", &inner.members.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != TransactionState::Released && !inner.members.is_empty() {
            warn!(
                tx_id = %self.id,
                members = inner.members.len(),
                "transaction dropped without releasing its members"
            );
        }
    }
}

fn downcast_entry<M>(id: &str, entry: &Entry) -> TransactionResult<Arc<M>>
where
    M: TransactionMember + 'static,
{
    entry
        .typed
        .clone()
        .and_then(|any| any.downcast::<M>().ok())
        .ok_or_else(|| TransactionError::member(id, "registered with a different member type"))
}

/// Polls a member callback, turning a panic into its message.
async fn shielded<F: Future>(fut: F) -> Result<F::Output, String> {
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|payload| panic_message(&*payload))
}

/// Runs a fallible member callback; a panic counts as a member failure.
async fn settle<F>(member: &dyn TransactionMember, fut: F) -> TransactionResult<()>
where
    F: Future<Output = TransactionResult<()>>,
{
    shielded(fut)
        .await
        .unwrap_or_else(|message| Err(panicked(member, &message)))
}

fn panicked(member: &dyn TransactionMember, message: &str) -> TransactionError {
    TransactionError::member(member.id(), format!("panicked: {message}"))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn collect(failures: Vec<String>, wrap: fn(String) -> TransactionError) -> TransactionResult<()> {
    if failures.is_empty() {
        Ok(())
    } else {
        Err(wrap(failures.join("; ")))
    }
}
