#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use transaction_scope::{
    CommitVote, Transaction, TransactionConfig, TransactionError, TransactionMember, TransactionResult,
    UnitOfWork,
};

/// Error type of the units of work under test
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("boom")]
    Boom,

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Member callback recorded by a [`Journal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Phase1,
    Phase2,
    Rollback,
    Release,
}

/// Shared, ordered log of member callbacks
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<(String, Call)>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, member: &str, call: Call) {
        self.0.lock().push((member.to_string(), call));
    }

    /// Calls received by `member`, in order.
    pub fn calls(&self, member: &str) -> Vec<Call> {
        self.0
            .lock()
            .iter()
            .filter(|(id, _)| id == member)
            .map(|(_, call)| *call)
            .collect()
    }

    pub fn count(&self, member: &str, call: Call) -> usize {
        self.calls(member).into_iter().filter(|c| *c == call).count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Clone, Copy)]
enum Phase1 {
    Vote,
    Reject,
    Fail,
    Panic,
}

/// Member that records every callback and fails on request
pub struct RecordingMember {
    id: String,
    journal: Journal,
    needs_commit: bool,
    phase1: Phase1,
    fail_phase2: bool,
    fail_rollback: bool,
    fail_release: bool,
    panic_rollback: bool,
}

impl RecordingMember {
    pub fn new(id: &str, journal: &Journal) -> Self {
        Self {
            id: id.to_string(),
            journal: journal.clone(),
            needs_commit: true,
            phase1: Phase1::Vote,
            fail_phase2: false,
            fail_rollback: false,
            fail_release: false,
            panic_rollback: false,
        }
    }

    pub fn idle(mut self) -> Self {
        self.needs_commit = false;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.phase1 = Phase1::Reject;
        self
    }

    pub fn failing_phase1(mut self) -> Self {
        self.phase1 = Phase1::Fail;
        self
    }

    pub fn panicking_phase1(mut self) -> Self {
        self.phase1 = Phase1::Panic;
        self
    }

    pub fn panicking_rollback(mut self) -> Self {
        self.panic_rollback = true;
        self
    }

    pub fn failing_phase2(mut self) -> Self {
        self.fail_phase2 = true;
        self
    }

    pub fn failing_rollback(mut self) -> Self {
        self.fail_rollback = true;
        self
    }

    pub fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    fn outcome(&self, fail: bool, what: &str) -> TransactionResult<()> {
        if fail {
            Err(TransactionError::member(&self.id, format!("{what} failed")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionMember for RecordingMember {
    fn id(&self) -> &str {
        &self.id
    }

    fn needs_commit(&self) -> bool {
        self.needs_commit
    }

    async fn commit_phase1(&self) -> CommitVote {
        self.journal.record(&self.id, Call::Phase1);
        match self.phase1 {
            Phase1::Vote => CommitVote::Ok,
            Phase1::Reject => CommitVote::Reject,
            Phase1::Fail => CommitVote::Error(TransactionError::member(&self.id, "prepare failed")),
            Phase1::Panic => panic!("{} exploded while preparing", self.id),
        }
    }

    async fn commit_phase2(&self) -> TransactionResult<()> {
        self.journal.record(&self.id, Call::Phase2);
        self.outcome(self.fail_phase2, "commit")
    }

    async fn rollback(&self) -> TransactionResult<()> {
        self.journal.record(&self.id, Call::Rollback);
        if self.panic_rollback {
            panic!("{} exploded while rolling back", self.id);
        }
        self.outcome(self.fail_rollback, "rollback")
    }

    async fn release(&self) -> TransactionResult<()> {
        self.journal.record(&self.id, Call::Release);
        self.outcome(self.fail_release, "release")
    }
}

/// Factory keeping a handle on every transaction it began
#[derive(Default)]
pub struct RecordingUnitOfWork {
    config: TransactionConfig,
    begun: Mutex<Vec<Arc<Transaction>>>,
}

impl RecordingUnitOfWork {
    pub fn new(config: TransactionConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            begun: Mutex::new(Vec::new()),
        })
    }

    pub fn begun(&self) -> Vec<Arc<Transaction>> {
        self.begun.lock().clone()
    }
}

#[async_trait]
impl UnitOfWork for RecordingUnitOfWork {
    async fn begin(&self) -> TransactionResult<Arc<Transaction>> {
        let tx = Arc::new(Transaction::new(self.config.clone()));
        self.begun.lock().push(tx.clone());
        Ok(tx)
    }
}
