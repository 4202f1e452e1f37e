use async_trait::async_trait;

use crate::{TransactionError, TransactionResult};

/// Outcome of the prepare phase for one member, or for a whole transaction.
#[derive(Debug)]
pub enum CommitVote {
    /// Ready to commit.
    Ok,
    /// The member declines to commit; the transaction must roll back.
    Reject,
    /// Preparing failed outright.
    Error(TransactionError),
}

impl CommitVote {
    /// Folds a `bool` prepare result into a vote, `false` meaning reject.
    pub fn from_result(result: TransactionResult<bool>) -> Self {
        match result {
            Ok(true) => CommitVote::Ok,
            Ok(false) => CommitVote::Reject,
            Err(e) => CommitVote::Error(e),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CommitVote::Ok)
    }
}

/// Trait for resources participating in a transaction.
///
/// A member is registered at most once per transaction, keyed by [`id`](Self::id).
/// The owning transaction drives it through two-phase completion:
/// `commit_phase1` then `commit_phase2` when every member voted [`CommitVote::Ok`],
/// otherwise `rollback`. `release` is called exactly once afterwards, whatever
/// the outcome, and also when the transaction is abandoned before completing.
#[async_trait]
pub trait TransactionMember: Send + Sync {
    /// Key of this member inside its transaction.
    fn id(&self) -> &str;

    /// Whether this member holds pending work. Members returning `false`
    /// are skipped by both commit phases.
    fn needs_commit(&self) -> bool;

    /// Phase 1: prepare and vote.
    async fn commit_phase1(&self) -> CommitVote;

    /// Phase 2: make the prepared work durable. Only called after every
    /// member voted `Ok` in phase 1.
    async fn commit_phase2(&self) -> TransactionResult<()>;

    /// Discard pending work.
    async fn rollback(&self) -> TransactionResult<()>;

    /// Free held resources.
    async fn release(&self) -> TransactionResult<()>;
}
