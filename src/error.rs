use uuid::Uuid;

use crate::TransactionScope;

/// Error type for transaction coordination and member operations
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction required: scope {0} found no caller or ambient transaction")]
    TransactionRequired(TransactionScope),

    #[error("Transaction {0} is cancelled")]
    Cancelled(Uuid),

    #[error("Transaction {0} is already completing, no further members may be registered")]
    Completing(Uuid),

    #[error("Members cannot be seeded into a reused transaction (scope {0})")]
    MembersOnReusedTransaction(TransactionScope),

    #[error("Transaction rolled back: member '{0}' voted to reject the commit")]
    RolledBack(String),

    #[error("Member '{member}' failed: {message}")]
    Member { member: String, message: String },

    #[error("Transaction commit failed: {0}")]
    CommitFailed(String),

    #[error("Transaction rollback failed: {0}")]
    RollbackFailed(String),

    #[error("Transaction release failed: {0}")]
    ReleaseFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl TransactionError {
    /// Shorthand for a failure raised by a member implementation.
    pub fn member(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Member {
            member: member.into(),
            message: message.into(),
        }
    }
}

/// Result type for transaction operations
pub type TransactionResult<T> = Result<T, TransactionError>;
