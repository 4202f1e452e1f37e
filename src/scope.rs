use std::fmt;

/// Propagation policy for a transactional call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionScope {
    /// A caller or ambient transaction must exist and is reused.
    Mandatory,
    /// Reuse the caller or ambient transaction, or start a new one if there is none.
    Required,
    /// Always start a new transaction.
    RequiresNew,
}

impl TransactionScope {
    /// Whether a transaction resolved from the caller is reused rather than
    /// replaced by a new one.
    pub fn reuses_caller(self) -> bool {
        !matches!(self, TransactionScope::RequiresNew)
    }
}

impl fmt::Display for TransactionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransactionScope::Mandatory => "MANDATORY",
            TransactionScope::Required => "REQUIRED",
            TransactionScope::RequiresNew => "REQUIRES_NEW",
        })
    }
}
