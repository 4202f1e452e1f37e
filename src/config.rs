//! Transaction configuration.

/// Settings applied to every transaction a [`BasicUnitOfWork`](crate::BasicUnitOfWork) begins.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Label attached to log records of the transaction.
    pub name: Option<String>,

    /// Stop phase 1 at the first member that does not vote `Ok`.
    /// When disabled every member is still asked to prepare.
    pub fail_fast: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            name: None,
            fail_fast: true,
        }
    }
}

impl TransactionConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log label.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets whether phase 1 stops at the first failing vote.
    #[must_use]
    pub const fn fail_fast(mut self, value: bool) -> Self {
        self.fail_fast = value;
        self
    }
}
