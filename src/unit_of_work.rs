use async_trait::async_trait;
use std::sync::Arc;

use crate::{Transaction, TransactionConfig, TransactionResult};

/// Factory for new transactions.
///
/// A [`TransactionProcessor`](crate::TransactionProcessor) calls `begin`
/// whenever its scope requires a transaction it will own.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> TransactionResult<Arc<Transaction>>;
}

/// Default implementation of UnitOfWork producing in-process transactions.
#[derive(Debug, Clone, Default)]
pub struct BasicUnitOfWork {
    config: TransactionConfig,
}

impl BasicUnitOfWork {
    /// Create a new BasicUnitOfWork applying `config` to every transaction.
    pub fn new(config: TransactionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }
}

#[async_trait]
impl UnitOfWork for BasicUnitOfWork {
    async fn begin(&self) -> TransactionResult<Arc<Transaction>> {
        Ok(Arc::new(Transaction::new(self.config.clone())))
    }
}
