//! Ambient transaction bound to the running task.

use std::future::Future;
use std::sync::Arc;

use crate::Transaction;

tokio::task_local! {
    static CURRENT_TRANSACTION: Arc<Transaction>;
}

/// The transaction bound to the current task, if any.
///
/// Spawned tasks do not inherit the binding of the task that spawned them.
pub fn current() -> Option<Arc<Transaction>> {
    CURRENT_TRANSACTION.try_with(Arc::clone).ok()
}

/// Runs `fut` with `tx` as the current transaction. The previous binding is
/// restored when `fut` completes or is dropped.
pub async fn scope<F: Future>(tx: Arc<Transaction>, fut: F) -> F::Output {
    CURRENT_TRANSACTION.scope(tx, fut).await
}

/// Synchronous counterpart of [`scope`].
pub fn sync_scope<R>(tx: Arc<Transaction>, f: impl FnOnce() -> R) -> R {
    CURRENT_TRANSACTION.sync_scope(tx, f)
}
