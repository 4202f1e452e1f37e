//! In-memory cache whose writes follow the ambient transaction.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::{context, CommitVote, TransactionMember, TransactionResult};

/// Shared key-value cache.
///
/// Inside a transaction, writes are staged in a [`CacheMember`] registered on
/// the ambient transaction and become visible to other readers only after
/// phase 2. Outside a transaction they apply immediately.
pub struct TransactionalCache<K, V> {
    member_id: String,
    committed: Arc<RwLock<HashMap<K, V>>>,
}

impl<K, V> TransactionalCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &str) -> Self {
        Self {
            member_id: format!("cache:{name}"),
            committed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Id under which this cache joins a transaction.
    pub fn member_id(&self) -> &str {
        &self.member_id
    }

    /// Reads `key`, seeing writes staged by the current transaction.
    pub fn get(&self, key: &K) -> Option<V> {
        let member = context::current()
            .and_then(|tx| tx.get_member_as::<CacheMember<K, V>>(&self.member_id));
        if let Some(staged) = member.and_then(|m| m.staged(key)) {
            return staged;
        }
        self.committed.read().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) -> TransactionResult<()> {
        self.write(key, Some(value))
    }

    pub fn remove(&self, key: K) -> TransactionResult<()> {
        self.write(key, None)
    }

    fn write(&self, key: K, value: Option<V>) -> TransactionResult<()> {
        let Some(tx) = context::current() else {
            let mut committed = self.committed.write();
            match value {
                Some(value) => committed.insert(key, value),
                None => committed.remove(&key),
            };
            return Ok(());
        };
        let member = tx.register_member_if_absent(&self.member_id, |id| {
            Ok(Arc::new(CacheMember::new(id, self.committed.clone())))
        })?;
        member.stage(key, value);
        Ok(())
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.committed.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.read().is_empty()
    }
}

/// Per-transaction write set of a [`TransactionalCache`].
pub struct CacheMember<K, V> {
    id: String,
    committed: Arc<RwLock<HashMap<K, V>>>,
    // `None` marks a removal.
    staged: Mutex<HashMap<K, Option<V>>>,
}

impl<K, V> CacheMember<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(id: &str, committed: Arc<RwLock<HashMap<K, V>>>) -> Self {
        Self {
            id: id.to_string(),
            committed,
            staged: Mutex::new(HashMap::new()),
        }
    }

    fn stage(&self, key: K, value: Option<V>) {
        self.staged.lock().insert(key, value);
    }

    /// `Some(None)` when the key was removed in this transaction.
    fn staged(&self, key: &K) -> Option<Option<V>> {
        self.staged.lock().get(key).cloned()
    }

    pub fn pending(&self) -> usize {
        self.staged.lock().len()
    }
}

#[async_trait]
impl<K, V> TransactionMember for CacheMember<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn needs_commit(&self) -> bool {
        !self.staged.lock().is_empty()
    }

    async fn commit_phase1(&self) -> CommitVote {
        CommitVote::Ok
    }

    async fn commit_phase2(&self) -> TransactionResult<()> {
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut committed = self.committed.write();
        for (key, value) in staged {
            match value {
                Some(value) => committed.insert(key, value),
                None => committed.remove(&key),
            };
        }
        Ok(())
    }

    async fn rollback(&self) -> TransactionResult<()> {
        self.staged.lock().clear();
        Ok(())
    }

    async fn release(&self) -> TransactionResult<()> {
        self.staged.lock().clear();
        Ok(())
    }
}
