//! Ordered middleware pipeline around a unit of work.
//!
//! Each [`Processor`] receives a [`Next`] continuation and decides whether,
//! and in what context, to run the rest of the chain.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// The wrapped unit of work, type-erased.
pub type Work<'a, T, E> = Box<dyn FnOnce() -> BoxFuture<'a, Result<T, E>> + Send + 'a>;

/// One link of a [`CallableChain`].
#[async_trait]
pub trait Processor<T, E>: Send + Sync
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Runs this link. Calling `next.run()` invokes the remaining links and
    /// finally the unit of work; not calling it skips them.
    async fn call(&self, next: Next<'_, T, E>) -> Result<T, E>;
}

/// The remainder of a chain invocation.
pub struct Next<'a, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    processors: &'a [Arc<dyn Processor<T, E>>],
    work: Work<'a, T, E>,
}

impl<'a, T, E> Next<'a, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Number of processors still ahead of the unit of work.
    pub fn remaining(&self) -> usize {
        self.processors.len()
    }

    pub async fn run(self) -> Result<T, E> {
        match self.processors.split_first() {
            Some((head, rest)) => {
                head.call(Next {
                    processors: rest,
                    work: self.work,
                })
                .await
            }
            None => (self.work)().await,
        }
    }
}

/// Ordered sequence of processors wrapping a unit of work, first added runs
/// outermost.
pub struct CallableChain<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    processors: Vec<Arc<dyn Processor<T, E>>>,
}

impl<T, E> CallableChain<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            processors: Vec::new(),
        }
    }

    /// Appends `processor` as the innermost link so far.
    #[must_use]
    pub fn with<P: Processor<T, E> + 'static>(mut self, processor: P) -> Self {
        self.push(processor);
        self
    }

    pub fn push<P: Processor<T, E> + 'static>(&mut self, processor: P) {
        self.processors.push(Arc::new(processor));
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Runs `work` inside every processor of the chain.
    pub async fn call<'a, F, Fut>(&'a self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<T, E>> + Send + 'a,
    {
        let work: Work<'a, T, E> = Box::new(move || -> BoxFuture<'a, Result<T, E>> { Box::pin(work()) });
        Next {
            processors: &self.processors,
            work,
        }
        .run()
        .await
    }
}

impl<T, E> Default for CallableChain<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
