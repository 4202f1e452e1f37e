//! Transaction Scope Module
//!
//! This module provides in-process transaction propagation and two-phase
//! completion for heterogeneous resources. A [`CallableChain`] wraps a unit of
//! work with [`TransactionProcessor`] links that reuse, require or begin a
//! [`Transaction`] according to a [`TransactionScope`], bind it as the ambient
//! transaction of the running task, and drive its [`TransactionMember`]s
//! through commit or rollback.

pub mod cache;
pub mod chain;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod member;
pub mod processor;
pub mod scope;
pub mod transaction;
pub mod unit_of_work;

pub use cache::{CacheMember, TransactionalCache};
pub use chain::{CallableChain, Next, Processor};
pub use config::TransactionConfig;
pub use error::{TransactionError, TransactionResult};
pub use executor::{Executor, PostgresMember};
pub use member::{CommitVote, TransactionMember};
pub use processor::{run_in_scope, TransactionProcessor};
pub use scope::TransactionScope;
pub use transaction::{Transaction, TransactionState};
pub use unit_of_work::{BasicUnitOfWork, UnitOfWork};
