mod common;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use transaction_scope::{context, CallableChain, Next, Processor, TransactionProcessor, TransactionScope};

use common::AppError;

type Log = Arc<Mutex<Vec<String>>>;

/// Logs entry and exit around the rest of the chain, noting whether a
/// transaction is bound when it is entered
struct Probe {
    name: &'static str,
    log: Log,
}

#[async_trait]
impl Processor<String, AppError> for Probe {
    async fn call(&self, next: Next<'_, String, AppError>) -> Result<String, AppError> {
        let bound = if context::current().is_some() { "bound" } else { "unbound" };
        self.log
            .lock()
            .push(format!("enter {} ({bound}, {} ahead)", self.name, next.remaining()));
        let result = next.run().await;
        self.log.lock().push(format!("exit {}", self.name));
        result
    }
}

/// Answers without running the rest of the chain
struct ShortCircuit;

#[async_trait]
impl Processor<String, AppError> for ShortCircuit {
    async fn call(&self, _next: Next<'_, String, AppError>) -> Result<String, AppError> {
        Ok("cached".to_string())
    }
}

fn probe(name: &'static str, log: &Log) -> Probe {
    Probe {
        name,
        log: log.clone(),
    }
}

#[tokio::test]
async fn test_empty_chain_runs_work() {
    let chain: CallableChain<String, AppError> = CallableChain::new();
    assert!(chain.is_empty());

    let result = chain.call(|| async { Ok("result".to_string()) }).await;

    assert_eq!(result.expect("Call should succeed"), "result");
}

#[tokio::test]
async fn test_processors_wrap_work_in_order() {
    let log: Log = Arc::default();
    let chain = CallableChain::new().with(probe("a", &log)).with(probe("b", &log));
    assert_eq!(chain.len(), 2);

    let work_log = log.clone();
    let result = chain
        .call(|| async move {
            work_log.lock().push("work".to_string());
            Ok("result".to_string())
        })
        .await;

    assert_eq!(result.expect("Call should succeed"), "result");
    assert_eq!(
        *log.lock(),
        vec![
            "enter a (unbound, 1 ahead)",
            "enter b (unbound, 0 ahead)",
            "work",
            "exit b",
            "exit a",
        ]
    );
}

#[tokio::test]
async fn test_processor_may_skip_the_rest_of_the_chain() {
    let log: Log = Arc::default();
    let mut chain = CallableChain::new();
    chain.push(ShortCircuit);
    chain.push(probe("never", &log));

    let result = chain
        .call(|| async { Err::<String, _>(AppError::Boom) })
        .await;

    assert_eq!(result.expect("Short circuit should answer"), "cached");
    assert!(log.lock().is_empty(), "Nothing behind the short circuit should run");
}

#[tokio::test]
async fn test_links_behind_transaction_processor_see_bound_transaction() {
    let log: Log = Arc::default();
    let chain = CallableChain::new()
        .with(probe("outer", &log))
        .with(TransactionProcessor::new(TransactionScope::RequiresNew))
        .with(probe("inner", &log));

    chain
        .call(|| async { Ok(String::new()) })
        .await
        .expect("Call should succeed");

    assert_eq!(
        *log.lock(),
        vec![
            "enter outer (unbound, 2 ahead)",
            "enter inner (bound, 0 ahead)",
            "exit inner",
            "exit outer",
        ]
    );
}

#[tokio::test]
async fn test_errors_pass_through_every_link() {
    let log: Log = Arc::default();
    let chain = CallableChain::new().with(probe("a", &log)).with(probe("b", &log));

    let result = chain.call(|| async { Err(AppError::Boom) }).await;

    assert!(matches!(result, Err(AppError::Boom)));
    assert_eq!(log.lock().len(), 4, "Every link should unwind");
}
