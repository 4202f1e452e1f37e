pub mod entities;
pub mod members;
pub mod repositories;

pub use entities::{Account, LedgerEntry};
pub use members::{AppError, Call, Journal, RecordingMember, RecordingUnitOfWork};
pub use repositories::{AccountRepository, LedgerRepository};

/// Route library logs to the test harness output. Safe to call from every test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
