pub mod budget;
pub mod guard;
pub mod infra;
pub mod lock_ledger;
pub mod orchestrator;
pub mod run_log;
pub mod stats;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use budget::{BudgetSupervisor, Decision, RunBudget, StopReason};
pub use guard::{Candidate, DuplicateGuard, SEMANTIC_DUPLICATE_THRESHOLD};
pub use lock_ledger::{fingerprint, fingerprint_variants, TopicLockLedger};
pub use orchestrator::{Orchestrator, RunDeps};
pub use run_log::{EventKind, RunEvent, RunLog};
pub use stats::{RunStatus, RunSummary};
