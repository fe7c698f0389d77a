//! # Balancing engine
//!
//! One balancing cycle flows strictly one way:
//!
//! ```text
//! snapshot (client) -> deviation -> planner -> executor
//! ```
//!
//! - [`snapshot`]: cycle-local node/guest values
//! - [`deviation`]: per-node memory-load deviation from the cluster average
//! - [`planner`]: origin/destination selection and guest ranking
//! - [`executor`]: request/poll/confirm migration protocol
//! - [`engine`]: the cycle orchestration and the daemon loop around it
//!
//! The engine is single-threaded by design: one cycle at a time, one
//! migration at a time, so a guest can never have two in-flight relocation
//! requests.

pub mod deviation;
pub mod engine;
pub mod executor;
pub mod planner;
pub mod snapshot;

pub use deviation::{compute_deviations, max_abs_deviation_percent};
pub use engine::{run_cycle, Balancer, CycleOutcome};
pub use executor::{ExecuteOutcome, MigrationExecutor};
pub use planner::{plan_cycle, rank_migration_candidates, select_migration_path, MigrationPlan};
pub use snapshot::{Guest, GuestKind, GuestState, GuestSummary, Node, NodeState};

use thiserror::Error;

use crate::client::ClientError;

/// Errors that abort a balancing cycle.
///
/// Everything in here propagates to the top of the process: recoverable
/// conditions (a rejected migration request, a timed-out poll) are absorbed
/// inside the executor and never surface as a `BalanceError`.
#[derive(Error, Debug)]
pub enum BalanceError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A node reported zero maximum memory; load ratios are undefined.
    #[error("node {0} reports zero maximum memory")]
    ZeroCapacity(String),

    /// The cluster reports a migrated guest present on the destination but
    /// not running. The engine cannot safely keep balancing on top of that.
    #[error("guest {vmid} is present on {node} but not running after migration")]
    InconsistentMigration { vmid: u32, node: String },
}
