//! Migration execution
//!
//! Walks a ranked candidate list front to back and drives each relocation
//! request through a poll-based completion protocol. The first guest that
//! verifiably arrives running on the destination ends the cycle; a rejected
//! request or a timed-out move skips to the next candidate.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::client::{ClientError, ClusterClient, MigrationStatus};

use super::snapshot::{Guest, GuestKind, Node};
use super::BalanceError;

/// Result of one executor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    /// This guest was moved and confirmed running on the destination.
    Migrated(u32),
    /// Every candidate was skipped; nothing moved this cycle.
    NoneMigrated,
}

enum GuestOutcome {
    Completed,
    Skipped,
}

/// Drives relocations against a [`ClusterClient`].
pub struct MigrationExecutor<'a, C: ClusterClient + ?Sized> {
    client: &'a C,
    /// Pause between migration status polls.
    poll_interval: Duration,
    /// Gap between the guest appearing on the destination and the resume
    /// call; a freshly arrived VM needs a moment before it accepts one.
    settle_interval: Duration,
    /// Ceiling on how long a single in-flight migration is polled before it
    /// is given up on (the guest is skipped, not the cycle).
    migration_timeout: Duration,
}

impl<'a, C: ClusterClient + ?Sized> MigrationExecutor<'a, C> {
    pub fn new(
        client: &'a C,
        poll_interval: Duration,
        settle_interval: Duration,
        migration_timeout: Duration,
    ) -> Self {
        Self {
            client,
            poll_interval,
            settle_interval,
            migration_timeout,
        }
    }

    /// Try the ranked candidates in order until one completes.
    ///
    /// Stops at the first success; later candidates are never attempted in
    /// the same cycle. Only request rejections and poll timeouts are
    /// absorbed per guest; everything else aborts the cycle.
    pub async fn execute(
        &self,
        candidates: &[Guest],
        destination: &Node,
    ) -> Result<ExecuteOutcome, BalanceError> {
        for guest in candidates {
            match self.migrate_one(guest, destination).await? {
                GuestOutcome::Completed => return Ok(ExecuteOutcome::Migrated(guest.vmid)),
                GuestOutcome::Skipped => continue,
            }
        }
        Ok(ExecuteOutcome::NoneMigrated)
    }

    async fn migrate_one(
        &self,
        guest: &Guest,
        destination: &Node,
    ) -> Result<GuestOutcome, BalanceError> {
        info!(
            "starting guest migration of {} from {} to {}",
            guest.vmid, guest.node, destination.name
        );

        let job = match self.client.request_migration(guest, destination).await {
            Ok(job) => job,
            Err(ClientError::Rejected { status, reason }) => {
                // The operator should consider marking the guest IGNORED or
                // constraining its HA group if this repeats.
                warn!(
                    "error while requesting migration of {}:{} from {} to {}: {}: {}",
                    guest.kind, guest.vmid, guest.node, destination.name, status, reason
                );
                return Ok(GuestOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "migrating {}:{} ({:.2} GB mem) from {} to {} as {}",
            guest.kind,
            guest.vmid,
            guest.mem as f64 / (1024.0 * 1024.0 * 1024.0),
            guest.node,
            destination.name,
            job.0
        );

        let started = Instant::now();
        loop {
            sleep(self.poll_interval).await;

            if started.elapsed() >= self.migration_timeout {
                warn!(
                    "migration of {} exceeded {} sec, giving up on this guest",
                    guest.vmid,
                    self.migration_timeout.as_secs()
                );
                return Ok(GuestOutcome::Skipped);
            }

            // A migration lock on the origin means the move is still running.
            if self.client.poll_migration(&guest.node, guest).await? == MigrationStatus::Locked {
                continue;
            }

            let on_destination = self
                .client
                .list_guests_on_node(&destination.name, guest.kind)
                .await?;
            match on_destination.iter().find(|g| g.vmid == guest.vmid) {
                Some(arrived) if arrived.running => {
                    info!("{} - completed", job.0);
                    sleep(self.settle_interval).await;
                    if guest.kind == GuestKind::Vm {
                        // VMs arrive migrated-but-paused.
                        match self.client.resume_guest(&destination.name, guest).await {
                            Ok(()) => debug!("resumed {} after {}", guest.vmid, job.0),
                            Err(e) => warn!("resume of {} failed: {}", guest.vmid, e),
                        }
                    }
                    return Ok(GuestOutcome::Completed);
                }
                Some(_) => {
                    // The management layer claims a finished migration of a
                    // guest that is not actually live. Nothing this engine
                    // does from here on can be trusted.
                    return Err(BalanceError::InconsistentMigration {
                        vmid: guest.vmid,
                        node: destination.name.clone(),
                    });
                }
                None => {
                    info!(
                        "migration of {}: {} sec elapsed",
                        guest.vmid,
                        started.elapsed().as_secs()
                    );
                }
            }
        }
    }
}
