//! Cycle orchestration and the daemon loop
//!
//! [`run_cycle`] carries one full balancing pass over any [`ClusterClient`],
//! which is what the integration tests drive. [`Balancer`] wraps it in the
//! never-ending daemon loop, re-authenticating against the real cluster at
//! the start of every cycle.

use tokio::time::sleep;
use tracing::info;

use crate::client::{ClusterClient, ProxmoxClient};
use crate::config::{Config, Parameters};

use super::deviation::compute_deviations;
use super::executor::{ExecuteOutcome, MigrationExecutor};
use super::planner::{plan_cycle, MigrationPlan};
use super::BalanceError;

/// What a single balancing cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The eligibility gate failed; nothing was even fetched.
    Skipped { reason: &'static str },
    /// Snapshot taken, nothing worth doing (or every candidate skipped).
    NoAction,
    /// One guest was relocated and confirmed running.
    Migrated(u32),
}

/// Decision half of a cycle, before anything is touched.
enum PlanOutcome {
    Ineligible(&'static str),
    Balanced,
    Plan(MigrationPlan),
}

/// Run one balancing cycle: eligibility, snapshot, deviations, plan,
/// execute.
pub async fn run_cycle<C>(client: &C, params: &Parameters) -> Result<CycleOutcome, BalanceError>
where
    C: ClusterClient + ?Sized,
{
    let plan = match snapshot_and_plan(client, params).await? {
        PlanOutcome::Ineligible(reason) => return Ok(CycleOutcome::Skipped { reason }),
        PlanOutcome::Balanced => return Ok(CycleOutcome::NoAction),
        PlanOutcome::Plan(plan) => plan,
    };

    let executor = MigrationExecutor::new(
        client,
        params.migration.poll_every(),
        params.migration.settle_for(),
        params.migration.deadline(),
    );
    match executor.execute(&plan.candidates, &plan.destination).await? {
        ExecuteOutcome::Migrated(vmid) => Ok(CycleOutcome::Migrated(vmid)),
        ExecuteOutcome::NoneMigrated => Ok(CycleOutcome::NoAction),
    }
}

/// Everything up to (but not including) execution.
async fn snapshot_and_plan<C>(
    client: &C,
    params: &Parameters,
) -> Result<PlanOutcome, BalanceError>
where
    C: ClusterClient + ?Sized,
{
    if !client.is_quorate().await? {
        info!("cluster is not quorate, skipping run");
        return Ok(PlanOutcome::Ineligible("cluster is not quorate"));
    }
    info!("cluster is quorate");

    if params.only_on_manager && !client.is_manager().await? {
        info!("host is not manager, skipping run");
        return Ok(PlanOutcome::Ineligible("host is not manager"));
    }

    let mut nodes = client.list_nodes().await?;
    let guests = client.list_guests(params.container_migration).await?;

    compute_deviations(&mut nodes)?;

    Ok(match plan_cycle(&nodes, &guests, params.deviation) {
        Some(plan) => PlanOutcome::Plan(plan),
        None => PlanOutcome::Balanced,
    })
}

/// The long-running balancer daemon.
pub struct Balancer {
    config: Config,
}

impl Balancer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Cycle forever. Only fatal conditions return, and they return as
    /// errors for the caller to exit on.
    pub async fn run(&self) -> Result<(), BalanceError> {
        loop {
            // Fresh session every cycle; tickets expire and a cycle can
            // outlive one.
            let client = ProxmoxClient::connect(&self.config.proxmox).await?;

            match run_cycle(&client, &self.config.parameters).await? {
                CycleOutcome::Skipped { .. } => {
                    sleep(self.config.parameters.sleep.error_interval()).await;
                    continue;
                }
                CycleOutcome::NoAction => {}
                CycleOutcome::Migrated(vmid) => {
                    info!("guest {} relocated, letting the cluster calm down", vmid);
                }
            }

            sleep(self.config.parameters.sleep.success_interval()).await;
            info!("------------ restarting ------------");
        }
    }

    /// Run the decision half of one cycle and report, without migrating
    /// anything.
    pub async fn check(&self) -> Result<(), BalanceError> {
        let client = ProxmoxClient::connect(&self.config.proxmox).await?;
        match snapshot_and_plan(&client, &self.config.parameters).await? {
            PlanOutcome::Plan(plan) => {
                info!(
                    "would migrate guest {} from {} to {} ({} candidates ranked)",
                    plan.candidates[0].vmid,
                    plan.origin.name,
                    plan.destination.name,
                    plan.candidates.len()
                );
            }
            PlanOutcome::Ineligible(reason) => info!("not eligible: {}", reason),
            PlanOutcome::Balanced => info!("cluster is balanced, nothing to do"),
        }
        Ok(())
    }
}
