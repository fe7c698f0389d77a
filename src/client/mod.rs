//! Cluster management API client
//!
//! The balancing engine only ever talks to the cluster through the
//! [`ClusterClient`] trait; the real Proxmox implementation lives in
//! [`proxmox`], and tests substitute scripted mocks.

pub mod proxmox;

pub use proxmox::ProxmoxClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::balancer::snapshot::{Guest, GuestKind, GuestSummary, Node};

#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure: unreachable endpoint, TLS, timeouts.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The cluster refused our credentials.
    #[error("authentication failed: {status} - {reason}")]
    Auth { status: u16, reason: String },

    /// A read request came back non-success.
    #[error("API error: {status} - {reason}")]
    Api { status: u16, reason: String },

    /// The cluster refused a migration request. Recoverable: the executor
    /// skips to the next candidate.
    #[error("migration rejected: {status} - {reason}")]
    Rejected { status: u16, reason: String },

    #[error("unexpected API payload: {0}")]
    Parse(String),
}

/// Identifier of an accepted migration job (a Proxmox UPID).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationJob(pub String);

/// What the origin node reports about an in-flight migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// The guest is locked for migration: the move is still running. This is
    /// the expected in-flight answer, not an error.
    Locked,
    /// No migration lock held; the job has finished one way or the other and
    /// the destination must be checked.
    Idle,
}

/// Everything the balancing engine needs from the cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Whether the cluster has enough live members to act authoritatively.
    async fn is_quorate(&self) -> Result<bool, ClientError>;

    /// Whether this host is the elected HA manager.
    async fn is_manager(&self) -> Result<bool, ClientError>;

    /// All online, non-ignored nodes with their operator state resolved.
    async fn list_nodes(&self) -> Result<Vec<Node>, ClientError>;

    /// All running, managed guests hosted on known nodes. Containers are
    /// included only when `include_containers` is set.
    async fn list_guests(&self, include_containers: bool) -> Result<Vec<Guest>, ClientError>;

    /// Ask the cluster to move `guest` to `destination`. Containers request
    /// a restart move, VMs an online one. A refusal surfaces as
    /// [`ClientError::Rejected`].
    async fn request_migration(
        &self,
        guest: &Guest,
        destination: &Node,
    ) -> Result<MigrationJob, ClientError>;

    /// Poll the origin node's migration state for `guest`.
    async fn poll_migration(
        &self,
        origin: &str,
        guest: &Guest,
    ) -> Result<MigrationStatus, ClientError>;

    /// List guests of one kind currently on `node`.
    async fn list_guests_on_node(
        &self,
        node: &str,
        kind: GuestKind,
    ) -> Result<Vec<GuestSummary>, ClientError>;

    /// Resume a VM that arrived paused after a live migration.
    async fn resume_guest(&self, node: &str, guest: &Guest) -> Result<(), ClientError>;
}
