//! # proxbalance
//!
//! A continuously-running memory load balancer for Proxmox VE clusters.
//! Each cycle it measures every node's memory load against the cluster
//! average, picks the most overloaded and most underloaded nodes, ranks the
//! guests worth moving between them, and drives one relocation through the
//! management API until the guest is verified running on its new host.
//!
//! - [`config`]: YAML daemon configuration
//! - [`client`]: the cluster API seam ([`client::ClusterClient`]) and its
//!   Proxmox implementation
//! - [`balancer`]: deviation model, planner, executor, and the daemon loop
//! - [`cli`]: command line arguments

pub mod balancer;
pub mod cli;
pub mod client;
pub mod config;
