//! Per-node deviation from the cluster-wide memory load
//!
//! Every node is compared against a cluster average. Cordoned nodes still
//! hold workloads, so they count toward the baseline everyone is measured
//! against, but each cordoned node is evaluated against the average that
//! includes itself so cordoning alone never flags it as over- or
//! under-loaded.

use tracing::{debug, info};

use super::snapshot::{Node, NodeState};
use super::BalanceError;

/// Aggregate memory figures over a subset of nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterMemory {
    /// Sum of node capacities, bytes.
    pub max: f64,
    /// Sum of current usage, bytes.
    pub current: f64,
    /// `current / max`.
    pub load: f64,
}

/// Sum memory over all nodes whose state passes `include`.
///
/// Fails on a node with zero capacity: a node reporting `maxmem == 0` is
/// broken input the engine cannot reason about.
pub fn cluster_memory(
    nodes: &[Node],
    include: &[NodeState],
) -> Result<ClusterMemory, BalanceError> {
    let mut max = 0.0;
    let mut current = 0.0;
    for node in nodes {
        if node.maxmem == 0 {
            return Err(BalanceError::ZeroCapacity(node.name.clone()));
        }
        if include.contains(&node.state) {
            max += node.maxmem as f64;
            current += node.mem as f64;
        }
    }
    let load = if max > 0.0 { current / max } else { 0.0 };
    Ok(ClusterMemory { max, current, load })
}

/// Recompute the `deviation` field of every node in place.
///
/// Running nodes are measured against the average over running nodes only;
/// cordoned nodes against the average that also counts cordoned capacity.
pub fn compute_deviations(nodes: &mut [Node]) -> Result<(), BalanceError> {
    let with_cordoned = cluster_memory(nodes, &[NodeState::Running, NodeState::Cordon])?;
    let without_cordoned = cluster_memory(nodes, &[NodeState::Running])?;
    debug!(
        "cluster load: {} / {} = {:.4} (incl. cordoned), {:.4} (running only)",
        with_cordoned.current, with_cordoned.max, with_cordoned.load, without_cordoned.load
    );

    for node in nodes.iter_mut() {
        let baseline = if node.state == NodeState::Cordon {
            with_cordoned.load
        } else {
            without_cordoned.load
        };
        node.deviation = node.mem_load() - baseline;

        info!(
            "deviation for node {} is {:.2}% with {:.3} GB of free memory",
            node.name,
            node.deviation * 100.0,
            node.imbalance_bytes() / 1024.0 / 1024.0 / 1024.0
        );
    }
    Ok(())
}

/// The largest `|deviation| * 100` across all nodes; the no-op threshold is
/// compared against this.
pub fn max_abs_deviation_percent(nodes: &[Node]) -> f64 {
    nodes
        .iter()
        .map(|n| n.deviation.abs())
        .fold(0.0, f64::max)
        * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node(name: &str, mem: u64, maxmem: u64, state: NodeState) -> Node {
        Node {
            name: name.to_string(),
            maxmem,
            mem,
            maxcpu: 8,
            cpu: 0.0,
            state,
            deviation: 0.0,
        }
    }

    #[test]
    fn test_cluster_memory_filters_by_state() {
        let nodes = vec![
            make_node("a", 50, 100, NodeState::Running),
            make_node("b", 30, 100, NodeState::Cordon),
            make_node("c", 90, 100, NodeState::Drain),
        ];

        let running = cluster_memory(&nodes, &[NodeState::Running]).unwrap();
        assert_eq!(running.max, 100.0);
        assert_eq!(running.current, 50.0);
        assert_eq!(running.load, 0.5);

        let with_cordon =
            cluster_memory(&nodes, &[NodeState::Running, NodeState::Cordon]).unwrap();
        assert_eq!(with_cordon.max, 200.0);
        assert_eq!(with_cordon.current, 80.0);
        assert_eq!(with_cordon.load, 0.4);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let nodes = vec![make_node("broken", 0, 0, NodeState::Running)];
        let err = cluster_memory(&nodes, &[NodeState::Running]).unwrap_err();
        assert!(matches!(err, BalanceError::ZeroCapacity(ref n) if n == "broken"));
    }

    #[test]
    fn test_running_nodes_use_running_average() {
        // 90 + 50 + 10 over 3x100 => running load 0.5
        let mut nodes = vec![
            make_node("hot", 90, 100, NodeState::Running),
            make_node("mid", 50, 100, NodeState::Running),
            make_node("cold", 10, 100, NodeState::Running),
        ];
        compute_deviations(&mut nodes).unwrap();

        assert!((nodes[0].deviation - 0.4).abs() < 1e-9);
        assert!(nodes[1].deviation.abs() < 1e-9);
        assert!((nodes[2].deviation + 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_cordoned_nodes_use_inclusive_average() {
        // Running-only load: 80/100 = 0.8. Including cordoned: 100/200 = 0.5.
        let mut nodes = vec![
            make_node("run", 80, 100, NodeState::Running),
            make_node("cord", 20, 100, NodeState::Cordon),
        ];
        compute_deviations(&mut nodes).unwrap();

        // Running node measured against 0.8, cordoned against 0.5.
        assert!(nodes[0].deviation.abs() < 1e-9);
        assert!((nodes[1].deviation - (0.2 - 0.5)).abs() < 1e-9);
    }

    #[test]
    fn test_max_abs_deviation_percent() {
        let mut nodes = vec![
            make_node("a", 90, 100, NodeState::Running),
            make_node("b", 50, 100, NodeState::Running),
            make_node("c", 10, 100, NodeState::Running),
        ];
        compute_deviations(&mut nodes).unwrap();
        assert!((max_abs_deviation_percent(&nodes) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_abs_deviation_empty() {
        assert_eq!(max_abs_deviation_percent(&[]), 0.0);
    }
}
