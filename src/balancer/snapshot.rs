//! Cycle-local view of the cluster
//!
//! Nodes and guests are fetched once at the start of a balancing cycle and
//! discarded at the end of it. Nothing in here is persisted; the deviation
//! field is recomputed from scratch every cycle.

use std::fmt;

/// Operational state of a node, set by the operator through a description
/// annotation. A node without a parsable annotation is `Ignore` and never
/// reaches the balancing engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Normal operation: counts toward the average and may receive guests.
    Running,
    /// Keeps its current guests but must not receive new ones.
    Cordon,
    /// Being emptied of all guests (not acted on by this balancer).
    Drain,
    /// Excluded from every computation.
    Ignore,
}

impl NodeState {
    /// Parse the annotation value. Unknown strings are `None` so the caller
    /// can distinguish "invalid" from an explicit `IGNORE`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(NodeState::Running),
            "CORDON" => Some(NodeState::Cordon),
            "DRAIN" => Some(NodeState::Drain),
            "IGNORE" => Some(NodeState::Ignore),
            _ => None,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Running => "RUNNING",
            NodeState::Cordon => "CORDON",
            NodeState::Drain => "DRAIN",
            NodeState::Ignore => "IGNORE",
        };
        f.write_str(s)
    }
}

/// Whether the balancer is allowed to touch a guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestState {
    Managed,
    Ignored,
}

impl GuestState {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MANAGED" => Some(GuestState::Managed),
            "IGNORED" => Some(GuestState::Ignored),
            _ => None,
        }
    }
}

/// Guest kind as Proxmox reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    /// QEMU virtual machine; live-migrates and arrives paused.
    Vm,
    /// LXC container; relocates with a restart.
    Container,
}

impl GuestKind {
    /// The resource type string used in API paths (`qemu` / `lxc`).
    pub fn api_type(&self) -> &'static str {
        match self {
            GuestKind::Vm => "qemu",
            GuestKind::Container => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_type())
    }
}

/// One hypervisor host, as seen at the start of a cycle.
#[derive(Debug, Clone)]
pub struct Node {
    /// Node name, unique and stable across cycles.
    pub name: String,
    /// Total memory in bytes.
    pub maxmem: u64,
    /// Memory currently in use, bytes.
    pub mem: u64,
    /// Core count.
    pub maxcpu: u32,
    /// CPU usage as a fraction of one core times `maxcpu`.
    pub cpu: f64,
    /// Operator-assigned state; never mutated by the engine.
    pub state: NodeState,
    /// Signed memory-load deviation from the cluster average. Positive means
    /// above average. Derived, valid only within the cycle that computed it.
    pub deviation: f64,
}

impl Node {
    /// Memory load as a fraction of capacity.
    pub fn mem_load(&self) -> f64 {
        self.mem as f64 / self.maxmem as f64
    }

    /// `maxmem * deviation` in bytes: negative when the node has that much
    /// headroom below the average, positive when it carries that much excess.
    pub fn imbalance_bytes(&self) -> f64 {
        self.maxmem as f64 * self.deviation
    }
}

/// One virtual machine or container.
#[derive(Debug, Clone)]
pub struct Guest {
    /// Cluster-wide numeric id.
    pub vmid: u32,
    pub kind: GuestKind,
    /// Name of the node currently hosting the guest. Always a member of the
    /// cycle's non-ignored node set; the client drops guests on unknown or
    /// ignored nodes during the fetch.
    pub node: String,
    /// Current memory usage, bytes.
    pub mem: u64,
    /// Allocated memory ceiling, bytes. This is what must fit on a
    /// destination, not the current usage.
    pub maxmem: u64,
    /// Only running guests are migration candidates.
    pub running: bool,
}

/// Minimal per-guest record from a node's guest listing, used to confirm
/// arrival on the destination after a migration.
#[derive(Debug, Clone)]
pub struct GuestSummary {
    pub vmid: u32,
    pub running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_parse() {
        assert_eq!(NodeState::parse("RUNNING"), Some(NodeState::Running));
        assert_eq!(NodeState::parse("CORDON"), Some(NodeState::Cordon));
        assert_eq!(NodeState::parse("DRAIN"), Some(NodeState::Drain));
        assert_eq!(NodeState::parse("IGNORE"), Some(NodeState::Ignore));
        assert_eq!(NodeState::parse("running"), None);
        assert_eq!(NodeState::parse(""), None);
    }

    #[test]
    fn test_guest_state_parse() {
        assert_eq!(GuestState::parse("MANAGED"), Some(GuestState::Managed));
        assert_eq!(GuestState::parse("IGNORED"), Some(GuestState::Ignored));
        assert_eq!(GuestState::parse("bogus"), None);
    }

    #[test]
    fn test_api_type_strings() {
        assert_eq!(GuestKind::Vm.api_type(), "qemu");
        assert_eq!(GuestKind::Container.api_type(), "lxc");
    }

    #[test]
    fn test_imbalance_bytes_sign() {
        let mut node = Node {
            name: "pve1".to_string(),
            maxmem: 100,
            mem: 10,
            maxcpu: 8,
            cpu: 0.5,
            state: NodeState::Running,
            deviation: -0.4,
        };
        assert_eq!(node.imbalance_bytes(), -40.0);
        node.deviation = 0.4;
        assert_eq!(node.imbalance_bytes(), 40.0);
    }
}
