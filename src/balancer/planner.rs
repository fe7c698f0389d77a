//! Migration planning: where to move from, where to move to, and what
//!
//! The planner is pure: it only reads the cycle snapshot. Because the
//! snapshot is fixed for the duration of a cycle, one evaluation is
//! definitive; if it finds nothing to do, re-running it would find the
//! same nothing.

use tracing::{debug, info};

use super::deviation::max_abs_deviation_percent;
use super::snapshot::{Guest, GuestKind, Node, NodeState};

/// A fully planned cycle: one origin, one destination, and candidate guests
/// ranked best-fit-first.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub origin: Node,
    pub destination: Node,
    pub candidates: Vec<Guest>,
}

/// Pick the origin and destination nodes for this cycle.
///
/// Nodes are ordered by ascending deviation. The destination is the first
/// running node below the zero baseline (the most underloaded one able to
/// receive guests); the origin is the node with the highest deviation,
/// whatever its state. `None` when no running node has free headroom.
pub fn select_migration_path(nodes: &[Node]) -> Option<(Node, Node)> {
    if nodes.is_empty() {
        return None;
    }

    let mut sorted: Vec<&Node> = nodes.iter().collect();
    sorted.sort_by(|a, b| a.deviation.total_cmp(&b.deviation));

    let destination = sorted
        .iter()
        .find(|n| n.state == NodeState::Running && n.imbalance_bytes() < 0.0)?;
    let origin = sorted[sorted.len() - 1];

    Some(((*origin).clone(), (*destination).clone()))
}

/// Rank the guests worth moving from `origin` to `destination`.
///
/// The move amount is the smaller of the two nodes' imbalance magnitudes, so
/// the relocation never overshoots either side's correction need. Guests
/// qualify when they are running, live on the origin, and their allocation
/// ceiling fits under the destination's capacity; they are ordered by how close their
/// current usage comes to the move amount, with containers penalized by one
/// full move amount because a restart move is more disruptive than a live
/// one.
pub fn rank_migration_candidates(
    origin: &Node,
    destination: &Node,
    guests: &[Guest],
) -> Vec<Guest> {
    let move_amount = origin
        .imbalance_bytes()
        .abs()
        .min(destination.imbalance_bytes().abs());
    debug!(
        "orig = {} dest = {} mem = {}",
        origin.name, destination.name, move_amount
    );

    let mut candidates: Vec<Guest> = guests
        .iter()
        .filter(|g| g.running && g.node == origin.name && g.maxmem < destination.maxmem)
        .cloned()
        .collect();

    candidates.sort_by(|a, b| {
        fit_penalty(a, move_amount).total_cmp(&fit_penalty(b, move_amount))
    });

    debug!(
        "host {} offers {} movable guests",
        origin.name,
        candidates.len()
    );
    candidates
}

fn fit_penalty(guest: &Guest, move_amount: f64) -> f64 {
    let fit = (guest.mem as f64 - move_amount).abs();
    match guest.kind {
        GuestKind::Container => fit + move_amount,
        GuestKind::Vm => fit,
    }
}

/// Evaluate one cycle's snapshot and decide whether to act.
///
/// Deviations must already be computed. Returns `None` when the imbalance is
/// below the threshold, no destination qualifies, or no guest fits; all of
/// those are normal no-op outcomes, not errors.
pub fn plan_cycle(nodes: &[Node], guests: &[Guest], threshold_percent: f64) -> Option<MigrationPlan> {
    let max_deviation = max_abs_deviation_percent(nodes);
    if max_deviation < threshold_percent {
        info!(
            "no deviation greater than {}% found on any node, skipping",
            threshold_percent
        );
        return None;
    }

    let Some((origin, destination)) = select_migration_path(nodes) else {
        info!("no running node with free headroom, skipping");
        return None;
    };

    let candidates = rank_migration_candidates(&origin, &destination, guests);
    if candidates.is_empty() {
        info!(
            "no guest on {} fits on {}, skipping",
            origin.name, destination.name
        );
        return None;
    }

    Some(MigrationPlan {
        origin,
        destination,
        candidates,
    })
}
