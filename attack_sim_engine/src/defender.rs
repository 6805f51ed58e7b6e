//! Defender surface.
//!
//! Everything a network operator (or an automated blue-team policy) can do
//! to `World` state between attacker steps: reimaging compromised nodes,
//! toggling services, and patching firewall rules. [`Defender`] carries the
//! reimaging countdown map since that state belongs to the defender's
//! decision cadence, not to the world's static shape or the attacker's
//! discovery ledger.

use std::collections::HashMap;

use tracing::info;

use crate::error::EngineError;
use crate::world::{NodeId, NodeStatus, Permission, World};

#[derive(Debug, Clone, Default)]
pub struct Defender {
    /// Remaining steps until a node currently `Imaging` returns to
    /// `Running`.
    reimaging_countdown: HashMap<NodeId, u32>,
    pub network_availability: f64,
}

impl Defender {
    pub fn new() -> Self {
        Defender { reimaging_countdown: HashMap::new(), network_availability: 1.0 }
    }

    /// Reimage `node`: wipes the attacker's foothold and puts the node into
    /// the reimaging countdown. Requires `reimagable`.
    pub fn reimage_node(
        &mut self,
        world: &mut World,
        node: &str,
        now: crate::clock::Timestamp,
        duration: u32,
    ) -> Result<(), EngineError> {
        let n = world.node_mut(node).ok_or_else(|| EngineError::UnknownNode(node.to_string()))?;
        if !n.reimagable {
            return Err(EngineError::NotReimagable(node.to_string()));
        }
        n.agent_installed = false;
        n.privilege = crate::world::Privilege::NoAccess;
        n.status = NodeStatus::Imaging;
        n.last_reimaging = Some(now);
        self.reimaging_countdown.insert(node.to_string(), duration);
        info!(node, "reimaging started");
        Ok(())
    }

    /// Advance every in-progress reimage by one step, bringing any that hit
    /// zero back to `Running`, then recompute `network_availability`
    /// over every node in `world`.
    pub fn on_attacker_step_taken(&mut self, world: &mut World) {
        let mut finished = Vec::new();
        for (node, remaining) in self.reimaging_countdown.iter_mut() {
            if *remaining > 0 {
                *remaining -= 1;
            } else {
                finished.push(node.clone());
            }
        }
        for node in &finished {
            self.reimaging_countdown.remove(node);
            if let Some(n) = world.node_mut(node) {
                n.status = NodeStatus::Running;
                info!(node = %node, "reimaging complete");
            }
        }

        self.network_availability = Self::compute_network_availability(world);
    }

    /// `Σ w_i · a_i / Σ w_i`, with `a_i = (1 + running_weight) / (1 +
    /// total_weight)` for `Running` nodes and `0` otherwise.
    fn compute_network_availability(world: &World) -> f64 {
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for id in world.node_ids().cloned().collect::<Vec<_>>() {
            let Some(node) = world.node(&id) else { continue };
            weight_total += node.sla_weight;
            let availability = if node.status == NodeStatus::Running {
                let running_weight: f64 = node.services.iter().filter(|s| s.running).map(|s| s.sla_weight).sum();
                let total_weight: f64 = node.services.iter().map(|s| s.sla_weight).sum();
                (1.0 + running_weight) / (1.0 + total_weight)
            } else {
                0.0
            };
            weighted_sum += node.sla_weight * availability;
        }
        if weight_total == 0.0 {
            1.0
        } else {
            weighted_sum / weight_total
        }
    }

    pub fn override_firewall_rule(
        &self,
        world: &mut World,
        node: &str,
        port: &str,
        incoming: bool,
        permission: Permission,
    ) -> Result<(), EngineError> {
        world.override_firewall_rule(node, port, incoming, permission)
    }

    pub fn start_service(&self, world: &mut World, node: &str, port: &str) -> Result<(), EngineError> {
        world.set_service_running(node, port, true)
    }

    pub fn stop_service(&self, world: &mut World, node: &str, port: &str) -> Result<(), EngineError> {
        world.set_service_running(node, port, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Node, Service};

    fn node_with_service(id: &str, running: bool, weight: f64) -> Node {
        let mut n = Node::new(id);
        n.sla_weight = 1.0;
        n.services.push(Service {
            name: "http".to_string(),
            running,
            allowed_credentials: Default::default(),
            sla_weight: weight,
        });
        n
    }

    #[test]
    fn reimaging_returns_node_to_running_after_duration() {
        let mut world = World::new(vec![]);
        world.add_node(Node::new("n1"));
        let mut defender = Defender::new();
        defender.reimage_node(&mut world, "n1", 0, 2).unwrap();
        assert_eq!(world.node("n1").unwrap().status, NodeStatus::Imaging);

        // Countdown checks before it decrements, so duration=2 needs 3 calls
        // (the third sees remaining==0 and transitions) to return to Running.
        defender.on_attacker_step_taken(&mut world);
        assert_eq!(world.node("n1").unwrap().status, NodeStatus::Imaging);
        defender.on_attacker_step_taken(&mut world);
        assert_eq!(world.node("n1").unwrap().status, NodeStatus::Imaging);
        defender.on_attacker_step_taken(&mut world);
        assert_eq!(world.node("n1").unwrap().status, NodeStatus::Running);
    }

    #[test]
    fn network_availability_drops_for_stopped_services() {
        let mut world = World::new(vec![]);
        world.add_node(node_with_service("n1", true, 1.0));
        world.add_node(node_with_service("n2", false, 1.0));
        let mut defender = Defender::new();
        defender.on_attacker_step_taken(&mut world);
        assert!(defender.network_availability < 1.0);
        assert!(defender.network_availability > 0.0);
    }

    #[test]
    fn reimage_rejects_non_reimagable_node() {
        let mut world = World::new(vec![]);
        let mut n = Node::new("n1");
        n.reimagable = false;
        world.add_node(n);
        let mut defender = Defender::new();
        let result = defender.reimage_node(&mut world, "n1", 0, 15);
        assert!(matches!(result, Err(EngineError::NotReimagable(_))));
    }
}
