//! Discovery ledger.
//!
//! Per-episode knowledge: which nodes and properties the attacker has
//! observed, which credentials and partial profiles it has gathered, and the
//! attempt history used to deduplicate one-time bonuses and detect repeats.
//! Created fresh at episode reset, discarded at the next one — nothing here
//! persists across episodes. Discovery is monotone within an episode: no
//! entry is ever removed, only added to.

use std::collections::{HashMap, HashSet};

use crate::clock::Timestamp;
use crate::profile::Profile;
use crate::world::{CredentialId, NodeId, Precondition, Privilege, PropertyIndex, VulnerabilityId, World};

/// `(VulnID, local?, Precondition, success?)` — the repeat key used to
/// deduplicate bonuses across reimagings (glossary: "Repeat key").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttackKey {
    pub vuln: VulnerabilityId,
    pub local: bool,
    pub precondition: Precondition,
    pub success: bool,
}

#[derive(Debug, Clone, Default)]
pub struct NodeLedger {
    pub discovered_properties: HashSet<PropertyIndex>,
    pub last_attack: HashMap<AttackKey, Timestamp>,
    pub last_owned_at: Option<Timestamp>,
}

#[derive(Debug, Clone)]
pub struct DiscoveryLedger {
    nodes: HashMap<NodeId, NodeLedger>,
    pub gathered_credentials: HashSet<CredentialId>,
    pub gathered_profiles: Vec<Profile>,
    pub ip_local_unlocked: bool,
}

impl Default for DiscoveryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryLedger {
    pub fn new() -> Self {
        DiscoveryLedger {
            nodes: HashMap::new(),
            gathered_credentials: HashSet::new(),
            // Every episode starts with the singleton anonymous identity
            // (glossary: `ip.local` / `username.NoAuth`).
            gathered_profiles: vec![Profile::anonymous()],
            ip_local_unlocked: false,
        }
    }

    pub fn is_discovered(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ledger(&self, id: &str) -> Option<&NodeLedger> {
        self.nodes.get(id)
    }

    pub fn discovered_node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Idempotent: on first discovery, seed discovered properties with
    /// `global_properties ∪ (initial_properties ∩ N.properties)` and return
    /// the number of newly-added property indices. Re-entry is a no-op.
    pub fn mark_node_discovered(&mut self, world: &World, id: &str) -> usize {
        if self.nodes.contains_key(id) {
            return 0;
        }
        let mut seeded = world.global_properties.clone();
        if let Some(node) = world.node(id) {
            for p in &world.initial_properties {
                if node.properties.contains(p) {
                    seeded.insert(*p);
                }
            }
        }
        let count = seeded.len();
        self.nodes.insert(
            id.to_string(),
            NodeLedger {
                discovered_properties: seeded,
                ..Default::default()
            },
        );
        count
    }

    /// Add `props` to `N`'s discovered set (idempotent per-property),
    /// returning how many were newly added.
    pub fn add_discovered_properties(
        &mut self,
        id: &str,
        props: impl IntoIterator<Item = PropertyIndex>,
    ) -> usize {
        let entry = self.nodes.entry(id.to_string()).or_default();
        let mut added = 0;
        for p in props {
            if entry.discovered_properties.insert(p) {
                added += 1;
            }
        }
        added
    }

    /// Mark `id` owned at `privilege`: installs the agent, escalates
    /// privilege monotonically, seeds discovery if needed, stamps
    /// `last_owned_at`, and adds every ground-truth property to the
    /// discovered set. Returns `(previous_last_owned_at, was_currently_owned)`.
    pub fn mark_node_owned(
        &mut self,
        world: &World,
        id: &str,
        privilege: Privilege,
        now: Timestamp,
    ) -> (Option<Timestamp>, bool) {
        let was_owned = self.is_currently_owned(world, id);
        self.mark_node_discovered(world, id);
        if let Some(node) = world.node(id) {
            let all_props: Vec<PropertyIndex> = node.properties.iter().copied().collect();
            self.add_discovered_properties(id, all_props);
        }
        let entry = self.nodes.entry(id.to_string()).or_default();
        let previous = entry.last_owned_at;
        entry.last_owned_at = Some(now);
        (previous, was_owned)
    }

    /// `last_owned_at ≥ last_reimaging` (or no reimaging yet) defines
    /// "currently owned".
    pub fn is_currently_owned(&self, world: &World, id: &str) -> bool {
        let Some(entry) = self.nodes.get(id) else {
            return false;
        };
        let Some(last_owned_at) = entry.last_owned_at else {
            return false;
        };
        match world.node(id).and_then(|n| n.last_reimaging) {
            Some(last_reimaging) => last_owned_at >= last_reimaging,
            None => true,
        }
    }

    pub fn record_attack(&mut self, node: &str, key: AttackKey, now: Timestamp) {
        self.nodes.entry(node.to_string()).or_default().last_attack.insert(key, now);
    }

    /// The timestamp of a prior attempt at `key`, if any.
    pub fn last_attack_at(&self, node: &str, key: &AttackKey) -> Option<Timestamp> {
        self.nodes.get(node).and_then(|n| n.last_attack.get(key)).copied()
    }

    pub fn add_gathered_credential(&mut self, credential: impl Into<String>) -> bool {
        self.gathered_credentials.insert(credential.into())
    }

    /// Append a new profile or merge into the existing one sharing the same
    /// username. Returns the number of newly-filled atomic fields (reward
    /// accounting), matching [`crate::profile::Profile::merge`]'s contract.
    /// A profile with no username (e.g. a bare `ip.local` leak) carries no
    /// identity to dedupe or merge against, so it is dropped: no append, no
    /// newly-filled count.
    pub fn add_or_merge_profile(&mut self, incoming: Profile) -> usize {
        let Some(username) = &incoming.username else {
            return 0;
        };
        if let Some(existing) =
            self.gathered_profiles.iter_mut().find(|p| p.username.as_deref() == Some(username.as_str()))
        {
            return existing.merge(&incoming);
        }
        let filled = incoming.profile_symbols().len();
        self.gathered_profiles.push(incoming);
        filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::Node;

    fn small_world() -> World {
        let mut world = World::new(vec!["has_webcam".to_string(), "is_patched".to_string()]);
        world.global_properties.insert(0); // has_webcam visible everywhere once observed
        world.initial_properties.insert(1); // is_patched auto-discovered on owned nodes
        let mut n1 = Node::new("n1");
        n1.properties.insert(1);
        world.add_node(n1);
        world
    }

    #[test]
    fn mark_node_discovered_is_idempotent() {
        let world = small_world();
        let mut ledger = DiscoveryLedger::new();
        let first = ledger.mark_node_discovered(&world, "n1");
        let second = ledger.mark_node_discovered(&world, "n1");
        assert_eq!(first, 2); // global (has_webcam) + initial-on-node (is_patched)
        assert_eq!(second, 0);
        assert!(ledger.is_discovered("n1"));
    }

    #[test]
    fn currently_owned_respects_reimaging() {
        let mut world = small_world();
        let mut ledger = DiscoveryLedger::new();
        ledger.mark_node_owned(&world, "n1", Privilege::LocalUser, 10);
        assert!(ledger.is_currently_owned(&world, "n1"));

        world.node_mut("n1").unwrap().last_reimaging = Some(20);
        assert!(!ledger.is_currently_owned(&world, "n1"));

        ledger.mark_node_owned(&world, "n1", Privilege::LocalUser, 25);
        assert!(ledger.is_currently_owned(&world, "n1"));
    }

    #[test]
    fn profile_merge_via_ledger() {
        let mut ledger = DiscoveryLedger::new();
        let filled = ledger.add_or_merge_profile(Profile {
            username: Some("NoAuth".to_string()),
            ip: Some("local".to_string()),
            ..Default::default()
        });
        // Merged into the pre-seeded anonymous profile: only `ip` is new.
        assert_eq!(filled, 1);
        assert_eq!(ledger.gathered_profiles.len(), 1);
    }
}
