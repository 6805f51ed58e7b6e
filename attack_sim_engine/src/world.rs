//! World model.
//!
//! The `World` is a directed graph of [`Node`]s plus a global vulnerability
//! library. It is built once by an external loader and is immutable in
//! shape (node identities, service topology) for the duration of an episode;
//! only node *state* (status, privilege, properties, firewall, services) is
//! mutated, by the kernel and the defender surface.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::expr::Expr;

pub type NodeId = String;
pub type PropertyName = String;
pub type PropertyIndex = usize;
pub type VulnerabilityId = String;
pub type CredentialId = String;
pub type PortName = String;

/// A parsed precondition formula. Newtype over [`Expr`] so it can serve as
/// part of the discovery ledger's repeat key (see
/// [`crate::ledger::AttackKey`]) while keeping the expression machinery in
/// `expr.rs` generic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Precondition(pub Expr);

impl std::fmt::Display for Precondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Precondition {
    pub fn parse(s: &str) -> Result<Self, crate::expr::ExprParseError> {
        Ok(Precondition(crate::expr::parse(s)?))
    }

    pub fn symbols(&self) -> HashSet<String> {
        self.0.symbols()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    Running,
    Imaging,
    Stopped,
}

/// Strict partial order over privilege levels: privilege only escalates
/// within an episode, except across a reimage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Privilege {
    NoAccess,
    LocalUser,
    Admin,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Allow,
    Block,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub port: PortName,
    pub permission: Permission,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Firewall {
    pub incoming: Vec<FirewallRule>,
    pub outgoing: Vec<FirewallRule>,
}

impl Firewall {
    /// First matching rule decides; no match ⇒ BLOCK.
    fn verdict(rules: &[FirewallRule], port: &str) -> Permission {
        rules
            .iter()
            .find(|r| r.port == port)
            .map(|r| r.permission)
            .unwrap_or(Permission::Block)
    }

    pub fn allows_incoming(&self, port: &str) -> bool {
        Self::verdict(&self.incoming, port) == Permission::Allow
    }

    pub fn allows_outgoing(&self, port: &str) -> bool {
        Self::verdict(&self.outgoing, port) == Permission::Allow
    }

    /// Patch the first matching rule, or append a new one.
    fn override_rule(rules: &mut Vec<FirewallRule>, port: &str, permission: Permission) {
        if let Some(rule) = rules.iter_mut().find(|r| r.port == port) {
            rule.permission = permission;
        } else {
            rules.push(FirewallRule {
                port: port.to_string(),
                permission,
                reason: "defender override".to_string(),
            });
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: PortName,
    pub running: bool,
    pub allowed_credentials: HashSet<CredentialId>,
    pub sla_weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VulnType {
    Local,
    Remote,
}

/// One candidate branch of a vulnerability: a precondition, the outcome it
/// produces when the precondition is satisfied, and the human-readable
/// reward string surfaced to callers/logs. Parallel precondition/outcome/
/// reward-string lists are modelled as a `Vec<Branch>` rather than
/// three parallel arrays — see DESIGN.md.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub precondition: Precondition,
    pub outcome: crate::outcome::Outcome,
    pub reward_string: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vulnerability {
    pub id: VulnerabilityId,
    pub vuln_type: VulnType,
    pub cost: f64,
    pub branches: Vec<Branch>,
}

impl Vulnerability {
    pub fn scalar(
        id: impl Into<String>,
        vuln_type: VulnType,
        cost: f64,
        precondition: &str,
        outcome: crate::outcome::Outcome,
        reward_string: impl Into<String>,
    ) -> Result<Self, crate::expr::ExprParseError> {
        Ok(Vulnerability {
            id: id.into(),
            vuln_type,
            cost,
            branches: vec![Branch {
                precondition: Precondition::parse(precondition)?,
                outcome,
                reward_string: reward_string.into(),
            }],
        })
    }

    /// A vulnerability with several candidate branches, evaluated in order
    /// by the kernel's branch-selection pipeline (ties between equally
    /// scored branches are broken by the kernel's injected RNG).
    pub fn multi_branch(
        id: impl Into<String>,
        vuln_type: VulnType,
        cost: f64,
        branches: Vec<(&str, crate::outcome::Outcome, &str)>,
    ) -> Result<Self, crate::expr::ExprParseError> {
        let branches = branches
            .into_iter()
            .map(|(precondition, outcome, reward_string)| {
                Ok(Branch {
                    precondition: Precondition::parse(precondition)?,
                    outcome,
                    reward_string: reward_string.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Vulnerability { id: id.into(), vuln_type, cost, branches })
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub status: NodeStatus,
    pub privilege: Privilege,
    pub value: i64,
    pub agent_installed: bool,
    pub properties: HashSet<PropertyIndex>,
    pub services: Vec<Service>,
    pub firewall: Firewall,
    pub vulnerabilities: HashMap<VulnerabilityId, Vulnerability>,
    pub last_reimaging: Option<crate::clock::Timestamp>,
    pub reimagable: bool,
    pub owned_string: Option<String>,
    pub sla_weight: f64,
}

impl Node {
    pub fn new(id: impl Into<String>) -> Self {
        Node {
            id: id.into(),
            status: NodeStatus::Running,
            privilege: Privilege::NoAccess,
            value: 0,
            agent_installed: false,
            properties: HashSet::new(),
            services: Vec::new(),
            firewall: Firewall::default(),
            vulnerabilities: HashMap::new(),
            last_reimaging: None,
            reimagable: true,
            owned_string: None,
            sla_weight: 1.0,
        }
    }

    pub fn service(&self, port: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == port)
    }

    fn service_mut(&mut self, port: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name == port)
    }
}

/// `KNOWS < REMOTE_EXPLOIT < LATERAL_MOVE`; annotating an edge takes the max
/// of the existing and new annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeAnnotation {
    Knows = 0,
    RemoteExploit = 1,
    LateralMove = 2,
}

#[derive(Debug, Clone)]
pub struct World {
    /// Full property vocabulary, in declaration order.
    properties: Vec<PropertyName>,
    property_index: HashMap<PropertyName, PropertyIndex>,
    /// Properties auto-discovered on owned nodes at genesis.
    pub initial_properties: HashSet<PropertyIndex>,
    /// Properties visible on every discovered node once observed anywhere.
    pub global_properties: HashSet<PropertyIndex>,
    nodes: HashMap<NodeId, Node>,
    vulnerability_library: HashMap<VulnerabilityId, Vulnerability>,
    edges: HashMap<(NodeId, NodeId), EdgeAnnotation>,
}

impl World {
    pub fn new(properties: Vec<PropertyName>) -> Self {
        let property_index = properties
            .iter()
            .enumerate()
            .map(|(i, p)| (p.clone(), i))
            .collect();
        World {
            properties,
            property_index,
            initial_properties: HashSet::new(),
            global_properties: HashSet::new(),
            nodes: HashMap::new(),
            vulnerability_library: HashMap::new(),
            edges: HashMap::new(),
        }
    }

    pub fn property_index(&self, name: &str) -> Option<PropertyIndex> {
        self.property_index.get(name).copied()
    }

    pub fn property_name(&self, idx: PropertyIndex) -> Option<&str> {
        self.properties.get(idx).map(|s| s.as_str())
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn add_global_vulnerability(&mut self, vuln: Vulnerability) {
        self.vulnerability_library.insert(vuln.id.clone(), vuln);
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.nodes.keys()
    }

    /// Resolve a vulnerability for `node`, preferring the per-node entry
    /// over the global library (per-node entries shadow globals).
    pub fn resolve_vulnerability(&self, node: &str, vuln: &str) -> Option<&Vulnerability> {
        self.nodes
            .get(node)
            .and_then(|n| n.vulnerabilities.get(vuln))
            .or_else(|| self.vulnerability_library.get(vuln))
    }

    pub fn edge_annotation(&self, src: &str, dst: &str) -> Option<EdgeAnnotation> {
        self.edges.get(&(src.to_string(), dst.to_string())).copied()
    }

    /// Annotate `src -> dst` with `ann`, taking the max of the existing and
    /// new annotation.
    pub fn annotate_edge(&mut self, src: &str, dst: &str, ann: EdgeAnnotation) {
        let key = (src.to_string(), dst.to_string());
        self.edges
            .entry(key)
            .and_modify(|existing| *existing = (*existing).max(ann))
            .or_insert(ann);
    }

    pub fn override_firewall_rule(
        &mut self,
        node: &str,
        port: &str,
        incoming: bool,
        permission: Permission,
    ) -> Result<(), EngineError> {
        let node = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| EngineError::UnknownNode(node.to_string()))?;
        let rules = if incoming {
            &mut node.firewall.incoming
        } else {
            &mut node.firewall.outgoing
        };
        Firewall::override_rule(rules, port, permission);
        Ok(())
    }

    pub fn set_service_running(
        &mut self,
        node: &str,
        port: &str,
        running: bool,
    ) -> Result<(), EngineError> {
        let n = self
            .nodes
            .get_mut(node)
            .ok_or_else(|| EngineError::UnknownNode(node.to_string()))?;
        if n.status != NodeStatus::Running {
            return Ok(());
        }
        let svc = n
            .service_mut(port)
            .ok_or_else(|| EngineError::UnknownService(port.to_string(), node.to_string()))?;
        svc.running = running;
        Ok(())
    }
}
