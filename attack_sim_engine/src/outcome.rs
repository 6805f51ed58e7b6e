//! Outcome variants.
//!
//! A closed tagged union — every kind of effect a successful (or
//! deliberately deceptive) vulnerability branch can produce. Modelled as an
//! enum rather than runtime type tests so the kernel's match arms are
//! exhaustive and the compiler flags any new variant left unhandled.

use serde::{Deserialize, Serialize};

use crate::world::{CredentialId, NodeId, Privilege, PropertyName};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeakedCredential {
    pub node: NodeId,
    pub credential: CredentialId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    LeakedCredentials(Vec<LeakedCredential>),
    LeakedNodesId(Vec<NodeId>),
    /// Each string is a `"k.v&k.v..."` profile rendering, per the grammar in
    /// [`crate::profile::Profile::render`].
    LeakedProfiles(Vec<String>),
    LateralMove,
    PrivilegeEscalation { tag: String, level: Privilege },
    CustomerData { reward: f64 },
    ProbeSucceeded { discovered_properties: Vec<PropertyName> },
    ExploitFailed { cost: Option<f64>, deception: bool },
    DetectionPoint,
}
