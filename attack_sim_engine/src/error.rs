//! Error taxonomy for the attack-simulation engine.
//!
//! Mirrors the shape `network_security_agent::SecurityAgentError` uses in the
//! wider workspace: one `thiserror` variant per structural-failure class, with
//! a `#[error("...: {0}")]` message carrying the offending identifier. The
//! kernel's [`ErrorMode`] decides whether these ever reach a caller as `Err`
//! or are downgraded to a penalised [`crate::kernel::ActionResult`].

use thiserror::Error;

use crate::world::{CredentialId, NodeId, PortName, VulnType, VulnerabilityId};

/// Structural-misuse errors raised by the kernel.
///
/// These are never raised for *gameplay* failures (wrong profile, blocked
/// firewall, wrong credential, ...) — those are always reward-bearing
/// [`crate::kernel::ActionResult`]s. They are raised only for misuse that no
/// well-behaved agent could produce from the observation it was given.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("unknown vulnerability {0} on node {1}")]
    UnknownVulnerability(VulnerabilityId, NodeId),

    #[error("unknown credential: {0}")]
    UnknownCredential(CredentialId),

    #[error("node not owned (no agent installed): {0}")]
    SourceNotOwned(NodeId),

    #[error("node not discovered: {0}")]
    NodeNotDiscovered(NodeId),

    #[error("vulnerability type mismatch on {vuln}: expected {expected:?}, found {found:?}")]
    VulnerabilityTypeMismatch {
        vuln: VulnerabilityId,
        expected: VulnType,
        found: VulnType,
    },

    #[error("precondition/outcome/reward-string arity mismatch for vulnerability {0}")]
    ArityMismatch(VulnerabilityId),

    #[error("node not reimagable: {0}")]
    NotReimagable(NodeId),

    #[error("unknown service port {0} on node {1}")]
    UnknownService(PortName, NodeId),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

/// Controls how structural misuse is surfaced.
///
/// `Strict` raises [`EngineError`]; `Lenient` converts the same misuse into a
/// negative-reward [`crate::kernel::ActionResult`] (`INVALID_ACTION` or
/// `SUSPICIOUSNESS`) so a training loop never has to handle exceptions from
/// its own policy's bad actions. `InvariantViolation` is never downgraded in
/// either mode: it signals a kernel bug, not caller misuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    Strict,
    Lenient,
}

impl Default for ErrorMode {
    fn default() -> Self {
        ErrorMode::Lenient
    }
}
