//! Action-resolution kernel.
//!
//! The three entry points an attacking agent drives: [`Kernel::local_exploit`],
//! [`Kernel::remote_exploit`], and [`Kernel::connect`]. Each is a pure
//! `(world, ledger, action, now) -> (world', ledger', result)` transformer —
//! no hidden clock reads, no interior mutability — so an entire episode is
//! reproducible given the same RNG seed.
//!
//! Local and remote exploits share the bulk of their logic in
//! [`Kernel::outcome_processor`]; only the up-front validation and the
//! implicit profile differ between them (see `local_exploit`'s doc comment).

use std::collections::HashMap;

use rand::RngCore;
use tracing::{debug, info, instrument, warn};

use crate::config::RewardTable;
use crate::error::{EngineError, ErrorMode};
use crate::ledger::{AttackKey, DiscoveryLedger};
use crate::outcome::{LeakedCredential, Outcome};
use crate::profile::Profile;
use crate::world::{
    CredentialId, EdgeAnnotation, NodeId, NodeStatus, Precondition, Privilege, PropertyIndex,
    VulnType, VulnerabilityId, World,
};

pub type Timestamp = crate::clock::Timestamp;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    LocalExploit {
        node: NodeId,
        vuln: VulnerabilityId,
    },
    RemoteExploit {
        source: NodeId,
        target: NodeId,
        profile: Profile,
        vuln: VulnerabilityId,
    },
    Connect {
        source: NodeId,
        target: NodeId,
        port: String,
        credential: CredentialId,
    },
}

/// The classification a branch (or the early-check path) resolved to.
/// `NoError` and `Other` are the two "the branch fired" outcomes;
/// every other variant means the action failed and the ledger was not
/// mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    NoError,
    Other,
    Repeated,
    IpLocalNeeded,
    RolesWrong,
    NoAuth,
    WrongAuth,
    PropertyWrong,
    MachineNotRunning,
    Suspiciousness,
    InvalidAction,
    ScanningUnopenPort,
    BlockedByLocalFirewall,
    BlockedByRemoteFirewall,
    WrongPassword,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub reward: f64,
    pub outcome: Option<Outcome>,
    pub profile: Profile,
    pub precondition: String,
    pub reward_string: String,
    pub error: ErrorType,
    /// Set only when a lenient-mode downgrade swallowed a structural
    /// [`EngineError`] that strict mode would have raised instead.
    pub kernel_error: Option<EngineError>,
}

impl ActionResult {
    fn invalid(reward: f64, error: ErrorType) -> Self {
        ActionResult {
            reward,
            outcome: None,
            profile: Profile::default(),
            precondition: String::new(),
            reward_string: String::new(),
            error,
            kernel_error: None,
        }
    }

    fn downgraded(reward: f64, error: ErrorType, source: EngineError) -> Self {
        ActionResult { kernel_error: Some(source), ..ActionResult::invalid(reward, error) }
    }
}

#[derive(Debug, Clone)]
pub struct EpisodeSummary {
    pub total_reward: f64,
    pub owned_node_count: usize,
    pub discovered_node_count: usize,
}

/// Granted once an owned-node count or other condition the caller cares
/// about is reached; the kernel itself never decides when an episode is
/// "won" — it only pays out the bonus when asked to.
#[derive(Debug, Clone, Copy)]
pub struct WinCondition {
    pub min_owned_nodes: usize,
}

/// A single candidate branch's tentative score, produced by
/// [`Kernel::evaluate_branch`] and compared against its siblings during
/// branch selection.
struct Tentative {
    index: usize,
    error: ErrorType,
    reward: f64,
    outcome: Outcome,
}

pub struct Kernel<R: RngCore> {
    pub rewards: RewardTable,
    pub error_mode: ErrorMode,
    rng: R,
}

impl<R: RngCore> Kernel<R> {
    pub fn new(rewards: RewardTable, error_mode: ErrorMode, rng: R) -> Self {
        Kernel { rewards, error_mode, rng }
    }

    fn invalid_or_raise(&self, err: EngineError, reward: f64) -> Result<ActionResult, EngineError> {
        match self.error_mode {
            ErrorMode::Strict => Err(err),
            ErrorMode::Lenient => {
                warn!(%err, "downgraded to invalid-action penalty");
                Ok(ActionResult::downgraded(reward, ErrorType::InvalidAction, err))
            }
        }
    }

    /// Remote exploit: `source` must be owned, `target` must be
    /// discovered. Delegates to [`Kernel::outcome_processor`] with the
    /// caller-supplied profile.
    #[instrument(skip(self, world, ledger, vuln), fields(source = %source, target = %target, vuln = %vuln))]
    pub fn remote_exploit(
        &mut self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        source: &str,
        target: &str,
        profile: &Profile,
        vuln: &str,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        let Some(src) = world.node(source) else {
            return self.invalid_or_raise(EngineError::UnknownNode(source.to_string()), self.rewards.invalid_action);
        };
        if !src.agent_installed {
            return self.invalid_or_raise(
                EngineError::SourceNotOwned(source.to_string()),
                self.rewards.invalid_action,
            );
        }
        if world.node(target).is_none() {
            return self.invalid_or_raise(EngineError::UnknownNode(target.to_string()), self.rewards.invalid_action);
        }
        if !ledger.is_discovered(target) {
            return self.invalid_or_raise(
                EngineError::NodeNotDiscovered(target.to_string()),
                self.rewards.invalid_action,
            );
        }

        self.outcome_processor(
            world,
            ledger,
            target,
            VulnType::Remote,
            vuln,
            profile,
            false,
            self.rewards.failed_remote_exploit,
            now,
        )
        .map(|mut result| {
            if result.error == ErrorType::NoError {
                world.annotate_edge(source, target, EdgeAnnotation::RemoteExploit);
            }
            result.profile = profile.clone();
            result
        })
    }

    /// Local exploit: no profile accompanies the action. The
    /// original simulator this kernel's semantics are drawn from passes
    /// `profile=None` into the shared outcome processor, which — since an
    /// absent profile has an empty symbol set — makes any branch whose
    /// precondition mentions a profile symbol (`username.*`, `roles.*`,
    /// `id.*`, `ip.*`) unsatisfiable by construction. Local vulnerabilities
    /// are expected to gate on node properties only; we model that here
    /// with `Profile::default()` rather than inventing a synthesized
    /// identity from the ledger's gathered profiles.
    #[instrument(skip(self, world, ledger, vuln), fields(node = %node, vuln = %vuln))]
    pub fn local_exploit(
        &mut self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        node: &str,
        vuln: &str,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        let Some(n) = world.node(node) else {
            return self.invalid_or_raise(EngineError::UnknownNode(node.to_string()), self.rewards.invalid_action);
        };
        if !n.agent_installed {
            return self.invalid_or_raise(
                EngineError::SourceNotOwned(node.to_string()),
                self.rewards.invalid_action,
            );
        }

        let empty_profile = Profile::default();
        self.outcome_processor(
            world,
            ledger,
            node,
            VulnType::Local,
            vuln,
            &empty_profile,
            true,
            self.rewards.local_exploit_failed,
            now,
        )
    }

    /// Authenticated connect: linear validation, first failing
    /// clause wins.
    #[instrument(skip(self, world, ledger, credential), fields(source = %source, target = %target, port = %port))]
    pub fn connect(
        &mut self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        source: &str,
        target: &str,
        port: &str,
        credential: &str,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        let Some(src) = world.node(source) else {
            return self.invalid_or_raise(EngineError::UnknownNode(source.to_string()), self.rewards.invalid_action);
        };
        if !src.agent_installed {
            return self.invalid_or_raise(
                EngineError::SourceNotOwned(source.to_string()),
                self.rewards.invalid_action,
            );
        }
        if world.node(target).is_none() {
            return self.invalid_or_raise(EngineError::UnknownNode(target.to_string()), self.rewards.invalid_action);
        }
        if !ledger.is_discovered(target) {
            return self.invalid_or_raise(
                EngineError::NodeNotDiscovered(target.to_string()),
                self.rewards.invalid_action,
            );
        }
        if !ledger.gathered_credentials.contains(credential) {
            return self.invalid_or_raise(
                EngineError::UnknownCredential(credential.to_string()),
                self.rewards.invalid_action,
            );
        }
        if !src.firewall.allows_outgoing(port) {
            return Ok(ActionResult::invalid(
                self.rewards.blocked_by_local_firewall,
                ErrorType::BlockedByLocalFirewall,
            ));
        }

        let target_node = world.node(target).expect("checked above");
        if !target_node.firewall.allows_incoming(port) {
            return Ok(ActionResult::invalid(
                self.rewards.blocked_by_remote_firewall,
                ErrorType::BlockedByRemoteFirewall,
            ));
        }
        let Some(service) = target_node.service(port) else {
            return Ok(ActionResult::invalid(
                self.rewards.scanning_unopen_port,
                ErrorType::ScanningUnopenPort,
            ));
        };
        if target_node.status != NodeStatus::Running {
            return Ok(ActionResult::invalid(
                self.rewards.machine_not_running,
                ErrorType::MachineNotRunning,
            ));
        }
        if !(service.running && service.allowed_credentials.contains(credential)) {
            return Ok(ActionResult::invalid(self.rewards.wrong_password, ErrorType::WrongPassword));
        }

        if ledger.is_currently_owned(world, target) {
            debug!("connect: lateral move onto already-owned node, repeat penalty");
            return Ok(ActionResult {
                reward: self.rewards.repeat,
                outcome: Some(Outcome::LateralMove),
                profile: Profile::default(),
                precondition: String::new(),
                reward_string: "lateral move (repeat)".to_string(),
                error: ErrorType::Repeated,
                kernel_error: None,
            });
        }

        let value = world.node(target).map(|n| n.value).unwrap_or(0) as f64;
        ledger.mark_node_owned(world, target, Privilege::LocalUser, now);
        world.annotate_edge(source, target, EdgeAnnotation::LateralMove);
        info!(reward = value, "connect: lateral move succeeded");
        Ok(ActionResult {
            reward: value,
            outcome: Some(Outcome::LateralMove),
            profile: Profile::default(),
            precondition: String::new(),
            reward_string: "lateral move".to_string(),
            error: ErrorType::NoError,
            kernel_error: None,
        })
    }

    /// Dispatch an [`Action`] to the matching entry point. A thin match
    /// arm, not an alternate code path: callers that already hold a typed
    /// `Action` (e.g. replaying a recorded trace) don't need to destructure
    /// it themselves.
    pub fn dispatch(
        &mut self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        action: &Action,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        match action {
            Action::LocalExploit { node, vuln } => self.local_exploit(world, ledger, node, vuln, now),
            Action::RemoteExploit { source, target, profile, vuln } => {
                self.remote_exploit(world, ledger, source, target, profile, vuln, now)
            }
            Action::Connect { source, target, port, credential } => {
                self.connect(world, ledger, source, target, port, credential, now)
            }
        }
    }

    /// Shared by local and remote exploits; `local_or_remote` picks
    /// the repeat-key component and which failure penalty feeds dry-run
    /// accounting is not relevant here (that is `failed_penalty`, already
    /// resolved by the caller).
    #[allow(clippy::too_many_arguments)]
    fn outcome_processor(
        &mut self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        node_under_test: &str,
        expected_type: VulnType,
        vuln_id: &str,
        profile: &Profile,
        local_or_remote: bool,
        failed_penalty: f64,
        now: Timestamp,
    ) -> Result<ActionResult, EngineError> {
        let node = world
            .node(node_under_test)
            .ok_or_else(|| EngineError::UnknownNode(node_under_test.to_string()))?;

        if node.status != NodeStatus::Running {
            return Ok(ActionResult::invalid(self.rewards.machine_not_running, ErrorType::MachineNotRunning));
        }

        let Some(vulnerability) = world.resolve_vulnerability(node_under_test, vuln_id) else {
            return match self.error_mode {
                ErrorMode::Strict => Err(EngineError::UnknownVulnerability(
                    vuln_id.to_string(),
                    node_under_test.to_string(),
                )),
                ErrorMode::Lenient => {
                    warn!(vuln = vuln_id, node = node_under_test, "unknown vulnerability downgraded");
                    Ok(ActionResult::invalid(self.rewards.suspiciousness, ErrorType::Suspiciousness))
                }
            };
        };
        if vulnerability.vuln_type != expected_type {
            return Err(EngineError::VulnerabilityTypeMismatch {
                vuln: vuln_id.to_string(),
                expected: expected_type,
                found: vulnerability.vuln_type,
            });
        }
        let vulnerability = vulnerability.clone();
        let cost = vulnerability.cost;

        let discovered_props: std::collections::HashSet<PropertyIndex> = ledger
            .node_ledger(node_under_test)
            .map(|l| l.discovered_properties.clone())
            .unwrap_or_default();

        let mut candidates: Vec<Tentative> = Vec::new();
        for (index, branch) in vulnerability.branches.iter().enumerate() {
            let tentative = self.evaluate_branch(
                world,
                ledger,
                node_under_test,
                profile,
                local_or_remote,
                vuln_id,
                cost,
                failed_penalty,
                &discovered_props,
                index,
                &branch.precondition,
                &branch.outcome,
                now,
            );
            debug!(index, reward = tentative.reward, error = ?tentative.error, "branch evaluated");
            candidates.push(tentative);
        }

        let winner = self.select_winner(candidates);
        let branch = &vulnerability.branches[winner.index];

        if winner.error != ErrorType::NoError && winner.error != ErrorType::Other {
            let mut reward = winner.reward;
            let mut error = winner.error;
            if error != ErrorType::Repeated {
                let failure_key = AttackKey {
                    vuln: vuln_id.to_string(),
                    local: local_or_remote,
                    precondition: branch.precondition.clone(),
                    success: false,
                };
                let reimaged_since = world.node(node_under_test).and_then(|n| n.last_reimaging);
                if let Some(prior) = ledger.last_attack_at(node_under_test, &failure_key) {
                    let stale = reimaged_since.map(|r| prior >= r).unwrap_or(true);
                    if stale {
                        error = ErrorType::Repeated;
                        reward += self.rewards.repeat;
                    }
                }
                ledger.record_attack(node_under_test, failure_key, now);
            }
            return Ok(ActionResult {
                reward,
                outcome: None,
                profile: profile.clone(),
                precondition: branch.precondition.to_string(),
                reward_string: branch.reward_string.clone(),
                error,
                kernel_error: None,
            });
        }

        // Success (or deception) path: commit the mutation.
        let outcome = winner.outcome.clone();
        self.apply_outcome_mutation(world, ledger, node_under_test, &outcome, now);

        #[cfg(debug_assertions)]
        {
            // The dry-run deltas computed before the commit promised exactly
            // these new discoveries; after applying them they must be gone,
            // or the commit and the scoring pass disagree about what the
            // outcome does (a kernel bug, never caller misuse).
            let (dn, dc, dprofiles, dp) =
                self.dry_run_discovery_deltas(world, ledger, node_under_test, &outcome);
            if (dn, dc, dprofiles, dp) != (0, 0, 0, 0) {
                return Err(EngineError::InvariantViolation(format!(
                    "post-commit discovery deltas not zero for {vuln_id} on {node_under_test}: ({dn}, {dc}, {dprofiles}, {dp})"
                )));
            }
        }

        let success_key = AttackKey {
            vuln: vuln_id.to_string(),
            local: local_or_remote,
            precondition: branch.precondition.clone(),
            success: true,
        };
        ledger.record_attack(node_under_test, success_key, now);

        if let Outcome::LeakedProfiles(ref rendered) = outcome {
            if rendered.iter().any(|s| s.contains("ip.local")) && !ledger.ip_local_unlocked {
                ledger.ip_local_unlocked = true;
            }
        }

        info!(reward = winner.reward, outcome = ?outcome, "branch committed");

        Ok(ActionResult {
            reward: winner.reward,
            outcome: Some(outcome),
            profile: profile.clone(),
            precondition: branch.precondition.to_string(),
            reward_string: branch.reward_string.clone(),
            error: winner.error,
            kernel_error: None,
        })
    }

    /// Evaluate one branch's tentative score without mutating anything.
    /// `discovered_props` is the attacker's current
    /// view of `node_under_test`'s properties — ground truth is never
    /// consulted here, only what has actually been discovered.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_branch(
        &self,
        world: &World,
        ledger: &DiscoveryLedger,
        node_under_test: &str,
        profile: &Profile,
        local_or_remote: bool,
        vuln_id: &str,
        cost: f64,
        failed_penalty: f64,
        discovered_props: &std::collections::HashSet<PropertyIndex>,
        index: usize,
        precondition: &Precondition,
        outcome: &Outcome,
        now: Timestamp,
    ) -> Tentative {
        let base = -cost;
        let symbols = precondition.symbols();
        let needs_ip_local = symbols.contains("ip.local");
        let has_ip_local = profile.is_ip_local();

        if needs_ip_local && !has_ip_local {
            return Tentative {
                index,
                error: ErrorType::IpLocalNeeded,
                reward: base + self.rewards.no_vpn,
                outcome: Outcome::ExploitFailed { cost: None, deception: false },
            };
        }

        let profile_symbols = profile.profile_symbols();
        let mut full_bindings: HashMap<String, bool> = HashMap::new();
        let mut lenient_bindings: HashMap<String, bool> = HashMap::new();
        for sym in &symbols {
            if crate::profile::is_profile_symbol(sym) {
                let truth = profile_symbols.contains(sym);
                full_bindings.insert(sym.clone(), truth);
                let lenient_truth = crate::profile::is_role_symbol(sym) || truth;
                lenient_bindings.insert(sym.clone(), lenient_truth);
            } else {
                full_bindings.insert(sym.clone(), true);
                lenient_bindings.insert(sym.clone(), true);
            }
        }

        let full_true = precondition.0.eval(&full_bindings).unwrap_or(false);
        if !full_true {
            let lenient_true = precondition.0.eval(&lenient_bindings).unwrap_or(false);
            let error = if lenient_true {
                ErrorType::RolesWrong
            } else if profile.is_no_auth() {
                ErrorType::NoAuth
            } else {
                ErrorType::WrongAuth
            };
            return Tentative {
                index,
                error,
                reward: base + failed_penalty,
                outcome: Outcome::ExploitFailed { cost: None, deception: false },
            };
        }

        let mut property_bindings = full_bindings.clone();
        for sym in &symbols {
            if !crate::profile::is_profile_symbol(sym) {
                let is_discovered = world
                    .property_index(sym)
                    .map(|idx| discovered_props.contains(&idx))
                    .unwrap_or(false);
                property_bindings.insert(sym.clone(), is_discovered);
            }
        }
        let properties_hold = precondition.0.eval(&property_bindings).unwrap_or(false);
        if !properties_hold {
            return Tentative {
                index,
                error: ErrorType::PropertyWrong,
                reward: base + failed_penalty,
                outcome: Outcome::ExploitFailed { cost: None, deception: false },
            };
        }

        // The branch fires.
        if let Outcome::ExploitFailed { cost: deceptive_cost, deception } = outcome {
            let penalty = deceptive_cost.unwrap_or(self.rewards.failed_remote_exploit.abs());
            return Tentative {
                index,
                error: ErrorType::Other,
                reward: base - penalty,
                outcome: Outcome::ExploitFailed { cost: *deceptive_cost, deception: *deception },
            };
        }

        self.evaluate_success_branch(
            world,
            ledger,
            node_under_test,
            vuln_id,
            local_or_remote,
            precondition,
            outcome,
            base,
            has_ip_local,
            &symbols,
            now,
            index,
        )
    }

    /// Dry-run accounting for a branch that passed every gate: compute the
    /// bonuses a commit *would* add without mutating anything, then check
    /// for a prior successful attempt at the same `(vuln, local?,
    /// precondition)` key to decide between repeat penalty and fresh bonus.
    #[allow(clippy::too_many_arguments)]
    fn evaluate_success_branch(
        &self,
        world: &World,
        ledger: &DiscoveryLedger,
        node_under_test: &str,
        vuln_id: &str,
        local_or_remote: bool,
        precondition: &Precondition,
        outcome: &Outcome,
        base: f64,
        has_ip_local: bool,
        precondition_symbols: &std::collections::HashSet<String>,
        now: Timestamp,
        index: usize,
    ) -> Tentative {
        let mut reward = base;
        let mut ip_local_change = false;

        match outcome {
            Outcome::PrivilegeEscalation { tag, .. } => {
                // Tag membership is checked against ground-truth node
                // properties by name, resolved via the property index.
                let tagged = world
                    .property_index(tag)
                    .zip(world.node(node_under_test))
                    .map(|(idx, n)| n.properties.contains(&idx))
                    .unwrap_or(false);
                if tagged {
                    reward += self.rewards.repeat;
                } else if !ledger.is_currently_owned(world, node_under_test) {
                    reward += world.node(node_under_test).map(|n| n.value as f64).unwrap_or(0.0);
                }
            }
            Outcome::LateralMove => {
                if !ledger.is_currently_owned(world, node_under_test) {
                    reward += world.node(node_under_test).map(|n| n.value as f64).unwrap_or(0.0);
                }
            }
            Outcome::CustomerData { reward: bonus } => {
                reward += bonus;
            }
            Outcome::DetectionPoint => {
                reward += self.rewards.deception_penalty_for_agent;
            }
            Outcome::LeakedProfiles(rendered) => {
                ip_local_change = rendered.iter().any(|s| s.contains("ip.local"));
            }
            _ => {}
        }

        let (delta_nodes, delta_creds, delta_profiles, delta_props) =
            self.dry_run_discovery_deltas(world, ledger, node_under_test, outcome);

        let success_key = AttackKey {
            vuln: vuln_id.to_string(),
            local: local_or_remote,
            precondition: precondition.clone(),
            success: true,
        };
        let reimaged_since = world.node(node_under_test).and_then(|n| n.last_reimaging);
        if let Some(prior) = ledger.last_attack_at(node_under_test, &success_key) {
            let stale = reimaged_since.map(|r| prior >= r).unwrap_or(true);
            if stale {
                return Tentative {
                    index,
                    error: ErrorType::Repeated,
                    reward: self.rewards.repeat + base,
                    outcome: outcome.clone(),
                };
            }
        }
        let _ = now;

        reward += self.rewards.new_successful_attack;
        if ip_local_change && !ledger.ip_local_unlocked {
            reward += self.rewards.ip_change_to_ip_local;
        }
        reward += delta_nodes as f64 * self.rewards.node_discovered;
        reward += delta_creds as f64 * self.rewards.credential_discovered;
        reward += delta_profiles as f64 * self.rewards.profile_discovered;
        reward += delta_props as f64 * self.rewards.property_discovered;
        if has_ip_local && precondition_symbols.contains("ip.local") {
            reward += self.rewards.ssrf;
        }

        Tentative { index, error: ErrorType::NoError, reward, outcome: outcome.clone() }
    }

    /// Counts of newly-discovered nodes/credentials/profiles/properties an
    /// outcome *would* contribute, without mutating the ledger.
    fn dry_run_discovery_deltas(
        &self,
        world: &World,
        ledger: &DiscoveryLedger,
        node_under_test: &str,
        outcome: &Outcome,
    ) -> (usize, usize, usize, usize) {
        match outcome {
            Outcome::LeakedNodesId(ids) => {
                let new_nodes = ids.iter().filter(|id| !ledger.is_discovered(id)).count();
                (new_nodes, 0, 0, 0)
            }
            Outcome::LeakedCredentials(creds) => {
                let new_nodes = creds
                    .iter()
                    .filter(|c| !ledger.is_discovered(&c.node))
                    .map(|c| c.node.clone())
                    .collect::<std::collections::HashSet<_>>()
                    .len();
                let new_creds = creds
                    .iter()
                    .filter(|c| !ledger.gathered_credentials.contains(&c.credential))
                    .count();
                (new_nodes, new_creds, 0, 0)
            }
            Outcome::LeakedProfiles(rendered) => {
                // A profile string with no username (e.g. bare "ip.local") is
                // never appended to gathered_profiles and earns no bonus —
                // it carries no identity to dedupe or merge against.
                let new_profiles = rendered
                    .iter()
                    .filter(|s| {
                        let p = Profile::parse(s);
                        match &p.username {
                            Some(u) => !ledger.gathered_profiles.iter().any(|g| g.username.as_deref() == Some(u)),
                            None => false,
                        }
                    })
                    .count();
                (0, 0, new_profiles, 0)
            }
            Outcome::ProbeSucceeded { discovered_properties } => {
                let entry = ledger.node_ledger(node_under_test);
                let new_props = discovered_properties
                    .iter()
                    .filter(|name| {
                        world
                            .property_index(name)
                            .map(|idx| !entry.map(|e| e.discovered_properties.contains(&idx)).unwrap_or(false))
                            .unwrap_or(false)
                    })
                    .count();
                (0, 0, 0, new_props)
            }
            _ => (0, 0, 0, 0),
        }
    }

    /// Apply a winning branch's real mutation (commit phase). Success-key
    /// recording and `ip_local_unlocked` are handled by
    /// the caller since they also apply to the deception (`Other`) path.
    fn apply_outcome_mutation(
        &self,
        world: &mut World,
        ledger: &mut DiscoveryLedger,
        node_under_test: &str,
        outcome: &Outcome,
        now: Timestamp,
    ) {
        match outcome {
            Outcome::PrivilegeEscalation { tag, level } => {
                let tag_idx = world.property_index(tag);
                let already_tagged = tag_idx
                    .and_then(|idx| world.node(node_under_test).map(|n| n.properties.contains(&idx)))
                    .unwrap_or(false);
                if !already_tagged {
                    ledger.mark_node_owned(world, node_under_test, *level, now);
                    if let Some(node) = world.node_mut(node_under_test) {
                        node.agent_installed = true;
                        if *level > node.privilege {
                            node.privilege = *level;
                        }
                        if let Some(idx) = tag_idx {
                            node.properties.insert(idx);
                        }
                    }
                    ledger.add_discovered_properties(node_under_test, tag_idx);
                }
            }
            Outcome::LateralMove => {
                if !ledger.is_currently_owned(world, node_under_test) {
                    ledger.mark_node_owned(world, node_under_test, Privilege::LocalUser, now);
                    if let Some(node) = world.node_mut(node_under_test) {
                        node.agent_installed = true;
                    }
                }
            }
            Outcome::LeakedNodesId(ids) => {
                for id in ids {
                    ledger.mark_node_discovered(world, id);
                }
            }
            Outcome::LeakedCredentials(creds) => {
                for LeakedCredential { node, credential } in creds {
                    ledger.mark_node_discovered(world, node);
                    ledger.add_gathered_credential(credential.clone());
                    world.annotate_edge(node_under_test, node, EdgeAnnotation::Knows);
                }
            }
            Outcome::LeakedProfiles(rendered) => {
                for s in rendered {
                    ledger.add_or_merge_profile(Profile::parse(s));
                }
            }
            Outcome::ProbeSucceeded { discovered_properties } => {
                let indices: Vec<PropertyIndex> =
                    discovered_properties.iter().filter_map(|name| world.property_index(name)).collect();
                let mut global_indices = Vec::new();
                for idx in &indices {
                    if world.global_properties.contains(idx) {
                        global_indices.push(*idx);
                    }
                }
                ledger.add_discovered_properties(node_under_test, indices);
                if !global_indices.is_empty() {
                    let discovered_ids: Vec<NodeId> = ledger.discovered_node_ids().cloned().collect();
                    for id in discovered_ids {
                        ledger.add_discovered_properties(&id, global_indices.clone());
                    }
                }
            }
            Outcome::CustomerData { .. } | Outcome::DetectionPoint | Outcome::ExploitFailed { .. } => {}
        }
    }

    /// Maximum tentative reward wins; ties break uniformly at random via the
    /// kernel's injected RNG (reproducible under a fixed seed).
    fn select_winner(&mut self, candidates: Vec<Tentative>) -> Tentative {
        let mut best_reward = f64::MIN;
        let mut winners: Vec<usize> = Vec::new();
        for (i, c) in candidates.iter().enumerate() {
            if c.reward > best_reward {
                best_reward = c.reward;
                winners.clear();
                winners.push(i);
            } else if c.reward == best_reward {
                winners.push(i);
            }
        }
        let pick = if winners.len() == 1 {
            winners[0]
        } else {
            winners[(self.rng.next_u32() as usize) % winners.len()]
        };
        candidates.into_iter().nth(pick).expect("at least one branch")
    }

    /// Read-only: local vulnerabilities available on `node`, given what the
    /// agent currently knows.
    pub fn list_local_vulnerabilities<'w>(&self, world: &'w World, node: &str) -> Vec<&'w VulnerabilityId> {
        world
            .node(node)
            .into_iter()
            .flat_map(|n| n.vulnerabilities.values())
            .filter(|v| v.vuln_type == VulnType::Local)
            .map(|v| &v.id)
            .collect()
    }

    /// Read-only: discovered nodes the agent could attempt a remote exploit
    /// against (every discovered node is a legal remote-exploit target;
    /// whether a specific vulnerability fires is decided at resolution
    /// time).
    pub fn list_remote_candidates<'l>(&self, ledger: &'l DiscoveryLedger) -> Vec<&'l NodeId> {
        ledger.discovered_node_ids().collect()
    }

    pub fn list_discovered_credentials<'l>(&self, ledger: &'l DiscoveryLedger) -> Vec<&'l CredentialId> {
        ledger.gathered_credentials.iter().collect()
    }

    pub fn episode_summary(&self, world: &World, ledger: &DiscoveryLedger, total_reward: f64) -> EpisodeSummary {
        let discovered_node_count = ledger.discovered_node_ids().count();
        let owned_node_count = ledger
            .discovered_node_ids()
            .filter(|id| ledger.is_currently_owned(world, id))
            .count();
        EpisodeSummary { total_reward, owned_node_count, discovered_node_count }
    }

    /// Pays the one-time `WINNING` bonus once `condition` is met and hasn't
    /// already been paid (`already_won` is caller-tracked episode state —
    /// the kernel has no notion of episode lifetime beyond one action).
    pub fn maybe_award_win(
        &self,
        ledger: &DiscoveryLedger,
        world: &World,
        condition: WinCondition,
        already_won: bool,
    ) -> Option<f64> {
        if already_won {
            return None;
        }
        let owned = ledger
            .discovered_node_ids()
            .filter(|id| ledger.is_currently_owned(world, id))
            .count();
        if owned >= condition.min_owned_nodes {
            Some(self.rewards.winning)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::world::{Node, VulnType, Vulnerability, World};

    fn kernel_seeded(seed: u64) -> Kernel<StdRng> {
        Kernel::new(RewardTable::default(), ErrorMode::Strict, StdRng::seed_from_u64(seed))
    }

    fn tied_decoy_world() -> World {
        let mut world = World::new(vec!["flag".to_string()]);
        world.initial_properties.insert(0);
        let mut n1 = Node::new("n1");
        n1.agent_installed = true;
        n1.properties.insert(0);
        world.add_node(n1);
        world.add_global_vulnerability(
            Vulnerability::multi_branch(
                "Esc",
                VulnType::Local,
                1.0,
                vec![
                    ("flag", Outcome::ExploitFailed { cost: Some(5.0), deception: true }, "decoy-a"),
                    ("flag", Outcome::ExploitFailed { cost: Some(5.0), deception: true }, "decoy-b"),
                ],
            )
            .unwrap(),
        );
        world
    }

    #[test]
    fn select_winner_breaks_ties_via_rng_across_seeds() {
        let mut seen_branches = HashSet::new();
        let mut seen_rewards = HashSet::new();
        for seed in 0u64..50 {
            let mut world = tied_decoy_world();
            let mut ledger = DiscoveryLedger::new();
            ledger.mark_node_discovered(&world, "n1");
            let mut k = kernel_seeded(seed);
            let result = k.local_exploit(&mut world, &mut ledger, "n1", "Esc", 0).unwrap();
            seen_branches.insert(result.reward_string.clone());
            seen_rewards.insert((result.reward * 1000.0) as i64);
        }
        // Both equally-scored branches are tied, so across enough seeds the
        // RNG tie-break must surface both rather than always favoring index 0.
        assert_eq!(seen_branches, HashSet::from(["decoy-a".to_string(), "decoy-b".to_string()]));
        assert_eq!(seen_rewards.len(), 1, "tied branches must score identically");
    }

    #[test]
    fn dispatch_routes_remote_exploit_action() {
        let mut world = World::new(vec![]);
        let mut attacker = Node::new("attacker");
        attacker.agent_installed = true;
        world.add_node(attacker);
        world.add_node(Node::new("srv"));
        world.add_global_vulnerability(
            Vulnerability::scalar(
                "V",
                VulnType::Remote,
                1.0,
                "username.NoAuth",
                Outcome::LateralMove,
                "anon lateral move",
            )
            .unwrap(),
        );
        let mut ledger = DiscoveryLedger::new();
        ledger.mark_node_discovered(&world, "srv");
        let mut k = kernel_seeded(0);

        let action = Action::RemoteExploit {
            source: "attacker".to_string(),
            target: "srv".to_string(),
            profile: Profile::anonymous(),
            vuln: "V".to_string(),
        };
        let result = k.dispatch(&mut world, &mut ledger, &action, 0).unwrap();
        assert_eq!(result.error, ErrorType::NoError);
        assert!(matches!(result.outcome, Some(Outcome::LateralMove)));
    }

    #[test]
    fn list_helpers_reflect_ledger_and_world_state() {
        let mut world = World::new(vec![]);
        let mut n1 = Node::new("n1");
        n1.vulnerabilities.insert(
            "Local1".to_string(),
            Vulnerability::scalar("Local1", VulnType::Local, 1.0, "username.NoAuth", Outcome::LateralMove, "r")
                .unwrap(),
        );
        world.add_node(n1);
        world.add_node(Node::new("n2"));

        let mut ledger = DiscoveryLedger::new();
        ledger.mark_node_discovered(&world, "n1");
        ledger.mark_node_discovered(&world, "n2");
        ledger.add_gathered_credential("cred1");

        let k = kernel_seeded(0);
        let locals = k.list_local_vulnerabilities(&world, "n1");
        assert_eq!(locals, vec![&"Local1".to_string()]);
        assert!(k.list_local_vulnerabilities(&world, "n2").is_empty());

        let remote_candidates: HashSet<_> = k.list_remote_candidates(&ledger).into_iter().collect();
        assert_eq!(remote_candidates, HashSet::from([&"n1".to_string(), &"n2".to_string()]));

        assert_eq!(k.list_discovered_credentials(&ledger), vec![&"cred1".to_string()]);
    }

    #[test]
    fn episode_summary_counts_discovered_and_owned_nodes() {
        let mut world = World::new(vec![]);
        world.add_node(Node::new("n1"));
        world.add_node(Node::new("n2"));
        let mut ledger = DiscoveryLedger::new();
        ledger.mark_node_discovered(&world, "n1");
        ledger.mark_node_discovered(&world, "n2");
        ledger.mark_node_owned(&world, "n1", Privilege::LocalUser, 0);

        let k = kernel_seeded(0);
        let summary = k.episode_summary(&world, &ledger, 42.0);
        assert_eq!(summary.total_reward, 42.0);
        assert_eq!(summary.discovered_node_count, 2);
        assert_eq!(summary.owned_node_count, 1);
    }

    #[test]
    fn maybe_award_win_pays_once_when_condition_met() {
        let mut world = World::new(vec![]);
        world.add_node(Node::new("n1"));
        let mut ledger = DiscoveryLedger::new();
        ledger.mark_node_discovered(&world, "n1");
        let k = kernel_seeded(0);
        let condition = WinCondition { min_owned_nodes: 1 };

        assert_eq!(k.maybe_award_win(&ledger, &world, condition, false), None);

        ledger.mark_node_owned(&world, "n1", Privilege::LocalUser, 0);
        assert_eq!(k.maybe_award_win(&ledger, &world, condition, false), Some(k.rewards.winning));
        assert_eq!(k.maybe_award_win(&ledger, &world, condition, true), None);
    }
}
