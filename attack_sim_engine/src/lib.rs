//! Attack Simulation Engine
//!
//! A deterministic reinforcement-learning kernel for cyber-range attack
//! simulation: a graph-shaped network ([`world::World`]), an attacker's
//! per-episode knowledge ([`ledger::DiscoveryLedger`]), an action-resolution
//! kernel that scores and resolves local exploits, remote exploits, and
//! authenticated lateral movement ([`kernel::Kernel`]), and a defender
//! surface for reimaging and service/firewall management
//! ([`defender::Defender`]).
//!
//! # Design
//!
//! The kernel is a pure state transformer: `(world, ledger, action, now) ->
//! (world', ledger', result)`. It never reads a wall clock and never retries
//! on its own — the caller drives the episode loop, supplies a monotonic
//! step counter as `now`, and owns the RNG seed that makes branch
//! tie-breaking reproducible.
//!
//! # Example
//!
//! ```no_run
//! use attack_sim_engine::config::RewardTable;
//! use attack_sim_engine::error::ErrorMode;
//! use attack_sim_engine::kernel::Kernel;
//! use attack_sim_engine::ledger::DiscoveryLedger;
//! use attack_sim_engine::world::World;
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//!
//! let world = World::new(vec![]);
//! let mut ledger = DiscoveryLedger::new();
//! let mut kernel = Kernel::new(RewardTable::default(), ErrorMode::Lenient, StdRng::seed_from_u64(0));
//! let _ = (&world, &mut ledger, &mut kernel);
//! ```

pub mod clock;
pub mod config;
pub mod defender;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod ledger;
pub mod outcome;
pub mod profile;
pub mod world;

pub use clock::Timestamp;
pub use config::RewardTable;
pub use defender::Defender;
pub use error::{EngineError, ErrorMode};
pub use expr::{Expr, ExprParseError};
pub use kernel::{Action, ActionResult, EpisodeSummary, ErrorType, Kernel, WinCondition};
pub use ledger::{AttackKey, DiscoveryLedger, NodeLedger};
pub use outcome::{LeakedCredential, Outcome};
pub use profile::Profile;
pub use world::{
    EdgeAnnotation, Firewall, FirewallRule, Node, NodeStatus, Permission, Precondition, Privilege,
    Service, Vulnerability, VulnType, World,
};
