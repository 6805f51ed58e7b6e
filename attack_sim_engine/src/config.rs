//! Tunable constants, externalised the way `config_manager` externalises its
//! settings: a plain `Serialize`/`Deserialize` struct with sensible defaults,
//! so a caller (e.g. a curriculum-learning harness) can override individual
//! values without touching kernel code.

use serde::{Deserialize, Serialize};

/// Every reward/penalty constant the kernel accounts for, plus the one non-reward
/// tunable (`reimaging_duration`). Constructed once at world/kernel
/// construction and treated as immutable for the rest of the episode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    pub suspiciousness: f64,
    pub repeat: f64,
    pub local_exploit_failed: f64,
    pub failed_remote_exploit: f64,
    pub scanning_unopen_port: f64,
    pub wrong_password: f64,
    pub blocked_by_local_firewall: f64,
    pub blocked_by_remote_firewall: f64,
    pub machine_not_running: f64,
    pub invalid_action: f64,
    pub no_vpn: f64,
    pub deception_penalty_for_agent: f64,

    pub new_successful_attack: f64,
    pub node_discovered: f64,
    pub credential_discovered: f64,
    pub property_discovered: f64,
    pub profile_discovered: f64,
    pub ip_change_to_ip_local: f64,
    pub ssrf: f64,
    pub winning: f64,

    pub reimaging_duration: u32,
}

impl Default for RewardTable {
    fn default() -> Self {
        RewardTable {
            suspiciousness: -50.0,
            repeat: -20.0,
            local_exploit_failed: -20.0,
            failed_remote_exploit: -30.0,
            scanning_unopen_port: -10.0,
            wrong_password: -10.0,
            blocked_by_local_firewall: -10.0,
            blocked_by_remote_firewall: -10.0,
            machine_not_running: 0.0,
            invalid_action: -5.0,
            no_vpn: -40.0,
            deception_penalty_for_agent: 0.0,

            new_successful_attack: 15.0,
            node_discovered: 3.0,
            credential_discovered: 3.0,
            property_discovered: 2.0,
            profile_discovered: 3.0,
            ip_change_to_ip_local: 10.0,
            ssrf: 15.0,
            winning: 100.0,

            reimaging_duration: 15,
        }
    }
}
