//! End-to-end scenarios, one per concrete example worked through by hand.

use std::collections::HashSet;

use attack_sim_engine::config::RewardTable;
use attack_sim_engine::error::ErrorMode;
use attack_sim_engine::kernel::{ErrorType, Kernel};
use attack_sim_engine::ledger::DiscoveryLedger;
use attack_sim_engine::outcome::Outcome;
use attack_sim_engine::profile::Profile;
use attack_sim_engine::world::{
    FirewallRule, Node, Permission, Service, VulnType, Vulnerability, World,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn kernel() -> Kernel<StdRng> {
    Kernel::new(RewardTable::default(), ErrorMode::Strict, StdRng::seed_from_u64(7))
}

fn owned_attacker(world: &mut World, id: &str) {
    let mut n = Node::new(id);
    n.agent_installed = true;
    world.add_node(n);
}

#[test]
fn scenario_1_anonymous_read() {
    let mut world = World::new(vec![]);
    owned_attacker(&mut world, "attacker");
    let mut srv = Node::new("srv");
    srv.value = 0;
    world.add_node(srv);
    let mut n2 = Node::new("n2");
    n2.value = 5;
    world.add_node(n2);
    world.add_global_vulnerability(
        Vulnerability::scalar(
            "V",
            VulnType::Remote,
            1.0,
            "username.NoAuth",
            Outcome::LeakedNodesId(vec!["n2".to_string()]),
            "anonymous directory listing",
        )
        .unwrap(),
    );

    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");

    let mut k = kernel();
    let result = k
        .remote_exploit(&mut world, &mut ledger, "attacker", "srv", &Profile::anonymous(), "V", 0)
        .unwrap();

    assert_eq!(result.reward, 17.0);
    assert!(matches!(result.outcome, Some(Outcome::LeakedNodesId(ref ids)) if ids == &["n2".to_string()]));
    assert!(ledger.is_discovered("n2"));
    assert_eq!(result.error, ErrorType::NoError);
}

#[test]
fn scenario_2_repeat() {
    let mut world = World::new(vec![]);
    owned_attacker(&mut world, "attacker");
    world.add_node(Node::new("srv"));
    world.add_node(Node::new("n2"));
    world.add_global_vulnerability(
        Vulnerability::scalar(
            "V",
            VulnType::Remote,
            1.0,
            "username.NoAuth",
            Outcome::LeakedNodesId(vec!["n2".to_string()]),
            "anonymous directory listing",
        )
        .unwrap(),
    );
    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");
    let mut k = kernel();

    let first = k
        .remote_exploit(&mut world, &mut ledger, "attacker", "srv", &Profile::anonymous(), "V", 0)
        .unwrap();
    assert_eq!(first.reward, 17.0);

    let second = k
        .remote_exploit(&mut world, &mut ledger, "attacker", "srv", &Profile::anonymous(), "V", 1)
        .unwrap();
    assert_eq!(second.reward, -21.0);
    assert_eq!(second.error, ErrorType::Repeated);
    assert!(second.outcome.is_none());
}

#[test]
fn scenario_3_missing_role() {
    let mut world = World::new(vec![]);
    owned_attacker(&mut world, "attacker");
    world.add_node(Node::new("srv"));
    world.add_global_vulnerability(
        Vulnerability::scalar(
            "V",
            VulnType::Remote,
            1.0,
            "username.alice AND roles.isDoctor",
            Outcome::LateralMove,
            "doctor-only endpoint",
        )
        .unwrap(),
    );
    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");
    let mut k = kernel();

    let profile = Profile { username: Some("alice".to_string()), ..Default::default() };
    let result = k.remote_exploit(&mut world, &mut ledger, "attacker", "srv", &profile, "V", 0).unwrap();

    assert_eq!(result.reward, -31.0);
    assert_eq!(result.error, ErrorType::RolesWrong);
    assert!(result.outcome.is_none());
}

#[test]
fn scenario_4_ssrf_gating() {
    let mut world = World::new(vec![]);
    owned_attacker(&mut world, "attacker");
    world.add_node(Node::new("srv"));
    world.add_global_vulnerability(
        Vulnerability::scalar(
            "V",
            VulnType::Remote,
            1.0,
            "ip.local AND username.alice",
            Outcome::CustomerData { reward: 0.0 },
            "ssrf-only admin panel",
        )
        .unwrap(),
    );
    world.add_global_vulnerability(
        Vulnerability::scalar(
            "Leak",
            VulnType::Remote,
            1.0,
            "username.NoAuth",
            Outcome::LeakedProfiles(vec!["ip.local".to_string()]),
            "ssrf leaks internal network position",
        )
        .unwrap(),
    );
    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");
    let mut k = kernel();

    let alice_no_ip = Profile { username: Some("alice".to_string()), ..Default::default() };
    let gated = k.remote_exploit(&mut world, &mut ledger, "attacker", "srv", &alice_no_ip, "V", 0).unwrap();
    assert_eq!(gated.reward, -41.0);
    assert_eq!(gated.error, ErrorType::IpLocalNeeded);

    assert!(!ledger.ip_local_unlocked);
    let leaked = k
        .remote_exploit(&mut world, &mut ledger, "attacker", "srv", &Profile::anonymous(), "Leak", 1)
        .unwrap();
    // -1 (cost) + 15 (new attack) + 10 (ip-local change); the leaked profile
    // string has no username, so it earns no profile-discovered bonus.
    assert_eq!(leaked.reward, 24.0);
    assert!(ledger.ip_local_unlocked);

    let alice_local = Profile { username: Some("alice".to_string()), ip: Some("local".to_string()), ..Default::default() };
    let unlocked = k.remote_exploit(&mut world, &mut ledger, "attacker", "srv", &alice_local, "V", 2).unwrap();
    assert_eq!(unlocked.reward, 29.0); // -1 (cost) + 15 (new attack) + 15 (ssrf)
    assert_eq!(unlocked.error, ErrorType::NoError);
}

#[test]
fn scenario_5_connect_happy_path() {
    let mut world = World::new(vec![]);
    let mut attacker = Node::new("attacker");
    attacker.agent_installed = true;
    attacker.firewall.outgoing.push(FirewallRule {
        port: "ssh".to_string(),
        permission: Permission::Allow,
        reason: "ops".to_string(),
    });
    world.add_node(attacker);

    let mut srv = Node::new("srv");
    srv.value = 7;
    srv.firewall.incoming.push(FirewallRule {
        port: "ssh".to_string(),
        permission: Permission::Allow,
        reason: "ops".to_string(),
    });
    srv.services.push(Service {
        name: "ssh".to_string(),
        running: true,
        allowed_credentials: HashSet::from(["c1".to_string()]),
        sla_weight: 1.0,
    });
    world.add_node(srv);

    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");
    ledger.add_gathered_credential("c1");

    let mut k = kernel();
    let result = k.connect(&mut world, &mut ledger, "attacker", "srv", "ssh", "c1", 0).unwrap();

    assert_eq!(result.reward, 7.0);
    assert!(matches!(result.outcome, Some(Outcome::LateralMove)));
    assert!(ledger.is_currently_owned(&world, "srv"));
    assert_eq!(
        world.edge_annotation("attacker", "srv"),
        Some(attack_sim_engine::world::EdgeAnnotation::LateralMove)
    );
}

#[test]
fn scenario_6_connect_blocked_by_local_firewall() {
    let mut world = World::new(vec![]);
    let mut attacker = Node::new("attacker");
    attacker.agent_installed = true;
    attacker.firewall.outgoing.push(FirewallRule {
        port: "ssh".to_string(),
        permission: Permission::Block,
        reason: "egress policy".to_string(),
    });
    world.add_node(attacker);

    let mut srv = Node::new("srv");
    srv.value = 7;
    srv.services.push(Service {
        name: "ssh".to_string(),
        running: true,
        allowed_credentials: HashSet::from(["c1".to_string()]),
        sla_weight: 1.0,
    });
    world.add_node(srv);

    let mut ledger = DiscoveryLedger::new();
    ledger.mark_node_discovered(&world, "srv");
    ledger.add_gathered_credential("c1");

    let mut k = kernel();
    let result = k.connect(&mut world, &mut ledger, "attacker", "srv", "ssh", "c1", 0).unwrap();

    assert_eq!(result.reward, -10.0);
    assert!(result.outcome.is_none());
    assert_eq!(result.error, ErrorType::BlockedByLocalFirewall);
}
