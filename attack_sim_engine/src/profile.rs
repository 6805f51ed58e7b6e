//! Profile algebra.
//!
//! A [`Profile`] is the partial identity tuple an attacker presents on a
//! remote exploit: an optional username, an optional numeric id, a set of
//! roles, and an optional network position (`ip.local` vs anything else).
//! Profiles render to a canonical symbol set the boolean expression
//! evaluator can bind preconditions against.

use std::collections::BTreeSet;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// `ip.local` is the one network-position value the kernel treats specially
/// (it gates SSRF-class branches); any other string is just an opaque tag.
pub const IP_LOCAL: &str = "local";

/// The anonymous identity every episode starts with.
pub const NO_AUTH: &str = "NoAuth";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: Option<String>,
    pub id: Option<String>,
    pub roles: BTreeSet<String>,
    pub ip: Option<String>,
}

impl Profile {
    pub fn anonymous() -> Self {
        Profile {
            username: Some(NO_AUTH.to_string()),
            ..Default::default()
        }
    }

    pub fn is_ip_local(&self) -> bool {
        self.ip.as_deref() == Some(IP_LOCAL)
    }

    pub fn is_no_auth(&self) -> bool {
        self.username.as_deref() == Some(NO_AUTH)
    }

    /// The canonical `k.v` symbol set preconditions are bound against.
    pub fn profile_symbols(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        if let Some(u) = &self.username {
            out.insert(format!("username.{u}"));
        }
        if let Some(id) = &self.id {
            out.insert(format!("id.{id}"));
        }
        for role in &self.roles {
            out.insert(format!("roles.{role}"));
        }
        if let Some(ip) = &self.ip {
            out.insert(format!("ip.{ip}"));
        }
        out
    }

    /// Canonical `"k1.v1&k2.v2&..."` rendering (the grammar exchanged across
    /// the kernel boundary, e.g. inside `LeakedProfiles`).
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.profile_symbols().into_iter().collect();
        parts.sort();
        parts.join("&")
    }

    /// Fill every missing scalar of `self` from `other`, union the role
    /// sets, and return the number of atomic fields that were newly filled
    /// (used by the kernel for discovery-bonus accounting).
    pub fn merge(&mut self, other: &Profile) -> usize {
        let mut newly_filled = 0;

        if self.username.is_none() {
            if let Some(u) = &other.username {
                self.username = Some(u.clone());
                newly_filled += 1;
            }
        }
        if self.id.is_none() {
            if let Some(id) = &other.id {
                self.id = Some(id.clone());
                newly_filled += 1;
            }
        }
        if self.ip.is_none() {
            if let Some(ip) = &other.ip {
                self.ip = Some(ip.clone());
                newly_filled += 1;
            }
        }
        for role in &other.roles {
            if self.roles.insert(role.clone()) {
                newly_filled += 1;
            }
        }

        newly_filled
    }

    /// Parse a `"k1.v1&k2.v2&..."` string as produced by `render`/
    /// `LeakedProfiles`. Unknown keys are ignored rather than rejected —
    /// the grammar is meant to be forward-compatible.
    pub fn parse(s: &str) -> Profile {
        let mut profile = Profile::default();
        for symbol in s.split('&') {
            let symbol = symbol.trim();
            if symbol.is_empty() {
                continue;
            }
            let Some((key, value)) = symbol.split_once('.') else {
                continue;
            };
            match key {
                "username" => profile.username = Some(value.to_string()),
                "id" => profile.id = Some(value.to_string()),
                "ip" => profile.ip = Some(value.to_string()),
                "roles" => {
                    profile.roles.insert(value.to_string());
                }
                _ => {}
            }
        }
        profile
    }
}

/// `'.' ∈ sym`.
pub fn is_profile_symbol(sym: &str) -> bool {
    sym.contains('.')
}

/// `sym` starts with `roles.`.
pub fn is_role_symbol(sym: &str) -> bool {
    sym.starts_with("roles.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_round_trips_through_parse_symbols() {
        let mut p = Profile::anonymous();
        p.roles.insert("isDoctor".to_string());
        p.ip = Some(IP_LOCAL.to_string());

        let rendered = p.render();
        let reparsed = Profile::parse(&rendered);
        assert_eq!(reparsed.profile_symbols(), p.profile_symbols());
    }

    #[test]
    fn merge_fills_missing_scalars_and_unions_roles() {
        let mut dst = Profile {
            username: Some("alice".to_string()),
            ..Default::default()
        };
        let src = Profile {
            username: Some("bob".to_string()), // ignored, dst already has one
            id: Some("42".to_string()),
            roles: BTreeSet::from(["isDoctor".to_string(), "isNurse".to_string()]),
            ip: Some(IP_LOCAL.to_string()),
        };

        let filled = dst.merge(&src);

        assert_eq!(dst.username.as_deref(), Some("alice"));
        assert_eq!(dst.id.as_deref(), Some("42"));
        assert_eq!(dst.ip.as_deref(), Some(IP_LOCAL));
        assert_eq!(dst.roles.len(), 2);
        // id + ip + 2 roles = 4 newly filled atomic fields.
        assert_eq!(filled, 4);
    }

    #[test]
    fn merge_is_idempotent_on_second_application() {
        let mut dst = Profile::default();
        let src = Profile {
            username: Some("alice".to_string()),
            roles: BTreeSet::from(["isDoctor".to_string()]),
            ..Default::default()
        };
        let first = dst.merge(&src);
        let second = dst.merge(&src);
        assert_eq!(first, 2);
        assert_eq!(second, 0);
    }

    #[test]
    fn symbol_predicates() {
        assert!(is_profile_symbol("username.alice"));
        assert!(!is_profile_symbol("has_webcam"));
        assert!(is_role_symbol("roles.isDoctor"));
        assert!(!is_role_symbol("username.alice"));
    }
}
