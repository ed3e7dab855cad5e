/*!
 * TopologyDescription and the SDAM update algorithm (distilled spec §4.6).
 */

use indexmap::IndexMap;

use crate::bson::ObjectId;
use crate::sdam::{ServerDescription, ServerType};

/// This driver's supported wire version range; outside of it a server is
/// marked incompatible per step 1 of the SDAM update algorithm.
pub const MIN_SUPPORTED_WIRE_VERSION: i32 = 0;
pub const MAX_SUPPORTED_WIRE_VERSION: i32 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyType {
    Unknown,
    Single,
    Sharded,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
}

#[derive(Debug, Clone)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    pub set_name: Option<String>,
    pub max_set_version: Option<i64>,
    pub max_election_id: Option<ObjectId>,
    pub servers: IndexMap<String, ServerDescription>,
    pub compatible: bool,
    pub compatibility_error: Option<String>,
}

impl TopologyDescription {
    pub fn single(seed: impl Into<String>) -> Self {
        let seed = seed.into();
        let mut servers = IndexMap::new();
        servers.insert(seed.clone(), ServerDescription::unknown(seed));
        TopologyDescription {
            topology_type: TopologyType::Single,
            set_name: None,
            max_set_version: None,
            max_election_id: None,
            servers,
            compatible: true,
            compatibility_error: None,
        }
    }

    pub fn unknown(seeds: impl IntoIterator<Item = String>) -> Self {
        let mut servers = IndexMap::new();
        for seed in seeds {
            servers.insert(seed.clone(), ServerDescription::unknown(seed));
        }
        TopologyDescription {
            topology_type: TopologyType::Unknown,
            set_name: None,
            max_set_version: None,
            max_election_id: None,
            servers,
            compatible: true,
            compatibility_error: None,
        }
    }

    /// Applies one incoming `ServerDescription`, mutating `self` per the
    /// SDAM update algorithm. Returns `true` if anything about the overall
    /// topology description changed.
    pub fn apply(&mut self, new_desc: ServerDescription) -> bool {
        // Step 1: wire-version compatibility.
        if new_desc.server_type != ServerType::Unknown {
            if new_desc.min_wire_version > MAX_SUPPORTED_WIRE_VERSION || new_desc.max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
                self.compatible = false;
                self.compatibility_error = Some(format!(
                    "server at {} requires wire version range [{}, {}], driver supports [{}, {}]",
                    new_desc.address, new_desc.min_wire_version, new_desc.max_wire_version,
                    MIN_SUPPORTED_WIRE_VERSION, MAX_SUPPORTED_WIRE_VERSION
                ));
            } else {
                self.compatible = true;
                self.compatibility_error = None;
            }
        }

        // Step 2: Single topology just replaces the one server's description.
        if self.topology_type == TopologyType::Single {
            let changed = self.servers.get(&new_desc.address).map(|old| !descriptions_equal(old, &new_desc)).unwrap_or(true);
            self.servers.insert(new_desc.address.clone(), new_desc);
            return changed;
        }

        // Step 3: address must already be known.
        if !self.servers.contains_key(&new_desc.address) {
            return false;
        }

        let address = new_desc.address.clone();
        let before = self.servers.get(&address).cloned();
        let topology_type_before = self.topology_type;
        let server_count_before = self.servers.len();

        match (self.topology_type, new_desc.server_type) {
            (TopologyType::Unknown, ServerType::Standalone) => {
                if self.servers.len() == 1 {
                    self.topology_type = TopologyType::Single;
                    self.servers.insert(new_desc.address.clone(), new_desc);
                } else {
                    self.servers.shift_remove(&new_desc.address);
                }
            }
            (TopologyType::Unknown, ServerType::Mongos) => {
                self.topology_type = TopologyType::Sharded;
                self.servers.insert(new_desc.address.clone(), new_desc);
            }
            (TopologyType::Unknown, t) if t.is_replica_set_member() => {
                self.set_name = new_desc.set_name.clone();
                if t == ServerType::RsPrimary {
                    self.update_from_primary(new_desc);
                } else {
                    self.update_without_primary(new_desc);
                }
            }
            (TopologyType::Sharded, t) if t != ServerType::Mongos && t != ServerType::Unknown => {
                self.servers.shift_remove(&new_desc.address);
            }
            (TopologyType::Sharded, _) => {
                self.servers.insert(new_desc.address.clone(), new_desc);
            }
            (TopologyType::ReplicaSetNoPrimary, ServerType::RsPrimary) => {
                self.update_from_primary(new_desc);
            }
            (TopologyType::ReplicaSetNoPrimary, t) if matches!(t, ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsGhost | ServerType::RsOther) => {
                self.update_without_primary(new_desc);
            }
            (TopologyType::ReplicaSetWithPrimary, ServerType::RsPrimary) => {
                self.update_from_primary(new_desc);
            }
            (TopologyType::ReplicaSetWithPrimary, t) if t.is_replica_set_member() => {
                self.update_with_primary_from_member(new_desc);
            }
            _ => {
                self.servers.insert(new_desc.address.clone(), new_desc);
            }
        }

        // Step 7: rederive TopologyType for replica-set topologies.
        if matches!(self.topology_type, TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary) {
            let has_primary = self.servers.values().any(|s| s.server_type == ServerType::RsPrimary);
            self.topology_type = if has_primary { TopologyType::ReplicaSetWithPrimary } else { TopologyType::ReplicaSetNoPrimary };
        }

        if self.topology_type != topology_type_before || self.servers.len() != server_count_before {
            return true;
        }
        match (&before, self.servers.get(&address)) {
            (Some(old), Some(new)) => !descriptions_equal(old, new),
            (None, None) => false,
            _ => true,
        }
    }

    fn update_from_primary(&mut self, new_desc: ServerDescription) {
        let stale = match (new_desc.set_version, &new_desc.election_id, self.max_set_version, &self.max_election_id) {
            (Some(v), Some(eid), Some(max_v), Some(max_eid)) => (v, eid) < (max_v, max_eid),
            _ => false,
        };

        if stale {
            self.servers.insert(new_desc.address.clone(), ServerDescription::unknown(new_desc.address.clone()));
            let has_primary = self.servers.values().any(|s| s.server_type == ServerType::RsPrimary);
            self.topology_type = if has_primary { TopologyType::ReplicaSetWithPrimary } else { TopologyType::ReplicaSetNoPrimary };
            return;
        }

        if let Some(v) = new_desc.set_version {
            self.max_set_version = Some(self.max_set_version.map_or(v, |cur| cur.max(v)));
        }
        if let Some(eid) = new_desc.election_id {
            self.max_election_id = Some(eid);
        }

        // Demote any other server currently marked primary back to unknown.
        let address = new_desc.address.clone();
        for (addr, desc) in self.servers.iter_mut() {
            if addr != &address && desc.server_type == ServerType::RsPrimary {
                *desc = ServerDescription::unknown(addr.clone());
            }
        }

        let union: std::collections::BTreeSet<String> =
            new_desc.hosts.iter().chain(new_desc.passives.iter()).chain(new_desc.arbiters.iter()).cloned().collect();

        for host in &union {
            self.servers.entry(host.clone()).or_insert_with(|| ServerDescription::unknown(host.clone()));
        }
        self.servers.retain(|addr, _| union.contains(addr) || addr == &address);
        self.servers.insert(address, new_desc);

        self.topology_type = TopologyType::ReplicaSetWithPrimary;
    }

    fn update_without_primary(&mut self, new_desc: ServerDescription) {
        if self.update_member_sanity(&new_desc) {
            for host in new_desc.hosts.iter().chain(new_desc.passives.iter()).chain(new_desc.arbiters.iter()) {
                self.servers.entry(host.clone()).or_insert_with(|| ServerDescription::unknown(host.clone()));
            }
            self.servers.insert(new_desc.address.clone(), new_desc);
        }
        if self.topology_type == TopologyType::Unknown {
            self.topology_type = TopologyType::ReplicaSetNoPrimary;
        }
    }

    fn update_with_primary_from_member(&mut self, new_desc: ServerDescription) {
        if self.update_member_sanity(&new_desc) {
            for host in new_desc.hosts.iter().chain(new_desc.passives.iter()).chain(new_desc.arbiters.iter()) {
                self.servers.entry(host.clone()).or_insert_with(|| ServerDescription::unknown(host.clone()));
            }
            self.servers.insert(new_desc.address.clone(), new_desc);
        }
    }

    /// Set-name agreement and `me` addressing consistency; on violation the
    /// server is removed and `false` is returned so the caller skips the
    /// normal host-merge step.
    fn update_member_sanity(&mut self, new_desc: &ServerDescription) -> bool {
        if let (Some(ours), Some(theirs)) = (&self.set_name, &new_desc.set_name) {
            if ours != theirs {
                self.servers.shift_remove(&new_desc.address);
                return false;
            }
        }
        if let Some(me) = &new_desc.me {
            if me != &new_desc.address {
                self.servers.shift_remove(&new_desc.address);
                return false;
            }
        }
        true
    }
}

fn descriptions_equal(a: &ServerDescription, b: &ServerDescription) -> bool {
    a.server_type == b.server_type
        && a.set_name == b.set_name
        && a.min_wire_version == b.min_wire_version
        && a.max_wire_version == b.max_wire_version
        && a.hosts == b.hosts
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn desc(address: &str, server_type: ServerType) -> ServerDescription {
        let mut d = ServerDescription::unknown(address);
        d.server_type = server_type;
        d.round_trip_time = Some(Duration::from_millis(1));
        d
    }

    #[test]
    fn single_topology_replaces_description() {
        let mut topo = TopologyDescription::single("a:1");
        let changed = topo.apply(desc("a:1", ServerType::Standalone));
        assert!(changed);
        assert_eq!(topo.servers["a:1"].server_type, ServerType::Standalone);
    }

    #[test]
    fn unknown_standalone_with_one_seed_becomes_single() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        topo.apply(desc("a:1", ServerType::Standalone));
        assert_eq!(topo.topology_type, TopologyType::Single);
    }

    #[test]
    fn unknown_standalone_with_multiple_seeds_removes_server() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string(), "b:1".to_string()]);
        topo.apply(desc("a:1", ServerType::Standalone));
        assert!(!topo.servers.contains_key("a:1"));
    }

    #[test]
    fn unknown_mongos_becomes_sharded() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        topo.apply(desc("a:1", ServerType::Mongos));
        assert_eq!(topo.topology_type, TopologyType::Sharded);
    }

    #[test]
    fn primary_discovery_adopts_set_name_and_hosts() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        let mut primary = desc("a:1", ServerType::RsPrimary);
        primary.set_name = Some("rs0".to_string());
        primary.hosts = vec!["a:1".to_string(), "b:1".to_string()];
        topo.apply(primary);

        assert_eq!(topo.topology_type, TopologyType::ReplicaSetWithPrimary);
        assert_eq!(topo.set_name.as_deref(), Some("rs0"));
        assert!(topo.servers.contains_key("b:1"));
    }

    #[test]
    fn stale_primary_is_ignored() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        let mut primary = desc("a:1", ServerType::RsPrimary);
        primary.set_name = Some("rs0".to_string());
        primary.set_version = Some(2);
        primary.election_id = Some(ObjectId::from_bytes([2u8; 12]));
        topo.apply(primary);
        assert_eq!(topo.servers["a:1"].server_type, ServerType::RsPrimary);

        let mut stale_primary = desc("a:1", ServerType::RsPrimary);
        stale_primary.set_name = Some("rs0".to_string());
        stale_primary.set_version = Some(1);
        stale_primary.election_id = Some(ObjectId::from_bytes([1u8; 12]));
        topo.apply(stale_primary);
        assert_eq!(topo.servers["a:1"].server_type, ServerType::Unknown);
    }

    #[test]
    fn second_primary_demotes_the_first() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string(), "b:1".to_string()]);
        let mut primary_a = desc("a:1", ServerType::RsPrimary);
        primary_a.set_name = Some("rs0".to_string());
        primary_a.hosts = vec!["a:1".to_string(), "b:1".to_string()];
        topo.apply(primary_a);
        assert_eq!(topo.servers["a:1"].server_type, ServerType::RsPrimary);

        let mut primary_b = desc("b:1", ServerType::RsPrimary);
        primary_b.set_name = Some("rs0".to_string());
        primary_b.hosts = vec!["a:1".to_string(), "b:1".to_string()];
        primary_b.set_version = Some(1);
        primary_b.election_id = Some(ObjectId::from_bytes([9u8; 12]));
        topo.apply(primary_b);

        assert_eq!(topo.servers["b:1"].server_type, ServerType::RsPrimary);
        assert_eq!(topo.servers["a:1"].server_type, ServerType::Unknown);
    }

    #[test]
    fn member_with_mismatched_set_name_is_removed() {
        let mut topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        let mut primary = desc("a:1", ServerType::RsPrimary);
        primary.set_name = Some("rs0".to_string());
        topo.apply(primary);

        let mut topo2 = TopologyDescription::unknown(vec!["a:1".to_string(), "b:1".to_string()]);
        let mut p = desc("a:1", ServerType::RsPrimary);
        p.set_name = Some("rs0".to_string());
        p.hosts = vec!["a:1".to_string(), "b:1".to_string()];
        topo2.apply(p);

        let mut wrong_set = desc("b:1", ServerType::RsSecondary);
        wrong_set.set_name = Some("other-set".to_string());
        topo2.apply(wrong_set);
        assert!(!topo2.servers.contains_key("b:1"));
    }
}
