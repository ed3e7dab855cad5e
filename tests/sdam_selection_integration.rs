//! End-to-end SDAM + server selection: feeds a sequence of `ServerDescription`
//! updates through `TopologyDescription::apply` the way a real Monitor set
//! would, then confirms `select_server` reacts correctly at each step. The
//! unit tests inside `topology::description`/`topology::selection` each
//! exercise one isolated transition; this chains several to catch anything
//! that only shows up across a sequence (e.g. an election after discovery).

use std::time::Duration;

use mongo_driver_core::sdam::{ServerDescription, ServerType};
use mongo_driver_core::topology::description::{TopologyDescription, TopologyType};
use mongo_driver_core::topology::selection::{select_server, OperationType, ReadPreference};

fn member(address: &str, server_type: ServerType, set_name: &str, hosts: &[&str], rtt_ms: u64) -> ServerDescription {
    let mut desc = ServerDescription::unknown(address);
    desc.server_type = server_type;
    desc.set_name = Some(set_name.to_string());
    desc.hosts = hosts.iter().map(|h| h.to_string()).collect();
    desc.round_trip_time = Some(Duration::from_millis(rtt_ms));
    desc.min_wire_version = 0;
    desc.max_wire_version = 17;
    desc
}

#[test]
fn discovers_replica_set_then_reselects_after_election() {
    let mut topology = TopologyDescription::unknown(vec!["a:1".to_string(), "b:1".to_string()]);

    // No primary yet: a write has nowhere to go.
    let write_pref = ReadPreference::primary();
    let selected = select_server(&topology, OperationType::Write, &write_pref, 10_000, 15).unwrap();
    assert!(selected.is_none());

    // "a" replies first, as primary.
    topology.apply(member("a:1", ServerType::RsPrimary, "rs0", &["a:1", "b:1"], 2));
    assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);

    let selected = select_server(&topology, OperationType::Write, &write_pref, 10_000, 15).unwrap().unwrap();
    assert_eq!(selected.address, "a:1");

    // "b" replies as secondary.
    topology.apply(member("b:1", ServerType::RsSecondary, "rs0", &["a:1", "b:1"], 3));
    let secondary_pref = ReadPreference { mode: mongo_driver_core::topology::selection::ReadPreferenceMode::Secondary, tag_sets: vec![], max_staleness_ms: 0 };
    let selected = select_server(&topology, OperationType::Read, &secondary_pref, 10_000, 15).unwrap().unwrap();
    assert_eq!(selected.address, "b:1");

    // "b" wins an election; update_from_primary demotes any other server
    // already marked primary the moment a new, non-stale primary arrives.
    topology.apply(member("b:1", ServerType::RsPrimary, "rs0", &["a:1", "b:1"], 3));
    assert_eq!(topology.topology_type, TopologyType::ReplicaSetWithPrimary);
    let selected = select_server(&topology, OperationType::Write, &write_pref, 10_000, 15).unwrap().unwrap();
    assert_eq!(selected.address, "b:1");
    assert_eq!(topology.servers.get("a:1").unwrap().server_type, ServerType::Unknown);
}

#[test]
fn incompatible_wire_version_blocks_selection_even_with_a_healthy_primary() {
    let mut topology = TopologyDescription::single("a:1");
    let mut desc = ServerDescription::unknown("a:1");
    desc.server_type = ServerType::Standalone;
    desc.min_wire_version = 100;
    desc.max_wire_version = 200;
    topology.apply(desc);

    let result = select_server(&topology, OperationType::Read, &ReadPreference::primary(), 10_000, 15);
    assert!(result.is_err());
}
