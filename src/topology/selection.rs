/*!
 * Server selection (distilled spec §4.6 cont.).
 */

use std::time::Duration;

use crate::error::{Error, ErrorKind, Result};
use crate::sdam::{ServerDescription, ServerType, TagSet};

use super::description::{TopologyDescription, TopologyType};

pub const DEFAULT_LOCAL_THRESHOLD_MS: u64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Debug, Clone)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    pub tag_sets: Vec<TagSet>,
    pub max_staleness_ms: u64,
}

impl ReadPreference {
    pub fn primary() -> Self {
        ReadPreference { mode: ReadPreferenceMode::Primary, tag_sets: Vec::new(), max_staleness_ms: 0 }
    }
}

#[derive(Debug, Clone)]
pub struct SelectedServer {
    pub address: String,
    pub slave_ok: bool,
    pub is_mongos: bool,
}

/// Selects one candidate from `topology` for the given operation and read
/// preference. Does not itself wait on topology changes — the caller (the
/// Topology's selection loop) retries this against successive snapshots
/// until a candidate appears or the deadline elapses.
pub fn select_server(
    topology: &TopologyDescription,
    op: OperationType,
    read_preference: &ReadPreference,
    heartbeat_frequency_ms: u64,
    local_threshold_ms: u64,
) -> Result<Option<SelectedServer>> {
    // Step 1.
    if !topology.compatible {
        return Err(Error::new(ErrorKind::IncompatibleWireVersion(
            topology.compatibility_error.clone().unwrap_or_else(|| "incompatible wire version range".to_string()),
        )));
    }

    // Step 2: project candidates by topology type.
    let mut candidates: Vec<&ServerDescription> = match topology.topology_type {
        TopologyType::Unknown => Vec::new(),
        TopologyType::Single => topology.servers.values().collect(),
        TopologyType::Sharded => topology.servers.values().filter(|s| s.server_type == ServerType::Mongos).collect(),
        TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
            if op == OperationType::Write {
                topology.servers.values().filter(|s| s.server_type == ServerType::RsPrimary).collect()
            } else {
                project_read_candidates(topology, read_preference.mode)
            }
        }
    };

    if candidates.is_empty() {
        return Ok(None);
    }

    // Step 3: max-staleness filter (replica sets only; a no-op elsewhere
    // since primaries/mongos have no staleness concept here).
    if read_preference.max_staleness_ms > 0 && matches!(op, OperationType::Read) {
        candidates = apply_max_staleness(topology, candidates, read_preference.max_staleness_ms, heartbeat_frequency_ms);
        if candidates.is_empty() {
            return Ok(None);
        }
    }

    // Step 4: tag-set filter.
    if !read_preference.tag_sets.is_empty() {
        candidates = apply_tag_sets(candidates, &read_preference.tag_sets);
        if candidates.is_empty() {
            return Ok(None);
        }
    }

    // Step 5: latency window.
    let min_rtt = candidates.iter().filter_map(|s| s.round_trip_time).min();
    if let Some(min_rtt) = min_rtt {
        let window = min_rtt + Duration::from_millis(local_threshold_ms);
        candidates.retain(|s| s.round_trip_time.map(|rtt| rtt <= window).unwrap_or(false));
    }

    if candidates.is_empty() {
        return Ok(None);
    }

    // Step 7: pick any survivor. Deterministic-first is fine: the contract
    // only requires "any survivor", and determinism makes tests reproducible.
    let chosen = candidates[0];
    let is_mongos = chosen.server_type == ServerType::Mongos;
    let slave_ok = op == OperationType::Read && !is_mongos && chosen.server_type != ServerType::RsPrimary;

    Ok(Some(SelectedServer { address: chosen.address.clone(), slave_ok, is_mongos }))
}

fn project_read_candidates(topology: &TopologyDescription, mode: ReadPreferenceMode) -> Vec<&ServerDescription> {
    let primaries: Vec<&ServerDescription> = topology.servers.values().filter(|s| s.server_type == ServerType::RsPrimary).collect();
    let secondaries: Vec<&ServerDescription> = topology.servers.values().filter(|s| s.server_type == ServerType::RsSecondary).collect();

    match mode {
        ReadPreferenceMode::Primary => primaries,
        ReadPreferenceMode::Secondary => secondaries,
        ReadPreferenceMode::PrimaryPreferred => {
            if !primaries.is_empty() {
                primaries
            } else {
                secondaries
            }
        }
        ReadPreferenceMode::SecondaryPreferred => {
            if !secondaries.is_empty() {
                secondaries
            } else {
                primaries
            }
        }
        ReadPreferenceMode::Nearest => primaries.into_iter().chain(secondaries).collect(),
    }
}

fn apply_max_staleness<'a>(
    topology: &TopologyDescription,
    candidates: Vec<&'a ServerDescription>,
    max_staleness_ms: u64,
    heartbeat_frequency_ms: u64,
) -> Vec<&'a ServerDescription> {
    let primary = topology.servers.values().find(|s| s.server_type == ServerType::RsPrimary);

    let reference_write_date = match primary {
        Some(p) => p.last_write_date,
        None => topology.servers.values().filter(|s| s.server_type == ServerType::RsSecondary).filter_map(|s| s.last_write_date).max(),
    };

    let Some(reference) = reference_write_date else {
        return candidates;
    };

    candidates
        .into_iter()
        .filter(|s| {
            if s.server_type == ServerType::RsPrimary {
                return true;
            }
            match s.last_write_date {
                Some(write_date) => {
                    let staleness_ms = (reference - write_date).max(0) as u64 + heartbeat_frequency_ms;
                    staleness_ms <= max_staleness_ms
                }
                None => false,
            }
        })
        .collect()
}

fn apply_tag_sets<'a>(candidates: Vec<&'a ServerDescription>, tag_sets: &[TagSet]) -> Vec<&'a ServerDescription> {
    for wanted in tag_sets {
        let matching: Vec<&ServerDescription> = candidates.iter().filter(|s| s.tags.is_superset_of(wanted)).copied().collect();
        if !matching.is_empty() {
            return matching;
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::description::TopologyDescription;
    use std::time::Duration;

    fn with_server(mut topo: TopologyDescription, address: &str, server_type: ServerType, rtt_ms: u64) -> TopologyDescription {
        let mut desc = ServerDescription::unknown(address);
        desc.server_type = server_type;
        desc.round_trip_time = Some(Duration::from_millis(rtt_ms));
        topo.servers.insert(address.to_string(), desc);
        topo
    }

    #[test]
    fn single_topology_always_selects_its_server() {
        let mut topo = TopologyDescription::single("a:1");
        topo.topology_type = TopologyType::Single;
        topo.servers.insert("a:1".to_string(), {
            let mut d = ServerDescription::unknown("a:1");
            d.server_type = ServerType::Standalone;
            d.round_trip_time = Some(Duration::from_millis(1));
            d
        });
        let selected = select_server(&topo, OperationType::Read, &ReadPreference::primary(), 10_000, 15).unwrap();
        assert_eq!(selected.unwrap().address, "a:1");
    }

    #[test]
    fn unknown_topology_has_no_candidates() {
        let topo = TopologyDescription::unknown(vec!["a:1".to_string()]);
        let selected = select_server(&topo, OperationType::Read, &ReadPreference::primary(), 10_000, 15).unwrap();
        assert!(selected.is_none());
    }

    #[test]
    fn write_selects_primary_only() {
        let mut topo = TopologyDescription::unknown(vec![]);
        topo.topology_type = TopologyType::ReplicaSetWithPrimary;
        let topo = with_server(topo, "p:1", ServerType::RsPrimary, 1);
        let topo = with_server(topo, "s:1", ServerType::RsSecondary, 1);
        let selected = select_server(&topo, OperationType::Write, &ReadPreference::primary(), 10_000, 15).unwrap();
        assert_eq!(selected.unwrap().address, "p:1");
    }

    #[test]
    fn secondary_preferred_falls_back_to_primary() {
        let mut topo = TopologyDescription::unknown(vec![]);
        topo.topology_type = TopologyType::ReplicaSetWithPrimary;
        let topo = with_server(topo, "p:1", ServerType::RsPrimary, 1);
        let pref = ReadPreference { mode: ReadPreferenceMode::SecondaryPreferred, tag_sets: vec![], max_staleness_ms: 0 };
        let selected = select_server(&topo, OperationType::Read, &pref, 10_000, 15).unwrap();
        assert_eq!(selected.unwrap().address, "p:1");
    }

    #[test]
    fn latency_window_excludes_far_servers() {
        let mut topo = TopologyDescription::unknown(vec![]);
        topo.topology_type = TopologyType::ReplicaSetWithPrimary;
        let topo = with_server(topo, "p:1", ServerType::RsPrimary, 1);
        let topo = with_server(topo, "near:1", ServerType::RsSecondary, 5);
        let topo = with_server(topo, "far:1", ServerType::RsSecondary, 500);
        let pref = ReadPreference { mode: ReadPreferenceMode::Nearest, tag_sets: vec![], max_staleness_ms: 0 };
        let selected = select_server(&topo, OperationType::Read, &pref, 10_000, 15).unwrap().unwrap();
        assert_ne!(selected.address, "far:1");
    }

    #[test]
    fn incompatible_topology_fails_fast() {
        let mut topo = TopologyDescription::unknown(vec![]);
        topo.compatible = false;
        topo.compatibility_error = Some("nope".to_string());
        let result = select_server(&topo, OperationType::Read, &ReadPreference::primary(), 10_000, 15);
        assert!(result.is_err());
    }

    #[test]
    fn tag_set_filter_picks_first_matching_set() {
        let mut topo = TopologyDescription::unknown(vec![]);
        topo.topology_type = TopologyType::ReplicaSetWithPrimary;
        let mut east = ServerDescription::unknown("east:1");
        east.server_type = ServerType::RsSecondary;
        east.round_trip_time = Some(Duration::from_millis(1));
        east.tags.tags.insert("dc".into(), "east".into());
        topo.servers.insert("east:1".to_string(), east);

        let mut west = ServerDescription::unknown("west:1");
        west.server_type = ServerType::RsSecondary;
        west.round_trip_time = Some(Duration::from_millis(1));
        west.tags.tags.insert("dc".into(), "west".into());
        topo.servers.insert("west:1".to_string(), west);

        let mut wanted = TagSet::default();
        wanted.tags.insert("dc".into(), "west".into());
        let pref = ReadPreference { mode: ReadPreferenceMode::Secondary, tag_sets: vec![wanted], max_staleness_ms: 0 };
        let selected = select_server(&topo, OperationType::Read, &pref, 10_000, 15).unwrap().unwrap();
        assert_eq!(selected.address, "west:1");
    }
}
