/*!
 * ServerDescription: the Topology's view of one server, rebuilt from each
 * `isMaster` reply (distilled spec §4.5/§4.6).
 */

use std::time::Duration;

use crate::bson::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerType {
    Unknown,
    Standalone,
    Mongos,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    RsOther,
    RsGhost,
    PossiblePrimary,
}

impl ServerType {
    pub fn is_data_bearing(self) -> bool {
        matches!(self, ServerType::Standalone | ServerType::Mongos | ServerType::RsPrimary | ServerType::RsSecondary)
    }

    pub fn is_replica_set_member(self) -> bool {
        matches!(
            self,
            ServerType::RsPrimary | ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther | ServerType::RsGhost
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct TagSet {
    pub tags: std::collections::BTreeMap<String, String>,
}

impl TagSet {
    /// True when `self` is a superset of `other` (every tag in `other`
    /// appears in `self` with the same value).
    pub fn is_superset_of(&self, other: &TagSet) -> bool {
        other.tags.iter().all(|(k, v)| self.tags.get(k) == Some(v))
    }
}

#[derive(Debug, Clone)]
pub struct ServerDescription {
    pub address: String,
    pub server_type: ServerType,
    pub round_trip_time: Option<Duration>,
    pub last_write_date: Option<i64>,
    pub last_update_time: Option<i64>,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub tags: TagSet,
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    pub election_id: Option<crate::bson::ObjectId>,
    pub me: Option<String>,
    pub hosts: Vec<String>,
    pub passives: Vec<String>,
    pub arbiters: Vec<String>,
    pub is_replica_set: bool,
    pub error: Option<String>,
}

impl ServerDescription {
    pub fn unknown(address: impl Into<String>) -> Self {
        ServerDescription {
            address: address.into(),
            server_type: ServerType::Unknown,
            round_trip_time: None,
            last_write_date: None,
            last_update_time: None,
            min_wire_version: 0,
            max_wire_version: 0,
            tags: TagSet::default(),
            set_name: None,
            set_version: None,
            election_id: None,
            me: None,
            hosts: Vec::new(),
            passives: Vec::new(),
            arbiters: Vec::new(),
            is_replica_set: false,
            error: None,
        }
    }

    pub fn unknown_with_error(address: impl Into<String>, error: impl Into<String>) -> Self {
        let mut desc = ServerDescription::unknown(address);
        desc.error = Some(error.into());
        desc
    }

    /// Classifies an `isMaster` reply into a `ServerDescription`, per the
    /// distilled spec's type-derivation table.
    pub fn from_is_master(address: &str, reply: &Document, rtt: Duration) -> Self {
        let ok = matches!(reply.get_i32("ok"), Some(1)) || reply.get("ok").and_then(|b| b.as_bool()) == Some(true);
        if !ok {
            return ServerDescription { round_trip_time: Some(rtt), ..ServerDescription::unknown(address) };
        }

        let is_replica_set = reply.get_bool("isreplicaset") == Some(true);
        let msg_is_mongos = reply.get_str("msg") == Some("isdbgrid");
        let set_name = reply.get_str("setName").map(str::to_string);
        let is_master = reply.get_bool("ismaster").unwrap_or(false);
        let is_secondary = reply.get_bool("secondary").unwrap_or(false);
        let is_arbiter = reply.get_bool("arbiterOnly").unwrap_or(false);

        let server_type = if msg_is_mongos {
            ServerType::Mongos
        } else if is_replica_set {
            ServerType::RsGhost
        } else if let Some(_) = &set_name {
            if is_master {
                ServerType::RsPrimary
            } else if is_secondary {
                ServerType::RsSecondary
            } else if is_arbiter {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else {
            ServerType::Standalone
        };

        let tags = reply
            .get_document("tags")
            .map(|doc| TagSet {
                tags: doc.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect(),
            })
            .unwrap_or_default();

        let hosts = string_array(reply, "hosts");
        let passives = string_array(reply, "passives");
        let arbiters = string_array(reply, "arbiters");

        ServerDescription {
            address: address.to_string(),
            server_type,
            round_trip_time: Some(rtt),
            last_write_date: reply
                .get_document("lastWrite")
                .and_then(|d| d.get_i64("lastWriteDate"))
                .or_else(|| reply.get_i64("localTime")),
            last_update_time: reply.get_i64("localTime"),
            min_wire_version: reply.get_i32("minWireVersion").unwrap_or(0),
            max_wire_version: reply.get_i32("maxWireVersion").unwrap_or(0),
            tags,
            set_name,
            set_version: reply.get_i64("setVersion"),
            election_id: reply.get("electionId").and_then(|v| v.as_object_id()),
            me: reply.get_str("me").map(str::to_string),
            hosts,
            passives,
            arbiters,
            is_replica_set,
            error: None,
        }
    }

    /// New RTT given the previous description, per the EWMA smoothing rule
    /// (α = 0.2); the first successful probe seeds the prior to itself.
    pub fn smoothed_rtt(previous: Option<Duration>, observed: Duration) -> Duration {
        match previous {
            None => observed,
            Some(prior) => {
                let observed_ms = observed.as_secs_f64() * 1000.0;
                let prior_ms = prior.as_secs_f64() * 1000.0;
                let new_ms = 0.2 * observed_ms + 0.8 * prior_ms;
                Duration::from_secs_f64((new_ms / 1000.0).max(0.0))
            }
        }
    }
}

fn string_array(doc: &Document, key: &str) -> Vec<String> {
    doc.get_array(key)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document;
    use std::time::Duration;

    #[test]
    fn classifies_mongos() {
        let reply = document! { "ok" => 1.0f64, "msg" => "isdbgrid" };
        let desc = ServerDescription::from_is_master("h:1", &reply, Duration::from_millis(1));
        assert_eq!(desc.server_type, ServerType::Mongos);
    }

    #[test]
    fn classifies_rs_primary() {
        let reply = document! { "ok" => 1.0f64, "setName" => "rs0", "ismaster" => true };
        let desc = ServerDescription::from_is_master("h:1", &reply, Duration::from_millis(1));
        assert_eq!(desc.server_type, ServerType::RsPrimary);
    }

    #[test]
    fn classifies_rs_secondary() {
        let reply = document! { "ok" => 1.0f64, "setName" => "rs0", "ismaster" => false, "secondary" => true };
        let desc = ServerDescription::from_is_master("h:1", &reply, Duration::from_millis(1));
        assert_eq!(desc.server_type, ServerType::RsSecondary);
    }

    #[test]
    fn classifies_standalone() {
        let reply = document! { "ok" => 1.0f64, "ismaster" => true };
        let desc = ServerDescription::from_is_master("h:1", &reply, Duration::from_millis(1));
        assert_eq!(desc.server_type, ServerType::Standalone);
    }

    #[test]
    fn not_ok_is_unknown() {
        let reply = document! { "ok" => 0.0f64 };
        let desc = ServerDescription::from_is_master("h:1", &reply, Duration::from_millis(1));
        assert_eq!(desc.server_type, ServerType::Unknown);
    }

    #[test]
    fn rtt_ewma_smoothing() {
        let prior = Duration::from_millis(100);
        let observed = Duration::from_millis(200);
        let smoothed = ServerDescription::smoothed_rtt(Some(prior), observed);
        // 0.2*200 + 0.8*100 = 120ms
        assert!((smoothed.as_secs_f64() * 1000.0 - 120.0).abs() < 0.01);
    }

    #[test]
    fn first_probe_seeds_prior() {
        let observed = Duration::from_millis(50);
        assert_eq!(ServerDescription::smoothed_rtt(None, observed), observed);
    }

    #[test]
    fn tag_set_superset() {
        let mut a = TagSet::default();
        a.tags.insert("dc".into(), "east".into());
        a.tags.insert("rack".into(), "1".into());
        let mut b = TagSet::default();
        b.tags.insert("dc".into(), "east".into());
        assert!(a.is_superset_of(&b));
        assert!(!b.is_superset_of(&a));
    }
}
