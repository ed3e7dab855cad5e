/*!
 * SDAM events (distilled spec §4.5/§4.6). Logged via `tracing` at the call
 * site rather than routed through a generic event bus — this driver's
 * Non-goals exclude a full logging/event surface except where it touches
 * core state-machine transitions, which these are.
 */

use std::time::Duration;

use super::server_description::ServerDescription;

#[derive(Debug, Clone)]
pub enum MonitorEvent {
    HeartbeatStarted { address: String },
    HeartbeatSucceeded { address: String, duration: Duration },
    HeartbeatFailed { address: String, duration: Duration, error: String },
}

#[derive(Debug, Clone)]
pub struct ServerDescriptionChanged {
    pub address: String,
    pub previous: Option<ServerDescription>,
    pub new: ServerDescription,
}

#[derive(Debug, Clone)]
pub struct TopologyDescriptionChanged {
    pub topology_type_name: &'static str,
}
