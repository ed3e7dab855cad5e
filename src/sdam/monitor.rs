/*!
 * Server Monitor (distilled spec §4.5). One per address; owns a dedicated,
 * unauthenticated probe `Connection` against the `admin` database.
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::auth::Authenticator;
use crate::connection::Connection;
use crate::document;

use super::event::MonitorEvent;
use super::server_description::ServerDescription;

pub const DEFAULT_HEARTBEAT_FREQUENCY_MS: u64 = 10_000;
pub const MIN_HEARTBEAT_FREQUENCY_MS: u64 = 500;

pub struct MonitorHandle {
    force_check: Arc<Notify>,
    stop: Arc<Notify>,
}

impl MonitorHandle {
    pub fn force_check(&self) {
        self.force_check.notify_one();
    }

    pub fn stop(&self) {
        self.stop.notify_one();
    }
}

/// Spawns the cooperative probe loop and returns a handle to control it.
/// `on_update` receives every `ServerDescription` this Monitor produces,
/// including failures (as `ServerDescription::unknown_with_error`).
pub fn spawn(
    address: String,
    heartbeat_frequency_ms: u64,
    updates: mpsc::Sender<ServerDescription>,
    events: mpsc::UnboundedSender<MonitorEvent>,
) -> MonitorHandle {
    let force_check = Arc::new(Notify::new());
    let stop = Arc::new(Notify::new());
    let handle = MonitorHandle { force_check: force_check.clone(), stop: stop.clone() };

    tokio::spawn(async move {
        run_loop(address, heartbeat_frequency_ms, updates, events, force_check, stop).await;
    });

    handle
}

async fn run_loop(
    address: String,
    heartbeat_frequency_ms: u64,
    updates: mpsc::Sender<ServerDescription>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    force_check: Arc<Notify>,
    stop: Arc<Notify>,
) {
    let frequency = Duration::from_millis(heartbeat_frequency_ms.max(MIN_HEARTBEAT_FREQUENCY_MS));
    let mut prior_rtt: Option<Duration> = None;
    let mut current_type_is_unknown_or_possible_primary = true;

    loop {
        let last_probe = Instant::now();

        let _ = events.send(MonitorEvent::HeartbeatStarted { address: address.clone() });
        let outcome = probe_once(&address).await;

        let description = match outcome {
            Ok((reply, rtt)) => {
                let _ = events.send(MonitorEvent::HeartbeatSucceeded { address: address.clone(), duration: rtt });
                let smoothed = ServerDescription::smoothed_rtt(prior_rtt, rtt);
                prior_rtt = Some(smoothed);
                let mut desc = ServerDescription::from_is_master(&address, &reply, smoothed);
                desc.round_trip_time = Some(smoothed);
                current_type_is_unknown_or_possible_primary =
                    matches!(desc.server_type, super::server_description::ServerType::Unknown | super::server_description::ServerType::PossiblePrimary);
                desc
            }
            Err(e) => {
                if current_type_is_unknown_or_possible_primary {
                    // Retry once immediately to reduce flapping during discovery.
                    debug!(%address, "retrying isMaster probe once before reporting failure");
                    match probe_once(&address).await {
                        Ok((reply, rtt)) => {
                            let _ = events.send(MonitorEvent::HeartbeatSucceeded { address: address.clone(), duration: rtt });
                            let smoothed = ServerDescription::smoothed_rtt(prior_rtt, rtt);
                            prior_rtt = Some(smoothed);
                            ServerDescription::from_is_master(&address, &reply, smoothed)
                        }
                        Err(e2) => {
                            let _ = events.send(MonitorEvent::HeartbeatFailed {
                                address: address.clone(),
                                duration: Duration::from_millis(0),
                                error: e2.to_string(),
                            });
                            warn!(%address, error = %e2, "isMaster probe failed");
                            prior_rtt = None;
                            ServerDescription::unknown_with_error(&address, e2.to_string())
                        }
                    }
                } else {
                    let _ = events.send(MonitorEvent::HeartbeatFailed {
                        address: address.clone(),
                        duration: Duration::from_millis(0),
                        error: e.to_string(),
                    });
                    warn!(%address, error = %e, "isMaster probe failed");
                    prior_rtt = None;
                    ServerDescription::unknown_with_error(&address, e.to_string())
                }
            }
        };

        if updates.send(description).await.is_err() {
            return; // Topology is gone; nothing left to report to.
        }

        let elapsed = last_probe.elapsed();
        let remaining = frequency.saturating_sub(elapsed).max(Duration::from_millis(MIN_HEARTBEAT_FREQUENCY_MS));

        tokio::select! {
            _ = stop.notified() => return,
            _ = force_check.notified() => continue,
            _ = tokio::time::sleep(remaining) => continue,
        }
    }
}

async fn probe_once(address: &str) -> crate::error::Result<(crate::bson::Document, Duration)> {
    let start = Instant::now();
    let mut conn = Connection::connect(address, &Authenticator::None, "admin").await?;
    let reply = conn.command_raw("admin", document! { "isMaster" => 1i32 }).await?;
    Ok((reply, start.elapsed()))
}
