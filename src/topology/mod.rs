/*!
 * Topology (distilled spec §4.6): the single writer over `TopologyDescription`,
 * the monitor set, and server selection. Mutations arrive as messages on one
 * mailbox and are applied in arrival order; reads (server selection) go
 * through a lock-free published snapshot so that selection never contends
 * with the mailbox task — the same shape the teacher reaches for with
 * `arc-swap` in its connection-pool stats path, generalized here to the
 * whole topology description.
 */

pub mod description;
pub mod selection;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::error::{Error, ErrorKind, Result};
use crate::sdam::{MonitorEvent, MonitorHandle, ServerDescription};

pub use description::{TopologyDescription, TopologyType};
pub use selection::{OperationType, ReadPreference, ReadPreferenceMode, SelectedServer, DEFAULT_LOCAL_THRESHOLD_MS};

pub struct TopologyOptions {
    pub heartbeat_frequency_ms: u64,
    pub local_threshold_ms: u64,
    pub server_selection_timeout_ms: u64,
    pub replica_set: Option<String>,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        TopologyOptions {
            heartbeat_frequency_ms: crate::sdam::DEFAULT_HEARTBEAT_FREQUENCY_MS,
            local_threshold_ms: DEFAULT_LOCAL_THRESHOLD_MS,
            server_selection_timeout_ms: 30_000,
            replica_set: None,
        }
    }
}

/// The deployment's live description plus everything needed to keep it
/// current: one Monitor per known address, and a watch channel selection
/// waits on. `description` is only ever written by the mailbox task spawned
/// in `new`; every other reader goes through the `ArcSwap` snapshot.
pub struct Topology {
    description: ArcSwap<TopologyDescription>,
    monitors: Mutex<HashMap<String, MonitorHandle>>,
    updates_tx: mpsc::Sender<ServerDescription>,
    changed: watch::Sender<()>,
    options: TopologyOptions,
}

impl Topology {
    pub fn new(seeds: Vec<String>, options: TopologyOptions) -> Arc<Self> {
        let description = if seeds.len() == 1 && options.replica_set.is_none() {
            TopologyDescription::single(seeds[0].clone())
        } else {
            TopologyDescription::unknown(seeds.clone())
        };

        let (updates_tx, mut updates_rx) = mpsc::channel(64);
        let (changed, _) = watch::channel(());

        let topology = Arc::new(Topology {
            description: ArcSwap::from_pointee(description),
            monitors: Mutex::new(HashMap::new()),
            updates_tx,
            changed,
            options,
        });

        for seed in &seeds {
            topology.spawn_monitor_for(seed.clone());
        }

        let weak_self = Arc::downgrade(&topology);
        tokio::spawn(async move {
            while let Some(desc) = updates_rx.recv().await {
                let Some(topology) = weak_self.upgrade() else { return };
                topology.apply_update(desc);
            }
        });

        topology
    }

    fn spawn_monitor_for(self: &Arc<Self>, address: String) {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = crate::sdam::monitor::spawn(address.clone(), self.options.heartbeat_frequency_ms, self.updates_tx.clone(), events_tx);
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                log_monitor_event(&event);
            }
        });
        self.monitors.lock().unwrap().insert(address, handle);
    }

    /// Applies one incoming `ServerDescription` and publishes a new snapshot.
    /// Only ever called from the mailbox task spawned in `new`, so there is
    /// no concurrent writer to race against.
    fn apply_update(self: &Arc<Self>, desc: ServerDescription) {
        let mut description = (**self.description.load()).clone();
        let address = desc.address.clone();
        let previous = description.servers.get(&address).cloned();
        let changed = description.apply(desc);

        if changed {
            if let (Some(prev), Some(now)) = (&previous, description.servers.get(&address)) {
                if prev.server_type != now.server_type {
                    info!(%address, from = ?prev.server_type, to = ?now.server_type, "server description changed");
                }
            }
        }

        let known: HashSet<String> = description.servers.keys().cloned().collect();
        self.description.store(Arc::new(description));
        self.reconcile_monitors(known);
        let _ = self.changed.send(());
    }

    fn reconcile_monitors(self: &Arc<Self>, known: HashSet<String>) {
        let missing: Vec<String> = {
            let mut monitors = self.monitors.lock().unwrap();
            monitors.retain(|address, handle| {
                if known.contains(address) {
                    true
                } else {
                    handle.stop();
                    false
                }
            });
            known.into_iter().filter(|a| !monitors.contains_key(a)).collect()
        };
        for address in missing {
            self.spawn_monitor_for(address);
        }
    }

    pub fn description(&self) -> Arc<TopologyDescription> {
        self.description.load_full()
    }

    pub fn force_check_all(&self) {
        // Best-effort: forces every monitor to re-probe immediately, used
        // after a write failure implicates the whole deployment's view.
        for handle in self.monitors.lock().unwrap().values() {
            handle.force_check();
        }
    }

    /// Repeatedly evaluates server selection against the live snapshot until
    /// a candidate survives or `deadline` elapses.
    pub async fn select_server(
        self: &Arc<Self>,
        op: OperationType,
        read_preference: &ReadPreference,
        deadline: Instant,
    ) -> Result<SelectedServer> {
        let mut changed_rx = self.changed.subscribe();
        loop {
            let snapshot = self.description.load();
            let result = selection::select_server(
                &snapshot,
                op,
                read_preference,
                self.options.heartbeat_frequency_ms,
                self.options.local_threshold_ms,
            )?;

            if let Some(selected) = result {
                return Ok(selected);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::new(ErrorKind::SelectionTimeout));
            }

            tokio::select! {
                _ = changed_rx.changed() => continue,
                _ = tokio::time::sleep(remaining) => return Err(Error::new(ErrorKind::SelectionTimeout)),
            }
        }
    }

    pub fn selection_deadline(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.options.server_selection_timeout_ms)
    }
}

fn log_monitor_event(event: &MonitorEvent) {
    match event {
        MonitorEvent::HeartbeatStarted { address } => tracing::debug!(%address, "heartbeat started"),
        MonitorEvent::HeartbeatSucceeded { address, duration } => {
            tracing::debug!(%address, ?duration, "heartbeat succeeded")
        }
        MonitorEvent::HeartbeatFailed { address, error, .. } => {
            tracing::warn!(%address, %error, "heartbeat failed")
        }
    }
}
