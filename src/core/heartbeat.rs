// Heartbeat monitor - periodic ping/pong and process liveness checks
//
// The only place worker death is detected. Missed pongs count only when no
// worker process is owned. On death it reports once and exits; the supervisor
// starts a fresh monitor after a successful restart.

use crate::core::config::Config;
use crate::core::response_dispatcher::BridgeState;
use crate::core::worker_manager::LivenessProbe;
use crate::models::protocol::Command;
use crate::platform::pose::PoseTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    WorkerDied { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    pub interval: Duration,
    pub pong_timeout: Duration,
    /// Send a status probe on every Nth beat
    pub status_every: u32,
    pub max_missed_pongs: u32,
}

impl HeartbeatSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.heartbeat_interval(),
            pong_timeout: config.pong_timeout(),
            status_every: config.status_every_n_heartbeats.max(1),
            max_missed_pongs: config.max_missed_pongs.max(1),
        }
    }
}

pub struct HeartbeatMonitor {
    transport: Arc<dyn PoseTransport>,
    probe: Arc<dyn LivenessProbe>,
    state: Arc<BridgeState>,
    settings: HeartbeatSettings,
}

impl HeartbeatMonitor {
    pub fn new(
        transport: Arc<dyn PoseTransport>,
        probe: Arc<dyn LivenessProbe>,
        state: Arc<BridgeState>,
        settings: HeartbeatSettings,
    ) -> Self {
        Self {
            transport,
            probe,
            state,
            settings,
        }
    }

    pub fn spawn(self, events: mpsc::Sender<HeartbeatEvent>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Some(reason) = self.run(shutdown).await {
                warn!("Heartbeat lost the worker: {}", reason);
                let _ = events.send(HeartbeatEvent::WorkerDied { reason }).await;
            }
            debug!("Heartbeat stopped");
        })
    }

    /// Beats until shutdown (`None`) or until the worker is found dead
    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Option<String> {
        let mut beat: u64 = 0;
        let mut missed: u32 = 0;
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.settings.interval,
            self.settings.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return None,
            }
            if *shutdown.borrow() {
                return None;
            }
            beat += 1;

            if self.probe.process_alive() == Some(false) {
                return Some("worker process exited".to_string());
            }

            let pongs_before = self.state.pong_count();
            if let Err(e) = self.transport.send(Command::Ping).await {
                debug!("Ping not sent: {}", e);
            }
            if beat % u64::from(self.settings.status_every) == 0 {
                if let Err(e) = self.transport.send(Command::Status).await {
                    debug!("Status probe not sent: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.pong_timeout) => {}
                _ = shutdown.changed() => return None,
            }

            let process = self.probe.process_alive();
            if process == Some(false) {
                return Some("worker process exited".to_string());
            }
            if !self.transport.is_alive() {
                return Some(format!("{} channel closed", self.transport.name()));
            }

            if self.state.pong_count() > pongs_before {
                missed = 0;
            } else if process.is_some() {
                // a running worker may just be behind on its queue
                debug!("No pong within {:?}, worker process still running", self.settings.pong_timeout);
            } else {
                missed += 1;
                warn!("No pong within {:?} ({} missed)", self.settings.pong_timeout, missed);
                if missed >= self.settings.max_missed_pongs {
                    return Some(format!("no pong for {} heartbeats", missed));
                }
            }
        }
    }
}
