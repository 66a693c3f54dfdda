// Response dispatch - applies worker responses to the shared bridge state
//
// Both transports feed the same dispatcher, so the handling of each response
// type lives in exactly one place.

use crate::core::landmark_decoder::{decode_detection, DetectionOutcome, LandmarkStore};
use crate::models::pose::{PoseError, WorkerState};
use crate::models::protocol::Response;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Result of the init handshake as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    Pending,
    Ready,
    Failed(String),
}

/// Callback registered by the embedding application
pub type ErrorCallback = Arc<dyn Fn(&PoseError) + Send + Sync>;

/// Routes surfaced errors to the registered callback
#[derive(Clone, Default)]
pub struct ErrorSink {
    callback: Arc<RwLock<Option<ErrorCallback>>>,
}

impl ErrorSink {
    pub fn set(&self, callback: ErrorCallback) {
        *self.callback.write() = Some(callback);
    }

    pub fn report(&self, err: &PoseError) {
        error!("{}", err);
        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback(err);
        }
    }
}

/// State shared by the dispatcher, heartbeat, worker manager and sampling loop
pub struct BridgeState {
    pub landmarks: LandmarkStore,
    initialized: AtomicBool,
    model_available: AtomicBool,
    pong_count: AtomicU64,
    worker_state: RwLock<WorkerState>,
    init_tx: watch::Sender<InitOutcome>,
}

impl Default for BridgeState {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeState {
    pub fn new() -> Self {
        let (init_tx, _) = watch::channel(InitOutcome::Pending);
        Self {
            landmarks: LandmarkStore::new(),
            initialized: AtomicBool::new(false),
            model_available: AtomicBool::new(false),
            pong_count: AtomicU64::new(0),
            worker_state: RwLock::new(WorkerState::NotStarted),
            init_tx,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn model_available(&self) -> bool {
        self.model_available.load(Ordering::SeqCst)
    }

    pub fn pong_count(&self) -> u64 {
        self.pong_count.load(Ordering::SeqCst)
    }

    pub fn worker_state(&self) -> WorkerState {
        *self.worker_state.read()
    }

    pub fn set_worker_state(&self, state: WorkerState) {
        let mut current = self.worker_state.write();
        if *current != state {
            debug!("Worker state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Clears the initialized flag and re-arms the init handshake
    pub fn reset_init(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        self.init_tx.send_replace(InitOutcome::Pending);
    }

    pub fn subscribe_init(&self) -> watch::Receiver<InitOutcome> {
        self.init_tx.subscribe()
    }

    /// Forget everything learned from the previous session
    pub fn reset(&self) {
        self.reset_init();
        self.landmarks.clear();
        self.model_available.store(false, Ordering::SeqCst);
        self.set_worker_state(WorkerState::NotStarted);
    }
}

pub struct ResponseDispatcher {
    state: Arc<BridgeState>,
    errors: ErrorSink,
}

impl ResponseDispatcher {
    pub fn new(state: Arc<BridgeState>, errors: ErrorSink) -> Self {
        Self { state, errors }
    }

    pub fn dispatch(&self, response: Response) {
        match response {
            Response::InitResponse { success, message } => {
                self.state.initialized.store(success, Ordering::SeqCst);
                if success {
                    info!("Pose worker initialized");
                    self.state.set_worker_state(WorkerState::Ready);
                    self.state.init_tx.send_replace(InitOutcome::Ready);
                } else {
                    let message = message.unwrap_or_else(|| "worker rejected init".to_string());
                    warn!("Pose worker init failed: {}", message);
                    self.state.init_tx.send_replace(InitOutcome::Failed(message));
                }
            }
            Response::Detection(payload) => {
                let timestamp = chrono::Utc::now().timestamp_millis();
                match decode_detection(&payload, timestamp) {
                    DetectionOutcome::Accepted(set) => {
                        self.state.landmarks.apply(DetectionOutcome::Accepted(set));
                        if self.state.worker_state() == WorkerState::Ready {
                            self.state.set_worker_state(WorkerState::Detecting);
                        }
                    }
                    DetectionOutcome::Rejected { reason, point_count } => {
                        debug!("Dropping detection ({} points): {}", point_count, reason);
                    }
                }
            }
            Response::Pong(pong) => {
                self.state.pong_count.fetch_add(1, Ordering::SeqCst);
                self.state
                    .model_available
                    .store(pong.model_available, Ordering::SeqCst);
                debug!(
                    "Pong: alive={}, model_available={}, initialized={}",
                    pong.alive, pong.model_available, pong.initialized
                );
            }
            Response::StatusResponse(status) => {
                debug!("Worker status: {}", status);
            }
            Response::CloseResponse => {
                info!("Pose worker acknowledged close");
            }
            Response::Error { message } => {
                self.errors.report(&PoseError::WorkerReported(message));
            }
            Response::Unknown { kind } => {
                warn!("Unknown response type: {}", kind);
            }
        }
    }

    /// Drains `responses` in arrival order until the channel closes or shutdown is signalled
    pub fn spawn(self, mut responses: mpsc::Receiver<Response>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    response = responses.recv() => match response {
                        Some(response) => self.dispatch(response),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("Response dispatcher stopped");
        })
    }
}
