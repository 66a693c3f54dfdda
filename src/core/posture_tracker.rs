// Posture tracker - the public face of the bridge
//
// Owns one tracking session at a time: worker process, channel, response
// dispatcher, heartbeat supervision and the sampling loop that turns the
// latest keypoints into a smoothed score.

use crate::core::config::Config;
use crate::core::frame_encoder::FrameEncoder;
use crate::core::heartbeat::{HeartbeatEvent, HeartbeatMonitor, HeartbeatSettings};
use crate::core::response_dispatcher::{BridgeState, ErrorCallback, ErrorSink, InitOutcome, ResponseDispatcher};
use crate::core::score_engine::{Calibration, CalibrationStore, LiveSnapshot};
use crate::core::scoring_pipeline::{PipelineOutput, ScoringPipeline};
use crate::core::worker_manager::WorkerManager;
use crate::models::capture::RawFrame;
use crate::models::pose::{
    KeypointSet, PoseError, PoseResult, ScoreResult, ScoringMode, TrackingStatus, WorkerState,
};
use crate::models::protocol::{Command, Response};
use crate::platform::pose::{create_transport, PoseTransport};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Buffered responses between a transport and the dispatcher
const RESPONSE_QUEUE: usize = 100;

/// How long a stopping task may take before it is aborted
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Presence as seen by the last sampling tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presence {
    pub present: bool,
    /// Person came back within the last few seconds
    pub returned_notice: bool,
}

struct Session {
    shutdown: Arc<watch::Sender<bool>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    fn is_finished(&self) -> bool {
        *self.shutdown.borrow()
    }
}

struct Inner {
    config: Config,
    state: Arc<BridgeState>,
    worker: Arc<WorkerManager>,
    transport: Arc<dyn PoseTransport>,
    encoder: FrameEncoder,
    errors: ErrorSink,
    calibration: CalibrationStore,
    mode: RwLock<ScoringMode>,
    tilt_sample: RwLock<Option<f64>>,
    status: RwLock<TrackingStatus>,
    last_tick: RwLock<PipelineOutput>,
}

pub struct PostureTracker {
    inner: Arc<Inner>,
    session: Mutex<Option<Session>>,
}

impl PostureTracker {
    /// Builds a tracker whose transport is chosen by `config.transport`
    pub fn new(config: Config) -> PoseResult<Self> {
        config.validate()?;
        let state = Arc::new(BridgeState::new());
        let worker = Arc::new(WorkerManager::new(config.clone(), state.clone()));
        let transport = create_transport(&config, worker.clone());
        Ok(Self::assemble(config, state, worker, transport))
    }

    /// Builds a tracker around an already constructed transport
    pub fn with_transport(config: Config, transport: Arc<dyn PoseTransport>) -> PoseResult<Self> {
        config.validate()?;
        let state = Arc::new(BridgeState::new());
        let worker = Arc::new(WorkerManager::new(config.clone(), state.clone()));
        Ok(Self::assemble(config, state, worker, transport))
    }

    fn assemble(
        config: Config,
        state: Arc<BridgeState>,
        worker: Arc<WorkerManager>,
        transport: Arc<dyn PoseTransport>,
    ) -> Self {
        let encoder = FrameEncoder::new(transport.frame_encoding(), config.jpeg_quality);
        let mode = config.scoring_mode;
        Self {
            inner: Arc::new(Inner {
                config,
                state,
                worker,
                transport,
                encoder,
                errors: ErrorSink::default(),
                calibration: CalibrationStore::default(),
                mode: RwLock::new(mode),
                tilt_sample: RwLock::new(None),
                status: RwLock::new(TrackingStatus::Idle),
                last_tick: RwLock::new(PipelineOutput::default()),
            }),
            session: Mutex::new(None),
        }
    }

    /// Starts the worker, performs the init handshake and begins sampling.
    ///
    /// Fails only for the fatal cases; the tracker is then `Unavailable`.
    pub async fn start_tracking(&self) -> PoseResult<()> {
        let mut session = self.session.lock().await;
        match session.take() {
            Some(running) if !running.is_finished() => {
                *session = Some(running);
                return Err(PoseError::AlreadyRunning);
            }
            // a session that ended on a fatal error is cleaned up first
            Some(finished) => self.inner.teardown(finished).await,
            None => {}
        }

        self.inner.set_status(TrackingStatus::Starting);
        self.inner.state.reset();
        *self.inner.last_tick.write() = PipelineOutput::default();
        info!("Starting posture tracking over {} channel", self.inner.transport.name());

        match self.inner.clone().launch().await {
            Ok(started) => {
                *session = Some(started);
                self.inner.set_status(TrackingStatus::Tracking);
                info!("Posture tracking started");
                Ok(())
            }
            Err(e) => {
                self.inner.worker.stop(self.inner.transport.as_ref()).await;
                self.inner.transport.close().await;
                self.inner.fail(&e);
                Err(e)
            }
        }
    }

    /// Stops every loop and the worker; a no-op when not tracking
    pub async fn stop_tracking(&self) -> PoseResult<()> {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return Ok(());
        };

        self.inner.teardown(session).await;
        self.inner.state.reset();
        *self.inner.last_tick.write() = PipelineOutput::default();
        self.inner.set_status(TrackingStatus::Idle);
        info!("Posture tracking stopped");
        Ok(())
    }

    /// Encodes a camera frame and sends it for detection.
    ///
    /// Frames arriving before the worker is initialized are dropped.
    pub async fn submit_frame(&self, frame: &RawFrame) -> PoseResult<()> {
        if matches!(self.get_status(), TrackingStatus::Idle | TrackingStatus::Unavailable(_)) {
            return Err(PoseError::NotRunning);
        }
        if !self.inner.state.is_initialized() {
            debug!("Dropping frame, worker not initialized");
            return Ok(());
        }

        let encoder = self.inner.encoder;
        let frame = frame.clone();
        let encoded = tokio::task::spawn_blocking(move || encoder.encode(&frame))
            .await
            .map_err(|e| PoseError::EncodeFailed(e.to_string()))??;

        self.inner.transport.send(Command::Detect(encoded)).await
    }

    /// Latest complete keypoint set
    pub fn get_landmarks(&self) -> Option<Arc<KeypointSet>> {
        self.inner.state.landmarks.latest()
    }

    /// Smoothed score, `None` while nobody is in frame
    pub fn get_score(&self) -> Option<ScoreResult> {
        let tick = self.inner.last_tick.read();
        if tick.present {
            tick.smoothed
        } else {
            None
        }
    }

    pub fn get_status(&self) -> TrackingStatus {
        let status = self.inner.status.read().clone();
        match status {
            TrackingStatus::Tracking if !self.inner.last_tick.read().present => TrackingStatus::PersonNotInFrame,
            other => other,
        }
    }

    pub fn presence(&self) -> Presence {
        let tick = self.inner.last_tick.read();
        Presence {
            present: tick.present,
            returned_notice: tick.returned_notice,
        }
    }

    /// Inputs used by the last sampling tick
    pub fn live_snapshot(&self) -> LiveSnapshot {
        self.inner.last_tick.read().live
    }

    /// Captures the current posture as the baseline for the active mode
    pub fn calibrate(&self) -> PoseResult<Arc<Calibration>> {
        let mode = self.scoring_mode();
        let live = self.live_snapshot();
        self.inner.calibration.calibrate(mode, &live).map_err(|e| {
            warn!("Calibration rejected: {}", e);
            e
        })
    }

    pub fn calibration(&self) -> Arc<Calibration> {
        self.inner.calibration.snapshot()
    }

    pub fn reset_calibration(&self) {
        self.inner.calibration.reset();
    }

    pub fn scoring_mode(&self) -> ScoringMode {
        *self.inner.mode.read()
    }

    pub fn set_scoring_mode(&self, mode: ScoringMode) {
        let mut current = self.inner.mode.write();
        if *current != mode {
            info!("Scoring mode {} -> {}", current.to_string(), mode.to_string());
            *current = mode;
        }
    }

    /// Externally measured head tilt in degrees, used by tilt-only scoring
    pub fn set_tilt_sample(&self, tilt: Option<f64>) {
        *self.inner.tilt_sample.write() = tilt;
    }

    /// Registers the callback that receives surfaced errors
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&PoseError) + Send + Sync + 'static,
    {
        let callback: ErrorCallback = Arc::new(callback);
        self.inner.errors.set(callback);
    }

    pub fn worker_state(&self) -> WorkerState {
        self.inner.state.worker_state()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    fn set_status(&self, status: TrackingStatus) {
        let mut current = self.status.write();
        if *current != status {
            debug!("Tracking status: {}", status);
            *current = status;
        }
    }

    /// Surfaces a fatal error as the unavailable state
    fn fail(&self, err: &PoseError) {
        self.set_status(TrackingStatus::Unavailable(err.to_string()));
        self.errors.report(err);
    }

    async fn launch(self: Arc<Self>) -> PoseResult<Session> {
        self.worker.start().await?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shutdown = Arc::new(shutdown);
        let (responses, responses_rx) = mpsc::channel(RESPONSE_QUEUE);
        let dispatcher = ResponseDispatcher::new(self.state.clone(), self.errors.clone())
            .spawn(responses_rx, shutdown_rx.clone());

        let connected = match self.transport.open(responses.clone()).await {
            Ok(()) => self.handshake().await,
            Err(e) => Err(e),
        };
        if let Err(e) = connected {
            let _ = shutdown.send(true);
            let _ = dispatcher.await;
            return Err(e);
        }

        let supervisor = tokio::spawn(self.clone().supervise(responses, shutdown.clone(), shutdown_rx.clone()));
        let sampler = tokio::spawn(self.clone().sampling_loop(shutdown_rx));

        Ok(Session {
            shutdown,
            tasks: vec![dispatcher, supervisor, sampler],
        })
    }

    /// Ping probe, then init; waits for the init response
    async fn handshake(&self) -> PoseResult<()> {
        self.state.reset_init();
        let mut init = self.state.subscribe_init();

        self.transport.send(Command::Ping).await?;
        self.transport
            .send(Command::Init {
                model_path: self.config.model_path.clone(),
            })
            .await?;

        let timeout = self.config.init_timeout();
        let waited = tokio::time::timeout(timeout, async {
            init.wait_for(|outcome| *outcome != InitOutcome::Pending)
                .await
                .map(|outcome| outcome.clone())
        })
        .await;

        match waited {
            Ok(Ok(InitOutcome::Ready)) => Ok(()),
            Ok(Ok(InitOutcome::Failed(message))) => {
                Err(PoseError::WorkerStartupFailure(format!("init rejected: {}", message)))
            }
            Ok(Ok(InitOutcome::Pending)) | Ok(Err(_)) => Err(PoseError::WorkerStartupFailure(
                "init handshake interrupted".to_string(),
            )),
            Err(_) => Err(PoseError::WorkerStartupFailure(format!(
                "no init response within {:?}",
                timeout
            ))),
        }
    }

    fn spawn_heartbeat(
        &self,
        events: mpsc::Sender<HeartbeatEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        HeartbeatMonitor::new(
            self.transport.clone(),
            self.worker.clone(),
            self.state.clone(),
            HeartbeatSettings::from_config(&self.config),
        )
        .spawn(events, shutdown)
    }

    /// Runs heartbeats and turns a reported death into one restart or a fatal stop
    async fn supervise(
        self: Arc<Self>,
        responses: mpsc::Sender<Response>,
        stop: Arc<watch::Sender<bool>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (events_tx, mut events) = mpsc::channel(4);
        let mut heartbeat = self.spawn_heartbeat(events_tx.clone(), shutdown.clone());

        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = shutdown.changed() => None,
            };
            let Some(HeartbeatEvent::WorkerDied { reason }) = event else {
                break;
            };

            match self.recover(&reason, &responses).await {
                Ok(()) => {
                    info!("Pose worker recovered");
                    heartbeat = self.spawn_heartbeat(events_tx.clone(), shutdown.clone());
                }
                Err(e) => {
                    self.transport.close().await;
                    self.fail(&e);
                    let _ = stop.send(true);
                    break;
                }
            }
        }

        if tokio::time::timeout(TASK_STOP_TIMEOUT, &mut heartbeat).await.is_err() {
            heartbeat.abort();
        }
        debug!("Supervisor stopped");
    }

    async fn recover(&self, reason: &str, responses: &mpsc::Sender<Response>) -> PoseResult<()> {
        self.worker.detect_death(reason).await?;
        self.transport.close().await;
        self.transport.open(responses.clone()).await?;
        self.handshake().await
    }

    async fn sampling_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let started = tokio::time::Instant::now();
        let mut pipeline = ScoringPipeline::new();
        let mut mode = *self.mode.read();
        let mut ticker = tokio::time::interval(self.config.sample_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let current_mode = *self.mode.read();
            if current_mode != mode {
                // scores from different strategies do not mix
                pipeline.reset();
                mode = current_mode;
            }

            let keypoints = self.state.landmarks.latest();
            let calibration = self.calibration.snapshot();
            let tilt = *self.tilt_sample.read();
            let now_ms = started.elapsed().as_millis() as i64;

            let output = pipeline.tick(now_ms, keypoints.as_deref(), tilt, mode, &calibration);
            if output.returned {
                info!("Person back in frame");
            }
            *self.last_tick.write() = output;
        }
        debug!("Sampling loop stopped");
    }

    /// Stops loops first so a closing worker is not mistaken for a dead one
    async fn teardown(&self, session: Session) {
        let _ = session.shutdown.send(true);
        for mut task in session.tasks {
            if tokio::time::timeout(TASK_STOP_TIMEOUT, &mut task).await.is_err() {
                warn!("Tracking task did not stop in time, aborting");
                task.abort();
            }
        }
        self.worker.stop(self.transport.as_ref()).await;
        self.transport.close().await;
    }
}
