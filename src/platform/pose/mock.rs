// Scripted in-memory transport for tracker and heartbeat tests

use super::PoseTransport;
use crate::models::pose::{BodyLandmark, PoseError, PoseResult, KEYPOINT_COUNT};
use crate::models::protocol::{Command, DetectionPayload, PongPayload, Response, WireDialect, WireLandmark};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc;

/// Answers commands the way a healthy worker would, with switches to misbehave
pub struct MockTransport {
    sent: Mutex<Vec<Command>>,
    responses: Mutex<Option<mpsc::Sender<Response>>>,
    open: AtomicBool,
    opens: AtomicUsize,
    answer_pings: AtomicBool,
    init_success: AtomicBool,
    detection_points: AtomicUsize,
    detections: AtomicU64,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(None),
            open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            answer_pings: AtomicBool::new(true),
            init_success: AtomicBool::new(true),
            detection_points: AtomicUsize::new(KEYPOINT_COUNT),
            detections: AtomicU64::new(0),
        }
    }

    pub fn set_answer_pings(&self, answer: bool) {
        self.answer_pings.store(answer, Ordering::SeqCst);
    }

    pub fn set_init_success(&self, success: bool) {
        self.init_success.store(success, Ordering::SeqCst);
    }

    /// Number of landmarks in each detection reply
    pub fn set_detection_points(&self, points: usize) {
        self.detection_points.store(points, Ordering::SeqCst);
    }

    /// Simulates the worker side going away without a close
    pub fn drop_connection(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().iter().filter(|c| c.kind() == kind).count()
    }

    pub fn sent(&self) -> Vec<Command> {
        self.sent.lock().clone()
    }

    /// Pushes an unsolicited response into the stream
    pub async fn push(&self, response: Response) {
        let tx = self.responses.lock().clone();
        if let Some(tx) = tx {
            let _ = tx.send(response).await;
        }
    }

    fn reply_to(&self, command: &Command) -> Option<Response> {
        match command {
            Command::Init { .. } => Some(Response::InitResponse {
                success: self.init_success.load(Ordering::SeqCst),
                message: None,
            }),
            Command::Ping => self.answer_pings.load(Ordering::SeqCst).then(|| {
                Response::Pong(PongPayload {
                    alive: true,
                    model_available: true,
                    initialized: true,
                })
            }),
            Command::Status => Some(Response::StatusResponse(json!({ "ok": true }))),
            Command::Detect(_) => {
                let n = self.detections.fetch_add(1, Ordering::SeqCst);
                let points = self.detection_points.load(Ordering::SeqCst);
                Some(Response::Detection(DetectionPayload {
                    success: true,
                    landmarks: Some(pose_landmarks(n, points)),
                    message: None,
                }))
            }
            Command::Close => Some(Response::CloseResponse),
        }
    }
}

/// Upright pose whose head bobs a little between frames so the ratio keeps moving
pub fn pose_landmarks(frame: u64, points: usize) -> Vec<WireLandmark> {
    let mut landmarks = vec![
        WireLandmark {
            x: Some(0.5),
            y: Some(0.5),
        };
        KEYPOINT_COUNT
    ];
    let bob = if frame % 2 == 0 { 0.0 } else { 0.02 };
    let mut set = |landmark: BodyLandmark, x: f64, y: f64| {
        landmarks[landmark.index()] = WireLandmark {
            x: Some(x),
            y: Some(y),
        };
    };
    set(BodyLandmark::Nose, 0.5, 0.3 + bob);
    set(BodyLandmark::LeftEye, 0.47, 0.27 + bob);
    set(BodyLandmark::RightEye, 0.53, 0.27 + bob);
    set(BodyLandmark::LeftShoulder, 0.6, 0.5);
    set(BodyLandmark::RightShoulder, 0.4, 0.5);
    set(BodyLandmark::LeftHip, 0.58, 0.9);
    set(BodyLandmark::RightHip, 0.42, 0.9);
    landmarks.truncate(points);
    landmarks
}

#[async_trait]
impl PoseTransport for MockTransport {
    async fn open(&self, responses: mpsc::Sender<Response>) -> PoseResult<()> {
        *self.responses.lock() = Some(responses);
        self.open.store(true, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, command: Command) -> PoseResult<()> {
        if !self.is_alive() {
            return Err(PoseError::ConnectionFailure("mock transport closed".to_string()));
        }
        self.sent.lock().push(command.clone());
        if let Some(reply) = self.reply_to(&command) {
            self.push(reply).await;
        }
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.responses.lock().take();
    }

    fn dialect(&self) -> WireDialect {
        WireDialect::FileDrop
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
