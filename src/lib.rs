pub mod core;
pub mod models;
pub mod platform;

pub use crate::core::config::{Config, TransportKind};
pub use crate::core::posture_tracker::{PostureTracker, Presence};
pub use crate::core::score_engine::Calibration;
pub use crate::models::capture::{PixelFormat, RawFrame};
pub use crate::models::pose::{
    KeypointSet, PoseError, PoseResult, PostureStatus, ScoreResult, ScoringMode, TrackingStatus, WorkerState,
};

/// Installs the formatting subscriber, filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "posture_bridge=info".into()),
        )
        .try_init();
}
