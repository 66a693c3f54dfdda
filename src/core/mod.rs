pub mod config;

// Worker supervision and the command/response channel
pub mod heartbeat;
pub mod response_dispatcher;
pub mod worker_manager;

// Frames out, keypoints in
pub mod frame_encoder;
pub mod landmark_decoder;

// Scoring pipeline
pub mod posture_metrics;
pub mod presence_detector;
pub mod score_engine;
pub mod score_smoother;
pub mod scoring_pipeline;

pub mod posture_tracker;
