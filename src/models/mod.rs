// Data models for pose keypoints, scoring, camera frames, and the worker wire protocol

pub mod capture;
pub mod pose;
pub mod protocol;
