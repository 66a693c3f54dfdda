// Wire protocol between the bridge and the pose worker

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::capture::EncodedFrame;
use super::pose::{PoseError, PoseResult};

// ==============================================================================
// Commands (bridge -> worker)
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Init { model_path: Option<String> },
    Detect(EncodedFrame),
    Ping,
    Status,
    Close,
}

/// The two transports disagree on the detect payload field names
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireDialect {
    FileDrop,
    WebSocket,
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Init { .. } => "init",
            Command::Detect(_) => "detect",
            Command::Ping => "ping",
            Command::Status => "status",
            Command::Close => "close",
        }
    }

    pub fn to_json(&self, dialect: WireDialect) -> Value {
        match self {
            Command::Init {
                model_path: Some(path),
            } => json!({ "type": "init", "model_path": path }),
            Command::Init { model_path: None } => json!({ "type": "init" }),
            Command::Detect(frame) => match dialect {
                WireDialect::FileDrop => json!({
                    "type": "detect",
                    "frame_data": frame.base64,
                    "timestamp": frame.timestamp.to_string(),
                }),
                WireDialect::WebSocket => json!({
                    "type": "detect",
                    "image": frame.base64,
                    "ts": frame.timestamp,
                }),
            },
            Command::Ping => json!({ "type": "ping" }),
            Command::Status => json!({ "type": "status" }),
            Command::Close => json!({ "type": "close" }),
        }
    }
}

// ==============================================================================
// Responses (worker -> bridge)
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    InitResponse {
        success: bool,
        message: Option<String>,
    },
    Detection(DetectionPayload),
    Pong(PongPayload),
    StatusResponse(Value),
    CloseResponse,
    Error {
        message: String,
    },
    Unknown {
        kind: String,
    },
}

/// A landmark as the worker sends it; either coordinate may be absent
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WireLandmark {
    pub x: Option<f64>,
    pub y: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionPayload {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub landmarks: Option<Vec<WireLandmark>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct PongPayload {
    pub alive: bool,
    #[serde(alias = "mediapipe_available")]
    pub model_available: bool,
    pub initialized: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InitPayload {
    success: bool,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorPayload {
    message: Option<String>,
}

impl Response {
    pub fn kind(&self) -> &str {
        match self {
            Response::InitResponse { .. } => "init_response",
            Response::Detection(_) => "detection",
            Response::Pong(_) => "pong",
            Response::StatusResponse(_) => "status_response",
            Response::CloseResponse => "close_response",
            Response::Error { .. } => "error",
            Response::Unknown { kind } => kind,
        }
    }

    pub fn parse(text: &str) -> PoseResult<Self> {
        let root: Value = serde_json::from_str(text)
            .map_err(|e| PoseError::MalformedResponse(format!("invalid JSON: {}", e)))?;
        Self::from_value(root)
    }

    /// Decodes a response whose payload is either nested under `data` or flat.
    pub fn from_value(root: Value) -> PoseResult<Self> {
        let Value::Object(mut fields) = root else {
            return Err(PoseError::MalformedResponse(
                "response is not a JSON object".to_string(),
            ));
        };

        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => {
                return Err(PoseError::MalformedResponse(
                    "missing type discriminator".to_string(),
                ))
            }
        };

        let payload = match fields.remove("data") {
            Some(Value::Object(mut data)) => {
                // top-level fields fill gaps left by the nested payload
                for (key, value) in fields {
                    data.entry(key).or_insert(value);
                }
                Value::Object(data)
            }
            _ => Value::Object(fields),
        };

        let response = match kind.as_str() {
            "init_response" => {
                let init: InitPayload = decode_payload(&kind, payload)?;
                Response::InitResponse {
                    success: init.success,
                    message: init.message,
                }
            }
            "detection" | "detection_result" => Response::Detection(decode_payload(&kind, payload)?),
            "pong" => Response::Pong(decode_payload(&kind, payload)?),
            "status_response" => Response::StatusResponse(payload),
            "close_response" => Response::CloseResponse,
            "error" => {
                let error: ErrorPayload = decode_payload(&kind, payload)?;
                Response::Error {
                    message: error.message.unwrap_or_else(|| "Unknown error".to_string()),
                }
            }
            _ => Response::Unknown { kind },
        };

        Ok(response)
    }
}

/// Reads the request id a file-drop worker stamps on each response
pub fn request_id(root: &Value) -> Option<&str> {
    root.get("request_id").and_then(|v| v.as_str())
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: Value) -> PoseResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| PoseError::MalformedResponse(format!("bad {} payload: {}", kind, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::ImageEncoding;

    fn frame() -> EncodedFrame {
        EncodedFrame {
            base64: "aGVsbG8=".to_string(),
            encoding: ImageEncoding::Png,
            timestamp: 1_700_000_000_123,
        }
    }

    #[test]
    fn test_detect_command_dialects() {
        let cmd = Command::Detect(frame());

        let file_drop = cmd.to_json(WireDialect::FileDrop);
        assert_eq!(file_drop["type"], "detect");
        assert_eq!(file_drop["frame_data"], "aGVsbG8=");
        assert_eq!(file_drop["timestamp"], "1700000000123");

        let ws = cmd.to_json(WireDialect::WebSocket);
        assert_eq!(ws["image"], "aGVsbG8=");
        assert_eq!(ws["ts"], 1_700_000_000_123i64);
        assert!(ws.get("frame_data").is_none());
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(Command::Ping.to_json(WireDialect::FileDrop), json!({"type": "ping"}));
        assert_eq!(Command::Close.to_json(WireDialect::WebSocket), json!({"type": "close"}));
        let init = Command::Init {
            model_path: Some("pose_landmarker_full.task".into()),
        };
        assert_eq!(
            init.to_json(WireDialect::FileDrop)["model_path"],
            "pose_landmarker_full.task"
        );
    }

    #[test]
    fn test_nested_and_flat_detection() {
        let nested = r#"{"type":"detection_result","request_id":"a","data":{"success":true,"landmarks":[{"x":0.1,"y":0.2}]}}"#;
        let flat = r#"{"type":"detection","success":true,"landmarks":[{"x":0.1,"y":0.2}]}"#;

        for text in [nested, flat] {
            match Response::parse(text).unwrap() {
                Response::Detection(payload) => {
                    assert!(payload.success);
                    let landmarks = payload.landmarks.unwrap();
                    assert_eq!(landmarks.len(), 1);
                    assert_eq!(landmarks[0].x, Some(0.1));
                }
                other => panic!("unexpected response: {:?}", other),
            }
        }
    }

    #[test]
    fn test_detection_round_trip_keeps_values() {
        let landmarks: Vec<WireLandmark> = (0..33)
            .map(|i| WireLandmark {
                x: Some(i as f64 / 33.0),
                y: Some(1.0 - i as f64 / 33.0),
            })
            .collect();
        let payload = DetectionPayload {
            success: true,
            landmarks: Some(landmarks.clone()),
            message: None,
        };
        let text = json!({"type": "detection_result", "data": payload}).to_string();

        let Response::Detection(decoded) = Response::parse(&text).unwrap() else {
            panic!("expected detection");
        };
        let decoded = decoded.landmarks.unwrap();
        assert_eq!(decoded.len(), 33);
        for (a, b) in decoded.iter().zip(landmarks.iter()) {
            assert!((a.x.unwrap() - b.x.unwrap()).abs() < 1e-9);
            assert!((a.y.unwrap() - b.y.unwrap()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_missing_fields_default() {
        let pong = Response::parse(r#"{"type":"pong","data":{"alive":true,"mediapipe_available":true}}"#).unwrap();
        assert_eq!(
            pong,
            Response::Pong(PongPayload {
                alive: true,
                model_available: true,
                initialized: false,
            })
        );

        let init = Response::parse(r#"{"type":"init_response"}"#).unwrap();
        assert_eq!(
            init,
            Response::InitResponse {
                success: false,
                message: None
            }
        );

        let error = Response::parse(r#"{"type":"error"}"#).unwrap();
        assert_eq!(
            error,
            Response::Error {
                message: "Unknown error".into()
            }
        );
    }

    #[test]
    fn test_flat_error_and_top_level_success() {
        let error = Response::parse(r#"{"type":"error","message":"camera busy"}"#).unwrap();
        assert_eq!(error.kind(), "error");
        assert_eq!(
            error,
            Response::Error {
                message: "camera busy".into()
            }
        );

        let init = Response::parse(r#"{"type":"init_response","success":true,"data":{"message":"ok"}}"#).unwrap();
        assert_eq!(
            init,
            Response::InitResponse {
                success: true,
                message: Some("ok".into())
            }
        );
    }

    #[test]
    fn test_unknown_and_malformed() {
        let unknown = Response::parse(r#"{"type":"telemetry","data":{}}"#).unwrap();
        assert_eq!(
            unknown,
            Response::Unknown {
                kind: "telemetry".into()
            }
        );

        assert!(matches!(
            Response::parse("{not json"),
            Err(PoseError::MalformedResponse(_))
        ));
        assert!(matches!(
            Response::parse(r#"{"data":{}}"#),
            Err(PoseError::MalformedResponse(_))
        ));
        assert!(matches!(
            Response::parse(r#"[1,2,3]"#),
            Err(PoseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_request_id() {
        let root: Value = serde_json::from_str(r#"{"type":"pong","request_id":"req_1"}"#).unwrap();
        assert_eq!(request_id(&root), Some("req_1"));
    }
}
