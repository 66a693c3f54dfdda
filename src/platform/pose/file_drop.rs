// File-drop transport: commands and responses exchanged as JSON files in two directories

use super::PoseTransport;
use crate::models::pose::{PoseError, PoseResult};
use crate::models::protocol::{request_id, Command, Response, WireDialect};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay before rescanning after a failed scan
const ERROR_BACKOFF: Duration = Duration::from_millis(1000);

/// How many recent request ids are remembered for duplicate detection
const SEEN_CAPACITY: usize = 256;

struct PollLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct FileDropTransport {
    command_dir: PathBuf,
    response_dir: PathBuf,
    poll_interval: Duration,
    poll: Mutex<Option<PollLoop>>,
}

impl FileDropTransport {
    pub fn new(command_dir: PathBuf, response_dir: PathBuf, poll_interval: Duration) -> Self {
        Self {
            command_dir,
            response_dir,
            poll_interval,
            poll: Mutex::new(None),
        }
    }

    pub fn command_dir(&self) -> &Path {
        &self.command_dir
    }

    pub fn response_dir(&self) -> &Path {
        &self.response_dir
    }

    async fn stop_poll_loop(&self) {
        let poll = self.poll.lock().take();
        if let Some(poll) = poll {
            let _ = poll.shutdown.send(true);
            let mut handle = poll.handle;
            if tokio::time::timeout(Duration::from_secs(1), &mut handle).await.is_err() {
                warn!("Response poll loop did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl PoseTransport for FileDropTransport {
    async fn open(&self, responses: mpsc::Sender<Response>) -> PoseResult<()> {
        self.stop_poll_loop().await;

        tokio::fs::create_dir_all(&self.command_dir).await?;
        tokio::fs::create_dir_all(&self.response_dir).await?;

        // responses are left alone: the worker may already have written some
        let stale = clear_json_files(&self.command_dir).await;
        if stale > 0 {
            debug!("Removed {} unsent command files", stale);
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(
            self.response_dir.clone(),
            self.poll_interval,
            responses,
            shutdown_rx,
        ));
        *self.poll.lock() = Some(PollLoop { shutdown, handle });

        info!(
            "File-drop channel open (commands: {}, responses: {})",
            self.command_dir.display(),
            self.response_dir.display()
        );
        Ok(())
    }

    async fn send(&self, command: Command) -> PoseResult<()> {
        let body = serde_json::to_vec(&command.to_json(WireDialect::FileDrop))?;
        let name = format!("req_{}.json", Uuid::new_v4().simple());
        let staging = self.command_dir.join(format!("{}.tmp", name));

        // the worker only picks up *.json, so it never sees a half-written file
        tokio::fs::write(&staging, body).await?;
        tokio::fs::rename(&staging, self.command_dir.join(&name)).await?;

        debug!("Sent {} command as {}", command.kind(), name);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.poll
            .lock()
            .as_ref()
            .is_some_and(|poll| !poll.handle.is_finished())
    }

    async fn close(&self) {
        self.stop_poll_loop().await;
        let removed = clear_json_files(&self.command_dir).await + clear_json_files(&self.response_dir).await;
        debug!("File-drop channel closed, removed {} message files", removed);
    }

    fn dialect(&self) -> WireDialect {
        WireDialect::FileDrop
    }

    fn name(&self) -> &'static str {
        "file-drop"
    }
}

async fn poll_loop(
    response_dir: PathBuf,
    interval: Duration,
    responses: mpsc::Sender<Response>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut seen = RecentIds::new(SEEN_CAPACITY);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delay = match scan_responses(&response_dir, &responses, &mut seen).await {
            Ok(true) => interval,
            Ok(false) => break,
            Err(e) => {
                warn!("Response poll failed: {}", e);
                ERROR_BACKOFF
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!("Response poll loop stopped");
}

/// One pass over the response directory. Returns `Ok(false)` once nobody is listening.
async fn scan_responses(
    dir: &Path,
    responses: &mpsc::Sender<Response>,
    seen: &mut RecentIds,
) -> PoseResult<bool> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let modified = entry.metadata().await.ok().and_then(|m| m.modified().ok());
        files.push((modified, path));
    }

    // oldest first, name as tie-break
    files.sort();

    for (_, path) in files {
        let outcome = read_response(&path, seen).await;

        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("Could not remove {}: {}", path.display(), e);
        }

        match outcome {
            Ok(Some(response)) => {
                if responses.send(response).await.is_err() {
                    return Ok(false);
                }
            }
            Ok(None) => debug!("Ignoring duplicate response {}", path.display()),
            Err(e) => warn!("Dropping {}: {}", path.display(), e),
        }
    }

    Ok(true)
}

async fn read_response(path: &Path, seen: &mut RecentIds) -> PoseResult<Option<Response>> {
    let text = tokio::fs::read_to_string(path).await?;
    let root: Value = serde_json::from_str(&text)
        .map_err(|e| PoseError::MalformedResponse(format!("invalid JSON: {}", e)))?;

    if let Some(id) = request_id(&root) {
        if !seen.insert(id) {
            return Ok(None);
        }
    }

    Response::from_value(root).map(Some)
}

/// Removes `*.json` and staging files, returning how many were deleted
pub(crate) async fn clear_json_files(dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let is_message = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some("json") | Some("tmp")
        );
        if is_message && tokio::fs::remove_file(&path).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Bounded set of recently seen request ids
struct RecentIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Returns false if `id` was already seen
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        self.ids.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capture::{EncodedFrame, ImageEncoding};

    fn transport(root: &Path) -> FileDropTransport {
        FileDropTransport::new(
            root.join("commands"),
            root.join("responses"),
            Duration::from_millis(10),
        )
    }

    fn json_files(dir: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        files.sort();
        files
    }

    async fn next(rx: &mut mpsc::Receiver<Response>) -> Response {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for response")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_send_writes_command_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();

        transport
            .send(Command::Detect(EncodedFrame {
                base64: "AAAA".into(),
                encoding: ImageEncoding::Png,
                timestamp: 42,
            }))
            .await
            .unwrap();

        let files = json_files(transport.command_dir());
        assert_eq!(files.len(), 1);
        let name = files[0].file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("req_"));

        let body: Value = serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        assert_eq!(body["type"], "detect");
        assert_eq!(body["frame_data"], "AAAA");
        assert_eq!(body["timestamp"], "42");

        transport.close().await;
    }

    #[tokio::test]
    async fn test_poll_dispatches_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();
        assert!(transport.is_alive());

        let responses = transport.response_dir().to_path_buf();
        std::fs::write(responses.join("response_1.json"), "{ this is not json").unwrap();
        std::fs::write(
            responses.join("response_2.json"),
            r#"{"type":"pong","request_id":"2","data":{"alive":true}}"#,
        )
        .unwrap();

        match next(&mut rx).await {
            Response::Pong(pong) => assert!(pong.alive),
            other => panic!("unexpected {:?}", other),
        }

        // the malformed file was dropped without stopping the loop
        std::fs::write(
            responses.join("response_3.json"),
            r#"{"type":"init_response","request_id":"3","data":{"success":true}}"#,
        )
        .unwrap();
        assert!(matches!(next(&mut rx).await, Response::InitResponse { success: true, .. }));
        assert!(transport.is_alive());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(json_files(&responses).is_empty());

        transport.close().await;
        assert!(!transport.is_alive());
    }

    #[tokio::test]
    async fn test_duplicate_request_ids_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(dir.path());
        let (tx, mut rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();

        let responses = transport.response_dir().to_path_buf();
        let body = r#"{"type":"status_response","request_id":"dup","data":{"ok":true}}"#;
        std::fs::write(responses.join("response_dup.json"), body).unwrap();
        assert!(matches!(next(&mut rx).await, Response::StatusResponse(_)));

        std::fs::write(responses.join("response_dup_again.json"), body).unwrap();
        std::fs::write(
            responses.join("response_z.json"),
            r#"{"type":"error","request_id":"z","message":"boom"}"#,
        )
        .unwrap();
        // the duplicate is skipped, the next distinct response still arrives
        assert!(matches!(next(&mut rx).await, Response::Error { .. }));

        transport.close().await;
    }

    #[tokio::test]
    async fn test_close_cleans_directories() {
        let dir = tempfile::tempdir().unwrap();
        let transport = transport(dir.path());
        let (tx, _rx) = mpsc::channel(8);
        transport.open(tx).await.unwrap();

        transport.send(Command::Ping).await.unwrap();
        transport.send(Command::Status).await.unwrap();
        assert_eq!(json_files(transport.command_dir()).len(), 2);

        transport.close().await;
        assert!(json_files(transport.command_dir()).is_empty());
        assert!(json_files(transport.response_dir()).is_empty());
    }

    #[test]
    fn test_recent_ids_bounded() {
        let mut seen = RecentIds::new(2);
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert!(seen.insert("c"));
        // "a" fell out of the window
        assert!(seen.insert("a"));
    }
}
