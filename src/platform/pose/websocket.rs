// WebSocket transport: JSON text frames to a long-lived pose server

use super::{PoseTransport, ServerBootstrap};
use crate::models::pose::{PoseError, PoseResult};
use crate::models::protocol::{Command, Response, WireDialect};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Outgoing frames buffered ahead of the socket writer
const WRITE_QUEUE: usize = 100;

struct Session {
    writer: mpsc::Sender<Message>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

pub struct WebSocketTransport {
    url: String,
    bootstrap: Option<Arc<dyn ServerBootstrap>>,
    boot_delay: Duration,
    session: Mutex<Option<Session>>,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(url: String, bootstrap: Option<Arc<dyn ServerBootstrap>>, boot_delay: Duration) -> Self {
        Self {
            url,
            bootstrap,
            boot_delay,
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connects, launching a local server and retrying once if nobody is listening
    async fn connect(
        &self,
    ) -> PoseResult<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
    {
        match connect_async(self.url.as_str()).await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) => warn!("Pose server not reachable at {}: {}", self.url, e),
        }

        let Some(bootstrap) = &self.bootstrap else {
            return Err(PoseError::ConnectionFailure(format!(
                "no pose server at {}",
                self.url
            )));
        };

        bootstrap.ensure_server().await?;
        tokio::time::sleep(self.boot_delay).await;

        connect_async(self.url.as_str())
            .await
            .map(|(stream, _)| stream)
            .map_err(|e| PoseError::ConnectionFailure(format!("{}: {}", self.url, e)))
    }

    async fn stop_session(&self) {
        let session = self.session.lock().take();
        let Some(session) = session else {
            return;
        };

        let _ = session.writer.send(Message::Close(None)).await;
        let _ = session.shutdown.send(true);
        for mut task in session.tasks {
            if tokio::time::timeout(Duration::from_secs(1), &mut task).await.is_err() {
                warn!("WebSocket task did not stop in time, aborting");
                task.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl PoseTransport for WebSocketTransport {
    async fn open(&self, responses: mpsc::Sender<Response>) -> PoseResult<()> {
        self.stop_session().await;

        let stream = self.connect().await?;
        let (sink, source) = stream.split();
        self.connected.store(true, Ordering::SeqCst);

        let (writer, outgoing) = mpsc::channel(WRITE_QUEUE);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let write_task = tokio::spawn(write_loop(sink, outgoing, self.connected.clone()));
        let read_task = tokio::spawn(read_loop(source, responses, shutdown_rx, self.connected.clone()));

        *self.session.lock() = Some(Session {
            writer,
            shutdown,
            tasks: vec![write_task, read_task],
        });

        info!("Connected to pose server at {}", self.url);
        Ok(())
    }

    async fn send(&self, command: Command) -> PoseResult<()> {
        let writer = self
            .session
            .lock()
            .as_ref()
            .map(|session| session.writer.clone())
            .ok_or_else(|| PoseError::ConnectionFailure("not connected".to_string()))?;

        let text = command.to_json(WireDialect::WebSocket).to_string();
        writer
            .send(Message::Text(text))
            .await
            .map_err(|_| PoseError::ConnectionFailure("socket writer stopped".to_string()))?;

        debug!("Sent {} command", command.kind());
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.stop_session().await;
        debug!("WebSocket channel closed");
    }

    fn dialect(&self) -> WireDialect {
        WireDialect::WebSocket
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Single writer for the socket
async fn write_loop<S>(mut sink: S, mut outgoing: mpsc::Receiver<Message>, connected: Arc<AtomicBool>)
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = sink.send(message).await {
            warn!("WebSocket write failed: {}", e);
            break;
        }
        if closing {
            break;
        }
    }
    connected.store(false, Ordering::SeqCst);
    let _ = sink.close().await;
    debug!("WebSocket writer stopped");
}

async fn read_loop<S, E>(
    mut source: S,
    responses: mpsc::Sender<Response>,
    mut shutdown: watch::Receiver<bool>,
    connected: Arc<AtomicBool>,
) where
    S: futures_util::Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        let frame = tokio::select! {
            frame = source.next() => frame,
            _ = shutdown.changed() => break,
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    warn!("Ignoring non-UTF-8 binary frame");
                    continue;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                info!("Pose server closed the connection: {:?}", frame);
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!("WebSocket read failed: {}", e);
                break;
            }
            None => break,
        };

        match Response::parse(&text) {
            Ok(response) => {
                if responses.send(response).await.is_err() {
                    break;
                }
            }
            Err(e) => warn!("Dropping server message: {}", e),
        }
    }
    connected.store(false, Ordering::SeqCst);
    debug!("WebSocket reader stopped");
}
