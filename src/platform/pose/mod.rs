// Pose worker transports
// One command/response contract, carried either by JSON files or by a WebSocket

pub mod file_drop;
pub mod websocket;

#[cfg(test)]
pub mod mock;

use crate::core::config::{Config, TransportKind};
use crate::models::capture::ImageEncoding;
use crate::models::pose::PoseResult;
use crate::models::protocol::{Command, Response, WireDialect};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use file_drop::FileDropTransport;
pub use websocket::WebSocketTransport;

/// Channel between the bridge and the pose worker
#[async_trait]
pub trait PoseTransport: Send + Sync {
    /// Open the channel. Parsed responses are pushed into `responses`, in
    /// arrival order, until `close` is called. Calling `open` again after
    /// `close` reconnects.
    async fn open(&self, responses: mpsc::Sender<Response>) -> PoseResult<()>;

    /// Fire-and-forget send of one command
    async fn send(&self, command: Command) -> PoseResult<()>;

    /// Whether the channel is currently able to carry traffic
    fn is_alive(&self) -> bool;

    /// Stop background loops and release channel resources
    async fn close(&self);

    fn dialect(&self) -> WireDialect;

    /// Image container the worker expects on this channel
    fn frame_encoding(&self) -> ImageEncoding {
        match self.dialect() {
            WireDialect::FileDrop => ImageEncoding::Png,
            WireDialect::WebSocket => ImageEncoding::Jpeg,
        }
    }

    fn name(&self) -> &'static str;
}

/// Starts a local pose server when the WebSocket transport finds nobody listening
#[async_trait]
pub trait ServerBootstrap: Send + Sync {
    async fn ensure_server(&self) -> PoseResult<()>;
}

/// Factory function to create the transport selected by configuration
pub fn create_transport(config: &Config, bootstrap: Arc<dyn ServerBootstrap>) -> Arc<dyn PoseTransport> {
    match config.transport {
        TransportKind::FileDrop => Arc::new(FileDropTransport::new(
            config.command_dir.clone(),
            config.response_dir.clone(),
            config.poll_interval(),
        )),
        TransportKind::Websocket => Arc::new(WebSocketTransport::new(
            config.ws_url(),
            Some(bootstrap),
            config.server_boot_delay(),
        )),
    }
}
