use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use authkit_protocol::messages::encode_batch;
use authkit_protocol::wire::encode_map;
use authkit_protocol::{
    ActionBatch, ActionReply, AuthStatus, HelperEvent, HelperMessage, Request, RequestBody,
    RequestId, VariantMap,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::{HelperTransport, TransportError, frame_codec};
use crate::router::SignalRouter;
use crate::validate::validate_helper_id;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Default time allowed for an on-demand helper to create its socket.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a helper listens and how to start it when it is not running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperEndpoint {
    /// Socket path; defaults to `<socket_dir>/<helper_id>.sock`.
    pub socket: Option<PathBuf>,
    /// Program and arguments started when the socket is absent.
    pub exec: Vec<String>,
    pub start_timeout: Duration,
}

impl Default for HelperEndpoint {
    fn default() -> Self {
        Self {
            socket: None,
            exec: Vec::new(),
            start_timeout: DEFAULT_START_TIMEOUT,
        }
    }
}

struct Connection {
    helper_id: String,
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<HelperMessage>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Connection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark closed and fail every outstanding request.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if !pending.is_empty() {
            warn!(helper = %self.helper_id, count = pending.len(), "connection lost with requests in flight");
        }
    }

    fn remove_pending(&self, id: RequestId) -> Option<oneshot::Sender<HelperMessage>> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
    }

    async fn request(&self, body: RequestBody) -> Result<HelperMessage, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);
        let _guard = PendingGuard { conn: self, id };
        if self.is_closed() {
            return Err(TransportError::Disconnected(self.helper_id.clone()));
        }

        let bytes = Request::new(id, body).encode()?;
        if let Err(e) = self.writer.lock().await.send(Bytes::from(bytes)).await {
            self.close();
            return Err(e.into());
        }

        rx.await
            .map_err(|_| TransportError::Disconnected(self.helper_id.clone()))
    }
}

/// Drops the pending entry when a request is abandoned (timeout, error).
struct PendingGuard<'a> {
    conn: &'a Connection,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.conn.remove_pending(self.id);
    }
}

async fn read_loop(
    conn: Arc<Connection>,
    mut frames: FramedRead<OwnedReadHalf, LengthDelimitedCodec>,
    router: Arc<SignalRouter<HelperEvent>>,
) {
    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(helper = %conn.helper_id, "error reading frame: {}", e);
                break;
            }
        };
        let message = match HelperMessage::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(helper = %conn.helper_id, "invalid frame from helper: {}", e);
                break;
            }
        };
        match message {
            HelperMessage::Signal(signal) => match signal.event() {
                Ok(event) => {
                    router.publish(&signal.action, event);
                }
                Err(e) => warn!(action = %signal.action, "undecodable signal: {}", e),
            },
            response => {
                let Some(id) = response.request_id() else {
                    continue;
                };
                match conn.remove_pending(id) {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => debug!(id, "response for abandoned request"),
                }
            }
        }
    }
    debug!(helper = %conn.helper_id, "helper connection closed");
    conn.close();
}

/// Connection to one helper. Its lock is held while connecting, so only
/// requests to that helper wait for an on-demand start.
type Slot = Arc<tokio::sync::Mutex<Option<Arc<Connection>>>>;

/// Transport to helpers listening on unix sockets.
pub struct SocketTransport {
    socket_dir: PathBuf,
    endpoints: HashMap<String, HelperEndpoint>,
    connections: Mutex<HashMap<String, Slot>>,
    router: Arc<SignalRouter<HelperEvent>>,
}

impl SocketTransport {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            endpoints: HashMap::new(),
            connections: Mutex::new(HashMap::new()),
            router: Arc::new(SignalRouter::new()),
        }
    }

    pub fn with_endpoint(mut self, helper_id: impl Into<String>, endpoint: HelperEndpoint) -> Self {
        self.endpoints.insert(helper_id.into(), endpoint);
        self
    }

    pub fn socket_path(&self, helper_id: &str) -> Result<PathBuf, TransportError> {
        validate_helper_id(helper_id).map_err(|_| TransportError::UnknownHelper(helper_id.to_string()))?;
        Ok(self
            .endpoints
            .get(helper_id)
            .and_then(|e| e.socket.clone())
            .unwrap_or_else(|| self.socket_dir.join(format!("{helper_id}.sock"))))
    }

    async fn connection(&self, helper_id: &str) -> Result<Arc<Connection>, TransportError> {
        validate_helper_id(helper_id).map_err(|_| TransportError::UnknownHelper(helper_id.to_string()))?;
        let slot = {
            let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(connections.entry(helper_id.to_string()).or_default())
        };

        let mut slot = slot.lock().await;
        if let Some(conn) = slot.as_ref() {
            if !conn.is_closed() {
                return Ok(Arc::clone(conn));
            }
        }
        *slot = None;

        let stream = self.connect(helper_id).await?;
        let (read, write) = stream.into_split();
        let conn = Arc::new(Connection {
            helper_id: helper_id.to_string(),
            writer: tokio::sync::Mutex::new(FramedWrite::new(write, frame_codec())),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        tokio::spawn(read_loop(
            Arc::clone(&conn),
            FramedRead::new(read, frame_codec()),
            Arc::clone(&self.router),
        ));
        *slot = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn connect(&self, helper_id: &str) -> Result<UnixStream, TransportError> {
        let path = self.socket_path(helper_id)?;
        let err = match UnixStream::connect(&path).await {
            Ok(stream) => {
                debug!(helper = helper_id, path = %path.display(), "connected to helper");
                return Ok(stream);
            }
            Err(e) => e,
        };

        let endpoint = self.endpoints.get(helper_id);
        let startable = matches!(err.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused);
        match endpoint {
            Some(endpoint) if startable && !endpoint.exec.is_empty() => {
                self.start_helper(helper_id, endpoint, &path).await
            }
            _ => Err(TransportError::Connect {
                helper: helper_id.to_string(),
                path,
                source: err,
            }),
        }
    }

    async fn start_helper(
        &self,
        helper_id: &str,
        endpoint: &HelperEndpoint,
        path: &Path,
    ) -> Result<UnixStream, TransportError> {
        let (program, args) = endpoint
            .exec
            .split_first()
            .ok_or_else(|| TransportError::StartTimeout(helper_id.to_string()))?;
        info!(helper = helper_id, program = %program, "starting helper on demand");

        tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| TransportError::Spawn {
                helper: helper_id.to_string(),
                source,
            })?;

        let deadline = Instant::now() + endpoint.start_timeout;
        loop {
            tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
            match UnixStream::connect(path).await {
                Ok(stream) => return Ok(stream),
                Err(e) if Instant::now() >= deadline => {
                    debug!(helper = helper_id, "last connect attempt failed: {}", e);
                    return Err(TransportError::StartTimeout(helper_id.to_string()));
                }
                Err(_) => {}
            }
        }
    }

    async fn request(
        &self,
        helper_id: &str,
        body: RequestBody,
    ) -> Result<HelperMessage, TransportError> {
        let conn = self.connection(helper_id).await?;
        conn.request(body).await
    }
}

fn unexpected(message: &HelperMessage) -> TransportError {
    TransportError::UnexpectedResponse(format!("{message:?}"))
}

#[async_trait]
impl HelperTransport for SocketTransport {
    async fn perform_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
        args: &VariantMap,
    ) -> Result<ActionReply, TransportError> {
        let body = RequestBody::PerformAction {
            name: name.to_string(),
            caller_id: caller_id.to_vec(),
            args: encode_map(args)?,
        };
        match self.request(helper_id, body).await? {
            HelperMessage::Reply { reply, .. } => Ok(ActionReply::decode(&reply)?),
            other => Err(unexpected(&other)),
        }
    }

    async fn perform_actions(
        &self,
        helper_id: &str,
        batch: &ActionBatch,
        caller_id: &[u8],
    ) -> Result<(), TransportError> {
        let body = RequestBody::PerformActions {
            batch: encode_batch(batch)?,
            caller_id: caller_id.to_vec(),
        };
        match self.request(helper_id, body).await? {
            HelperMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn authorize_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
    ) -> Result<AuthStatus, TransportError> {
        let body = RequestBody::AuthorizeAction {
            name: name.to_string(),
            caller_id: caller_id.to_vec(),
        };
        match self.request(helper_id, body).await? {
            HelperMessage::Status { status, .. } => Ok(status),
            other => Err(unexpected(&other)),
        }
    }

    async fn stop_action(&self, helper_id: &str, name: &str) -> Result<(), TransportError> {
        let body = RequestBody::StopAction {
            name: name.to_string(),
        };
        match self.request(helper_id, body).await? {
            HelperMessage::Ack { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn ping(&self, helper_id: &str) -> Result<String, TransportError> {
        match self.request(helper_id, RequestBody::Ping).await? {
            HelperMessage::Pong { helper_id, .. } => Ok(helper_id),
            other => Err(unexpected(&other)),
        }
    }

    fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<HelperEvent> {
        self.router.subscribe(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_socket_path_uses_helper_id() {
        let transport = SocketTransport::new("/run/authkit");
        assert_eq!(
            transport.socket_path("org.example").unwrap(),
            PathBuf::from("/run/authkit/org.example.sock")
        );
    }

    #[test]
    fn endpoint_overrides_socket_path() {
        let transport = SocketTransport::new("/run/authkit").with_endpoint(
            "org.example",
            HelperEndpoint {
                socket: Some(PathBuf::from("/tmp/custom.sock")),
                ..Default::default()
            },
        );
        assert_eq!(
            transport.socket_path("org.example").unwrap(),
            PathBuf::from("/tmp/custom.sock")
        );
    }

    #[test]
    fn rejects_path_like_helper_ids() {
        let transport = SocketTransport::new("/run/authkit");
        assert!(transport.socket_path("../etc/passwd").is_err());
    }

    #[tokio::test]
    async fn missing_socket_is_connect_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SocketTransport::new(dir.path());
        let err = transport.ping("org.example").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err}");
    }

    #[tokio::test]
    async fn failed_on_demand_start_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SocketTransport::new(dir.path()).with_endpoint(
            "org.example",
            HelperEndpoint {
                exec: vec!["/nonexistent/authkit-helper".to_string()],
                ..Default::default()
            },
        );
        let err = transport.ping("org.example").await.unwrap_err();
        assert!(matches!(err, TransportError::Spawn { .. }), "{err}");
    }

    #[tokio::test]
    async fn helper_that_never_binds_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let transport = SocketTransport::new(dir.path()).with_endpoint(
            "org.example",
            HelperEndpoint {
                exec: vec!["true".to_string()],
                start_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let err = transport.ping("org.example").await.unwrap_err();
        assert!(matches!(err, TransportError::StartTimeout(_)), "{err}");
    }

    #[tokio::test]
    async fn starting_helper_does_not_block_other_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let transport = Arc::new(SocketTransport::new(dir.path()).with_endpoint(
            "org.slow",
            HelperEndpoint {
                exec: vec!["true".to_string()],
                start_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        ));
        let starting = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.ping("org.slow").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let began = Instant::now();
        let err = transport.ping("org.example").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err}");
        assert!(began.elapsed() < Duration::from_secs(1));
        assert!(!starting.is_finished());

        let err = starting.await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::StartTimeout(_)), "{err}");
    }
}
