use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use authkit_protocol::{HelperMessage, Request, RequestBody};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, error, info, warn};

use super::{HelperDispatcher, LOCAL_ORIGIN, Origin, OriginSignal};
use crate::credential::CallerCredential;
use crate::error::{AuthkitError, Result};
use crate::transport::frame_codec;

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(LOCAL_ORIGIN + 1);

/// Unix socket front end of a [`HelperDispatcher`].
///
/// Every request runs on its own task, so a `StopAction` is answered while a
/// handler is still busy on the blocking pool. A connection only receives
/// the signals of actions it requested itself.
pub struct HelperServer {
    dispatcher: HelperDispatcher,
    socket_path: PathBuf,
    listener: UnixListener,
}

impl HelperServer {
    /// Bind `socket_path`, replacing a stale socket and creating the parent
    /// directory if needed.
    pub fn bind(dispatcher: HelperDispatcher, socket_path: &Path, mode: u32) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path).map_err(|source| AuthkitError::Bind {
            path: socket_path.to_path_buf(),
            source,
        })?;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(mode))?;

        info!(
            helper = %dispatcher.helper_id(),
            path = %socket_path.display(),
            mode = format_args!("{mode:o}"),
            "helper listening"
        );
        Ok(Self {
            dispatcher,
            socket_path: socket_path.to_path_buf(),
            listener,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve until `shutdown` resolves or the idle timer expires.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let idle = self.dispatcher.idle_timer();
        idle.touch();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            debug!("new client connection");
                            idle.touch();
                            let dispatcher = self.dispatcher.clone();
                            tokio::spawn(async move {
                                handle_connection(dispatcher, stream).await;
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = idle.expired() => {
                    info!(helper = %self.dispatcher.helper_id(), "idle timeout reached, exiting");
                    break;
                }
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        info!(helper = %self.dispatcher.helper_id(), "helper stopped");
        Ok(())
    }
}

async fn handle_connection(dispatcher: HelperDispatcher, stream: UnixStream) {
    let peer = match CallerCredential::from_peer(&stream) {
        Ok(peer) => Some(peer),
        Err(e) => {
            warn!("could not read peer credentials: {}", e);
            None
        }
    };

    let origin = NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed);
    let (read, write) = stream.into_split();
    let mut frames = FramedRead::new(read, frame_codec());
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(
        FramedWrite::new(write, frame_codec()),
        rx,
        dispatcher.subscribe_signals(),
        origin,
    ));

    while let Some(frame) = frames.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!("error reading frame: {}", e);
                break;
            }
        };
        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("invalid request frame: {}", e);
                break;
            }
        };
        dispatcher.idle_timer().touch();
        handle_request(&dispatcher, origin, peer.as_ref(), request, &tx);
    }

    debug!(origin, "client disconnected");
    drop(tx);
    let _ = writer.await;
}

fn handle_request(
    dispatcher: &HelperDispatcher,
    origin: Origin,
    peer: Option<&CallerCredential>,
    request: Request,
    tx: &mpsc::UnboundedSender<HelperMessage>,
) {
    let id = request.id;
    debug!(id, "request received");
    match request.body {
        RequestBody::PerformAction {
            name,
            caller_id,
            args,
        } => {
            let caller_id = effective_caller(peer, caller_id);
            let (dispatcher, tx) = (dispatcher.clone(), tx.clone());
            tokio::spawn(async move {
                let reply = dispatcher
                    .perform_action_from(origin, &name, &caller_id, &args)
                    .await;
                let reply = match reply {
                    Ok(reply) => reply,
                    Err(e) => {
                        error!(action = %name, error = %e, "failed to encode reply");
                        authkit_protocol::ActionReply::transport_error(e.to_string())
                            .encode()
                            .unwrap_or_default()
                    }
                };
                let _ = tx.send(HelperMessage::Reply { id, reply });
            });
        }
        RequestBody::PerformActions { batch, caller_id } => {
            let caller_id = effective_caller(peer, caller_id);
            let _ = tx.send(HelperMessage::Ack { id });
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                dispatcher
                    .perform_actions_from(origin, &batch, &caller_id)
                    .await;
            });
        }
        RequestBody::AuthorizeAction { name, caller_id } => {
            let caller_id = effective_caller(peer, caller_id);
            let (dispatcher, tx) = (dispatcher.clone(), tx.clone());
            tokio::spawn(async move {
                let status = dispatcher.authorize_action(&name, &caller_id).await;
                let _ = tx.send(HelperMessage::Status { id, status });
            });
        }
        RequestBody::StopAction { name } => {
            dispatcher.stop_action(&name);
            let _ = tx.send(HelperMessage::Ack { id });
        }
        RequestBody::Ping => {
            let _ = tx.send(HelperMessage::Pong {
                id,
                helper_id: dispatcher.helper_id().to_string(),
            });
        }
    }
}

/// Kernel peer credentials win over whatever the client claims.
fn effective_caller(peer: Option<&CallerCredential>, claimed: Vec<u8>) -> Vec<u8> {
    let Some(peer) = peer else {
        return claimed;
    };
    match CallerCredential::from_bytes(&claimed) {
        Some(claimed) if claimed.same_identity(peer) => {}
        Some(claimed) => warn!(
            claimed_uid = claimed.uid,
            peer_uid = peer.uid,
            "caller credential does not match peer, using peer"
        ),
        None => debug!("caller credential is not a credential document, using peer"),
    }
    peer.to_bytes()
}

async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
    mut replies: mpsc::UnboundedReceiver<HelperMessage>,
    mut signals: broadcast::Receiver<OriginSignal>,
    origin: Origin,
) {
    loop {
        // Signals first: anything emitted before a reply is written before it.
        let message = tokio::select! {
            biased;
            signal = signals.recv() => match signal {
                Ok(tagged) if tagged.origin == origin => HelperMessage::Signal(tagged.signal),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("signal subscription lagged, missed {} events", n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            reply = replies.recv() => match reply {
                Some(message) => message,
                None => break,
            },
        };

        let bytes = match message.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to encode message: {}", e);
                continue;
            }
        };
        if let Err(e) = sink.send(Bytes::from(bytes)).await {
            debug!("failed to write message: {}", e);
            break;
        }
    }
}
