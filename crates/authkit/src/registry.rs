//! Shared client context.
//!
//! One [`Registry`] ties the authorization backend, the helper transport and
//! the status-change router together. It is built once and handed to every
//! [`Action`] as an `Arc`, so nothing in the crate reaches for process-wide
//! state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use authkit_protocol::AuthStatus;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::action::Action;
use crate::backend::{AuthBackend, StatusNotifier};
use crate::config::ClientConfig;
use crate::router::SignalRouter;
use crate::transport::{HelperEndpoint, HelperTransport, SocketTransport};

pub struct Registry {
    backend: Arc<dyn AuthBackend>,
    transport: Arc<dyn HelperTransport>,
    status: Arc<SignalRouter<AuthStatus>>,
    reply_timeout: Option<Duration>,
    runtime: Option<Handle>,
}

impl Registry {
    /// Attach `backend` to a fresh status router. Captures the current tokio
    /// runtime, if any, for [`Action::execute_blocking`].
    pub fn new(backend: Arc<dyn AuthBackend>, transport: Arc<dyn HelperTransport>) -> Self {
        let status = Arc::new(SignalRouter::new());
        backend.attach(StatusNotifier::new(Arc::clone(&status)));
        Self {
            backend,
            transport,
            status,
            reply_timeout: None,
            runtime: Handle::try_current().ok(),
        }
    }

    /// Registry talking to helpers over unix sockets as configured.
    pub fn from_config(backend: Arc<dyn AuthBackend>, config: &ClientConfig) -> Self {
        let mut transport = SocketTransport::new(&config.socket_dir);
        for (id, helper) in &config.helpers {
            transport = transport.with_endpoint(
                id.clone(),
                HelperEndpoint {
                    socket: helper.socket.clone(),
                    exec: helper.exec.clone(),
                    start_timeout: Duration::from_millis(helper.start_timeout_ms),
                },
            );
        }
        let timeout = (config.reply_timeout_secs > 0)
            .then(|| Duration::from_secs(config.reply_timeout_secs));
        Self::new(backend, Arc::new(transport)).with_reply_timeout(timeout)
    }

    /// Default bound on how long an action waits for its helper's reply.
    pub fn with_reply_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn backend(&self) -> &Arc<dyn AuthBackend> {
        &self.backend
    }

    pub fn transport(&self) -> &Arc<dyn HelperTransport> {
        &self.transport
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout
    }

    pub fn runtime(&self) -> Option<&Handle> {
        self.runtime.as_ref()
    }

    /// Status changes the backend reports for `action`.
    pub fn subscribe_status(&self, action: &str) -> mpsc::UnboundedReceiver<AuthStatus> {
        self.status.subscribe(action)
    }

    pub fn action(self: &Arc<Self>, name: &str) -> Action {
        Action::new(Arc::clone(self), name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("capabilities", &self.backend.capabilities())
            .field("reply_timeout", &self.reply_timeout)
            .field("has_runtime", &self.runtime.is_some())
            .finish_non_exhaustive()
    }
}
