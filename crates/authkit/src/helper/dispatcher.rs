use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use authkit_protocol::messages::decode_batch;
use authkit_protocol::wire::decode_map;
use authkit_protocol::{
    ActionReply, AuthStatus, DebugLevel, HelperEvent, HelperSignal, VariantMap, WireError,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::idle::IdleTimer;
use super::responder::Responder;
use crate::backend::AuthBackend;
use crate::error::{AuthkitError, Result};
use crate::router::SignalRouter;
use crate::validate::validate_helper_id;

const SIGNAL_BUFFER: usize = 256;

/// Code of the helper error returned when a handler panics.
pub const HANDLER_PANICKED: i32 = -1;

/// Identifies the client a request came from.
pub type Origin = u64;

/// Origin of requests made in-process.
pub const LOCAL_ORIGIN: Origin = 0;

/// A notification tagged with the origin of the request that produced it.
#[derive(Debug, Clone)]
pub struct OriginSignal {
    pub origin: Origin,
    pub signal: HelperSignal,
}

#[derive(Debug, Default)]
struct DispatchState {
    current_action: Option<String>,
    origin: Origin,
    stop_requested: bool,
}

struct Inner {
    helper_id: String,
    backend: Arc<dyn AuthBackend>,
    responder: OnceLock<Arc<Responder>>,
    state: Mutex<DispatchState>,
    idle: IdleTimer,
    signals: broadcast::Sender<OriginSignal>,
    routers: Mutex<Vec<Arc<SignalRouter<HelperEvent>>>>,
}

/// Helper-side executor. Runs at most one action (or batch) at a time.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HelperDispatcher {
    inner: Arc<Inner>,
}

/// Handle passed to handlers for the action they are running.
#[derive(Clone)]
pub struct HelperContext {
    dispatcher: HelperDispatcher,
    action: String,
}

impl HelperContext {
    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn helper_id(&self) -> &str {
        self.dispatcher.helper_id()
    }

    pub fn is_stopped(&self) -> bool {
        self.dispatcher.has_to_stop_action()
    }

    pub fn progress_step(&self, step: i32) {
        self.dispatcher.send_progress_step(step);
    }

    pub fn progress_data(&self, data: VariantMap) {
        self.dispatcher.send_progress_data(data);
    }

    pub fn debug_message(&self, level: DebugLevel, message: impl Into<String>) {
        self.dispatcher.send_debug_message(level, message);
    }
}

impl HelperDispatcher {
    pub fn new(helper_id: impl Into<String>, backend: Arc<dyn AuthBackend>) -> Result<Self> {
        Self::with_idle_timer(helper_id, backend, IdleTimer::disabled())
    }

    pub fn with_idle_timer(
        helper_id: impl Into<String>,
        backend: Arc<dyn AuthBackend>,
        idle: IdleTimer,
    ) -> Result<Self> {
        let helper_id = helper_id.into();
        validate_helper_id(&helper_id).map_err(AuthkitError::InvalidHelperId)?;
        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        Ok(Self {
            inner: Arc::new(Inner {
                helper_id,
                backend,
                responder: OnceLock::new(),
                state: Mutex::new(DispatchState::default()),
                idle,
                signals,
                routers: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn helper_id(&self) -> &str {
        &self.inner.helper_id
    }

    pub fn idle_timer(&self) -> &IdleTimer {
        &self.inner.idle
    }

    /// Bind the handler table. Only the first call succeeds.
    pub fn set_responder(&self, responder: Responder) -> Result<()> {
        self.inner
            .responder
            .set(Arc::new(responder))
            .map_err(|_| AuthkitError::ResponderAlreadyBound(self.inner.helper_id.clone()))
    }

    pub fn has_responder(&self) -> bool {
        self.inner.responder.get().is_some()
    }

    /// Name of the action currently executing.
    pub fn current_action(&self) -> Option<String> {
        self.state().current_action.clone()
    }

    /// Raw notifications, for servers writing them to a socket. Each carries
    /// the origin passed to [`perform_action_from`](Self::perform_action_from).
    pub fn subscribe_signals(&self) -> broadcast::Receiver<OriginSignal> {
        self.inner.signals.subscribe()
    }

    /// Deliver decoded notifications to an in-process router.
    pub fn attach_router(&self, router: Arc<SignalRouter<HelperEvent>>) {
        self.lock_routers().push(router);
    }

    /// Authorize and run one action, returning the encoded reply.
    pub async fn perform_action(
        &self,
        name: &str,
        caller_id: &[u8],
        args: &[u8],
    ) -> std::result::Result<Vec<u8>, WireError> {
        self.perform_action_from(LOCAL_ORIGIN, name, caller_id, args).await
    }

    /// Like [`perform_action`](Self::perform_action); signals of the run are
    /// tagged with `origin`.
    pub async fn perform_action_from(
        &self,
        origin: Origin,
        name: &str,
        caller_id: &[u8],
        args: &[u8],
    ) -> std::result::Result<Vec<u8>, WireError> {
        self.run_action(origin, name, caller_id, args).await.encode()
    }

    async fn run_action(
        &self,
        origin: Origin,
        name: &str,
        caller_id: &[u8],
        args: &[u8],
    ) -> ActionReply {
        let Some(responder) = self.inner.responder.get().cloned() else {
            warn!(helper = %self.inner.helper_id, action = name, "no responder bound");
            return ActionReply::no_responder();
        };

        let args = {
            let mut state = self.state();
            if let Some(current) = &state.current_action {
                debug!(action = name, current = %current, "helper busy");
                return ActionReply::helper_busy();
            }
            let args = match decode_map(args) {
                Ok(args) => args,
                Err(e) => {
                    warn!(action = name, error = %e, "malformed action arguments");
                    return ActionReply::invalid_action()
                        .with_description(format!("malformed arguments: {e}"));
                }
            };
            state.current_action = Some(name.to_string());
            state.origin = origin;
            state.stop_requested = false;
            args
        };

        let reply = self.execute_claimed(&responder, name, caller_id, args).await;
        self.release();
        reply
    }

    /// Steps run while the slot is claimed by `name`.
    async fn execute_claimed(
        &self,
        responder: &Arc<Responder>,
        name: &str,
        caller_id: &[u8],
        args: VariantMap,
    ) -> ActionReply {
        self.emit(name, HelperEvent::Started);
        self.inner.idle.pause();

        let ctx = HelperContext {
            dispatcher: self.clone(),
            action: name.to_string(),
        };
        let backend = Arc::clone(&self.inner.backend);
        let responder = Arc::clone(responder);
        let caller_id = caller_id.to_vec();

        let task = tokio::task::spawn_blocking(move || {
            if !backend.is_caller_authorized(&ctx.action, &caller_id) {
                info!(action = %ctx.action, "caller not authorized");
                return ActionReply::authorization_denied();
            }
            match responder.handler_for(&ctx.action) {
                Some(handler) => {
                    debug!(action = %ctx.action, "running handler");
                    handler(&ctx, args)
                }
                None => {
                    info!(action = %ctx.action, "no handler for action");
                    ActionReply::no_such_action()
                }
            }
        });

        let reply = match task.await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(action = name, error = %e, "handler panicked");
                ActionReply::helper_error(HANDLER_PANICKED).with_description("handler panicked")
            }
        };

        self.inner.idle.resume();
        self.emit(name, HelperEvent::Performed(reply.clone()));
        reply
    }

    fn release(&self) {
        let mut state = self.state();
        state.current_action = None;
        state.origin = LOCAL_ORIGIN;
        state.stop_requested = false;
    }

    /// Run a batch sequentially. The slot stays claimed across the whole
    /// batch; each member reports through its own `Performed` event.
    pub async fn perform_actions(&self, batch: &[u8], caller_id: &[u8]) {
        self.perform_actions_from(LOCAL_ORIGIN, batch, caller_id).await;
    }

    pub async fn perform_actions_from(&self, origin: Origin, batch: &[u8], caller_id: &[u8]) {
        let batch = match decode_batch(batch) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(helper = %self.inner.helper_id, error = %e, "malformed action batch");
                return;
            }
        };

        let Some(responder) = self.inner.responder.get().cloned() else {
            for (name, _) in &batch {
                let event = HelperEvent::Performed(ActionReply::no_responder());
                self.emit_to(origin, name, event);
            }
            return;
        };

        {
            let mut state = self.state();
            if state.current_action.is_some() {
                drop(state);
                for (name, _) in &batch {
                    let event = HelperEvent::Performed(ActionReply::helper_busy());
                    self.emit_to(origin, name, event);
                }
                return;
            }
            // Placeholder claim until the first member takes the slot.
            state.current_action = batch.first().map(|(name, _)| name.clone());
            state.origin = origin;
        }

        debug!(helper = %self.inner.helper_id, count = batch.len(), "running batch");
        for (name, args) in batch {
            {
                let mut state = self.state();
                state.current_action = Some(name.clone());
                state.stop_requested = false;
            }
            self.execute_claimed(&responder, &name, caller_id, args).await;
        }
        self.release();
    }

    /// Authorization check only; nothing is executed and no events are sent.
    pub async fn authorize_action(&self, name: &str, caller_id: &[u8]) -> AuthStatus {
        if self.inner.responder.get().is_none() {
            return AuthStatus::Error;
        }
        if self.state().current_action.is_some() {
            return AuthStatus::Error;
        }

        self.inner.idle.pause();
        let backend = Arc::clone(&self.inner.backend);
        let (name, caller_id) = (name.to_string(), caller_id.to_vec());
        let authorized =
            tokio::task::spawn_blocking(move || backend.is_caller_authorized(&name, &caller_id))
                .await
                .unwrap_or(false);
        self.inner.idle.resume();

        if authorized {
            AuthStatus::Authorized
        } else {
            AuthStatus::Denied
        }
    }

    /// Request a cooperative stop of `name`. Returns whether it was running.
    pub fn stop_action(&self, name: &str) -> bool {
        let mut state = self.state();
        if state.current_action.as_deref() == Some(name) {
            debug!(action = name, "stop requested");
            state.stop_requested = true;
            true
        } else {
            debug!(action = name, current = ?state.current_action, "stop ignored, action not running");
            false
        }
    }

    pub fn has_to_stop_action(&self) -> bool {
        self.state().stop_requested
    }

    pub fn send_progress_step(&self, step: i32) {
        if let Some(action) = self.current_action() {
            self.emit(&action, HelperEvent::ProgressStep(step));
        }
    }

    pub fn send_progress_data(&self, data: VariantMap) {
        if let Some(action) = self.current_action() {
            self.emit(&action, HelperEvent::ProgressData(data));
        }
    }

    pub fn send_debug_message(&self, level: DebugLevel, message: impl Into<String>) {
        if let Some(action) = self.current_action() {
            self.emit(
                &action,
                HelperEvent::Debug {
                    level,
                    message: message.into(),
                },
            );
        }
    }

    fn emit(&self, action: &str, event: HelperEvent) {
        let origin = self.state().origin;
        self.emit_to(origin, action, event);
    }

    fn emit_to(&self, origin: Origin, action: &str, event: HelperEvent) {
        for router in self.lock_routers().iter() {
            router.publish(action, event.clone());
        }
        if self.inner.signals.receiver_count() == 0 {
            return;
        }
        match HelperSignal::from_event(action, &event) {
            Ok(signal) => {
                // No receivers left is not an error.
                let _ = self.inner.signals.send(OriginSignal { origin, signal });
            }
            Err(e) => warn!(action, error = %e, "failed to encode signal"),
        }
    }

    fn state(&self) -> MutexGuard<'_, DispatchState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_routers(&self) -> MutexGuard<'_, Vec<Arc<SignalRouter<HelperEvent>>>> {
        self.inner.routers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for HelperDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperDispatcher")
            .field("helper_id", &self.inner.helper_id)
            .field("current_action", &self.current_action())
            .field("has_responder", &self.has_responder())
            .finish()
    }
}
