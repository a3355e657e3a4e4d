//! Asynchronous execution of one action.
//!
//! An [`ExecutionJob`] runs authorize-then-execute on the tokio runtime and
//! reports what happens along the way as [`JobEvent`]s. Exactly one
//! [`JobEvent::Finished`] is sent per job.
//!
//! ```text
//! Created ──start()──▶ Running ──reply──▶ Succeeded | Failed
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use authkit_protocol::{ActionReply, AuthStatus, DebugLevel, HelperEvent, VariantMap};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use crate::action::Action;
use crate::error::AuthkitError;
use crate::transport::TransportError;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The action began executing.
    Started,
    /// Percentage style progress reported by the helper.
    Progress(i32),
    ProgressData(VariantMap),
    DebugMessage { level: DebugLevel, message: String },
    StatusChanged(AuthStatus),
    Finished(ActionReply),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("the job was already started")]
    AlreadyStarted,
}

impl From<JobError> for ActionReply {
    fn from(err: JobError) -> Self {
        match err {
            JobError::AlreadyStarted => ActionReply::already_started(),
        }
    }
}

struct JobInner {
    action: Action,
    started: AtomicBool,
    state: Mutex<JobState>,
    progress: Mutex<i32>,
    events: broadcast::Sender<JobEvent>,
    reply: watch::Sender<Option<ActionReply>>,
}

/// Handle to a running or finished action. Clones share the same job.
#[derive(Clone)]
pub struct ExecutionJob {
    inner: Arc<JobInner>,
}

impl ExecutionJob {
    pub fn new(action: Action) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (reply, _) = watch::channel(None);
        Self {
            inner: Arc::new(JobInner {
                action,
                started: AtomicBool::new(false),
                state: Mutex::new(JobState::Created),
                progress: Mutex::new(0),
                events,
                reply,
            }),
        }
    }

    pub fn action(&self) -> &Action {
        &self.inner.action
    }

    /// Events from now on. Subscribe before [`start`](Self::start) to see
    /// all of them.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> JobState {
        *self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last progress step reported by the helper.
    pub fn progress(&self) -> i32 {
        *self.inner.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Final reply, once finished.
    pub fn reply(&self) -> Option<ActionReply> {
        self.inner.reply.borrow().clone()
    }

    /// Payload of the final reply; empty until finished and on failure.
    pub fn data(&self) -> VariantMap {
        match self.reply() {
            Some(reply) if reply.succeeded() => reply.into_data(),
            _ => VariantMap::new(),
        }
    }

    /// Begin executing. Returns immediately; the outcome arrives as
    /// [`JobEvent::Finished`].
    pub fn start(&self) -> Result<(), JobError> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(action = %self.inner.action.name(), "job already started");
            return Err(JobError::AlreadyStarted);
        }
        self.inner.set_state(JobState::Running);

        if !self.inner.action.is_valid() {
            self.inner.finish(ActionReply::invalid_action());
            return Ok(());
        }

        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => match self.inner.action.registry().runtime() {
                Some(handle) => handle.clone(),
                None => {
                    let reply = ActionReply::transport_error(AuthkitError::NoRuntime.to_string());
                    self.inner.finish(reply);
                    return Ok(());
                }
            },
        };
        handle.spawn(Arc::clone(&self.inner).run());
        Ok(())
    }

    /// Wait for the final reply. Resolves immediately when already finished.
    pub async fn wait(&self) -> ActionReply {
        let mut rx = self.inner.reply.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reply) => reply.clone().unwrap_or_default(),
            // The sender lives in `inner`, which we hold.
            Err(_) => ActionReply::transport_error("job dropped"),
        }
    }

    /// Ask the helper to stop the running action. The job still finishes
    /// with whatever reply the helper sends.
    pub async fn kill(&self) -> Result<(), TransportError> {
        let action = &self.inner.action;
        if self.state() != JobState::Running || !action.has_helper() {
            return Ok(());
        }
        action
            .registry()
            .transport()
            .stop_action(action.helper_id(), action.name())
            .await
    }
}

impl JobInner {
    fn set_state(&self, state: JobState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn finish(&self, reply: ActionReply) {
        self.set_state(if reply.succeeded() {
            JobState::Succeeded
        } else {
            JobState::Failed
        });
        self.reply.send_replace(Some(reply.clone()));
        self.emit(JobEvent::Finished(reply));
    }

    fn on_helper_event(&self, event: HelperEvent) {
        match event {
            HelperEvent::Started => self.emit(JobEvent::Started),
            HelperEvent::ProgressStep(step) => {
                *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = step;
                self.emit(JobEvent::Progress(step));
            }
            HelperEvent::ProgressData(data) => self.emit(JobEvent::ProgressData(data)),
            HelperEvent::Debug { level, message } => {
                self.emit(JobEvent::DebugMessage { level, message })
            }
            // The reply of the request itself is authoritative.
            HelperEvent::Performed(_) => {}
        }
    }

    async fn run(self: Arc<Self>) {
        let action = &self.action;
        let registry = action.registry();
        let mut helper_events = action
            .has_helper()
            .then(|| registry.transport().subscribe(action.name()));
        let mut status = registry.subscribe_status(action.name());

        if !action.has_helper() {
            self.emit(JobEvent::Started);
        }

        let execution = action.execute();
        tokio::pin!(execution);
        let reply = loop {
            tokio::select! {
                reply = &mut execution => break reply,
                Some(event) = recv_opt(&mut helper_events) => self.on_helper_event(event),
                Some(changed) = status.recv() => self.emit(JobEvent::StatusChanged(changed)),
            }
        };

        // Everything the helper sent before its reply has already been routed.
        if let Some(rx) = helper_events.as_mut() {
            while let Ok(event) = rx.try_recv() {
                self.on_helper_event(event);
            }
        }
        while let Ok(changed) = status.try_recv() {
            self.emit(JobEvent::StatusChanged(changed));
        }

        if reply.failed() {
            warn!(action = %action.name(), "action failed: {}", reply);
        } else {
            debug!(action = %action.name(), "action succeeded");
        }
        self.finish(reply);
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
