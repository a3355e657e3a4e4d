//! Test doubles.
//!
//! [`FakeBackend`] answers from tables set up by the test and records every
//! call the core makes, so tests can assert on the decision path taken.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use authkit_protocol::AuthStatus;

use crate::action::ParentContext;
use crate::backend::{AuthBackend, Capabilities, StatusNotifier};

/// Credential blob returned by [`FakeBackend::caller_id`].
pub const FAKE_CALLER: &[u8] = b"fake-caller";

#[derive(Debug, Default)]
struct Calls {
    setup: Vec<String>,
    pre_auth: Vec<(String, Option<ParentContext>)>,
    caller_checks: Vec<(String, Vec<u8>)>,
}

/// Configurable in-memory backend.
///
/// Unless told otherwise it authorizes everything: `authorize_action`
/// returns `Authorized`, `action_status` returns `AuthRequired` and every
/// caller passes `is_caller_authorized`.
#[derive(Debug)]
pub struct FakeBackend {
    capabilities: Capabilities,
    authorize: HashMap<String, AuthStatus>,
    authorize_delays: HashMap<String, Duration>,
    statuses: HashMap<String, AuthStatus>,
    existing: HashSet<String>,
    denied_callers: HashSet<String>,
    deny_all_callers: bool,
    authorize_count: AtomicUsize,
    calls: Mutex<Calls>,
    notifier: Mutex<Option<StatusNotifier>>,
}

impl FakeBackend {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            authorize: HashMap::new(),
            authorize_delays: HashMap::new(),
            statuses: HashMap::new(),
            existing: HashSet::new(),
            denied_callers: HashSet::new(),
            deny_all_callers: false,
            authorize_count: AtomicUsize::new(0),
            calls: Mutex::new(Calls::default()),
            notifier: Mutex::new(None),
        }
    }

    /// Backend that authorizes in the client.
    pub fn client_side() -> Self {
        Self::new(Capabilities::AUTHORIZE_FROM_CLIENT)
    }

    /// Backend that authorizes in the helper.
    pub fn helper_side() -> Self {
        Self::new(Capabilities::AUTHORIZE_FROM_HELPER)
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Result of the client-side `authorize_action` for `name`.
    pub fn with_authorize(mut self, name: &str, status: AuthStatus) -> Self {
        self.authorize.insert(name.to_string(), status);
        self
    }

    /// Make the client-side `authorize_action` for `name` block the calling
    /// thread for `delay`, like a backend waiting on an interactive prompt.
    pub fn with_authorize_delay(mut self, name: &str, delay: Duration) -> Self {
        self.authorize_delays.insert(name.to_string(), delay);
        self
    }

    /// Result of `action_status` for `name`.
    pub fn with_status(mut self, name: &str, status: AuthStatus) -> Self {
        self.statuses.insert(name.to_string(), status);
        self
    }

    /// Names `action_exists` knows about.
    pub fn with_existing<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        self.existing.extend(names.into_iter().map(str::to_string));
        self
    }

    /// Fail `is_caller_authorized` for `name` only.
    pub fn deny_caller_for(mut self, name: &str) -> Self {
        self.denied_callers.insert(name.to_string());
        self
    }

    pub fn deny_all_callers(mut self) -> Self {
        self.deny_all_callers = true;
        self
    }

    /// Publish a status change through the notifier handed over by the
    /// registry. Returns false when no registry attached one.
    pub fn notify(&self, name: &str, status: AuthStatus) -> bool {
        match &*self.notifier.lock().unwrap_or_else(|e| e.into_inner()) {
            Some(notifier) => {
                notifier.notify(name, status);
                true
            }
            None => false,
        }
    }

    pub fn authorize_count(&self) -> usize {
        self.authorize_count.load(Ordering::SeqCst)
    }

    pub fn setup_calls(&self) -> Vec<String> {
        self.lock_calls().setup.clone()
    }

    pub fn pre_auth_calls(&self) -> Vec<(String, Option<ParentContext>)> {
        self.lock_calls().pre_auth.clone()
    }

    /// `(action, caller blob)` pairs seen by `is_caller_authorized`.
    pub fn caller_checks(&self) -> Vec<(String, Vec<u8>)> {
        self.lock_calls().caller_checks.clone()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Calls> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AuthBackend for FakeBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn setup_action(&self, name: &str) {
        self.lock_calls().setup.push(name.to_string());
    }

    fn action_exists(&self, name: &str) -> bool {
        self.existing.contains(name)
    }

    fn authorize_action(&self, name: &str) -> AuthStatus {
        self.authorize_count.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.authorize_delays.get(name) {
            std::thread::sleep(*delay);
        }
        self.authorize
            .get(name)
            .copied()
            .unwrap_or(AuthStatus::Authorized)
    }

    fn action_status(&self, name: &str) -> AuthStatus {
        self.statuses
            .get(name)
            .copied()
            .unwrap_or(AuthStatus::AuthRequired)
    }

    fn is_caller_authorized(&self, name: &str, caller_id: &[u8]) -> bool {
        self.lock_calls()
            .caller_checks
            .push((name.to_string(), caller_id.to_vec()));
        !self.deny_all_callers && !self.denied_callers.contains(name)
    }

    fn caller_id(&self) -> Vec<u8> {
        FAKE_CALLER.to_vec()
    }

    fn pre_auth_action(&self, name: &str, parent: Option<&ParentContext>) {
        self.lock_calls()
            .pre_auth
            .push((name.to_string(), parent.cloned()));
    }

    fn attach(&self, notifier: StatusNotifier) {
        *self.notifier.lock().unwrap_or_else(|e| e.into_inner()) = Some(notifier);
    }
}
