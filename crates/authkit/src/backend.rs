//! Authorization backend interface.
//!
//! A backend answers "may this caller run this action". It is chosen once by
//! whoever builds the [`Registry`](crate::Registry) and is shared by every
//! action afterwards; the core only queries its [`Capabilities`].

use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

use authkit_protocol::AuthStatus;

use crate::action::ParentContext;
use crate::router::SignalRouter;

/// What a backend can do. Queried, never mutated by the core.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    /// `authorize_action` may be called in the client process.
    pub const AUTHORIZE_FROM_CLIENT: Self = Self(1);
    /// `is_caller_authorized` may be called in the helper process.
    pub const AUTHORIZE_FROM_HELPER: Self = Self(1 << 1);
    /// `action_exists` is authoritative for action validity.
    pub const CHECK_ACTION_EXISTENCE: Self = Self(1 << 2);
    /// `pre_auth_action` must run before client-side authorization.
    pub const PRE_AUTH_ACTION: Self = Self(1 << 3);

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Capabilities, &str); 4] = [
            (Capabilities::AUTHORIZE_FROM_CLIENT, "AUTHORIZE_FROM_CLIENT"),
            (Capabilities::AUTHORIZE_FROM_HELPER, "AUTHORIZE_FROM_HELPER"),
            (Capabilities::CHECK_ACTION_EXISTENCE, "CHECK_ACTION_EXISTENCE"),
            (Capabilities::PRE_AUTH_ACTION, "PRE_AUTH_ACTION"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("Capabilities(NONE)")
        } else {
            write!(f, "Capabilities({})", set.join(" | "))
        }
    }
}

/// Publishes status changes reported by a backend to interested jobs.
#[derive(Clone)]
pub struct StatusNotifier {
    router: Arc<SignalRouter<AuthStatus>>,
}

impl StatusNotifier {
    pub(crate) fn new(router: Arc<SignalRouter<AuthStatus>>) -> Self {
        Self { router }
    }

    /// Tell every subscriber of `action` that its status is now `status`.
    pub fn notify(&self, action: &str, status: AuthStatus) {
        tracing::debug!(action, %status, "action status changed");
        self.router.publish(action, status);
    }
}

impl fmt::Debug for StatusNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusNotifier").finish_non_exhaustive()
    }
}

/// Pluggable authorization backend.
///
/// Calls that are only meaningful on one side say so; the core never calls
/// `authorize_action` unless [`Capabilities::AUTHORIZE_FROM_CLIENT`] is set,
/// and never calls `is_caller_authorized` outside a helper unless
/// [`Capabilities::AUTHORIZE_FROM_HELPER`] is set.
pub trait AuthBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Called whenever an action takes a name. Best effort.
    fn setup_action(&self, name: &str) {
        let _ = name;
    }

    fn action_exists(&self, name: &str) -> bool {
        let _ = name;
        true
    }

    /// Client-side authorization. May block on an interactive prompt.
    fn authorize_action(&self, name: &str) -> AuthStatus;

    /// Current status without prompting.
    fn action_status(&self, name: &str) -> AuthStatus;

    /// Helper-side check of the opaque credential produced by `caller_id`.
    fn is_caller_authorized(&self, name: &str, caller_id: &[u8]) -> bool;

    /// Credential of the current process, sent along with every request.
    fn caller_id(&self) -> Vec<u8>;

    fn pre_auth_action(&self, name: &str, parent: Option<&ParentContext>) {
        let _ = (name, parent);
    }

    /// Hand the backend a notifier for asynchronous status changes.
    fn attach(&self, notifier: StatusNotifier) {
        let _ = notifier;
    }
}
