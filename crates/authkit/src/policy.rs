//! Static allow-list backend.
//!
//! Authorizes in the helper by comparing the caller's uid and gid against
//! the `[policy.actions."<name>"]` tables of the configuration. Actions that
//! are not listed do not exist.

use std::collections::BTreeMap;

use authkit_protocol::AuthStatus;
use tracing::debug;

use crate::backend::{AuthBackend, Capabilities};
use crate::config::{ActionPolicy, PolicyConfig};
use crate::credential::CallerCredential;

#[derive(Debug, Clone, Default)]
pub struct PolicyBackend {
    actions: BTreeMap<String, ActionPolicy>,
}

impl PolicyBackend {
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            actions: config.actions.clone(),
        }
    }

    pub fn with_action(mut self, name: impl Into<String>, policy: ActionPolicy) -> Self {
        self.actions.insert(name.into(), policy);
        self
    }

    fn allows(&self, name: &str, caller: &CallerCredential) -> bool {
        let Some(policy) = self.actions.get(name) else {
            return false;
        };
        policy.allow_any
            || policy.allow_uids.contains(&caller.uid)
            || policy.allow_gids.contains(&caller.gid)
    }
}

impl AuthBackend for PolicyBackend {
    fn capabilities(&self) -> Capabilities {
        Capabilities::AUTHORIZE_FROM_HELPER | Capabilities::CHECK_ACTION_EXISTENCE
    }

    fn action_exists(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Not a client-side backend.
    fn authorize_action(&self, _name: &str) -> AuthStatus {
        AuthStatus::Error
    }

    fn action_status(&self, name: &str) -> AuthStatus {
        if !self.action_exists(name) {
            return AuthStatus::Invalid;
        }
        if self.allows(name, &CallerCredential::current()) {
            AuthStatus::Authorized
        } else {
            AuthStatus::Denied
        }
    }

    fn is_caller_authorized(&self, name: &str, caller_id: &[u8]) -> bool {
        let Some(caller) = CallerCredential::from_bytes(caller_id) else {
            debug!(action = name, "caller credential is not readable");
            return false;
        };
        let allowed = self.allows(name, &caller);
        debug!(action = name, uid = caller.uid, gid = caller.gid, allowed, "policy check");
        allowed
    }

    fn caller_id(&self) -> Vec<u8> {
        CallerCredential::current().to_bytes()
    }
}
