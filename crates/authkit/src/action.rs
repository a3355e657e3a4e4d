//! Client-side action handle.
//!
//! An [`Action`] is a plain value: a name, optional helper, arguments and a
//! reference to the [`Registry`]. Executing it walks the authorization
//! decision for the backend's capabilities:
//!
//! ```text
//! AUTHORIZE_FROM_CLIENT ─ [PRE_AUTH_ACTION: pre_auth_action]
//!                         authorize_action ─ Authorized ─┬─ helper: forward
//!                                          └ other: map  └─ none: success
//! AUTHORIZE_FROM_HELPER ─ helper: forward (helper authorizes)
//!                         none: is_caller_authorized locally
//! neither               ─ BackendError
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use authkit_protocol::{ActionBatch, ActionReply, AuthStatus, Value, VariantMap};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::backend::Capabilities;
use crate::error::AuthkitError;
use crate::job::ExecutionJob;
use crate::registry::Registry;
use crate::transport::TransportError;
use crate::validate::validate_action_name;

/// Opaque handle of whatever owns an authentication prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentContext {
    /// Windowing system id of the parent window.
    Window(u64),
    /// Controlling terminal, e.g. `/dev/pts/3`.
    Terminal(String),
}

#[derive(Clone)]
pub struct Action {
    registry: Arc<Registry>,
    name: String,
    details: Option<String>,
    helper_id: String,
    arguments: VariantMap,
    parent_context: Option<ParentContext>,
    timeout: Option<Duration>,
    valid: bool,
}

impl Action {
    pub fn new(registry: Arc<Registry>, name: &str) -> Self {
        let mut action = Self {
            registry,
            name: String::new(),
            details: None,
            helper_id: String::new(),
            arguments: VariantMap::new(),
            parent_context: None,
            timeout: None,
            valid: false,
        };
        action.set_name(name);
        action
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename the action. Validity is recomputed and the backend's
    /// `setup_action` is called for the new name.
    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
        let backend = self.registry.backend();
        backend.setup_action(name);
        self.valid = if backend
            .capabilities()
            .contains(Capabilities::CHECK_ACTION_EXISTENCE)
        {
            !name.is_empty() && backend.action_exists(name)
        } else {
            validate_action_name(name).is_ok()
        };
        if !self.valid {
            debug!(action = name, "action is invalid");
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn set_details(&mut self, details: impl Into<String>) {
        self.details = Some(details.into());
    }

    pub fn helper_id(&self) -> &str {
        &self.helper_id
    }

    pub fn has_helper(&self) -> bool {
        !self.helper_id.is_empty()
    }

    pub fn set_helper_id(&mut self, helper_id: impl Into<String>) {
        self.helper_id = helper_id.into();
    }

    pub fn with_helper(mut self, helper_id: impl Into<String>) -> Self {
        self.set_helper_id(helper_id);
        self
    }

    pub fn arguments(&self) -> &VariantMap {
        &self.arguments
    }

    pub fn set_arguments(&mut self, arguments: VariantMap) {
        self.arguments = arguments;
    }

    pub fn add_argument(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.arguments.insert(key.into(), value.into());
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_argument(key, value);
        self
    }

    pub fn parent_context(&self) -> Option<&ParentContext> {
        self.parent_context.as_ref()
    }

    pub fn set_parent_context(&mut self, parent: ParentContext) {
        self.parent_context = Some(parent);
    }

    /// Per-action reply timeout, overriding the registry default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.or(self.registry.reply_timeout())
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Current status without prompting.
    pub fn status(&self) -> AuthStatus {
        if !self.valid {
            return AuthStatus::Invalid;
        }
        self.registry.backend().action_status(&self.name)
    }

    /// Authorize without executing.
    pub async fn authorize(&self) -> AuthStatus {
        if !self.valid {
            return AuthStatus::Invalid;
        }
        let backend = self.registry.backend();
        let caps = backend.capabilities();

        if caps.contains(Capabilities::AUTHORIZE_FROM_CLIENT) {
            self.authorize_in_client().await
        } else if caps.contains(Capabilities::AUTHORIZE_FROM_HELPER) {
            if !self.has_helper() {
                return self.authorize_caller_locally();
            }
            let caller_id = backend.caller_id();
            let fut = self
                .registry
                .transport()
                .authorize_action(&self.helper_id, &self.name, &caller_id);
            match self.bounded(fut).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(action = %self.name, helper = %self.helper_id, "authorize failed: {}", e);
                    AuthStatus::Error
                }
            }
        } else {
            AuthStatus::Error
        }
    }

    /// Authorize and run the action, returning its reply.
    pub async fn execute(&self) -> ActionReply {
        if !self.valid {
            return ActionReply::invalid_action();
        }
        let caps = self.registry.backend().capabilities();

        if caps.contains(Capabilities::AUTHORIZE_FROM_CLIENT) {
            let status = self.authorize_in_client().await;
            if status != AuthStatus::Authorized {
                return reply_for_status(status);
            }
            if self.has_helper() {
                self.forward().await
            } else {
                ActionReply::success()
            }
        } else if caps.contains(Capabilities::AUTHORIZE_FROM_HELPER) {
            if self.has_helper() {
                self.forward().await
            } else {
                reply_for_status(self.authorize_caller_locally())
            }
        } else {
            warn!(action = %self.name, ?caps, "backend cannot authorize from client or helper");
            ActionReply::backend_error(
                "backend declares neither client nor helper authorization",
            )
        }
    }

    /// Blocking form of [`execute`](Self::execute).
    ///
    /// Runs the request on the registry's runtime and waits for its reply
    /// only. Must not be called from within an async context: the wait would
    /// block a runtime thread and panics there.
    pub fn execute_blocking(&self) -> ActionReply {
        let Some(handle) = self.registry.runtime() else {
            return ActionReply::transport_error(AuthkitError::NoRuntime.to_string());
        };
        let (tx, rx) = oneshot::channel();
        let action = self.clone();
        handle.spawn(async move {
            let _ = tx.send(action.execute().await);
        });
        rx.blocking_recv()
            .unwrap_or_else(|_| ActionReply::transport_error("execution task was dropped"))
    }

    /// Wrap this action in an [`ExecutionJob`].
    pub fn job(&self) -> ExecutionJob {
        ExecutionJob::new(self.clone())
    }

    /// Authorize each action and send the authorized ones to `helper_id` as
    /// one batch. Rejected actions are appended to `denied`.
    ///
    /// Returns `true` iff a batch reached the helper; an empty batch never
    /// contacts it. Replies arrive as `Performed` events on the transport.
    pub async fn execute_actions(
        registry: &Arc<Registry>,
        actions: &[Action],
        mut denied: Option<&mut Vec<Action>>,
        helper_id: &str,
    ) -> bool {
        let caps = registry.backend().capabilities();
        let mut batch: ActionBatch = Vec::new();

        for action in actions {
            let accepted = if !action.valid {
                false
            } else if caps.contains(Capabilities::AUTHORIZE_FROM_CLIENT) {
                action.authorize_in_client().await == AuthStatus::Authorized
            } else {
                caps.contains(Capabilities::AUTHORIZE_FROM_HELPER)
            };

            if accepted {
                batch.push((action.name.clone(), action.arguments.clone()));
            } else if let Some(denied) = denied.as_deref_mut() {
                denied.push(action.clone());
            }
        }

        if batch.is_empty() {
            debug!(helper = helper_id, "nothing to execute");
            return false;
        }

        let caller_id = registry.backend().caller_id();
        match registry
            .transport()
            .perform_actions(helper_id, &batch, &caller_id)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(helper = helper_id, "failed to send batch: {}", e);
                false
            }
        }
    }

    async fn authorize_in_client(&self) -> AuthStatus {
        let backend = Arc::clone(self.registry.backend());
        if backend.capabilities().contains(Capabilities::PRE_AUTH_ACTION) {
            backend.pre_auth_action(&self.name, self.parent_context.as_ref());
        }
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || backend.authorize_action(&name))
            .await
            .unwrap_or(AuthStatus::Error)
    }

    fn authorize_caller_locally(&self) -> AuthStatus {
        let backend = self.registry.backend();
        if backend.is_caller_authorized(&self.name, &backend.caller_id()) {
            AuthStatus::Authorized
        } else {
            AuthStatus::Denied
        }
    }

    async fn forward(&self) -> ActionReply {
        let caller_id = self.registry.backend().caller_id();
        let fut = self.registry.transport().perform_action(
            &self.helper_id,
            &self.name,
            &caller_id,
            &self.arguments,
        );
        match self.bounded(fut).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(action = %self.name, helper = %self.helper_id, "helper call failed: {}", e);
                e.into()
            }
        }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, TransportError> {
        match self.timeout() {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .unwrap_or(Err(TransportError::Timeout(limit))),
            None => fut.await,
        }
    }
}

/// Reply for a client-side authorization outcome other than `Authorized`.
fn reply_for_status(status: AuthStatus) -> ActionReply {
    match status {
        AuthStatus::Authorized => ActionReply::success(),
        AuthStatus::Denied => ActionReply::authorization_denied(),
        AuthStatus::Invalid => ActionReply::invalid_action(),
        AuthStatus::UserCancelled => ActionReply::user_cancelled(),
        AuthStatus::Error | AuthStatus::AuthRequired => {
            ActionReply::backend_error(format!("backend returned {status} from authorization"))
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("helper_id", &self.helper_id)
            .field("valid", &self.valid)
            .field("arguments", &self.arguments)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Action {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.helper_id == other.helper_id
            && self.arguments == other.arguments
            && self.details == other.details
    }
}

#[cfg(test)]
mod tests {
    use authkit_protocol::ErrorCode;

    use super::*;
    use crate::testing::FakeBackend;
    use crate::transport::LocalTransport;

    fn registry_with(backend: FakeBackend) -> (Arc<FakeBackend>, Arc<Registry>) {
        let backend = Arc::new(backend);
        let registry = Registry::new(backend.clone(), Arc::new(LocalTransport::new())).into_shared();
        (backend, registry)
    }

    #[test]
    fn validity_follows_name_grammar() {
        let (_, registry) = registry_with(FakeBackend::client_side());
        assert!(registry.action("org.example.read").is_valid());
        assert!(!registry.action("").is_valid());
        assert!(!registry.action("org.Example").is_valid());
        assert!(!registry.action("org..example").is_valid());
    }

    #[test]
    fn validity_uses_existence_check_when_declared() {
        let backend = FakeBackend::client_side()
            .with_capabilities(
                Capabilities::AUTHORIZE_FROM_CLIENT | Capabilities::CHECK_ACTION_EXISTENCE,
            )
            .with_existing(["Weird.Name"]);
        let (_, registry) = registry_with(backend);
        assert!(registry.action("Weird.Name").is_valid());
        assert!(!registry.action("org.example.read").is_valid());
    }

    #[test]
    fn renaming_recomputes_validity_and_calls_setup() {
        let (backend, registry) = registry_with(FakeBackend::client_side());
        let mut action = registry.action("bad name");
        assert!(!action.is_valid());
        action.set_name("org.example.read");
        assert!(action.is_valid());
        assert_eq!(backend.setup_calls(), vec!["bad name", "org.example.read"]);
    }

    #[test]
    fn status_of_invalid_action_is_invalid() {
        let (_, registry) = registry_with(FakeBackend::client_side());
        assert_eq!(registry.action("").status(), AuthStatus::Invalid);
    }

    #[test]
    fn status_asks_backend() {
        let backend =
            FakeBackend::client_side().with_status("org.example.read", AuthStatus::AuthRequired);
        let (_, registry) = registry_with(backend);
        assert_eq!(
            registry.action("org.example.read").status(),
            AuthStatus::AuthRequired
        );
    }

    #[tokio::test]
    async fn client_statuses_map_to_replies() {
        let cases = [
            (AuthStatus::Authorized, None),
            (AuthStatus::Denied, Some(ErrorCode::AuthorizationDenied)),
            (AuthStatus::Invalid, Some(ErrorCode::InvalidAction)),
            (AuthStatus::UserCancelled, Some(ErrorCode::UserCancelled)),
            (AuthStatus::Error, Some(ErrorCode::BackendError)),
            (AuthStatus::AuthRequired, Some(ErrorCode::BackendError)),
        ];
        for (status, expected) in cases {
            let backend = FakeBackend::client_side().with_authorize("org.example.read", status);
            let (_, registry) = registry_with(backend);
            let reply = registry.action("org.example.read").execute().await;
            assert_eq!(reply.authkit_error(), expected, "{status}");
        }
    }

    #[tokio::test]
    async fn pre_auth_runs_before_authorize_with_parent() {
        let backend = FakeBackend::client_side().with_capabilities(
            Capabilities::AUTHORIZE_FROM_CLIENT | Capabilities::PRE_AUTH_ACTION,
        );
        let (backend, registry) = registry_with(backend);
        let mut action = registry.action("org.example.read");
        action.set_parent_context(ParentContext::Terminal("/dev/pts/1".to_string()));
        assert!(action.execute().await.succeeded());
        assert_eq!(
            backend.pre_auth_calls(),
            vec![(
                "org.example.read".to_string(),
                Some(ParentContext::Terminal("/dev/pts/1".to_string()))
            )]
        );
    }

    #[tokio::test]
    async fn no_pre_auth_without_capability() {
        let (backend, registry) = registry_with(FakeBackend::client_side());
        registry.action("org.example.read").execute().await;
        assert!(backend.pre_auth_calls().is_empty());
    }

    #[tokio::test]
    async fn helper_backend_without_helper_checks_caller_locally() {
        let (_, registry) = registry_with(FakeBackend::helper_side());
        assert!(registry.action("org.example.read").execute().await.succeeded());
        assert_eq!(
            registry.action("org.example.read").authorize().await,
            AuthStatus::Authorized
        );

        let (_, registry) = registry_with(FakeBackend::helper_side().deny_all_callers());
        assert_eq!(
            registry.action("org.example.read").execute().await.authkit_error(),
            Some(ErrorCode::AuthorizationDenied)
        );
    }

    #[tokio::test]
    async fn no_capabilities_is_backend_error() {
        let (_, registry) =
            registry_with(FakeBackend::client_side().with_capabilities(Capabilities::NONE));
        let action = registry.action("org.example.read");
        assert_eq!(
            action.execute().await.authkit_error(),
            Some(ErrorCode::BackendError)
        );
        assert_eq!(action.authorize().await, AuthStatus::Error);
    }

    #[tokio::test]
    async fn invalid_action_never_reaches_backend() {
        let (backend, registry) = registry_with(FakeBackend::client_side());
        let reply = registry.action("Not Valid").execute().await;
        assert_eq!(reply.authkit_error(), Some(ErrorCode::InvalidAction));
        assert_eq!(backend.authorize_count(), 0);
    }

    #[tokio::test]
    async fn unknown_helper_is_transport_error() {
        let (_, registry) = registry_with(FakeBackend::client_side());
        let reply = registry
            .action("org.example.read")
            .with_helper("org.missing")
            .execute()
            .await;
        assert_eq!(reply.authkit_error(), Some(ErrorCode::TransportError));
    }

    #[test]
    fn execute_blocking_without_runtime_fails_cleanly() {
        let (_, registry) = registry_with(FakeBackend::client_side());
        let reply = registry.action("org.example.read").execute_blocking();
        assert_eq!(reply.authkit_error(), Some(ErrorCode::TransportError));
    }

    #[test]
    fn execute_blocking_uses_registry_runtime() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let backend = Arc::new(FakeBackend::client_side());
        let registry = Registry::new(backend, Arc::new(LocalTransport::new()))
            .with_runtime(runtime.handle().clone())
            .into_shared();
        assert!(registry.action("org.example.read").execute_blocking().succeeded());
    }

    #[test]
    fn timeout_falls_back_to_registry_default() {
        let backend = Arc::new(FakeBackend::client_side());
        let registry = Registry::new(backend, Arc::new(LocalTransport::new()))
            .with_reply_timeout(Some(Duration::from_secs(9)))
            .into_shared();
        let mut action = registry.action("org.example.read");
        assert_eq!(action.timeout(), Some(Duration::from_secs(9)));
        action.set_timeout(Duration::from_secs(1));
        assert_eq!(action.timeout(), Some(Duration::from_secs(1)));
    }
}
