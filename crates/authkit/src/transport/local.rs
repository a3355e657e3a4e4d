use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use authkit_protocol::messages::encode_batch;
use authkit_protocol::wire::encode_map;
use authkit_protocol::{ActionBatch, ActionReply, AuthStatus, HelperEvent, VariantMap};
use tokio::sync::mpsc;

use super::{HelperTransport, TransportError};
use crate::helper::HelperDispatcher;
use crate::router::SignalRouter;

/// Transport to dispatchers living in the same process.
///
/// Requests still go through the encoded blob form so the dispatcher sees
/// exactly what it would see over a socket.
#[derive(Default)]
pub struct LocalTransport {
    helpers: HashMap<String, HelperDispatcher>,
    router: Arc<SignalRouter<HelperEvent>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_helper(mut self, dispatcher: HelperDispatcher) -> Self {
        dispatcher.attach_router(Arc::clone(&self.router));
        self.helpers
            .insert(dispatcher.helper_id().to_string(), dispatcher);
        self
    }

    fn helper(&self, helper_id: &str) -> Result<&HelperDispatcher, TransportError> {
        self.helpers
            .get(helper_id)
            .ok_or_else(|| TransportError::UnknownHelper(helper_id.to_string()))
    }
}

#[async_trait]
impl HelperTransport for LocalTransport {
    async fn perform_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
        args: &VariantMap,
    ) -> Result<ActionReply, TransportError> {
        let dispatcher = self.helper(helper_id)?.clone();
        let blob = encode_map(args)?;
        let (name, caller_id) = (name.to_string(), caller_id.to_vec());

        // Detached so a caller-side timeout never leaves the slot claimed.
        let task = tokio::spawn(async move {
            dispatcher.perform_action(&name, &caller_id, &blob).await
        });
        let reply = task
            .await
            .map_err(|_| TransportError::Disconnected(helper_id.to_string()))??;
        Ok(ActionReply::decode(&reply)?)
    }

    async fn perform_actions(
        &self,
        helper_id: &str,
        batch: &ActionBatch,
        caller_id: &[u8],
    ) -> Result<(), TransportError> {
        let dispatcher = self.helper(helper_id)?.clone();
        let blob = encode_batch(batch)?;
        let caller_id = caller_id.to_vec();
        tokio::spawn(async move {
            dispatcher.perform_actions(&blob, &caller_id).await;
        });
        Ok(())
    }

    async fn authorize_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
    ) -> Result<AuthStatus, TransportError> {
        Ok(self.helper(helper_id)?.authorize_action(name, caller_id).await)
    }

    async fn stop_action(&self, helper_id: &str, name: &str) -> Result<(), TransportError> {
        self.helper(helper_id)?.stop_action(name);
        Ok(())
    }

    async fn ping(&self, helper_id: &str) -> Result<String, TransportError> {
        Ok(self.helper(helper_id)?.helper_id().to_string())
    }

    fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<HelperEvent> {
        self.router.subscribe(name)
    }
}
