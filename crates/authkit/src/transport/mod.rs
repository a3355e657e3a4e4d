//! Client to helper transports.
//!
//! A transport carries requests to a named helper and routes the helper's
//! notifications back to subscribers, keyed by action name. Two
//! implementations ship:
//!
//! - [`LocalTransport`]: helpers living in the same process (tests, embedding).
//! - [`SocketTransport`]: helpers behind unix sockets, one lazily opened
//!   connection per helper.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use authkit_protocol::{
    ActionBatch, ActionReply, AuthStatus, HelperEvent, MAX_FRAME_SIZE, VariantMap, WireError,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::codec::LengthDelimitedCodec;

mod local;
mod socket;

pub use local::LocalTransport;
pub use socket::{HelperEndpoint, SocketTransport};

/// Frame codec shared by both ends: `u32` big-endian length prefix.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_type::<u32>()
        .max_frame_length(MAX_FRAME_SIZE)
        .new_codec()
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no helper registered with id {0}")]
    UnknownHelper(String),

    #[error("failed to connect to helper {helper} at {path:?}: {source}")]
    Connect {
        helper: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to start helper {helper}: {source}")]
    Spawn {
        helper: String,
        #[source]
        source: std::io::Error,
    },

    #[error("helper {0} did not come up in time")]
    StartTimeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("connection to helper {0} closed")]
    Disconnected(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<TransportError> for ActionReply {
    fn from(err: TransportError) -> Self {
        ActionReply::transport_error(err.to_string())
    }
}

/// Message-passing contract between an unprivileged client and its helpers.
#[async_trait]
pub trait HelperTransport: Send + Sync {
    /// Authorize and execute `name` in the helper, returning its reply.
    async fn perform_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
        args: &VariantMap,
    ) -> Result<ActionReply, TransportError>;

    /// Hand a batch to the helper. Returns once the helper accepted it;
    /// results arrive as `Performed` events for each member.
    async fn perform_actions(
        &self,
        helper_id: &str,
        batch: &ActionBatch,
        caller_id: &[u8],
    ) -> Result<(), TransportError>;

    /// Ask the helper whether the caller may run `name`, without running it.
    async fn authorize_action(
        &self,
        helper_id: &str,
        name: &str,
        caller_id: &[u8],
    ) -> Result<AuthStatus, TransportError>;

    async fn stop_action(&self, helper_id: &str, name: &str) -> Result<(), TransportError>;

    /// Health check. Returns the id the helper reports for itself.
    async fn ping(&self, helper_id: &str) -> Result<String, TransportError>;

    /// Notifications for action `name`, from whichever helper runs it.
    fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<HelperEvent>;
}
