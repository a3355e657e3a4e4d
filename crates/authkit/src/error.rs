//! Infrastructure errors.
//!
//! Action outcomes are never errors: they are [`ActionReply`] values. The
//! types here cover what surrounds the protocol (binding sockets, loading
//! configuration, framing).
//!
//! [`ActionReply`]: authkit_protocol::ActionReply

use std::path::PathBuf;

use authkit_protocol::WireError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthkitError>;

#[derive(Debug, Error)]
pub enum AuthkitError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("failed to bind helper socket {path:?}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid helper id: {0}")]
    InvalidHelperId(String),

    #[error("responder already bound for helper {0}")]
    ResponderAlreadyBound(String),

    #[error("no tokio runtime available")]
    NoRuntime,
}
