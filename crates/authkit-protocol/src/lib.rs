//! Wire types for authkit.
//!
//! Shared by the unprivileged client library and the privileged helper
//! daemons. Everything that crosses the process boundary lives here:
//!
//! - [`value`]: the dynamic value model used for action arguments and
//!   reply payloads
//! - [`reply`]: [`ActionReply`], the tagged result of every action
//! - [`status`]: [`AuthStatus`], the outcome of an authorization check
//! - [`messages`]: request/notification envelopes exchanged over a socket
//! - [`wire`]: the bincode codec and its error type
//!
//! Frames on the socket are length-prefixed; the framing itself is handled
//! by the transport (see `authkit::transport`), this crate only encodes the
//! frame bodies.

pub mod messages;
pub mod reply;
pub mod status;
pub mod value;
pub mod wire;

pub use messages::{
    ActionBatch, DebugLevel, HelperEvent, HelperMessage, HelperSignal, Request, RequestBody,
    RequestId, SignalKind,
};
pub use reply::{ActionReply, ErrorCode, HELPER_ERROR_KEY, ReplyType};
pub use status::AuthStatus;
pub use value::{MAX_VALUE_DEPTH, Value, VariantMap};
pub use wire::{MAX_FRAME_SIZE, WireError};
