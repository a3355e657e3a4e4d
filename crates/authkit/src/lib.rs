//! authkit: privilege separation for named actions.
//!
//! An unprivileged client describes a unit of privileged work as an
//! [`Action`] (a dotted name plus arguments). The configured
//! [`AuthBackend`] decides whether the client may run it, and if the action
//! names a helper the request is forwarded to that helper process, which
//! checks the caller again and runs the matching handler with elevated
//! rights.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │ client (unprivileged)        │  unix    │ helper (privileged)          │
//! │                              │  socket  │                              │
//! │ Action / ExecutionJob ──────────────────▶ HelperServer                 │
//! │   │                          │          │   │                          │
//! │   ▼                          │          │   ▼                          │
//! │ Registry ─ AuthBackend       │          │ HelperDispatcher ─ Responder │
//! │          └ HelperTransport ◀──signals───┤   (one action at a time)     │
//! └──────────────────────────────┘          └──────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`action`]: client-side handle and the authorize/dispatch decision
//! - [`job`]: asynchronous wrapper with progress and completion events
//! - [`backend`]: the authorization backend trait and capability flags
//! - [`registry`]: the constructed-once context tying backend and transport
//! - [`transport`]: in-process and unix socket transports
//! - [`helper`]: dispatcher, responder, idle timer and socket server
//! - [`config`], [`logging`]: ambient settings shared by the binaries

pub mod action;
pub mod backend;
pub mod config;
pub mod credential;
pub mod error;
pub mod helper;
pub mod job;
pub mod logging;
pub mod policy;
pub mod registry;
pub mod router;
pub mod transport;
pub mod validate;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use action::{Action, ParentContext};
pub use backend::{AuthBackend, Capabilities, StatusNotifier};
pub use error::{AuthkitError, Result};
pub use helper::{HelperContext, HelperDispatcher, Responder};
pub use job::{ExecutionJob, JobError, JobEvent, JobState};
pub use registry::Registry;
pub use transport::{HelperTransport, TransportError};

pub use authkit_protocol::{
    ActionReply, AuthStatus, DebugLevel, ErrorCode, ReplyType, Value, VariantMap,
};
