//! Request and notification envelopes.
//!
//! A client holds one connection per helper and multiplexes requests over it.
//! Every [`Request`] carries an id that the helper echoes in the matching
//! response; [`HelperMessage::Signal`] frames are unsolicited and carry the
//! action name they refer to instead.
//!
//! ```text
//! client                                   helper
//!   | Request{1, PerformAction{..}}  ------->  |
//!   | <-------  Signal{ActionStarted, name}    |
//!   | <-------  Signal{ProgressStep.., name}   |
//!   | <-------  Signal{ActionPerformed, name}  |
//!   | <-------  Reply{1, reply blob}           |
//! ```

use serde::{Deserialize, Serialize};

use crate::reply::ActionReply;
use crate::status::AuthStatus;
use crate::value::VariantMap;
use crate::wire::{self, WireError};

pub type RequestId = u64;

/// Ordered `(action name, arguments)` pairs sent in one `PerformActions`.
pub type ActionBatch = Vec<(String, VariantMap)>;

/// Client to helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Authorize and execute one action; answered with `Reply`.
    PerformAction {
        name: String,
        #[serde(with = "serde_bytes")]
        caller_id: Vec<u8>,
        #[serde(with = "serde_bytes")]
        args: Vec<u8>,
    },
    /// Execute a batch sequentially; answered with `Ack`, results arrive as
    /// `ActionPerformed` signals.
    PerformActions {
        #[serde(with = "serde_bytes")]
        batch: Vec<u8>,
        #[serde(with = "serde_bytes")]
        caller_id: Vec<u8>,
    },
    /// Authorize without executing; answered with `Status`.
    AuthorizeAction {
        name: String,
        #[serde(with = "serde_bytes")]
        caller_id: Vec<u8>,
    },
    /// Ask the running handler to stop; answered with `Ack`.
    StopAction { name: String },
    /// Health check; answered with `Pong`.
    Ping,
}

impl Request {
    pub fn new(id: RequestId, body: RequestBody) -> Self {
        Self { id, body }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        wire::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        wire::decode(bytes)
    }
}

/// Helper to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HelperMessage {
    Reply {
        id: RequestId,
        #[serde(with = "serde_bytes")]
        reply: Vec<u8>,
    },
    Status {
        id: RequestId,
        status: AuthStatus,
    },
    Ack {
        id: RequestId,
    },
    Pong {
        id: RequestId,
        helper_id: String,
    },
    Signal(HelperSignal),
}

impl HelperMessage {
    /// Id of the request this message answers; `None` for signals.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            HelperMessage::Reply { id, .. }
            | HelperMessage::Status { id, .. }
            | HelperMessage::Ack { id }
            | HelperMessage::Pong { id, .. } => Some(*id),
            HelperMessage::Signal(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        wire::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        wire::decode(bytes)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    ActionStarted,
    ActionPerformed,
    DebugMessage,
    ProgressStepIndicator,
    ProgressStepData,
}

/// Severity of a helper debug message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebugLevel {
    Debug,
    Info,
    Warning,
    Critical,
    Fatal,
}

/// Notification frame: kind, action name and an encoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperSignal {
    pub kind: SignalKind,
    pub action: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Decoded form of a [`HelperSignal`] payload.
#[derive(Debug, Clone, PartialEq)]
pub enum HelperEvent {
    Started,
    Performed(ActionReply),
    Debug { level: DebugLevel, message: String },
    ProgressStep(i32),
    ProgressData(VariantMap),
}

impl HelperSignal {
    pub fn from_event(action: impl Into<String>, event: &HelperEvent) -> Result<Self, WireError> {
        let (kind, payload) = match event {
            HelperEvent::Started => (SignalKind::ActionStarted, Vec::new()),
            HelperEvent::Performed(reply) => (SignalKind::ActionPerformed, reply.encode()?),
            HelperEvent::Debug { level, message } => {
                (SignalKind::DebugMessage, wire::encode(&(level, message))?)
            }
            HelperEvent::ProgressStep(step) => {
                (SignalKind::ProgressStepIndicator, wire::encode(step)?)
            }
            HelperEvent::ProgressData(data) => (SignalKind::ProgressStepData, wire::encode(data)?),
        };
        Ok(Self {
            kind,
            action: action.into(),
            payload,
        })
    }

    pub fn event(&self) -> Result<HelperEvent, WireError> {
        Ok(match self.kind {
            SignalKind::ActionStarted => HelperEvent::Started,
            SignalKind::ActionPerformed => HelperEvent::Performed(ActionReply::decode(&self.payload)?),
            SignalKind::DebugMessage => {
                let (level, message): (DebugLevel, String) = wire::decode(&self.payload)?;
                HelperEvent::Debug { level, message }
            }
            SignalKind::ProgressStepIndicator => HelperEvent::ProgressStep(wire::decode(&self.payload)?),
            SignalKind::ProgressStepData => HelperEvent::ProgressData(wire::decode(&self.payload)?),
        })
    }
}

pub fn encode_batch(batch: &ActionBatch) -> Result<Vec<u8>, WireError> {
    wire::encode(batch)
}

pub fn decode_batch(bytes: &[u8]) -> Result<ActionBatch, WireError> {
    wire::decode(bytes)
}
