//! Action replies.
//!
//! An [`ActionReply`] is what every action execution returns, whether it ran
//! in a helper, was answered locally, or never got past validation. It is a
//! tagged union: a success carrying a payload, a framework error carrying an
//! [`ErrorCode`], or a helper (business logic) error carrying the helper's own
//! integer code.
//!
//! ## Wire form
//!
//! ```text
//! payload map | error code (i32) | type tag (u32) | description (option)
//! ```
//!
//! Type tags: `0` framework error, `1` helper error, `2` success.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::value::{Value, VariantMap};
use crate::wire::{self, WireError};

/// Payload key under which a helper error code is recorded.
pub const HELPER_ERROR_KEY: &str = "errorCode";

/// Framework-level error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    NoError = 0,
    /// The helper has no responder bound.
    NoResponder = 1,
    /// The helper has no handler registered for the action.
    NoSuchAction = 2,
    /// The action name is malformed or unknown to the backend.
    InvalidAction = 3,
    /// The backend or helper refused the caller.
    AuthorizationDenied = 4,
    /// The user dismissed the authentication prompt.
    UserCancelled = 5,
    /// The helper is already running an action.
    HelperBusy = 6,
    /// An execution job was started twice.
    AlreadyStarted = 7,
    /// The helper could not be reached or went away mid-call.
    TransportError = 8,
    /// The backend declares an unsupported capability combination.
    BackendError = 9,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => ErrorCode::NoError,
            1 => ErrorCode::NoResponder,
            2 => ErrorCode::NoSuchAction,
            3 => ErrorCode::InvalidAction,
            4 => ErrorCode::AuthorizationDenied,
            5 => ErrorCode::UserCancelled,
            6 => ErrorCode::HelperBusy,
            7 => ErrorCode::AlreadyStarted,
            8 => ErrorCode::TransportError,
            9 => ErrorCode::BackendError,
            _ => return None,
        })
    }

    /// Default human-readable description.
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NoError => "no error",
            ErrorCode::NoResponder => "the helper has no responder",
            ErrorCode::NoSuchAction => "the helper does not implement this action",
            ErrorCode::InvalidAction => "invalid action",
            ErrorCode::AuthorizationDenied => "authorization denied",
            ErrorCode::UserCancelled => "authentication cancelled by the user",
            ErrorCode::HelperBusy => "the helper is busy with another action",
            ErrorCode::AlreadyStarted => "the job was already started",
            ErrorCode::TransportError => "could not communicate with the helper",
            ErrorCode::BackendError => "the authorization backend is misconfigured",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Discriminant of an [`ActionReply`], with its wire tag as value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReplyType {
    AuthkitError = 0,
    HelperError = 1,
    Success = 2,
}

impl ReplyType {
    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ReplyType::AuthkitError),
            1 => Some(ReplyType::HelperError),
            2 => Some(ReplyType::Success),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Success,
    Authkit(ErrorCode),
    Helper(i32),
}

/// Result of executing an action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionReply {
    kind: ReplyKind,
    data: VariantMap,
    error_description: Option<String>,
}

#[derive(Serialize)]
struct WireReplyRef<'a> {
    data: &'a VariantMap,
    error_code: i32,
    reply_type: u32,
    error_description: &'a Option<String>,
}

#[derive(Deserialize)]
struct WireReply {
    data: VariantMap,
    error_code: i32,
    reply_type: u32,
    error_description: Option<String>,
}

impl ActionReply {
    pub fn success() -> Self {
        Self {
            kind: ReplyKind::Success,
            data: VariantMap::new(),
            error_description: None,
        }
    }

    pub fn success_with(data: VariantMap) -> Self {
        Self {
            kind: ReplyKind::Success,
            data,
            error_description: None,
        }
    }

    /// Business-logic failure with a helper-defined code.
    pub fn helper_error(code: i32) -> Self {
        let mut reply = Self {
            kind: ReplyKind::Helper(code),
            data: VariantMap::new(),
            error_description: None,
        };
        reply.stamp_helper_code();
        reply
    }

    /// Framework failure. `ErrorCode::NoError` yields a success reply.
    pub fn error(code: ErrorCode) -> Self {
        let kind = match code {
            ErrorCode::NoError => ReplyKind::Success,
            other => ReplyKind::Authkit(other),
        };
        Self {
            kind,
            data: VariantMap::new(),
            error_description: None,
        }
    }

    pub fn no_responder() -> Self {
        Self::error(ErrorCode::NoResponder)
    }

    pub fn no_such_action() -> Self {
        Self::error(ErrorCode::NoSuchAction)
    }

    pub fn invalid_action() -> Self {
        Self::error(ErrorCode::InvalidAction)
    }

    pub fn authorization_denied() -> Self {
        Self::error(ErrorCode::AuthorizationDenied)
    }

    pub fn user_cancelled() -> Self {
        Self::error(ErrorCode::UserCancelled)
    }

    pub fn helper_busy() -> Self {
        Self::error(ErrorCode::HelperBusy)
    }

    pub fn already_started() -> Self {
        Self::error(ErrorCode::AlreadyStarted)
    }

    pub fn transport_error(description: impl Into<String>) -> Self {
        Self::error(ErrorCode::TransportError).with_description(description)
    }

    pub fn backend_error(description: impl Into<String>) -> Self {
        Self::error(ErrorCode::BackendError).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_data(key, value);
        self
    }

    pub fn reply_type(&self) -> ReplyType {
        match self.kind {
            ReplyKind::Success => ReplyType::Success,
            ReplyKind::Authkit(_) => ReplyType::AuthkitError,
            ReplyKind::Helper(_) => ReplyType::HelperError,
        }
    }

    /// Numeric error code; always 0 for a success.
    pub fn error_code(&self) -> i32 {
        match self.kind {
            ReplyKind::Success => 0,
            ReplyKind::Authkit(code) => code.as_i32(),
            ReplyKind::Helper(code) => code,
        }
    }

    /// Framework error code, if this is a framework failure.
    pub fn authkit_error(&self) -> Option<ErrorCode> {
        match self.kind {
            ReplyKind::Authkit(code) => Some(code),
            _ => None,
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.kind, ReplyKind::Success)
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    /// Explicit description, falling back to the framework default.
    pub fn error_description(&self) -> Option<&str> {
        match (&self.error_description, self.kind) {
            (Some(d), _) => Some(d.as_str()),
            (None, ReplyKind::Authkit(code)) => Some(code.description()),
            _ => None,
        }
    }

    pub fn set_error_description(&mut self, description: impl Into<String>) {
        self.error_description = Some(description.into());
    }

    pub fn data(&self) -> &VariantMap {
        &self.data
    }

    pub fn into_data(self) -> VariantMap {
        self.data
    }

    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Replace the payload. A helper error keeps its reserved code entry.
    pub fn set_data(&mut self, data: VariantMap) {
        self.data = data;
        self.stamp_helper_code();
    }

    /// Turn this reply into a helper error with `code`.
    pub fn set_helper_error(&mut self, code: i32) {
        self.kind = ReplyKind::Helper(code);
        self.stamp_helper_code();
    }

    fn stamp_helper_code(&mut self) {
        if let ReplyKind::Helper(code) = self.kind {
            self.data
                .insert(HELPER_ERROR_KEY.to_string(), Value::Int(i64::from(code)));
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        wire::encode(&WireReplyRef {
            data: &self.data,
            error_code: self.error_code(),
            reply_type: self.reply_type() as u32,
            error_description: &self.error_description,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let raw: WireReply = wire::decode(bytes)?;
        let reply_type = ReplyType::from_tag(raw.reply_type)
            .ok_or_else(|| WireError::InvalidReply(format!("unknown type tag {}", raw.reply_type)))?;

        let kind = match reply_type {
            ReplyType::Success => {
                if raw.error_code != 0 {
                    return Err(WireError::InvalidReply(format!(
                        "success reply with error code {}",
                        raw.error_code
                    )));
                }
                ReplyKind::Success
            }
            ReplyType::AuthkitError => match ErrorCode::from_i32(raw.error_code) {
                Some(ErrorCode::NoError) | None => {
                    return Err(WireError::InvalidReply(format!(
                        "framework error with code {}",
                        raw.error_code
                    )));
                }
                Some(code) => ReplyKind::Authkit(code),
            },
            ReplyType::HelperError => ReplyKind::Helper(raw.error_code),
        };

        let mut reply = Self {
            kind,
            data: raw.data,
            error_description: raw.error_description,
        };
        reply.stamp_helper_code();
        Ok(reply)
    }
}

impl Default for ActionReply {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for ActionReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ReplyKind::Success => f.write_str("success"),
            ReplyKind::Authkit(code) => write!(
                f,
                "error {}: {}",
                code.as_i32(),
                self.error_description().unwrap_or(code.description())
            ),
            ReplyKind::Helper(code) => match &self.error_description {
                Some(d) => write!(f, "helper error {code}: {d}"),
                None => write!(f, "helper error {code}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nested_payload() -> VariantMap {
        let mut inner = VariantMap::new();
        inner.insert("uid".to_string(), Value::Int(0));
        inner.insert("groups".to_string(), Value::List(vec!["wheel".into(), "adm".into()]));

        let mut data = VariantMap::new();
        data.insert("owner".to_string(), Value::Map(inner));
        data.insert("size".to_string(), Value::Int(i64::MAX));
        data.insert("ratio".to_string(), Value::Float(0.25));
        data.insert("dirty".to_string(), Value::Bool(true));
        data.insert("blob".to_string(), Value::Bytes(vec![0, 159, 146, 150, 255]));
        data.insert("name".to_string(), Value::from("grüße"));
        data
    }

    #[test]
    fn success_has_zero_code() {
        let reply = ActionReply::success_with(nested_payload());
        assert!(reply.succeeded());
        assert_eq!(reply.error_code(), 0);
        assert_eq!(reply.reply_type(), ReplyType::Success);
        assert!(reply.error_description().is_none());
    }

    #[test]
    fn no_error_code_is_success() {
        assert!(ActionReply::error(ErrorCode::NoError).succeeded());
    }

    #[test]
    fn helper_error_records_code_in_payload() {
        let mut reply = ActionReply::helper_error(42);
        assert_eq!(reply.reply_type(), ReplyType::HelperError);
        assert_eq!(reply.error_code(), 42);
        assert_eq!(reply.data()[HELPER_ERROR_KEY], Value::Int(42));

        reply.set_data(VariantMap::new());
        assert_eq!(reply.data()[HELPER_ERROR_KEY], Value::Int(42));
    }

    #[test]
    fn framework_error_falls_back_to_default_description() {
        let reply = ActionReply::helper_busy();
        assert_eq!(reply.authkit_error(), Some(ErrorCode::HelperBusy));
        assert_eq!(reply.error_code(), 6);
        assert_eq!(
            reply.error_description(),
            Some(ErrorCode::HelperBusy.description())
        );
    }

    #[test]
    fn roundtrip_preserves_every_value_kind() {
        let replies = [
            ActionReply::success_with(nested_payload()),
            ActionReply::helper_error(-3).with_description("disk full"),
            ActionReply::transport_error("helper exited"),
            ActionReply::authorization_denied().with_data("hint", "ask an admin"),
        ];
        for reply in replies {
            let decoded = ActionReply::decode(&reply.encode().unwrap()).unwrap();
            assert_eq!(decoded, reply);
        }
    }

    #[test]
    fn decode_rejects_success_with_error_code() {
        let bytes = wire::encode(&WireReplyRef {
            data: &VariantMap::new(),
            error_code: 5,
            reply_type: ReplyType::Success as u32,
            error_description: &None,
        })
        .unwrap();
        assert!(matches!(
            ActionReply::decode(&bytes),
            Err(WireError::InvalidReply(_))
        ));
    }

    #[test]
    fn decode_rejects_unknown_type_tag() {
        let bytes = wire::encode(&WireReplyRef {
            data: &VariantMap::new(),
            error_code: 0,
            reply_type: 7,
            error_description: &None,
        })
        .unwrap();
        assert!(ActionReply::decode(&bytes).is_err());
    }

    #[test]
    fn error_code_table_is_stable() {
        for code in 0..=9 {
            assert_eq!(ErrorCode::from_i32(code).unwrap().as_i32(), code);
        }
        assert!(ErrorCode::from_i32(10).is_none());
    }
}
