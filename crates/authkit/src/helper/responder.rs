use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use authkit_protocol::{ActionReply, VariantMap};

use super::HelperContext;
use crate::validate::{NAME_SEPARATOR, handler_key};

/// An action handler. Runs on the blocking pool with elevated rights.
pub type Handler = Arc<dyn Fn(&HelperContext, VariantMap) -> ActionReply + Send + Sync>;

/// Name to handler table of one helper.
///
/// ```ignore
/// let responder = Responder::new("org.example")
///     .on("read", |ctx, args| read_file(ctx, args))
///     .on("disk_mount", mount);
/// ```
///
/// `org.example.read` resolves to `read`, `org.example.disk.mount` to
/// `disk_mount`.
pub struct Responder {
    helper_id: String,
    handlers: HashMap<String, Handler>,
}

impl Responder {
    pub fn new(helper_id: impl Into<String>) -> Self {
        Self {
            helper_id: helper_id.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` under `key`. A dotted key is treated as a full
    /// action name and converted to its handler key.
    pub fn on<F>(mut self, key: &str, handler: F) -> Self
    where
        F: Fn(&HelperContext, VariantMap) -> ActionReply + Send + Sync + 'static,
    {
        let key = if key.contains(NAME_SEPARATOR) {
            handler_key(&self.helper_id, key)
        } else {
            key.to_string()
        };
        self.handlers.insert(key, Arc::new(handler));
        self
    }

    pub fn helper_id(&self) -> &str {
        &self.helper_id
    }

    pub fn handler_for(&self, action: &str) -> Option<Handler> {
        self.handlers
            .get(&handler_key(&self.helper_id, action))
            .cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Responder")
            .field("helper_id", &self.helper_id)
            .field("handlers", &keys)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(_: &HelperContext, _: VariantMap) -> ActionReply {
        ActionReply::success()
    }

    #[test]
    fn resolves_prefixed_names() {
        let responder = Responder::new("org.example").on("read", ok).on("disk_mount", ok);
        assert!(responder.handler_for("org.example.read").is_some());
        assert!(responder.handler_for("org.example.disk.mount").is_some());
        assert!(responder.handler_for("org.example.write").is_none());
    }

    #[test]
    fn dotted_keys_are_normalized() {
        let responder = Responder::new("org.example").on("org.example.disk.mount", ok);
        assert_eq!(responder.keys().collect::<Vec<_>>(), vec!["disk_mount"]);
    }

    #[test]
    fn foreign_namespace_does_not_match_short_key() {
        let responder = Responder::new("org.example").on("read", ok);
        assert!(responder.handler_for("org.other.read").is_none());
    }
}
