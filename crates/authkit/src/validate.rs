//! Name validation for actions and helpers.
//!
//! All validation is pure (no side effects). Every function returns Ok(()) or
//! Err(String) with a human-readable message.

use once_cell::sync::Lazy;
use regex::Regex;

/// Dot-separated lowercase words, e.g. `org.example.read`.
static ACTION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+(\.[a-z]+)*$").unwrap_or_else(|e| panic!("action name regex: {e}"))
});

/// Maximum length of an action or helper name.
pub const NAME_MAX_LEN: usize = 255;

/// Separator between the helper id and the action suffix.
pub const NAME_SEPARATOR: char = '.';

/// Replacement for separators in handler keys.
pub const HANDLER_KEY_SEPARATOR: char = '_';

/// Validate an action name.
///
/// Rules:
/// - Must not be empty
/// - Max 255 characters
/// - Lowercase ascii words separated by single dots
pub fn validate_action_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("action name is empty".into());
    }
    if name.len() > NAME_MAX_LEN {
        return Err(format!(
            "action name too long ({} > {NAME_MAX_LEN})",
            name.len()
        ));
    }
    if !ACTION_NAME_RE.is_match(name) {
        return Err(format!(
            "action name '{name}' must be lowercase words separated by '.'"
        ));
    }
    Ok(())
}

/// Validate a helper id.
///
/// Helper ids become socket file names, so they follow the same grammar as
/// action names.
pub fn validate_helper_id(id: &str) -> Result<(), String> {
    validate_action_name(id).map_err(|e| e.replacen("action name", "helper id", 1))
}

/// Derive the responder key of an action for the given helper.
///
/// The helper's own id prefix is stripped and the remaining separators are
/// replaced, so `org.example.disk.mount` on helper `org.example` maps to
/// `disk_mount`. Names outside the helper's namespace keep their full path.
pub fn handler_key(helper_id: &str, action: &str) -> String {
    let suffix = action
        .strip_prefix(helper_id)
        .and_then(|rest| rest.strip_prefix(NAME_SEPARATOR))
        .unwrap_or(action);
    suffix.replace(NAME_SEPARATOR, &HANDLER_KEY_SEPARATOR.to_string())
}
