//! Event category derivation.
//!
//! A category is the prefix of a dotted event name up to and including the
//! first `.`: `VM.START` belongs to `VM.`. A name without a dot is its own
//! category. Classification is pure and total.

use serde::Serialize;
use std::fmt;

/// Coarse classification of an event name, used to pick a handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    /// Creates a category from its literal form (`"VM."`).
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the category string, including the trailing dot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the category without its trailing dot (`"VM"`).
    pub fn prefix(&self) -> &str {
        self.0.strip_suffix('.').unwrap_or(&self.0)
    }

    /// Returns true if the category came from a dotted name.
    pub fn is_dotted(&self) -> bool {
        self.0.ends_with('.')
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Category {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the category of an event name.
pub fn classify(event_name: &str) -> Category {
    match event_name.find('.') {
        Some(idx) => Category(event_name[..=idx].to_string()),
        None => Category(event_name.to_string()),
    }
}

/// Returns true for login/logout events.
///
/// Matches both `USER.LOGIN` and the underscore form `ACCOUNT_LOGOUT`.
pub fn is_session_event(event_name: &str) -> bool {
    let upper = event_name.to_ascii_uppercase();
    ["LOGIN", "LOGOUT"].iter().any(|suffix| {
        upper
            .strip_suffix(suffix)
            .is_some_and(|head| head.ends_with('.') || head.ends_with('_'))
    })
}

/// Returns true if the event name refers to an offering.
pub fn mentions_offering(event_name: &str) -> bool {
    event_name.to_ascii_uppercase().contains("OFFERING")
}
