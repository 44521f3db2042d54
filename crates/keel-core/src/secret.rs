//! Opaque wrapper for credentials, keys and composed connection strings.
//!
//! A `Secret` never renders its contents through `Debug` or `Display` and
//! deliberately has no `Serialize` impl, so it cannot end up in a log line,
//! a report, or a persisted state file by accident. The plaintext is only
//! reachable through [`Secret::expose`], which provider implementations call
//! when they hand a value to the cloud API.

use std::fmt;

/// Placeholder rendered wherever a secret value would otherwise appear.
pub const REDACTED: &str = "<redacted>";

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
