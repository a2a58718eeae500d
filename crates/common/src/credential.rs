//! API credential value type
//!
//! A credential is an opaque client identifier attached to outbound API
//! requests. It is compared by equality and never mutated. `Debug` and
//! `Display` only ever show a short prefix; the full value is reachable
//! through `expose()` when building a request.

use std::fmt;
use zeroize::Zeroize;

/// Number of leading characters shown in redacted views.
const VISIBLE_PREFIX: usize = 8;

/// Opaque API credential, zeroized on drop.
#[derive(PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a credential string. Surrounding whitespace is trimmed.
    pub fn new(value: impl Into<String>) -> Self {
        let mut value = value.into();
        let trimmed = value.trim();
        if trimmed.len() != value.len() {
            let owned = trimmed.to_owned();
            value.zeroize();
            value = owned;
        }
        Self(value)
    }

    /// Split a comma-separated list, dropping blank entries.
    pub fn parse_list(raw: &str) -> Vec<Credential> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Credential::new)
            .collect()
    }

    /// Expose the full value (use only when attaching to a request)
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Prefix-only view for logs and stats. Display aid, not a secrecy boundary.
    pub fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(VISIBLE_PREFIX).collect();
        format!("{prefix}...")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential({})", self.redacted())
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}
