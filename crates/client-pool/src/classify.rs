//! Failure classification for upstream responses
//!
//! Authentication rejections (401/403) mean the credential itself is no longer
//! accepted and it is quarantined as `Dead`. Every other reported failure is
//! treated as transient and puts the credential into a shorter cooldown.

/// How a reported failure affects the credential that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Credential rejected (401/403)
    Auth,
    /// Anything else; the credential may recover after the cooldown
    Transient,
}

/// Classify an HTTP status reported against a credential.
pub fn classify_status(status: u16) -> FailureKind {
    match status {
        401 | 403 => FailureKind::Auth,
        _ => FailureKind::Transient,
    }
}
