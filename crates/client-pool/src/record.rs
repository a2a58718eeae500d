//! Per-credential state and transitions
//!
//! Transitions:
//! - Active → Cooling (transient failure)
//! - Active → Dead (401/403)
//! - Cooling → Active (success, or re-admission after `cooldown`)
//! - Dead → Active (re-admission after `cooldown * DEAD_COOLDOWN_FACTOR`)
//!
//! Records are only mutated through the owning pool's lock.

use std::time::Duration;

use common::Credential;
use serde::Serialize;
use tokio::time::Instant;

use crate::classify::{FailureKind, classify_status};

/// Dead credentials wait this many cooldown periods before re-admission.
pub const DEAD_COOLDOWN_FACTOR: u32 = 6;

/// Health of a single credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    Active,
    Cooling,
    Dead,
}

impl CredentialStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            CredentialStatus::Active => "active",
            CredentialStatus::Cooling => "cooling",
            CredentialStatus::Dead => "dead",
        }
    }
}

/// A credential plus its counters and timestamps.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    credential: Credential,
    status: CredentialStatus,
    fail_count: u32,
    success_count: u64,
    last_failed_at: Option<Instant>,
    last_used_at: Option<Instant>,
    created_at: Instant,
}

impl CredentialRecord {
    pub fn new(credential: Credential, now: Instant) -> Self {
        Self {
            credential,
            status: CredentialStatus::Active,
            fail_count: 0,
            success_count: 0,
            last_failed_at: None,
            last_used_at: None,
            created_at: now,
        }
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn status(&self) -> CredentialStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    /// Failures since the last success.
    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    pub fn last_failed_at(&self) -> Option<Instant> {
        self.last_failed_at
    }

    pub fn last_used_at(&self) -> Option<Instant> {
        self.last_used_at
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Record a successful request.
    ///
    /// A `Cooling` record recovers to `Active`. A `Dead` record stays dead; it
    /// has to be re-admitted by selection first, and the success after that
    /// confirms the recovery.
    pub fn mark_success(&mut self, now: Instant) {
        self.success_count += 1;
        self.last_used_at = Some(now);
        match self.status {
            CredentialStatus::Cooling => {
                self.status = CredentialStatus::Active;
                self.fail_count = 0;
                self.last_failed_at = None;
            }
            CredentialStatus::Active => self.fail_count = 0,
            CredentialStatus::Dead => {}
        }
    }

    /// Record a failed request with the upstream HTTP status.
    ///
    /// Returns the resulting status.
    pub fn mark_failed(&mut self, status_code: u16, now: Instant) -> CredentialStatus {
        self.fail_count += 1;
        self.last_failed_at = Some(now);
        self.status = match classify_status(status_code) {
            FailureKind::Auth => CredentialStatus::Dead,
            FailureKind::Transient => CredentialStatus::Cooling,
        };
        self.status
    }

    /// Whether selection may hand this record out again.
    pub fn can_retry(&self, cooldown: Duration, now: Instant) -> bool {
        match self.status {
            CredentialStatus::Active => true,
            CredentialStatus::Dead => {
                let quarantine = cooldown.checked_mul(DEAD_COOLDOWN_FACTOR);
                match (self.last_failed_at, quarantine) {
                    (Some(failed_at), Some(quarantine)) => {
                        now.saturating_duration_since(failed_at) > quarantine
                    }
                    _ => false,
                }
            }
            CredentialStatus::Cooling => match self.last_failed_at {
                Some(failed_at) => now.saturating_duration_since(failed_at) > cooldown,
                None => true,
            },
        }
    }

    /// Optimistically put the record back into rotation before any request
    /// has confirmed it works. The fail count is kept until a success.
    pub(crate) fn readmit(&mut self) {
        self.status = CredentialStatus::Active;
        self.last_failed_at = None;
    }

    /// Copy out a display view of this record.
    pub fn snapshot(&self, now: Instant) -> RecordSnapshot {
        let secs_since = |t: Instant| now.saturating_duration_since(t).as_secs();
        RecordSnapshot {
            credential: self.credential.redacted(),
            status: self.status,
            fail_count: self.fail_count,
            success_count: self.success_count,
            last_failed_secs_ago: self.last_failed_at.map(secs_since),
            last_used_secs_ago: self.last_used_at.map(secs_since),
            age_secs: secs_since(self.created_at),
        }
    }
}

/// Read-only view of a record for stats and health output.
#[derive(Debug, Clone, Serialize)]
pub struct RecordSnapshot {
    /// Prefix-only credential
    pub credential: String,
    pub status: CredentialStatus,
    pub fail_count: u32,
    pub success_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failed_secs_ago: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_secs_ago: Option<u64>,
    pub age_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn record() -> (CredentialRecord, Instant) {
        let now = Instant::now();
        (CredentialRecord::new(Credential::new("test_id_123"), now), now)
    }

    #[test]
    fn new_record_is_active_with_zero_counters() {
        let (rec, now) = record();
        assert_eq!(rec.credential().expose(), "test_id_123");
        assert_eq!(rec.status(), CredentialStatus::Active);
        assert_eq!(rec.fail_count(), 0);
        assert_eq!(rec.success_count(), 0);
        assert!(rec.last_failed_at().is_none());
        assert!(rec.last_used_at().is_none());
        assert_eq!(rec.created_at(), now);
    }

    #[test]
    fn mark_success_counts_and_stamps() {
        let (mut rec, now) = record();
        rec.mark_success(now);
        assert_eq!(rec.success_count(), 1);
        assert_eq!(rec.last_used_at(), Some(now));
    }

    #[test]
    fn auth_failure_marks_dead() {
        let (mut rec, now) = record();
        assert_eq!(rec.mark_failed(401, now), CredentialStatus::Dead);
        assert_eq!(rec.fail_count(), 1);
        assert_eq!(rec.last_failed_at(), Some(now));
    }

    #[test]
    fn other_failure_marks_cooling() {
        let (mut rec, now) = record();
        assert_eq!(rec.mark_failed(500, now), CredentialStatus::Cooling);
        assert_eq!(rec.fail_count(), 1);
    }

    #[test]
    fn success_recovers_from_cooling() {
        let (mut rec, now) = record();
        rec.mark_failed(500, now);
        rec.mark_success(now);
        assert_eq!(rec.status(), CredentialStatus::Active);
        assert_eq!(rec.fail_count(), 0);
        assert!(rec.last_failed_at().is_none());
    }

    #[test]
    fn success_does_not_revive_dead() {
        let (mut rec, now) = record();
        rec.mark_failed(403, now);
        rec.mark_success(now);
        assert_eq!(rec.status(), CredentialStatus::Dead);
        assert_eq!(rec.fail_count(), 1);
        assert_eq!(rec.success_count(), 1);
    }

    #[test]
    fn active_can_always_retry() {
        let (rec, now) = record();
        assert!(rec.can_retry(COOLDOWN, now));
    }

    #[test]
    fn cooling_retryable_only_after_cooldown() {
        let (mut rec, now) = record();
        rec.mark_failed(500, now);
        assert!(!rec.can_retry(COOLDOWN, now + COOLDOWN));
        assert!(rec.can_retry(COOLDOWN, now + COOLDOWN + Duration::from_secs(1)));
    }

    #[test]
    fn dead_waits_six_cooldowns() {
        let (mut rec, now) = record();
        rec.mark_failed(401, now);
        assert!(!rec.can_retry(COOLDOWN, now + COOLDOWN + Duration::from_secs(1)));
        assert!(!rec.can_retry(COOLDOWN, now + COOLDOWN * 6));
        assert!(rec.can_retry(COOLDOWN, now + COOLDOWN * 6 + Duration::from_secs(1)));
    }

    #[test]
    fn dead_with_overflowing_quarantine_never_retries() {
        let (mut rec, now) = record();
        rec.mark_failed(401, now);
        assert!(!rec.can_retry(Duration::MAX, now + Duration::from_secs(86_400)));
    }

    #[test]
    fn readmit_activates_but_keeps_fail_count() {
        let (mut rec, now) = record();
        rec.mark_failed(401, now);
        rec.readmit();
        assert_eq!(rec.status(), CredentialStatus::Active);
        assert_eq!(rec.fail_count(), 1);
        assert!(rec.last_failed_at().is_none());

        rec.mark_success(now);
        assert_eq!(rec.fail_count(), 0);
    }

    #[test]
    fn snapshot_redacts_and_reports_ages() {
        let (mut rec, now) = record();
        rec.mark_failed(500, now);
        let snap = rec.snapshot(now + Duration::from_secs(42));
        assert_eq!(snap.credential, "test_id_...");
        assert_eq!(snap.status, CredentialStatus::Cooling);
        assert_eq!(snap.last_failed_secs_ago, Some(42));
        assert_eq!(snap.last_used_secs_ago, None);
        assert_eq!(snap.age_secs, 42);
    }
}
