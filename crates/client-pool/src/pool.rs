//! Credential selection and failure reporting
//!
//! One mutex covers the whole pool: selection, cursor movement, and every
//! record mutation happen inside it, so two concurrent reports can never
//! interleave on the same record or the cursor. Handing the same `Active`
//! credential to two callers is expected and harmless.
//!
//! Records are never removed, so the cursor is always a valid index.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use common::Credential;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::record::{CredentialRecord, CredentialStatus, RecordSnapshot};

/// Rotation policy, fixed for the lifetime of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Stick with one credential until it stops being active.
    #[default]
    Failover,
    /// Hand out active credentials in turn.
    RoundRobin,
}

impl Strategy {
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Failover => "failover",
            Strategy::RoundRobin => "round-robin",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "failover" => Ok(Strategy::Failover),
            "round-robin" => Ok(Strategy::RoundRobin),
            other => Err(format!(
                "unknown rotation strategy {other:?} (expected \"failover\" or \"round-robin\")"
            )),
        }
    }
}

/// Point-in-time copy of pool state.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub cooling: usize,
    pub dead: usize,
    pub strategy: Strategy,
    pub cursor: usize,
    pub credentials: Vec<RecordSnapshot>,
}

impl PoolStats {
    /// all active → healthy, some active → degraded, none active → unhealthy.
    pub fn health(&self) -> &'static str {
        if self.total > 0 && self.active == self.total {
            "healthy"
        } else if self.active > 0 {
            "degraded"
        } else {
            "unhealthy"
        }
    }
}

struct PoolState {
    records: Vec<CredentialRecord>,
    cursor: usize,
}

impl PoolState {
    /// First index from `start` (wrapping) whose record satisfies `pred`.
    fn scan(&self, start: usize, pred: impl Fn(&CredentialRecord) -> bool) -> Option<usize> {
        let n = self.records.len();
        (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&idx| pred(&self.records[idx]))
    }

    /// Re-admit the first record from `start` whose cooldown has elapsed.
    fn readmit(&mut self, start: usize, cooldown: Duration, now: Instant) -> Option<usize> {
        let idx = self.scan(start, |r| r.can_retry(cooldown, now))?;
        let record = &mut self.records[idx];
        let previous = record.status();
        record.readmit();
        info!(
            index = idx,
            credential = %record.credential(),
            previous = previous.label(),
            "re-admitting credential after cooldown"
        );
        metrics::counter!("credential_readmissions_total").increment(1);
        Some(idx)
    }

    fn select_failover(&mut self, cooldown: Duration, now: Instant) -> Option<usize> {
        if self.records[self.cursor].is_active() {
            return Some(self.cursor);
        }

        let idx = match self.scan(self.cursor, CredentialRecord::is_active) {
            Some(idx) => {
                info!(
                    index = idx,
                    credential = %self.records[idx].credential(),
                    "switched to next active credential"
                );
                idx
            }
            None => self.readmit(self.cursor, cooldown, now)?,
        };
        self.cursor = idx;
        Some(idx)
    }

    fn select_round_robin(&mut self, cooldown: Duration, now: Instant) -> Option<usize> {
        let idx = match self.scan(self.cursor, CredentialRecord::is_active) {
            Some(idx) => idx,
            None => self.readmit(self.cursor, cooldown, now)?,
        };
        self.cursor = (idx + 1) % self.records.len();
        Some(idx)
    }

    fn find_mut(&mut self, credential: &Credential) -> Option<&mut CredentialRecord> {
        self.records
            .iter_mut()
            .find(|r| r.credential() == credential)
    }

    /// (active, cooling, dead)
    fn counts(&self) -> (usize, usize, usize) {
        self.records
            .iter()
            .fold((0, 0, 0), |(a, c, d), r| match r.status() {
                CredentialStatus::Active => (a + 1, c, d),
                CredentialStatus::Cooling => (a, c + 1, d),
                CredentialStatus::Dead => (a, c, d + 1),
            })
    }
}

/// Pool of API credentials shared by every request of one client.
pub struct Pool {
    state: Mutex<PoolState>,
    strategy: Strategy,
    cooldown: Duration,
}

impl Pool {
    /// Build a pool from the configured credentials, in order.
    ///
    /// Blank credentials are dropped; fails with `Error::Empty` if none remain.
    pub fn new(
        credentials: Vec<Credential>,
        strategy: Strategy,
        cooldown: Duration,
    ) -> Result<Self> {
        let now = Instant::now();
        let records: Vec<CredentialRecord> = credentials
            .into_iter()
            .filter(|c| !c.is_empty())
            .map(|c| CredentialRecord::new(c, now))
            .collect();

        if records.is_empty() {
            return Err(Error::Empty);
        }

        info!(
            credentials = records.len(),
            strategy = strategy.label(),
            cooldown_secs = cooldown.as_secs(),
            "credential pool initialized"
        );

        Ok(Self {
            state: Mutex::new(PoolState { records, cursor: 0 }),
            strategy,
            cooldown,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Pick the credential for the next request.
    ///
    /// Active records are preferred. If none is active, the first record whose
    /// cooldown has elapsed is optimistically switched back to `Active` and
    /// returned. Fails with `Error::Exhausted` when nothing qualifies.
    pub async fn select(&self) -> Result<Credential> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let selected = match self.strategy {
            Strategy::Failover => state.select_failover(self.cooldown, now),
            Strategy::RoundRobin => state.select_round_robin(self.cooldown, now),
        };

        match selected {
            Some(idx) => Ok(state.records[idx].credential().clone()),
            None => {
                let (_, cooling, dead) = state.counts();
                let total = state.records.len();
                error!(total, cooling, dead, "all credentials are exhausted");
                Err(Error::Exhausted {
                    total,
                    cooling,
                    dead,
                })
            }
        }
    }

    /// Report a successful request made with `credential`.
    pub async fn mark_success(&self, credential: &Credential) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match state.find_mut(credential) {
            Some(record) => {
                record.mark_success(now);
                debug!(
                    credential = %credential,
                    successes = record.success_count(),
                    status = record.status().label(),
                    "credential request succeeded"
                );
            }
            None => warn!(credential = %credential, "success reported for unknown credential"),
        }
    }

    /// Report a failed request made with `credential`.
    ///
    /// 401/403 mark the credential `Dead`, anything else `Cooling`.
    pub async fn mark_failed(&self, credential: &Credential, status_code: u16) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match state.find_mut(credential) {
            Some(record) => {
                let status = record.mark_failed(status_code, now);
                warn!(
                    credential = %credential,
                    code = status_code,
                    status = status.label(),
                    fail_count = record.fail_count(),
                    "credential marked as failed"
                );
                metrics::counter!("credential_failures_total", "status" => status_code.to_string())
                    .increment(1);
            }
            None => warn!(
                credential = %credential,
                code = status_code,
                "failure reported for unknown credential"
            ),
        }
    }

    /// Snapshot of every record and the aggregate counts.
    ///
    /// Holds the lock only long enough to copy state out.
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let now = Instant::now();
        let (active, cooling, dead) = state.counts();
        PoolStats {
            total: state.records.len(),
            active,
            cooling,
            dead,
            strategy: self.strategy,
            cursor: state.cursor,
            credentials: state.records.iter().map(|r| r.snapshot(now)).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    const COOLDOWN: Duration = Duration::from_secs(300);

    fn creds(ids: &[&str]) -> Vec<Credential> {
        ids.iter().map(|id| Credential::new(*id)).collect()
    }

    fn pool(ids: &[&str], strategy: Strategy, cooldown: Duration) -> Pool {
        Pool::new(creds(ids), strategy, cooldown).unwrap()
    }

    async fn status_of(pool: &Pool, idx: usize) -> CredentialStatus {
        pool.stats().await.credentials[idx].status
    }

    #[test]
    fn new_accepts_single_credential() {
        let pool = pool(&["id1"], Strategy::Failover, COOLDOWN);
        assert_eq!(pool.strategy(), Strategy::Failover);
        assert_eq!(pool.cooldown(), COOLDOWN);
    }

    #[test]
    fn new_rejects_empty_list() {
        let err = Pool::new(vec![], Strategy::Failover, COOLDOWN).err().unwrap();
        assert!(matches!(err, Error::Empty));
    }

    #[test]
    fn new_rejects_blank_only_list() {
        let result = Pool::new(creds(&["  ", ""]), Strategy::RoundRobin, COOLDOWN);
        assert!(matches!(result, Err(Error::Empty)));
    }

    #[tokio::test]
    async fn new_drops_blank_entries() {
        let pool = pool(&["id1", "  ", "id2", ""], Strategy::Failover, COOLDOWN);
        assert_eq!(pool.stats().await.total, 2);
    }

    #[test]
    fn strategy_parses_config_names() {
        assert_eq!("failover".parse::<Strategy>().unwrap(), Strategy::Failover);
        assert_eq!(
            "round-robin".parse::<Strategy>().unwrap(),
            Strategy::RoundRobin
        );
        let err = "random".parse::<Strategy>().unwrap_err();
        assert!(err.contains("random"), "error: {err}");
    }

    #[tokio::test]
    async fn failover_sticks_to_first_credential() {
        let pool = pool(&["a", "b", "c"], Strategy::Failover, COOLDOWN);
        for _ in 0..5 {
            assert_eq!(pool.select().await.unwrap().expose(), "a");
        }
        assert_eq!(pool.stats().await.cursor, 0);
    }

    #[tokio::test]
    async fn failover_switches_after_auth_failure() {
        let pool = pool(&["a", "b", "c"], Strategy::Failover, COOLDOWN);
        let a = pool.select().await.unwrap();
        pool.mark_failed(&a, 401).await;

        for _ in 0..5 {
            assert_eq!(pool.select().await.unwrap().expose(), "b");
        }
        assert_eq!(pool.stats().await.cursor, 1);
        assert_eq!(status_of(&pool, 0).await, CredentialStatus::Dead);
    }

    #[tokio::test]
    async fn failover_does_not_go_back_when_earlier_credential_recovers() {
        let pool = pool(&["a", "b"], Strategy::Failover, Duration::ZERO);
        let a = pool.select().await.unwrap();
        pool.mark_failed(&a, 500).await;
        assert_eq!(pool.select().await.unwrap().expose(), "b");

        // "a" would be retryable now, but "b" is still active
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.select().await.unwrap().expose(), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn failover_readmission_wraps_around() {
        let pool = pool(&["a", "b", "c"], Strategy::Failover, COOLDOWN);
        pool.mark_failed(&Credential::new("a"), 500).await;
        assert_eq!(pool.select().await.unwrap().expose(), "b");
        pool.mark_failed(&Credential::new("b"), 403).await;
        assert_eq!(pool.select().await.unwrap().expose(), "c");

        tokio::time::advance(COOLDOWN + Duration::from_secs(1)).await;
        pool.mark_failed(&Credential::new("c"), 403).await;

        // Scan starts at "c" and wraps to the cooled-down "a"
        assert_eq!(pool.select().await.unwrap().expose(), "a");
        let stats = pool.stats().await;
        assert_eq!(stats.cursor, 0);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.dead, 2);
    }

    #[tokio::test]
    async fn failover_exhausts_when_everything_failed() {
        let pool = pool(&["a", "b", "c"], Strategy::Failover, COOLDOWN);
        pool.mark_failed(&Credential::new("a"), 403).await;
        pool.mark_failed(&Credential::new("b"), 403).await;
        pool.mark_failed(&Credential::new("c"), 500).await;
        assert!(matches!(
            pool.select().await,
            Err(Error::Exhausted {
                total: 3,
                cooling: 1,
                dead: 2
            })
        ));
    }

    #[tokio::test]
    async fn round_robin_cycles_in_insertion_order() {
        let pool = pool(&["a", "b", "c"], Strategy::RoundRobin, COOLDOWN);
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(pool.select().await.unwrap().expose().to_string());
        }
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn round_robin_skips_non_active() {
        let pool = pool(&["a", "b", "c"], Strategy::RoundRobin, COOLDOWN);
        pool.mark_failed(&Credential::new("b"), 500).await;

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(pool.select().await.unwrap().expose().to_string());
        }
        assert_eq!(seen, vec!["a", "c", "a", "c"]);
    }

    #[tokio::test]
    async fn round_robin_resumes_from_cursor() {
        let pool = pool(&["a", "b", "c"], Strategy::RoundRobin, COOLDOWN);
        assert_eq!(pool.select().await.unwrap().expose(), "a");
        // "b" fails between selections; the scan starts at the cursor (b) and
        // moves on to "c" rather than restarting at "a".
        pool.mark_failed(&Credential::new("b"), 403).await;
        assert_eq!(pool.select().await.unwrap().expose(), "c");
        assert_eq!(pool.stats().await.cursor, 0);
    }

    #[tokio::test]
    async fn zero_cooldown_readmits_same_credential() {
        let pool = pool(&["only"], Strategy::Failover, Duration::ZERO);
        let id = pool.select().await.unwrap();
        pool.mark_failed(&id, 500).await;
        assert_eq!(status_of(&pool, 0).await, CredentialStatus::Cooling);

        tokio::time::sleep(Duration::from_millis(1)).await;
        let again = pool.select().await.unwrap();
        assert_eq!(again, id);
        assert_eq!(status_of(&pool, 0).await, CredentialStatus::Active);
    }

    #[tokio::test]
    async fn dead_credential_unaffected_by_other_success() {
        let pool = pool(&["a", "b"], Strategy::Failover, COOLDOWN);
        let a = Credential::new("a");
        let b = Credential::new("b");
        pool.mark_failed(&a, 401).await;
        pool.mark_failed(&a, 401).await;
        pool.mark_success(&b).await;

        let stats = pool.stats().await;
        assert_eq!(stats.credentials[0].status, CredentialStatus::Dead);
        assert_eq!(stats.credentials[0].fail_count, 2);
        assert_eq!(stats.credentials[1].status, CredentialStatus::Active);
        assert_eq!(stats.credentials[1].success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failed_within_cooldown_is_exhausted() {
        let pool = pool(&["a", "b", "c"], Strategy::RoundRobin, COOLDOWN);
        pool.mark_failed(&Credential::new("a"), 401).await;
        pool.mark_failed(&Credential::new("b"), 500).await;
        pool.mark_failed(&Credential::new("c"), 503).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        let err = pool.select().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Exhausted {
                total: 3,
                cooling: 2,
                dead: 1
            }
        ));
        assert!(err.to_string().contains("no usable credentials"));
    }

    #[tokio::test(start_paused = true)]
    async fn cooling_credential_readmitted_after_cooldown() {
        let pool = pool(&["a", "b"], Strategy::Failover, COOLDOWN);
        pool.mark_failed(&Credential::new("a"), 401).await;
        pool.mark_failed(&Credential::new("b"), 500).await;

        tokio::time::advance(COOLDOWN + Duration::from_secs(1)).await;
        // "a" is dead and still quarantined; "b" has cooled down
        assert_eq!(pool.select().await.unwrap().expose(), "b");
        let stats = pool.stats().await;
        assert_eq!(stats.credentials[1].status, CredentialStatus::Active);
        assert_eq!(stats.credentials[1].fail_count, 1);
        assert_eq!(stats.cursor, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_credential_readmitted_after_long_quarantine() {
        let pool = pool(&["a"], Strategy::Failover, COOLDOWN);
        pool.mark_failed(&Credential::new("a"), 403).await;

        tokio::time::advance(COOLDOWN * 6).await;
        assert!(pool.select().await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(pool.select().await.unwrap().expose(), "a");
        assert_eq!(status_of(&pool, 0).await, CredentialStatus::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn readmitted_credential_can_fail_again_immediately() {
        let pool = pool(&["a"], Strategy::Failover, COOLDOWN);
        let a = Credential::new("a");
        pool.mark_failed(&a, 500).await;
        tokio::time::advance(COOLDOWN + Duration::from_secs(1)).await;

        assert_eq!(pool.select().await.unwrap(), a);
        pool.mark_failed(&a, 500).await;

        let stats = pool.stats().await;
        assert_eq!(stats.credentials[0].status, CredentialStatus::Cooling);
        assert_eq!(stats.credentials[0].fail_count, 2);
        assert!(pool.select().await.is_err());
    }

    #[tokio::test]
    async fn success_recovers_cooling_credential() {
        let pool = pool(&["a", "b"], Strategy::RoundRobin, COOLDOWN);
        let a = Credential::new("a");
        pool.mark_failed(&a, 500).await;
        pool.mark_success(&a).await;

        let stats = pool.stats().await;
        assert_eq!(stats.credentials[0].status, CredentialStatus::Active);
        assert_eq!(stats.credentials[0].fail_count, 0);
    }

    #[tokio::test]
    async fn reports_for_unknown_credentials_are_ignored() {
        let pool = pool(&["a"], Strategy::Failover, COOLDOWN);
        let ghost = Credential::new("ghost");
        pool.mark_failed(&ghost, 401).await;
        pool.mark_success(&ghost).await;

        let stats = pool.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.credentials[0].success_count, 0);
    }

    #[tokio::test]
    async fn concurrent_round_robin_selection_stays_consistent() {
        let pool = Arc::new(pool(&["a", "b", "c"], Strategy::RoundRobin, COOLDOWN));

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.select().await.unwrap() })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            let cred = handle.await.unwrap();
            *counts.entry(cred.expose().to_string()).or_default() += 1;
        }

        assert_eq!(counts.values().sum::<usize>(), 20);
        for id in counts.keys() {
            assert!(["a", "b", "c"].contains(&id.as_str()), "unexpected {id}");
        }
        for n in counts.values() {
            assert!((6..=7).contains(n), "uneven distribution: {counts:?}");
        }
        let stats = pool.stats().await;
        assert!(stats.cursor < 3);
        assert_eq!(stats.cursor, 20 % 3);
    }

    #[tokio::test]
    async fn concurrent_reports_keep_counters_exact() {
        let pool = Arc::new(pool(&["a", "b"], Strategy::Failover, COOLDOWN));

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        pool.mark_success(&Credential::new("b")).await;
                    } else {
                        pool.mark_failed(&Credential::new("a"), 403).await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats().await;
        assert_eq!(stats.credentials[0].fail_count, 25);
        assert_eq!(stats.credentials[1].success_count, 25);
    }

    #[tokio::test]
    async fn stats_counts_and_redacts() {
        let pool = pool(
            &["abcdefghijkl", "mnopqrstuvwx", "yz0123456789"],
            Strategy::RoundRobin,
            COOLDOWN,
        );
        pool.mark_failed(&Credential::new("abcdefghijkl"), 401).await;
        pool.mark_failed(&Credential::new("mnopqrstuvwx"), 500).await;

        let stats = pool.stats().await;
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.cooling, 1);
        assert_eq!(stats.dead, 1);
        assert_eq!(stats.strategy, Strategy::RoundRobin);
        assert_eq!(stats.credentials[0].credential, "abcdefgh...");
        assert_eq!(stats.health(), "degraded");

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["strategy"], "round-robin");
        assert_eq!(json["credentials"][0]["status"], "dead");
        assert!(!json.to_string().contains("abcdefghijkl"));
    }

    #[tokio::test]
    async fn health_labels() {
        let pool = pool(&["a", "b"], Strategy::Failover, COOLDOWN);
        assert_eq!(pool.stats().await.health(), "healthy");
        pool.mark_failed(&Credential::new("a"), 500).await;
        assert_eq!(pool.stats().await.health(), "degraded");
        pool.mark_failed(&Credential::new("b"), 401).await;
        assert_eq!(pool.stats().await.health(), "unhealthy");
    }
}
