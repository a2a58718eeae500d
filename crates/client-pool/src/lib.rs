//! Credential pool for rate-limited API client identifiers
//!
//! Holds an ordered set of API credentials, selects one per outbound request
//! according to a rotation strategy, and tracks per-credential health.
//!
//! Credential lifecycle:
//! 1. Pool is built from the configured credential list, every record `Active`
//! 2. `select()` returns a credential (failover or round-robin)
//! 3. Upstream returns 401/403 → `mark_failed` moves the record to `Dead`
//! 4. Any other failure → `Cooling`
//! 5. Once the cooldown has elapsed (6× longer for `Dead`), selection may
//!    re-admit the record as `Active` when nothing else is usable
//! 6. A success on a `Cooling` record brings it back to `Active`

pub mod classify;
pub mod error;
pub mod pool;
pub mod record;

pub use classify::{FailureKind, classify_status};
pub use error::{Error, Result};
pub use pool::{Pool, PoolStats, Strategy};
pub use record::{CredentialRecord, CredentialStatus, DEAD_COOLDOWN_FACTOR, RecordSnapshot};
