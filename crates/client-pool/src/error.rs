//! Error types for pool operations

/// Errors from pool operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("at least one non-blank credential is required")]
    Empty,

    #[error(
        "no usable credentials ({total} total, {cooling} cooling, {dead} dead); wait for the cooldown or add credentials"
    )]
    Exhausted {
        total: usize,
        cooling: usize,
        dead: usize,
    },
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
