//! Failure taxonomy for the courier core.
//!
//! Per-destination fetch and delivery errors are folded into run tallies by
//! the dispatcher; almanac errors degrade into placeholder annotations; only
//! directory enumeration failures abort a fan-out run.

use thiserror::Error;

/// Provider pool misconfiguration or misuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// Selection was requested on a pool with no selectable weight.
    #[error("provider pool is empty")]
    Empty,
    /// Registration rejected: weights must be strictly positive.
    #[error("provider '{id}' has zero weight")]
    ZeroWeight { id: String },
    /// A current-provider index outside `[0, len)`.
    #[error("provider index {index} out of range (pool holds {len})")]
    OutOfRange { index: usize, len: usize },
}

/// One failed provider call, classified for logs and counters.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("provider '{provider}': request timed out")]
    Timeout { provider: String },
    #[error("provider '{provider}': HTTP {status}")]
    Http { provider: String, status: u16 },
    #[error("provider '{provider}': payload did not match schema: {detail}")]
    Schema { provider: String, detail: String },
    #[error("provider '{provider}': network error: {detail}")]
    Network { provider: String, detail: String },
}

impl FetchError {
    /// Provider id the failure belongs to.
    pub fn provider(&self) -> &str {
        match self {
            FetchError::Timeout { provider }
            | FetchError::Http { provider, .. }
            | FetchError::Schema { provider, .. }
            | FetchError::Network { provider, .. } => provider,
        }
    }
}

/// Remote almanac lookup failure. Always recoverable: the day cache
/// degrades to a placeholder annotation instead of propagating these.
#[derive(Debug, Error)]
pub enum AlmanacError {
    #[error("almanac request failed: {detail}")]
    Network { detail: String },
    #[error("almanac returned HTTP {status}")]
    Http { status: u16 },
    #[error("almanac payload malformed: {detail}")]
    Malformed { detail: String },
}

/// Failure delivering one message to one destination.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport endpoint could not be reached at all.
    #[error("transport unreachable: {detail}")]
    Unreachable { detail: String },
    /// The endpoint answered but refused the message.
    #[error("delivery rejected: {detail}")]
    Rejected { detail: String },
}

/// Destination enumeration failure. Unlike per-destination errors this
/// aborts the whole run: without a snapshot there is nothing to count
/// successes and failures against.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("destination directory unavailable: {detail}")]
    Unavailable { detail: String },
}

/// Persistence failure in a key/value adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {detail}")]
    Io { detail: String },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io {
            detail: e.to_string(),
        }
    }
}

/// Fan-out run rejection. Per-destination failures never surface here;
/// they are folded into the run summary.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Another run holds the single-run lock.
    #[error("a fan-out run is already in flight")]
    Busy,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Rejected cron expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("bad cron expression '{expr}': {detail}")]
    BadExpression { expr: String, detail: String },
}
