//! Error types for the pool and lease management core.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

/// Errors that can occur while managing pools, reservations, and leases.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config or datastore files).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed IPv4 address, CIDR, or MAC address text.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Two active pool ranges intersect.
    ///
    /// Carries both pool names and their ranges so an operator can fix the
    /// configuration without guessing. The offending write is blocked
    /// entirely; overlap is never auto-corrected.
    #[error("pool '{pool}' ({pool_range}) overlaps pool '{other}' ({other_range})")]
    PoolOverlap {
        pool: String,
        pool_range: String,
        other: String,
        other_range: String,
    },

    /// An allocation or lease-creation precondition was violated.
    ///
    /// The MAC or IP already has an active lease, or a commit lost a race
    /// against a concurrent writer and exhausted its retries.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The pool has no free address.
    ///
    /// An expected terminal condition, not a fault. Callers should match on
    /// this variant and surface "pool full" rather than a system error.
    #[error("No available IP addresses in pool '{pool}'")]
    PoolExhausted { pool: String },

    /// Configuration synthesis detected inconsistent state at render time.
    ///
    /// The render call fails entirely; partial output is never emitted.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// An operation referenced a pool, lease, or reservation that does not
    /// exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid appliance configuration.
    ///
    /// Returned by [`Config::validate`](crate::Config::validate) when the
    /// settings file contains invalid values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
