//! The error taxonomy shared across every component.
//!
//! Individual crates define their own `thiserror` enums for the failure
//! modes specific to that crate, but every one of those variants carries a
//! [`Kind`] so the HTTP boundary and the audit log can classify failures
//! uniformly without matching on crate-specific types.

use serde::{Deserialize, Serialize};

/// A taxonomy of recovery/surfacing behavior, not a type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    /// Throttled, 5xx, or network timeout. Retried with backoff inside the
    /// driver; never fatal; counted toward the shard's retry budget.
    Transient,
    /// A shard exhausted its retry budget and is terminally `Failed`.
    ShardFailure,
    /// A write was attempted with a stale or absent lease token.
    LeaseStale,
    /// The request was malformed, or planning is impossible as specified.
    ValidationError,
    /// A hash or signature mismatch was detected at manifest verification.
    IntegrityError,
    /// Not an error: a reconciliation gate failed. Carried as `Kind` purely
    /// so callers can render it consistently; `overall_passed=false` is the
    /// actual signal.
    ReconcileGateFail,
    /// Corrupt checkpoint state, or storage unavailable.
    Fatal,
}

impl Kind {
    /// The stable string surfaced to HTTP callers alongside a correlation id.
    pub fn error_code(&self) -> &'static str {
        match self {
            Kind::Transient => "transient",
            Kind::ShardFailure => "shard_failure",
            Kind::LeaseStale => "lease_stale",
            Kind::ValidationError => "validation_error",
            Kind::IntegrityError => "integrity_error",
            Kind::ReconcileGateFail => "reconcile_gate_fail",
            Kind::Fatal => "fatal",
        }
    }

    /// Whether a caller may retry the operation that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Kind::Transient | Kind::ShardFailure)
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.error_code())
    }
}
