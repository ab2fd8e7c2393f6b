//! C1: Clock / IdGen — monotonic time and correlation-id/UUID generation.
//!
//! Every other component reads "now" and mints identifiers exclusively
//! through these traits, so tests can supply a fake clock and deterministic
//! ids instead of reaching for `Utc::now()` / `Uuid::new_v4()` directly.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A source of the current wall-clock time.
///
/// The orchestrator's notion of "now" is always UTC; there is no monotonic
/// clock requirement beyond what the underlying `MetadataStore` already
/// provides via `NOW()` for lease comparisons.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock, backed by the system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A source of new identifiers: job/shard/checkpoint ids and lease tokens.
pub trait IdGen: Send + Sync + 'static {
    fn new_id(&self) -> Uuid;
}

/// The production id generator, backed by random UUIDv4s.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGen;

impl IdGen for UuidGen {
    fn new_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

#[cfg(any(test, feature = "testing"))]
pub mod fake {
    //! Deterministic Clock/IdGen implementations for tests.
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

    /// A clock that starts at a fixed instant and advances only when told to.
    pub struct FakeClock {
        micros_since_epoch: AtomicI64,
    }

    impl FakeClock {
        pub fn at(start: DateTime<Utc>) -> Self {
            Self {
                micros_since_epoch: AtomicI64::new(start.timestamp_micros()),
            }
        }

        pub fn advance(&self, delta: chrono::Duration) {
            self.micros_since_epoch
                .fetch_add(delta.num_microseconds().unwrap_or(0), Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_micros(self.micros_since_epoch.load(Ordering::SeqCst))
                .expect("fake clock holds a valid timestamp")
        }
    }

    /// An id generator that hands out sequential, predictable UUIDs.
    pub struct SequentialIdGen {
        next: AtomicU64,
    }

    impl SequentialIdGen {
        pub fn new() -> Self {
            Self {
                next: AtomicU64::new(1),
            }
        }
    }

    impl Default for SequentialIdGen {
        fn default() -> Self {
            Self::new()
        }
    }

    impl IdGen for SequentialIdGen {
        fn new_id(&self) -> Uuid {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            Uuid::from_u128(n as u128)
        }
    }
}
