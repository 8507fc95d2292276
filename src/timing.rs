//! Monotonic timestamps and duration unit helpers (spec §4.1).
//!
//! All durations in this crate are non-negative millisecond integers, as
//! required by the Session invariants. `timestamp()` is pinned to process
//! start so samples recorded across workers stay comparable without relying
//! on wall-clock synchronization.

use once_cell_like::OnceTime;
use rand::Rng;
use std::time::Duration;

mod once_cell_like {
    use std::sync::OnceLock;
    use std::time::Instant;

    /// Minimal lazily-initialized clock epoch, avoiding an extra `once_cell`
    /// dependency for a single value.
    pub struct OnceTime(OnceLock<Instant>);

    impl OnceTime {
        pub const fn new() -> Self {
            Self(OnceLock::new())
        }

        pub fn get(&self) -> Instant {
            *self.0.get_or_init(Instant::now)
        }
    }
}

static EPOCH: OnceTime = OnceTime::new();

/// Current monotonic timestamp in milliseconds since the epoch of this
/// process (first call to any timing function).
pub fn timestamp() -> u64 {
    EPOCH.get().elapsed().as_millis() as u64
}

/// Duration unit multipliers, mirroring the source's `seconds/minutes/...`
/// helpers plus a closed-range variant for random selection.
pub const fn seconds(n: u64) -> u64 {
    n * 1_000
}

pub const fn minutes(n: u64) -> u64 {
    seconds(n) * 60
}

pub const fn hours(n: u64) -> u64 {
    minutes(n) * 60
}

pub const fn days(n: u64) -> u64 {
    hours(n) * 24
}

pub const fn weeks(n: u64) -> u64 {
    days(n) * 7
}

/// Uniformly selects a millisecond value from a closed range `[low, high]`.
pub fn random_in_range(low: u64, high: u64) -> u64 {
    if high <= low {
        return low;
    }
    rand::thread_rng().gen_range(low..=high)
}

/// A duration that is either a fixed number of milliseconds or the pair
/// `(random, N)` indicating uniform `[1, N]` selection at use (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSpec {
    Fixed(u64),
    RandomUpTo(u64),
}

impl DurationSpec {
    /// Resolve to a concrete millisecond value, rolling randomness if needed.
    pub fn resolve_ms(&self) -> u64 {
        match self {
            DurationSpec::Fixed(ms) => *ms,
            DurationSpec::RandomUpTo(n) => random_in_range(1, (*n).max(1)),
        }
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.resolve_ms())
    }
}
