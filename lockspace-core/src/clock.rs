//! Wall-clock abstraction so TTL logic is deterministic under test.

use std::fmt;

/// Source of wall-clock time.
///
/// Production code injects [`SystemClock`]; tests inject a manual clock to
/// drive cache expiry deterministically.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current wall-clock time in seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}
