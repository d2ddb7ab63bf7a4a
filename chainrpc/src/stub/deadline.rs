//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Call deadlines.

use std::time::{Duration, Instant};

/// The absolute end of a call. Every phase waits against the same
/// deadline, so time spent connecting is not available for receiving.
///
/// # Examples
///
/// ```rust
/// use chainrpc::stub::Deadline;
/// use std::time::Duration;
///
/// let deadline = Deadline::after(Duration::from_secs(5));
/// assert!(!deadline.is_expired());
/// assert!(deadline.generate_timeout_ms() <= 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline(Instant);

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Deadline(Instant::now() + timeout)
    }

    /// A deadline at `instant`.
    pub fn at(instant: Instant) -> Self {
        Deadline(instant)
    }

    /// The deadline as an instant.
    pub fn instant(self) -> Instant {
        self.0
    }

    /// Time left, zero once expired.
    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    /// Returns `true` once the deadline has passed.
    pub fn is_expired(self) -> bool {
        Instant::now() >= self.0
    }

    /// The earlier of this deadline and `now + timeout`.
    pub fn capped(self, timeout: Duration) -> Instant {
        self.0.min(Instant::now() + timeout)
    }

    /// Remaining time in whole milliseconds.
    pub fn generate_timeout_ms(self) -> u32 {
        generate_timeout_ms(self.0)
    }
}

/// Milliseconds left until `deadline`, zero once it has passed.
pub fn generate_timeout_ms(deadline: Instant) -> u32 {
    let remaining = deadline.saturating_duration_since(Instant::now());
    u32::try_from(remaining.as_millis()).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_deadline() {
        let deadline = Deadline::at(Instant::now() - Duration::from_millis(5));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.generate_timeout_ms(), 0);
    }

    #[test]
    fn test_remaining_never_grows() {
        let deadline = Deadline::after(Duration::from_millis(200));
        let first = deadline.generate_timeout_ms();
        std::thread::sleep(Duration::from_millis(5));
        let second = deadline.generate_timeout_ms();
        assert!(second <= first);
        assert!(first <= 200);
    }

    #[test]
    fn test_capped() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let cap = deadline.capped(Duration::from_millis(10));
        assert!(cap < deadline.instant());
        assert!(Deadline::after(Duration::ZERO).capped(Duration::from_secs(1)) <= Instant::now());
    }
}
