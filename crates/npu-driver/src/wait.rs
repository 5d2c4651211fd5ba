//! Bounded busy-wait
//!
//! Every status poll in the driver goes through a [`WaitPolicy`]. The policy
//! decides when to stop; the caller decides what an expired wait means.

use std::time::{Duration, Instant};

/// Poll budget used when nothing else is configured.
pub const DEFAULT_POLL_BUDGET: u64 = 100_000_000;

/// How long a status poll may spin before it is declared timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Give up after this many status reads.
    Attempts(u64),
    /// Give up once this much wall-clock time has passed.
    Deadline(Duration),
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::Attempts(DEFAULT_POLL_BUDGET)
    }
}

/// Result of one bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Condition held after `polls` reads.
    Ready {
        /// Status reads performed
        polls: u64,
    },
    /// Budget ran out after `polls` reads.
    Expired {
        /// Status reads performed
        polls: u64,
    },
}

impl WaitOutcome {
    /// Number of status reads the wait performed.
    pub const fn polls(self) -> u64 {
        match self {
            Self::Ready { polls } | Self::Expired { polls } => polls,
        }
    }

    /// Whether the condition was met.
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }
}

impl WaitPolicy {
    /// Spin until `ready` returns true or the budget runs out.
    ///
    /// `ready` is called once per poll and should perform exactly one status
    /// read. An `Attempts(0)` budget expires without polling.
    pub fn wait_until(&self, mut ready: impl FnMut() -> bool) -> WaitOutcome {
        match *self {
            Self::Attempts(budget) => {
                for i in 0..budget {
                    if ready() {
                        return WaitOutcome::Ready { polls: i + 1 };
                    }
                    std::hint::spin_loop();
                }
                WaitOutcome::Expired { polls: budget }
            }
            Self::Deadline(limit) => {
                let start = Instant::now();
                let mut polls = 0u64;
                loop {
                    polls += 1;
                    if ready() {
                        return WaitOutcome::Ready { polls };
                    }
                    if start.elapsed() >= limit {
                        return WaitOutcome::Expired { polls };
                    }
                    std::hint::spin_loop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_on_first_poll() {
        let outcome = WaitPolicy::Attempts(10).wait_until(|| true);
        assert_eq!(outcome, WaitOutcome::Ready { polls: 1 });
    }

    #[test]
    fn attempts_budget_is_exact() {
        let mut reads = 0;
        let outcome = WaitPolicy::Attempts(25).wait_until(|| {
            reads += 1;
            false
        });
        assert_eq!(outcome, WaitOutcome::Expired { polls: 25 });
        assert_eq!(reads, 25);
    }

    #[test]
    fn condition_met_midway() {
        let mut reads = 0;
        let outcome = WaitPolicy::Attempts(100).wait_until(|| {
            reads += 1;
            reads == 7
        });
        assert!(outcome.is_ready());
        assert_eq!(outcome.polls(), 7);
    }

    #[test]
    fn deadline_expires() {
        let outcome = WaitPolicy::Deadline(Duration::from_millis(2)).wait_until(|| false);
        assert!(!outcome.is_ready());
        assert!(outcome.polls() >= 1);
    }

    #[test]
    fn zero_budget_never_polls() {
        let outcome = WaitPolicy::Attempts(0).wait_until(|| panic!("polled"));
        assert_eq!(outcome, WaitOutcome::Expired { polls: 0 });
    }

    #[test]
    fn default_budget() {
        assert_eq!(WaitPolicy::default(), WaitPolicy::Attempts(100_000_000));
    }
}
