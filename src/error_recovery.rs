//! Bounded retry policy for reads on a non-blocking serial link.
//
// An empty read on a non-blocking descriptor means "nothing yet", not
// failure. The policy caps how many of those are tolerated in a row before
// the caller gives up, so an unplugged sensor cannot hang a tick forever.

use crate::config::RetrySettings;
use std::time::Duration;

/// Defines a policy for retrying an empty read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of consecutive empty reads.
    pub max_attempts: u32,
    /// The delay between empty reads.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            backoff_delay: Duration::from_micros(100),
        }
    }
}

impl RetryPolicy {
    /// Upper bound on how long a fully starved read can block.
    pub fn worst_case_wait(&self) -> Duration {
        self.backoff_delay.saturating_mul(self.max_attempts)
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_empty_reads,
            backoff_delay: Duration::from_micros(settings.backoff_us),
        }
    }
}
