//! Poll/sleep policy for draining the inbound queue after a batch is issued.

use crate::{Error, delay::wait};
use eh1::delay::DelayNs;
use std::time::Duration;

/// How long to wait for a batch, and how many empty polls to tolerate.
///
/// The drain first waits [`initial_wait`](RetryPolicy::initial_wait), which grows
/// with the batch because the chip needs longer to produce more samples. It then
/// polls the queue. A poll that finds data reads it and costs nothing; a poll that
/// finds the queue empty sleeps `poll_interval` and uses up one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_wait: Duration,
    pub per_sample_wait: Duration,
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_wait: Duration::from_millis(5),
            // 1ms per 100 samples
            per_sample_wait: Duration::from_micros(10),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    pub fn initial_wait(&self, samples: usize) -> Duration {
        let samples = u32::try_from(samples).unwrap_or(u32::MAX);
        self.base_wait + self.per_sample_wait.saturating_mul(samples)
    }

    /// Run the drain loop.
    ///
    /// `poll` receives the number of bytes still missing and returns how many it
    /// obtained (zero when the queue was empty). Returns the total obtained, which
    /// is less than `expected` when the attempts ran out.
    pub fn drain<F>(
        &self,
        delay: &mut impl DelayNs,
        samples: usize,
        expected: usize,
        mut poll: F,
    ) -> Result<usize, Error>
    where
        F: FnMut(usize) -> Result<usize, Error>,
    {
        wait(delay, self.initial_wait(samples));
        let mut received = 0;
        let mut attempts = 0;
        while received < expected && attempts < self.max_attempts {
            let got = poll(expected - received)?;
            if got == 0 {
                wait(delay, self.poll_interval);
                attempts += 1;
            } else {
                received += got;
            }
        }
        log::trace!("drain: {received}/{expected} bytes, {attempts} empty polls");
        Ok(received)
    }
}
