//! Blocking waits used between MPSSE commands and queue polls.

use eh1::delay::DelayNs;
use std::time::Duration;

/// Thread-sleeping [`DelayNs`].
#[derive(Debug, Default, Clone, Copy)]
pub struct Delay;
impl DelayNs for Delay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64));
    }
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Block for `duration` on any [`DelayNs`] clock.
pub(crate) fn wait(delay: &mut impl DelayNs, duration: Duration) {
    let mut remaining = duration;
    while !remaining.is_zero() {
        let us = u32::try_from(remaining.as_micros()).unwrap_or(u32::MAX);
        if us == 0 {
            delay.delay_ns(remaining.subsec_nanos());
            return;
        }
        delay.delay_us(us);
        remaining -= Duration::from_micros(u64::from(us));
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::wait;
    use eh1::delay::DelayNs;
    use std::time::Duration;

    /// Fake clock: remembers how long it was asked to wait, never sleeps.
    #[derive(Debug, Default, Clone)]
    pub(crate) struct CountingDelay {
        pub(crate) total: Duration,
        pub(crate) calls: usize,
    }
    impl DelayNs for CountingDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total += Duration::from_nanos(ns as u64);
            self.calls += 1;
        }
        fn delay_us(&mut self, us: u32) {
            self.total += Duration::from_micros(us as u64);
            self.calls += 1;
        }
        fn delay_ms(&mut self, ms: u32) {
            self.total += Duration::from_millis(ms as u64);
            self.calls += 1;
        }
    }

    #[test]
    fn wait_routes_by_resolution() {
        let mut clock = CountingDelay::default();
        wait(&mut clock, Duration::from_millis(50));
        wait(&mut clock, Duration::from_nanos(300));
        wait(&mut clock, Duration::ZERO);
        assert_eq!(clock.total, Duration::from_nanos(50_000_300));
        assert_eq!(clock.calls, 2);
    }

    #[test]
    fn long_waits_are_split_not_clamped() {
        let mut clock = CountingDelay::default();
        let two_hours = Duration::from_secs(2 * 3600);
        wait(&mut clock, two_hours);
        assert_eq!(clock.total, two_hours);
        assert_eq!(clock.calls, 2);

        let mut clock = CountingDelay::default();
        wait(&mut clock, Duration::from_nanos(1_500));
        assert_eq!(clock.total, Duration::from_nanos(1_500));
        assert_eq!(clock.calls, 2);
    }
}
