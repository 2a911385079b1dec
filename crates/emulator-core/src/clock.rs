//! Monotonic cycle clock shared by the CPU, the flash controllers and SysTick.

/// Default core clock frequency (84 MHz).
pub const DEFAULT_CLOCK_HZ: u64 = 84_000_000;

/// Monotonic cycle counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Clock {
    cycles: u64,
    hz: u64,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_HZ)
    }
}

impl Clock {
    /// Creates a clock at cycle zero running at `hz`.
    #[must_use]
    pub const fn new(hz: u64) -> Self {
        Self { cycles: 0, hz }
    }

    /// Current cycle count.
    #[must_use]
    pub const fn now(&self) -> u64 {
        self.cycles
    }

    /// Clock frequency in hertz.
    #[must_use]
    pub const fn hz(&self) -> u64 {
        self.hz
    }

    /// Advances the clock by `cycles`.
    pub const fn advance(&mut self, cycles: u64) {
        self.cycles = self.cycles.saturating_add(cycles);
    }

    /// Converts milliseconds to cycles at this clock's frequency.
    #[must_use]
    pub const fn cycles_from_millis(&self, millis: u64) -> u64 {
        millis.saturating_mul(self.hz) / 1000
    }

    /// Converts a cycle count to whole elapsed milliseconds.
    #[must_use]
    pub const fn millis_from_cycles(&self, cycles: u64) -> u64 {
        if self.hz == 0 {
            0
        } else {
            cycles.saturating_mul(1000) / self.hz
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, DEFAULT_CLOCK_HZ};

    #[test]
    fn clock_is_monotonic_and_saturating() {
        let mut clock = Clock::default();
        assert_eq!(clock.now(), 0);
        clock.advance(10);
        clock.advance(5);
        assert_eq!(clock.now(), 15);
        clock.advance(u64::MAX);
        assert_eq!(clock.now(), u64::MAX);
    }

    #[test]
    fn millisecond_conversions_use_clock_frequency() {
        let clock = Clock::new(DEFAULT_CLOCK_HZ);
        assert_eq!(clock.cycles_from_millis(4), 336_000);
        assert_eq!(clock.millis_from_cycles(336_000), 4);
        assert_eq!(Clock::new(0).millis_from_cycles(100), 0);
    }
}
