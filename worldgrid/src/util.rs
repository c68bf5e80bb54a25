//! Various uncategorized utilities, mostly timers driven by tick deltas.

use std::num::Wrapping;


/// A countdown timer, it is passed when the remaining time reaches zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeTracker {
    remaining: i64,
}

impl TimeTracker {

    #[inline]
    pub fn new(expiry_ms: u32) -> Self {
        Self { remaining: expiry_ms as i64 }
    }

    /// Decrease the remaining time by the given delta.
    #[inline]
    pub fn update(&mut self, diff_ms: u32) {
        self.remaining -= diff_ms as i64;
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.remaining <= 0
    }

    #[inline]
    pub fn reset(&mut self, expiry_ms: u32) {
        self.remaining = expiry_ms as i64;
    }

    /// Remaining time before expiry, zero if already passed.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining.clamp(0, u32::MAX as i64) as u32
    }

}


/// A timer accumulating elapsed time until an interval is reached, resetting keeps
/// the overflow so that the average period stays accurate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalTimer {
    interval: u32,
    current: u32,
}

impl IntervalTimer {

    #[inline]
    pub fn new(interval_ms: u32) -> Self {
        Self { interval: interval_ms, current: 0 }
    }

    #[inline]
    pub fn update(&mut self, diff_ms: u32) {
        self.current = self.current.saturating_add(diff_ms);
    }

    #[inline]
    pub fn passed(&self) -> bool {
        self.current >= self.interval
    }

    #[inline]
    pub fn reset(&mut self) {
        if self.interval == 0 {
            self.current = 0;
        } else if self.current >= self.interval {
            self.current %= self.interval;
        }
    }

    #[inline]
    pub fn set_interval(&mut self, interval_ms: u32) {
        self.interval = interval_ms;
    }

}


const MULTIPLIER: Wrapping<u64> = Wrapping(0x5DEECE66D);
const ADDEND: Wrapping<u64> = Wrapping(0xB);
const MASK: Wrapping<u64> = Wrapping((1 << 48) - 1);

/// A small linear congruential generator, used for respawn jitter where the quality
/// of randomness is not important but reproducibility in tests is.
#[derive(Debug, Clone)]
pub struct Random {
    seed: Wrapping<u64>,
}

impl Random {

    #[inline]
    pub fn new(seed: u64) -> Self {
        Self { seed: (Wrapping(seed) ^ MULTIPLIER) & MASK }
    }

    #[inline]
    fn next(&mut self, bits: u8) -> u32 {
        self.seed = (self.seed * MULTIPLIER + ADDEND) & MASK;
        (self.seed.0 >> (48 - bits)) as u32
    }

    /// Return a value in the inclusive range.
    pub fn next_range(&mut self, min: u32, max: u32) -> u32 {
        debug_assert!(min <= max);
        let span = (max - min) as u64 + 1;
        min + ((self.next(31) as u64 * span) >> 31) as u32
    }

}


/// A fading average
#[derive(Debug, Clone, Default)]
pub struct FadingAverage {
    value: f32,
}

impl FadingAverage {

    #[inline]
    pub fn push(&mut self, value: f32, factor: f32) {
        self.value = (self.value * (1.0 - factor)) + value * factor;
    }

    #[inline]
    pub fn get(&self) -> f32 {
        self.value
    }

}


#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn time_tracker() {
        let mut tracker = TimeTracker::new(100);
        tracker.update(60);
        assert!(!tracker.passed());
        assert_eq!(tracker.remaining(), 40);
        tracker.update(60);
        assert!(tracker.passed());
        assert_eq!(tracker.remaining(), 0);
        tracker.reset(10);
        assert!(!tracker.passed());
    }

    #[test]
    fn random_range() {
        let mut rand = Random::new(42);
        for _ in 0..1000 {
            let value = rand.next_range(5, 15);
            assert!((5..=15).contains(&value));
        }
        assert_eq!(Random::new(7).next_range(0, 100), Random::new(7).next_range(0, 100));
    }

    #[test]
    fn interval_timer_keeps_overflow() {
        let mut timer = IntervalTimer::new(1000);
        timer.update(1300);
        assert!(timer.passed());
        timer.reset();
        assert!(!timer.passed());
        timer.update(700);
        assert!(timer.passed());
    }

}
