//! Timing helpers for test runtimes and wave durations

use std::time::{Duration, Instant};

/// Wall-clock runtime of one local test, attempts included
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.start.elapsed();
        tracing::debug!("{}: ran for {:.3}s", self.label, elapsed.as_secs_f64());
        elapsed
    }
}

/// Duration of one orchestrator wave
#[derive(Clone, Debug, PartialEq)]
pub struct WaveTiming {
    pub wave: usize,
    pub dispatched: usize,
    pub duration: Duration,
}

/// Tracks how long each wave took, dispatch and polling included
#[derive(Debug)]
pub struct WaveClock {
    start: Instant,
    wave_start: Instant,
    waves: Vec<WaveTiming>,
}

impl WaveClock {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            wave_start: now,
            waves: Vec::new(),
        }
    }

    /// Close the current wave and start timing the next one
    pub fn finish_wave(&mut self, wave: usize, dispatched: usize) -> Duration {
        let now = Instant::now();
        let duration = now - self.wave_start;
        self.wave_start = now;
        self.waves.push(WaveTiming {
            wave,
            dispatched,
            duration,
        });
        duration
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    /// Wave that took longest, if any ran
    pub fn slowest(&self) -> Option<&WaveTiming> {
        self.waves.iter().max_by_key(|w| w.duration)
    }
}

impl Default for WaveClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("test");
        sleep(Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }

    #[test]
    fn test_wave_clock() {
        let mut clock = WaveClock::new();
        assert!(clock.slowest().is_none());

        sleep(Duration::from_millis(5));
        let first = clock.finish_wave(1, 4);
        sleep(Duration::from_millis(20));
        let second = clock.finish_wave(2, 1);

        assert!(second >= Duration::from_millis(20));
        assert!(first < second);
        let slowest = clock.slowest().unwrap();
        assert_eq!((slowest.wave, slowest.dispatched), (2, 1));
        assert!(clock.total() >= Duration::from_millis(25));
    }
}
