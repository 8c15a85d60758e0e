use std::time::{Duration, Instant};

/// Snapshot of the clock handed to the `u_time` uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Abstraction over where time values originate from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the system monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let elapsed = self.origin.elapsed();
        let sample = TimeSample::new(elapsed.as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Time source that always reports a fixed timestamp but still counts frames.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    time: f32,
    frame: u64,
}

impl FixedTimeSource {
    pub fn new(time: f32) -> Self {
        Self { time, frame: 0 }
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.time, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Rolling frame counter reported once per interval.
#[derive(Debug)]
pub struct FrameStats {
    window_start: Instant,
    frames: u32,
    interval: Duration,
}

impl FrameStats {
    pub fn new(interval: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            frames: 0,
            interval,
        }
    }

    /// Counts a presented frame. Returns the average fps once the interval
    /// has elapsed and starts a new window.
    pub fn record(&mut self, now: Instant) -> Option<f32> {
        self.frames = self.frames.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frames as f32 / elapsed.as_secs_f32().max(f32::EPSILON);
        self.window_start = now;
        self.frames = 0;
        Some(fps)
    }
}

impl Default for FrameStats {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_counts_frames() {
        let mut source = FixedTimeSource::new(1.5);
        assert_eq!(source.sample(), TimeSample::new(1.5, 0));
        assert_eq!(source.sample(), TimeSample::new(1.5, 1));
        source.reset();
        assert_eq!(source.sample().frame_index, 0);
    }

    #[test]
    fn frame_stats_report_once_per_interval() {
        let start = Instant::now();
        let mut stats = FrameStats {
            window_start: start,
            frames: 0,
            interval: Duration::from_secs(1),
        };
        for i in 1..30 {
            assert_eq!(stats.record(start + Duration::from_millis(i * 10)), None);
        }
        let fps = stats.record(start + Duration::from_secs(1)).unwrap();
        assert!((fps - 30.0).abs() < 0.01);
        assert_eq!(stats.frames, 0);
    }
}
