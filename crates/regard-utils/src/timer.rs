//! Lightweight profiling timers.
//!
//! [`Timer`] accumulates the wall-clock time spent in a closure and can be
//! displayed inline in log output. [`FpsCounter`] logs a once-per-second
//! frame rate summary together with any timers of interest.

use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};

/// Accumulates the time spent in a repeatedly executed operation.
pub struct Timer {
    name: &'static str,
    total: Cell<Duration>,
    calls: Cell<u32>,
}

impl Timer {
    /// Creates a timer with a display name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            total: Cell::new(Duration::ZERO),
            calls: Cell::new(0),
        }
    }

    /// Runs `f`, adding its execution time to the accumulated total.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let result = f();
        self.total.set(self.total.get() + start.elapsed());
        self.calls.set(self.calls.get() + 1);
        result
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mean time per call, or zero if the timer never ran.
    pub fn mean(&self) -> Duration {
        let calls = self.calls.get();
        if calls == 0 {
            Duration::ZERO
        } else {
            self.total.get() / calls
        }
    }

    /// Clears the accumulated total and call count.
    pub fn reset(&self) {
        self.total.set(Duration::ZERO);
        self.calls.set(0);
    }
}

impl fmt::Display for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:.1}ms", self.name, self.mean().as_secs_f64() * 1000.0)
    }
}

/// Logs a frames-per-second summary roughly once per second.
pub struct FpsCounter {
    name: String,
    frames: u32,
    window_start: Instant,
}

impl FpsCounter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            frames: 0,
            window_start: Instant::now(),
        }
    }

    /// Counts one frame.
    pub fn tick(&mut self) {
        self.tick_with([]);
    }

    /// Counts one frame and, when a report is due, includes `timers` in the
    /// log line and resets them.
    pub fn tick_with<'a>(&mut self, timers: impl IntoIterator<Item = &'a Timer>) {
        self.frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            let fps = self.frames as f64 / elapsed.as_secs_f64();
            let details = timers
                .into_iter()
                .map(|t| {
                    let s = t.to_string();
                    t.reset();
                    s
                })
                .collect::<Vec<_>>()
                .join(", ");
            if details.is_empty() {
                log::debug!("{}: {:.1} FPS", self.name, fps);
            } else {
                log::debug!("{}: {:.1} FPS ({})", self.name, fps, details);
            }
            self.frames = 0;
            self.window_start = Instant::now();
        }
    }
}
