//! Per-phase timing of a test case

use std::time::{Duration, Instant};
use tracing::debug;

/// Wall-clock breakdown of one test case
#[derive(Debug)]
pub struct PhaseTimer {
    test_id: String,
    start: Instant,
    last_mark: Instant,
    phases: Vec<(&'static str, Duration)>,
}

impl PhaseTimer {
    pub fn start(test_id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            test_id: test_id.into(),
            start: now,
            last_mark: now,
            phases: Vec::new(),
        }
    }

    /// Close the phase that has run since the previous mark
    pub fn mark(&mut self, phase: &'static str) {
        let now = Instant::now();
        self.phases.push((phase, now - self.last_mark));
        self.last_mark = now;
    }

    /// One line, e.g. `call requested 120ms, call completed 5004ms`
    pub fn summary(&self) -> String {
        self.phases
            .iter()
            .map(|(phase, took)| format!("{} {}ms", phase, took.as_millis()))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Log the breakdown and return the total
    pub fn finish(self) -> Duration {
        let total = self.start.elapsed();
        debug!(
            "Test {} took {}ms ({})",
            self.test_id,
            total.as_millis(),
            self.summary()
        );
        total
    }
}
