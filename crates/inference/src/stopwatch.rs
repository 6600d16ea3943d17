use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Per-request named-interval timer.
///
/// The first `start_stop(name)` starts an interval, the second records its
/// duration in milliseconds and clears the start marker. A third call starts a
/// fresh interval for the same name; its value replaces the previous one once
/// it is stopped.
#[derive(Debug, Default)]
pub struct StopWatch {
    started: HashMap<String, Instant>,
    timings: BTreeMap<String, f64>,
}

impl StopWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_stop(&mut self, name: &str) {
        match self.started.remove(name) {
            Some(start) => {
                let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
                self.timings.insert(name.to_string(), elapsed_ms);
            }
            None => {
                self.started.insert(name.to_string(), Instant::now());
            }
        }
    }

    /// Completed intervals only. Names that were started but never stopped are
    /// left out.
    pub fn timings(&self) -> &BTreeMap<String, f64> {
        &self.timings
    }

    /// Names with an open interval.
    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.started.keys().map(String::as_str)
    }

    pub fn into_timings(self) -> BTreeMap<String, f64> {
        for name in self.pending() {
            tracing::warn!(stage = %name, "Stage timer never stopped; omitted from timings");
        }
        self.timings
    }
}
