use crate::sample::Sample;
use crate::stats::{Histogram, Summary};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::Duration;

/// Measured-phase results, warm-up already excluded.
pub struct Report {
    pub total: Duration,
    pub samples: Vec<Sample>,
}

impl Report {
    pub fn new(total: Duration, samples: Vec<Sample>) -> Self {
        Self { total, samples }
    }

    /// Sample count per status label ("200", "503", "network", "timeout").
    pub fn status_distribution(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for sample in &self.samples {
            *counts.entry(sample.status_label()).or_insert(0) += 1;
        }
        counts
    }

    /// Named millisecond series: `elapsed_200`, `elapsed_error` (if any
    /// answered request failed), then every server timing key.
    pub fn series(&self) -> Vec<(String, Vec<f64>)> {
        let mut ok = Vec::new();
        let mut failed = Vec::new();
        let mut timings: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for sample in &self.samples {
            let Some(elapsed) = sample.elapsed() else {
                continue;
            };
            match sample {
                Sample::Success { timings: stages, .. } => {
                    ok.push(as_ms(elapsed));
                    for (key, ms) in stages {
                        timings.entry(key.clone()).or_default().push(*ms);
                    }
                }
                _ => failed.push(as_ms(elapsed)),
            }
        }

        let mut series = vec![("elapsed_200".to_string(), ok)];
        if !failed.is_empty() {
            series.push(("elapsed_error".to_string(), failed));
        }
        series.extend(timings);
        series
    }

    pub fn render(&self, histogram_bins: usize) -> String {
        let n = self.samples.len();
        let secs = self.total.as_secs_f64();
        let mut out = String::new();

        let _ = writeln!(out, "Total time (s);{:.0}", secs);
        if n > 0 && secs > 0.0 {
            let _ = writeln!(out, "Requests per second;{:.0}", n as f64 / secs);
            let _ = writeln!(out, "Milliseconds per request;{:.0}", secs * 1000.0 / n as f64);
        }

        let _ = writeln!(out, "Response codes:");
        for (label, count) in self.status_distribution() {
            let share = count as f64 / n as f64 * 100.0;
            let _ = writeln!(out, "{};{};{:.2}%", label, count, share);
        }

        let series = self.series();
        let _ = writeln!(out, "{}", Summary::HEADER);
        for (key, values) in &series {
            if let Some(summary) = Summary::from_values(values) {
                let _ = writeln!(out, "{}", summary.row(key));
            }
        }

        for (key, values) in &series {
            if let Some(hist) = Histogram::from_values(values, histogram_bins) {
                let _ = writeln!(out, "\nHistogram of {} (millis)", key);
                out.push_str(&hist.render(40));
            }
        }

        out
    }
}

fn as_ms(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}
