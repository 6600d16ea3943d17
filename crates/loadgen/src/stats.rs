/// Distribution summary of one series, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Summary {
    /// `None` for an empty series.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Some(Self {
            count: sorted.len(),
            mean,
            std: variance.sqrt(),
            median: percentile(&sorted, 50.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p90: percentile(&sorted, 90.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        })
    }

    /// One `;`-separated row matching [`Summary::HEADER`].
    pub fn row(&self, key: &str) -> String {
        format!(
            "{};{:.2};{:.2};{:.2};{:.2};{:.2};{:.2};{:.2};{:.2}",
            key,
            self.mean,
            self.std,
            self.median,
            self.min,
            self.max,
            self.p90,
            self.p95,
            self.p99
        )
    }

    pub const HEADER: &'static str = "Key;Mean;Std;Median;Min;Max;P90;P95;P99";
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Equal-width histogram over `[min, max]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    pub min: f64,
    pub max: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn from_values(values: &[f64], bins: usize) -> Option<Self> {
        if values.is_empty() || bins == 0 {
            return None;
        }

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = (max - min) / bins as f64;

        let mut counts = vec![0; bins];
        for v in values {
            let idx = if width > 0.0 {
                (((v - min) / width) as usize).min(bins - 1)
            } else {
                0
            };
            counts[idx] += 1;
        }

        Some(Self { min, max, counts })
    }

    /// Text rendering, one line per bin, bars scaled to `bar_width` columns.
    pub fn render(&self, bar_width: usize) -> String {
        let bins = self.counts.len();
        let width = (self.max - self.min) / bins as f64;
        let peak = self.counts.iter().copied().max().unwrap_or(0).max(1);

        let mut out = String::new();
        for (i, count) in self.counts.iter().enumerate() {
            let lo = self.min + width * i as f64;
            let hi = lo + width;
            let bar = "#".repeat(count * bar_width / peak);
            out.push_str(&format!("{:>10.2} - {:>10.2} | {:<bar_width$} {}\n", lo, hi, bar, count));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_of_known_series() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        let s = Summary::from_values(&values).unwrap();

        assert_eq!(s.count, 5);
        assert_eq!(s.mean, 3.0);
        assert!((s.std - 2.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.median, 3.0);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 5.0);
        // rank 0.9 * 4 = 3.6 -> 4 + 0.6
        assert!((s.p90 - 4.6).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!((percentile(&sorted, 50.0) - 50.5).abs() < 1e-12);
        assert!((percentile(&sorted, 99.0) - 99.01).abs() < 1e-9);
        assert_eq!(percentile(&sorted, 100.0), 100.0);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn test_summary_empty() {
        assert!(Summary::from_values(&[]).is_none());
    }

    #[test]
    fn test_row_format() {
        let s = Summary::from_values(&[1.0, 3.0]).unwrap();
        assert_eq!(s.row("compute"), "compute;2.00;1.00;2.00;1.00;3.00;2.80;2.90;2.98");
    }

    #[test]
    fn test_histogram_counts_every_value() {
        let values = [0.0, 1.0, 2.0, 3.0, 9.0, 10.0];
        let h = Histogram::from_values(&values, 5).unwrap();

        assert_eq!(h.counts, vec![2, 2, 0, 0, 2]);
        assert_eq!(h.counts.iter().sum::<usize>(), values.len());
    }

    #[test]
    fn test_histogram_constant_series() {
        let h = Histogram::from_values(&[4.0; 3], 10).unwrap();
        assert_eq!(h.counts[0], 3);
        assert!(h.render(20).lines().count() == 10);
    }
}
