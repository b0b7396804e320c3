use serde::{Deserialize, Serialize};

/// Summary of timing samples, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Sample standard deviation (n - 1 denominator).
    pub stddev: f64,
    pub samples: usize,
}

impl Stats {
    /// Coefficient of variation in percent; zero for a zero mean.
    pub fn cv_percent(&self) -> f64 {
        if self.mean > 0.0 {
            self.stddev / self.mean * 100.0
        } else {
            0.0
        }
    }
}

pub fn compute_stats(samples: &[f64]) -> Stats {
    if samples.is_empty() {
        return Stats::default();
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let stddev = if n > 1 {
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    Stats {
        mean,
        median,
        min: sorted[0],
        max: sorted[n - 1],
        stddev,
        samples: n,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_samples() {
        assert_eq!(compute_stats(&[]), Stats::default());
    }

    #[test]
    fn single_sample_has_no_spread() {
        let stats = compute_stats(&[4.2]);
        assert_relative_eq!(stats.mean, 4.2);
        assert_relative_eq!(stats.median, 4.2);
        assert_relative_eq!(stats.stddev, 0.0);
        assert_eq!(stats.samples, 1);
    }

    #[test]
    fn known_values() {
        let stats = compute_stats(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_relative_eq!(stats.mean, 5.0);
        assert_relative_eq!(stats.median, 4.5);
        assert_relative_eq!(stats.min, 2.0);
        assert_relative_eq!(stats.max, 9.0);
        // sum of squares 32 over 7
        assert_relative_eq!(stats.stddev, (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn unsorted_input_odd_count() {
        let stats = compute_stats(&[3.0, 1.0, 2.0]);
        assert_relative_eq!(stats.median, 2.0);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 3.0);
    }

    #[test]
    fn coefficient_of_variation() {
        let stats = compute_stats(&[9.0, 11.0]);
        assert_relative_eq!(stats.cv_percent(), 2f64.sqrt() / 10.0 * 100.0, epsilon = 1e-9);
        assert_relative_eq!(Stats::default().cv_percent(), 0.0);
    }
}
