//! Power stream analysis
//!
//! Mean-max (power duration) curve, best interval search, weighted average
//! power and the simple intensity metrics derived from it.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Result, SweatError};
use crate::models::DataPoint;
use crate::streams::{self, RollingAlgorithm};

/// Weighted average power flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WapAlgorithm {
    /// 30 s uniform rolling mean (normalized power style)
    #[default]
    Wap,
    /// 25 s exponentially weighted rolling mean
    XPower,
}

impl FromStr for WapAlgorithm {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "wap" => Ok(WapAlgorithm::Wap),
            "xpower" => Ok(WapAlgorithm::XPower),
            other => Err(SweatError::InvalidConfiguration(format!(
                "Unknown weighted average power algorithm '{}'",
                other
            ))),
        }
    }
}

/// Main power analyzer
pub struct PowerAnalyzer;

impl PowerAnalyzer {
    /// Mean-max power curve
    ///
    /// Entry `t - 1` holds the best average power over any window of `t`
    /// seconds, for `t = 1..len`. Window sums come from differences of the
    /// cumulative energy (seeded with zero so the window starting at the first
    /// sample counts), so each duration costs a single pass. Gaps count as
    /// zero power. Streams shorter than two samples give an empty curve.
    pub fn mean_max(power: &[f64], monotonic: bool) -> Vec<f64> {
        let n = power.len();
        if n < 2 {
            return Vec::new();
        }

        let mut energy = Vec::with_capacity(n + 1);
        let mut total = 0.0;
        energy.push(total);
        for &p in power {
            if !p.is_nan() {
                total += p;
            }
            energy.push(total);
        }

        let mut curve: Vec<f64> = (1..n)
            .into_par_iter()
            .map(|t| {
                let best = (t..=n)
                    .map(|i| energy[i] - energy[i - t])
                    .fold(f64::NEG_INFINITY, f64::max);
                best / t as f64
            })
            .collect();

        if monotonic {
            Self::enforce_monotonic(&mut curve);
        }

        tracing::debug!(samples = n, monotonic, "mean-max curve computed");

        curve
    }

    /// Mean-max curve with masked samples replaced by `value` first
    pub fn mean_max_masked(
        power: &[f64],
        mask: Option<&[bool]>,
        value: f64,
        monotonic: bool,
    ) -> Result<Vec<f64>> {
        let power = streams::mask_fill(power, mask, value)?;
        Ok(Self::mean_max(&power, monotonic))
    }

    /// Clamp every duration to at least the value of the next longer one
    fn enforce_monotonic(curve: &mut [f64]) {
        let Some(&last) = curve.last() else {
            return;
        };
        let mut previous = last;
        for value in curve.iter_mut().rev() {
            if *value <= previous {
                *value = previous;
            } else {
                previous = *value;
            }
        }
    }

    /// Best average power over a `window` second interval
    pub fn best_interval(
        power: &[f64],
        window: usize,
        mask: Option<&[bool]>,
        value: f64,
    ) -> Result<f64> {
        let rolling = streams::rolling_mean(power, window, mask, RollingAlgorithm::Uniform, value)?;
        Ok(rolling.into_iter().fold(f64::NAN, f64::max))
    }

    /// Top `count` non-overlapping best intervals of `duration` seconds
    ///
    /// Only complete windows are candidates, so the first index that can be
    /// picked is `duration - 1`. Greedy: after each pick, every rolling mean
    /// within `duration` samples either side of the picked index is
    /// discarded. Once nothing is left the remaining slots are filled with
    /// [`DataPoint::missing`].
    pub fn multiple_best_intervals(
        power: &[f64],
        duration: usize,
        count: usize,
    ) -> Result<Vec<DataPoint>> {
        let mut rolling =
            streams::rolling_mean(power, duration, None, RollingAlgorithm::Uniform, 0.0)?;
        let length = rolling.len();
        let partial = (duration - 1).min(length);
        for v in &mut rolling[..partial] {
            *v = f64::NAN;
        }
        let mut bests = Vec::with_capacity(count);

        for _ in 0..count {
            let best = rolling
                .iter()
                .enumerate()
                .filter(|(_, v)| !v.is_nan())
                .fold(None::<(usize, f64)>, |acc, (i, &v)| match acc {
                    Some((_, current)) if current >= v => acc,
                    _ => Some((i, v)),
                });

            let Some((max_index, max_value)) = best else {
                bests.push(DataPoint::missing());
                continue;
            };

            bests.push(DataPoint::new(max_index, max_value));

            let overlap_start = max_index.saturating_sub(duration);
            let overlap_end = (max_index + duration).min(length - 1);
            for v in &mut rolling[overlap_start..=overlap_end] {
                *v = f64::NAN;
            }
        }

        Ok(bests)
    }

    /// Weighted average power
    ///
    /// Fourth root of the mean fourth power of the smoothed stream. Empty
    /// streams give NaN.
    pub fn weighted_average_power(
        power: &[f64],
        mask: Option<&[bool]>,
        algorithm: WapAlgorithm,
        value: f64,
    ) -> Result<f64> {
        let smoothed = match algorithm {
            WapAlgorithm::Wap => {
                streams::rolling_mean(power, 30, mask, RollingAlgorithm::Uniform, value)?
            }
            WapAlgorithm::XPower => {
                streams::rolling_mean(power, 25, mask, RollingAlgorithm::Ewma, value)?
            }
        };

        let samples: Vec<f64> = smoothed.into_iter().filter(|v| !v.is_nan()).collect();
        if samples.is_empty() {
            return Ok(f64::NAN);
        }

        let mean_fourth = samples.iter().map(|p| p.powi(4)).sum::<f64>() / samples.len() as f64;
        Ok(mean_fourth.powf(0.25))
    }

    /// Watts per kilogram
    pub fn wpk(power: &[f64], weight: f64) -> Vec<f64> {
        power.iter().map(|p| p / weight).collect()
    }

    /// Intensity relative to a threshold (IF when the threshold is FTP)
    pub fn relative_intensity(wap: f64, threshold_power: f64) -> f64 {
        wap / threshold_power
    }

    /// Training stress score for `duration` seconds at `wap`
    pub fn stress_score(wap: f64, threshold_power: f64, duration: f64) -> f64 {
        (duration / 3600.0) * (wap / threshold_power).powi(2) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn test_power_duration_curve() {
        let rv = PowerAnalyzer::mean_max(&ramp(101), false);

        assert_eq!(rv.len(), 100);
        assert_eq!(rv[0], 100.0);
        assert_eq!(rv[49], 75.5);
        assert_eq!(rv[99], 50.5);
    }

    #[test]
    fn test_mean_max_degenerate() {
        assert!(PowerAnalyzer::mean_max(&[], false).is_empty());
        assert!(PowerAnalyzer::mean_max(&[250.0], true).is_empty());
        assert_eq!(PowerAnalyzer::mean_max(&[100.0, 300.0], false), vec![300.0]);
    }

    #[test]
    fn test_mean_max_monotonic() {
        // A curve from a stream with a late surge is not naturally non-increasing
        let power = [100.0, 0.0, 0.0, 0.0, 400.0, 400.0];
        let raw = PowerAnalyzer::mean_max(&power, false);
        let monotonic = PowerAnalyzer::mean_max(&power, true);

        assert_eq!(raw.len(), monotonic.len());
        for (r, m) in raw.iter().zip(&monotonic) {
            assert!(m >= r);
        }
        assert!(monotonic.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(monotonic.last(), raw.last());
    }

    #[test]
    fn test_mean_max_masked() {
        let power = [500.0, 100.0, 100.0];
        let mask = [false, true, true];
        let rv = PowerAnalyzer::mean_max_masked(&power, Some(&mask), 0.0, false).unwrap();
        assert_eq!(rv, vec![100.0, 100.0]);
    }

    #[test]
    fn test_best_interval() {
        let power = [100.0, 200.0, 300.0, 400.0, 500.0, 400.0, 300.0, 200.0, 100.0];
        let best = PowerAnalyzer::best_interval(&power, 3, None, 0.0).unwrap();
        assert!((best - 1300.0 / 3.0).abs() < 1e-9);

        let constant = PowerAnalyzer::best_interval(&[1.0; 5], 5, None, 0.0).unwrap();
        assert_eq!(constant, 1.0);
    }

    #[test]
    fn test_mean_max_bests() {
        let bests = PowerAnalyzer::multiple_best_intervals(&ramp(100), 3, 3).unwrap();

        assert_eq!(bests.len(), 3);
        assert_eq!(bests[0].index, Some(99));
        assert_eq!(bests[0].value, 98.0);
        assert_eq!(bests[1].index, Some(95));
        assert_eq!(bests[2].index, Some(91));
        assert_eq!(bests[2].value, 90.0);
    }

    #[test]
    fn test_mean_max_bests_exhausted() {
        // Shorter than one full window
        let bests = PowerAnalyzer::multiple_best_intervals(&[300.0, 310.0, 320.0], 5, 3).unwrap();
        assert_eq!(bests.len(), 3);
        assert!(bests.iter().all(DataPoint::is_missing));
        assert!(bests[2].value.is_nan());

        // Exactly one full window
        let bests = PowerAnalyzer::multiple_best_intervals(&[300.0, 310.0, 320.0], 3, 2).unwrap();
        assert_eq!(bests[0], DataPoint::new(2, 310.0));
        assert!(bests[1].is_missing());
    }

    #[test]
    fn test_mean_max_bests_skip_partial_windows() {
        let mut power = vec![0.0; 20];
        power[0] = 1000.0;

        let bests = PowerAnalyzer::multiple_best_intervals(&power, 5, 2).unwrap();

        assert_eq!(bests[0], DataPoint::new(4, 200.0));
        // Indices up to 9 are suppressed by the first pick
        assert_eq!(bests[1], DataPoint::new(10, 0.0));
    }

    #[test]
    fn test_mean_max_bests_empty_stream() {
        let bests = PowerAnalyzer::multiple_best_intervals(&[], 5, 2).unwrap();
        assert_eq!(bests.len(), 2);
        assert!(bests.iter().all(DataPoint::is_missing));
    }

    #[test]
    fn test_weighted_average_power() {
        let stream = vec![1.0; 30];
        let mask = vec![true; 30];

        let wap = PowerAnalyzer::weighted_average_power(&stream, Some(&mask), WapAlgorithm::Wap, 0.0).unwrap();
        assert!((wap - 1.0).abs() < 1e-12);

        let xpower = PowerAnalyzer::weighted_average_power(&stream, Some(&mask), WapAlgorithm::XPower, 0.0).unwrap();
        assert!((xpower - 1.0).abs() < 1e-12);

        assert!(PowerAnalyzer::weighted_average_power(&[], None, WapAlgorithm::Wap, 0.0).unwrap().is_nan());
    }

    #[test]
    fn test_weighted_average_power_exceeds_mean_for_variable_effort() {
        let stream: Vec<f64> = (0..600).map(|i| if (i / 60) % 2 == 0 { 400.0 } else { 100.0 }).collect();
        let wap = PowerAnalyzer::weighted_average_power(&stream, None, WapAlgorithm::Wap, 0.0).unwrap();
        assert!(wap > 250.0);
    }

    #[test]
    fn test_intensity_metrics() {
        assert_eq!(PowerAnalyzer::wpk(&[1.0, 2.0, 3.0], 2.0), vec![0.5, 1.0, 1.5]);
        assert_eq!(PowerAnalyzer::relative_intensity(300.0, 300.0), 1.0);
        assert_eq!(PowerAnalyzer::stress_score(300.0, 300.0, 3600.0), 100.0);
    }

    #[test]
    fn test_wap_algorithm_parsing() {
        assert_eq!("xPower".parse::<WapAlgorithm>().unwrap(), WapAlgorithm::XPower);
        assert!("np".parse::<WapAlgorithm>().is_err());
    }

    proptest! {
        #[test]
        fn test_mean_max_properties(power in prop::collection::vec(0.0f64..1500.0, 2..120)) {
            let curve = PowerAnalyzer::mean_max(&power, false);
            prop_assert_eq!(curve.len(), power.len() - 1);

            let max = power.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!((curve[0] - max).abs() < 1e-9);

            let monotonic = PowerAnalyzer::mean_max(&power, true);
            prop_assert!(monotonic.windows(2).all(|w| w[0] >= w[1]));
        }

        #[test]
        fn test_best_intervals_do_not_overlap(
            power in prop::collection::vec(0.0f64..1500.0, 1..200),
            duration in 1usize..20,
            count in 1usize..6,
        ) {
            let bests = PowerAnalyzer::multiple_best_intervals(&power, duration, count).unwrap();
            prop_assert_eq!(bests.len(), count);

            let found: Vec<usize> = bests.iter().filter_map(|b| b.index).collect();
            for (i, a) in found.iter().enumerate() {
                for b in &found[i + 1..] {
                    prop_assert!(a.abs_diff(*b) > duration);
                }
            }

            // Once a slot is empty every later slot is empty too
            if let Some(first_missing) = bests.iter().position(DataPoint::is_missing) {
                prop_assert!(bests[first_missing..].iter().all(DataPoint::is_missing));
            }
        }
    }
}
