//! W′ balance engine
//!
//! Tracks the remaining anaerobic work capacity (W′) second by second while
//! power above CP depletes it and power below CP lets it recover. Three
//! interchangeable algorithms are available:
//!
//! - **Waterworth**: incremental exponentially weighted sum, O(n)
//! - **Skiba**: the same integral written as an explicit double sum, O(n²)
//! - **Froncioni-Skiba-Clarke**: differential recurrence without a time constant
//!
//! The first two share a recovery time constant (tau) that is either derived
//! from the whole ride, re-derived from the ride so far at every second, or
//! supplied by the caller.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SweatError};

/// W′ balance algorithm selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WPrimeBalanceAlgorithm {
    #[default]
    Waterworth,
    Skiba,
    FroncioniSkibaClarke,
}

impl WPrimeBalanceAlgorithm {
    pub const ALL: [WPrimeBalanceAlgorithm; 3] = [
        WPrimeBalanceAlgorithm::Waterworth,
        WPrimeBalanceAlgorithm::Skiba,
        WPrimeBalanceAlgorithm::FroncioniSkibaClarke,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WPrimeBalanceAlgorithm::Waterworth => "waterworth",
            WPrimeBalanceAlgorithm::Skiba => "skiba",
            WPrimeBalanceAlgorithm::FroncioniSkibaClarke => "froncioni-skiba-clarke",
        }
    }

    /// Whether the algorithm uses the tau sub-model
    pub fn uses_tau(&self) -> bool {
        !matches!(self, WPrimeBalanceAlgorithm::FroncioniSkibaClarke)
    }

    fn function(&self) -> BalanceFn {
        match self {
            WPrimeBalanceAlgorithm::Waterworth => waterworth,
            WPrimeBalanceAlgorithm::Skiba => skiba,
            WPrimeBalanceAlgorithm::FroncioniSkibaClarke => froncioni_skiba_clarke,
        }
    }
}

impl fmt::Display for WPrimeBalanceAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WPrimeBalanceAlgorithm {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "waterworth" => Ok(WPrimeBalanceAlgorithm::Waterworth),
            "skiba" => Ok(WPrimeBalanceAlgorithm::Skiba),
            "froncioni-skiba-clarke" => Ok(WPrimeBalanceAlgorithm::FroncioniSkibaClarke),
            other => Err(SweatError::InvalidConfiguration(format!(
                "Unknown W' balance algorithm '{}', expected one of: waterworth, skiba, froncioni-skiba-clarke",
                other
            ))),
        }
    }
}

type BalanceFn = fn(&[f64], f64, f64, &Tau) -> Vec<f64>;

/// Largest `t / tau` Waterworth evaluates before `e^(t/tau)` loses the sum
pub const WATERWORTH_MAX_EXPONENT: f64 = 600.0;

/// Recovery time constant as a function of the sample index
#[derive(Debug, Clone, PartialEq)]
pub enum Tau {
    /// Derived once from the whole stream
    Static(f64),
    /// Derived from the samples before each index
    Dynamic(Vec<f64>),
    /// Supplied by the caller
    Fixed(f64),
}

impl Tau {
    /// Dynamic takes precedence over a fixed value; otherwise static
    pub fn from_options(power: &[f64], cp: f64, tau_dynamic: bool, tau_value: Option<f64>) -> Self {
        if tau_dynamic {
            Tau::Dynamic(dynamic_tau(power, cp))
        } else if let Some(value) = tau_value {
            Tau::Fixed(value)
        } else {
            Tau::Static(tau_w_prime_balance(power, cp, None))
        }
    }

    pub fn evaluate(&self, t: usize) -> f64 {
        match self {
            Tau::Static(value) | Tau::Fixed(value) => *value,
            Tau::Dynamic(values) => values[t],
        }
    }

    /// Smallest value over the stream
    pub fn min(&self) -> f64 {
        match self {
            Tau::Static(value) | Tau::Fixed(value) => *value,
            Tau::Dynamic(values) => values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    fn mode(&self) -> &'static str {
        match self {
            Tau::Static(_) => "static",
            Tau::Dynamic(_) => "dynamic",
            Tau::Fixed(_) => "fixed",
        }
    }
}

/// Skiba's recovery time constant, `546 * e^(-0.01 * (CP - mean(P < CP))) + 316`
///
/// `until` restricts the mean to `power[..until]`. Without samples below CP
/// the mean counts as zero.
pub fn tau_w_prime_balance(power: &[f64], cp: f64, until: Option<usize>) -> f64 {
    let until = until.unwrap_or(power.len()).min(power.len());
    let (sum, count) = power[..until]
        .iter()
        .filter(|&&p| p < cp)
        .fold((0.0, 0usize), |(sum, count), &p| (sum + p, count + 1));

    tau_from_mean_below_cp(cp, sum, count)
}

fn tau_from_mean_below_cp(cp: f64, sum: f64, count: usize) -> f64 {
    let avg_power_below_cp = if count > 0 { sum / count as f64 } else { 0.0 };
    let delta_cp = cp - avg_power_below_cp;
    546.0 * (-0.01 * delta_cp).exp() + 316.0
}

/// Tau at every index `t` over the exclusive prefix `power[..t]`, in one pass
fn dynamic_tau(power: &[f64], cp: f64) -> Vec<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut taus = Vec::with_capacity(power.len());

    for &p in power {
        taus.push(tau_from_mean_below_cp(cp, sum, count));
        if p < cp {
            sum += p;
            count += 1;
        }
    }

    taus
}

fn expended(p: f64, cp: f64) -> f64 {
    // Gaps expend nothing
    if p.is_nan() {
        0.0
    } else {
        (p - cp).max(0.0)
    }
}

fn waterworth(power: &[f64], cp: f64, w_prime: f64, tau: &Tau) -> Vec<f64> {
    let mut running_sum = 0.0;

    power
        .iter()
        .enumerate()
        .map(|(t, &p)| {
            let tau_t = tau.evaluate(t);
            let t = t as f64;
            running_sum += expended(p, cp) * (t / tau_t).exp();
            w_prime - running_sum * (-t / tau_t).exp()
        })
        .collect()
}

fn skiba(power: &[f64], cp: f64, w_prime: f64, tau: &Tau) -> Vec<f64> {
    (0..power.len())
        .map(|t| {
            let tau_t = tau.evaluate(t);
            let mut expended_sum = 0.0;
            for (u, &p) in power[..=t].iter().enumerate() {
                expended_sum += expended(p, cp) * ((u as f64 - t as f64) / tau_t).exp();
            }
            w_prime - expended_sum
        })
        .collect()
}

fn froncioni_skiba_clarke(power: &[f64], cp: f64, w_prime: f64, _tau: &Tau) -> Vec<f64> {
    let mut last = w_prime;

    power
        .iter()
        .map(|&p| {
            if p.is_nan() {
                return last;
            }
            let new = if p < cp {
                last + (cp - p) * (w_prime - last) / w_prime
            } else {
                last + (cp - p)
            };
            last = new;
            new
        })
        .collect()
}

/// W′ balance settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WPrimeBalanceConfig {
    pub algorithm: WPrimeBalanceAlgorithm,

    /// Recompute tau at every second from the ride so far
    pub tau_dynamic: bool,

    /// Fixed tau in seconds; ignored when `tau_dynamic` is set
    ///
    /// Waterworth rejects a tau shorter than `(samples - 1) / WATERWORTH_MAX_EXPONENT`
    /// (about 24 s for a four hour ride); Skiba has no such limit.
    pub tau_value: Option<f64>,
}

/// Balance series with a few derived summary values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WPrimeBalance {
    pub algorithm: WPrimeBalanceAlgorithm,

    /// Remaining W′ in joules, one entry per sample
    pub balance: Vec<f64>,

    /// Lowest balance reached (W′ for an empty stream)
    pub min_balance: f64,

    /// Seconds spent with a negative balance
    pub time_below_zero: usize,
}

/// W′ balance calculator
pub struct WPrimeBalanceCalculator {
    config: WPrimeBalanceConfig,
}

impl WPrimeBalanceCalculator {
    pub fn new() -> Self {
        Self::with_config(WPrimeBalanceConfig::default())
    }

    pub fn with_config(config: WPrimeBalanceConfig) -> Self {
        Self { config }
    }

    /// Compute the balance series for a power stream
    pub fn calculate(&self, power: &[f64], cp: f64, w_prime: f64) -> Result<WPrimeBalance> {
        if !cp.is_finite() {
            return Err(SweatError::InvalidConfiguration(format!(
                "Critical power must be finite, got {}",
                cp
            )));
        }
        if !(w_prime > 0.0 && w_prime.is_finite()) {
            return Err(SweatError::InvalidConfiguration(format!(
                "W' must be a positive number of joules, got {}",
                w_prime
            )));
        }
        if let Some(value) = self.config.tau_value {
            if !(value > 0.0 && value.is_finite()) {
                return Err(SweatError::InvalidConfiguration(format!(
                    "Tau must be a positive number of seconds, got {}",
                    value
                )));
            }
        }

        let algorithm = self.config.algorithm;
        let tau = if algorithm.uses_tau() {
            Tau::from_options(power, cp, self.config.tau_dynamic, self.config.tau_value)
        } else {
            Tau::Fixed(f64::NAN)
        };

        if algorithm == WPrimeBalanceAlgorithm::Waterworth && power.len() > 1 {
            let horizon = (power.len() - 1) as f64;
            if horizon / tau.min() > WATERWORTH_MAX_EXPONENT {
                return Err(SweatError::InvalidConfiguration(format!(
                    "Tau of {:.1} s is too short for waterworth over {} samples (at least {:.1} s needed), use skiba or a larger tau",
                    tau.min(),
                    power.len(),
                    horizon / WATERWORTH_MAX_EXPONENT
                )));
            }
        }

        tracing::debug!(
            algorithm = %algorithm,
            tau_mode = tau.mode(),
            samples = power.len(),
            cp,
            w_prime,
            "computing W' balance"
        );

        let balance = (algorithm.function())(power, cp, w_prime, &tau);

        let min_balance = balance.iter().copied().fold(w_prime, f64::min);
        let time_below_zero = balance.iter().filter(|&&b| b < 0.0).count();

        if time_below_zero > 0 {
            tracing::debug!(time_below_zero, min_balance, "W' balance went negative");
        }

        Ok(WPrimeBalance {
            algorithm,
            balance,
            min_balance,
            time_below_zero,
        })
    }
}

impl Default for WPrimeBalanceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// W′ balance series for `power`
///
/// With Waterworth a fixed `tau_value` must be at least
/// `(power.len() - 1) / WATERWORTH_MAX_EXPONENT` seconds.
pub fn w_prime_balance(
    power: &[f64],
    cp: f64,
    w_prime: f64,
    algorithm: WPrimeBalanceAlgorithm,
    tau_dynamic: bool,
    tau_value: Option<f64>,
) -> Result<Vec<f64>> {
    let config = WPrimeBalanceConfig {
        algorithm,
        tau_dynamic,
        tau_value,
    };
    Ok(WPrimeBalanceCalculator::with_config(config)
        .calculate(power, cp, w_prime)?
        .balance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const TOLERANCE: f64 = 1e-9;

    fn power() -> Vec<f64> {
        (0..100).map(|i| i as f64).collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < TOLERANCE,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn balance(algorithm: WPrimeBalanceAlgorithm, tau_dynamic: bool, tau_value: Option<f64>) -> Vec<f64> {
        w_prime_balance(&power(), 25.0, 2000.0, algorithm, tau_dynamic, tau_value).unwrap()
    }

    #[test]
    fn test_tau_w_prime_balance() {
        assert_close(tau_w_prime_balance(&power(), 25.0, None), 795.44010528262652);
        assert_close(tau_w_prime_balance(&power(), 25.0, Some(15)), 772.05753543055448);
    }

    #[test]
    fn test_tau_without_samples_below_cp() {
        // Mean below CP counts as zero, so D_CP = CP
        let tau = tau_w_prime_balance(&[300.0, 310.0], 250.0, None);
        assert_close(tau, 546.0 * (-2.5f64).exp() + 316.0);
    }

    #[test]
    fn test_tau_variants() {
        let stream = power();

        let tau = Tau::from_options(&stream, 25.0, false, None);
        assert_close(tau.evaluate(0), 795.44010528262652);
        assert_close(tau.evaluate(99), 795.44010528262652);

        let tau = Tau::from_options(&stream, 25.0, true, None);
        assert_close(tau.evaluate(0), 741.2252275569871);
        assert_close(tau.evaluate(99), 795.44010528262652);

        let tau = Tau::from_options(&stream, 25.0, false, Some(100.0));
        assert_eq!(tau, Tau::Fixed(100.0));
        assert_eq!(tau.evaluate(99), 100.0);

        // Dynamic wins over a fixed value
        assert!(matches!(
            Tau::from_options(&stream, 25.0, true, Some(100.0)),
            Tau::Dynamic(_)
        ));
    }

    #[test]
    fn test_dynamic_tau_matches_prefix_formula() {
        let stream = power();
        let Tau::Dynamic(taus) = Tau::from_options(&stream, 25.0, true, None) else {
            panic!("expected dynamic tau");
        };
        for t in [0, 1, 15, 26, 60] {
            assert_close(taus[t], tau_w_prime_balance(&stream, 25.0, Some(t)));
        }
    }

    #[test]
    fn test_waterworth() {
        use WPrimeBalanceAlgorithm::Waterworth;
        assert_close(balance(Waterworth, false, None)[75], 750.77417744392937);
        assert_close(balance(Waterworth, true, None)[75], 750.77417744392937);
        assert_close(balance(Waterworth, false, Some(100.0))[75], 909.61894732869769);
    }

    #[test]
    fn test_skiba() {
        use WPrimeBalanceAlgorithm::Skiba;
        assert_close(balance(Skiba, false, None)[75], 750.77417744392892);
        assert_close(balance(Skiba, true, None)[75], 750.77417744392892);
        assert_close(balance(Skiba, false, Some(100.0))[75], 909.61894732869769);
    }

    #[test]
    fn test_froncioni_skiba_clarke() {
        let rv = balance(WPrimeBalanceAlgorithm::FroncioniSkibaClarke, false, None);
        assert_eq!(rv[75], 725.0);
        assert_eq!(rv[50], 1675.0);
    }

    #[test]
    fn test_w_prime_balance_dispatch() {
        use WPrimeBalanceAlgorithm::*;

        let expected = 1678.2431086242659;
        assert_close(balance(WPrimeBalanceAlgorithm::default(), false, None)[50], expected);
        assert_close(balance(Waterworth, false, Some(500.0))[50], 1680.1356439412966);
        assert_close(balance(Waterworth, true, None)[50], expected);
        assert_close(balance(Skiba, false, None)[50], expected);
        assert_close(balance(Skiba, false, Some(500.0))[50], 1680.1356439412966);
        assert_close(balance(Skiba, true, None)[50], expected);
    }

    #[test]
    fn test_algorithm_names() {
        for algorithm in WPrimeBalanceAlgorithm::ALL {
            assert_eq!(algorithm.name().parse::<WPrimeBalanceAlgorithm>().unwrap(), algorithm);
        }
        assert!(matches!(
            "differential".parse::<WPrimeBalanceAlgorithm>(),
            Err(SweatError::InvalidConfiguration(_))
        ));

        let json = serde_json::to_string(&WPrimeBalanceAlgorithm::FroncioniSkibaClarke).unwrap();
        assert_eq!(json, "\"froncioni-skiba-clarke\"");
    }

    #[test]
    fn test_calculator_summary() {
        let result = WPrimeBalanceCalculator::new()
            .calculate(&[400.0; 20], 300.0, 1000.0)
            .unwrap();

        assert_eq!(result.balance.len(), 20);
        assert!(result.min_balance < 0.0);
        assert!(result.time_below_zero > 0);
        assert_eq!(result.algorithm, WPrimeBalanceAlgorithm::Waterworth);
    }

    #[test]
    fn test_invalid_inputs() {
        let calculator = WPrimeBalanceCalculator::new();
        assert!(calculator.calculate(&power(), 25.0, 0.0).is_err());
        assert!(calculator.calculate(&power(), f64::NAN, 2000.0).is_err());

        let calculator = WPrimeBalanceCalculator::with_config(WPrimeBalanceConfig {
            tau_value: Some(-1.0),
            ..Default::default()
        });
        assert!(calculator.calculate(&power(), 25.0, 2000.0).is_err());
    }

    #[test]
    fn test_waterworth_rejects_short_tau_on_long_stream() {
        let long = vec![400.0; 1000];
        let result = w_prime_balance(&long, 300.0, 20000.0, WPrimeBalanceAlgorithm::Waterworth, false, Some(1.0));
        assert!(matches!(result, Err(SweatError::InvalidConfiguration(_))));

        for algorithm in [WPrimeBalanceAlgorithm::Skiba, WPrimeBalanceAlgorithm::FroncioniSkibaClarke] {
            let rv = w_prime_balance(&long, 300.0, 20000.0, algorithm, false, Some(1.0)).unwrap();
            assert!(rv.iter().all(|b| b.is_finite()));
        }

        // t / tau reaches the limit exactly on the last sample
        let rv = w_prime_balance(&long[..601], 300.0, 20000.0, WPrimeBalanceAlgorithm::Waterworth, false, Some(1.0))
            .unwrap();
        assert!(rv.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn test_empty_stream() {
        for algorithm in WPrimeBalanceAlgorithm::ALL {
            let rv = w_prime_balance(&[], 250.0, 20000.0, algorithm, true, None).unwrap();
            assert!(rv.is_empty());
        }
    }

    #[test]
    fn test_gaps_do_not_expend() {
        let with_gap = [400.0, f64::NAN, 400.0];
        for algorithm in WPrimeBalanceAlgorithm::ALL {
            let rv = w_prime_balance(&with_gap, 300.0, 20000.0, algorithm, false, Some(300.0)).unwrap();
            assert!(rv.iter().all(|b| b.is_finite()));
            assert!(rv[2] < rv[1]);
        }
    }

    proptest! {
        #[test]
        fn test_waterworth_and_skiba_agree(
            stream in prop::collection::vec(0.0f64..800.0, 1..150),
            cp in 150.0f64..350.0,
        ) {
            let waterworth = w_prime_balance(&stream, cp, 20000.0, WPrimeBalanceAlgorithm::Waterworth, false, None).unwrap();
            let skiba = w_prime_balance(&stream, cp, 20000.0, WPrimeBalanceAlgorithm::Skiba, false, None).unwrap();

            for (w, s) in waterworth.iter().zip(&skiba) {
                prop_assert!((w - s).abs() < 1e-6);
            }
        }

        #[test]
        fn test_froncioni_never_exceeds_w_prime(
            stream in prop::collection::vec(0.0f64..1500.0, 1..300),
            cp in 100.0f64..400.0,
            w_prime in 5000.0f64..30000.0,
        ) {
            let rv = w_prime_balance(&stream, cp, w_prime, WPrimeBalanceAlgorithm::FroncioniSkibaClarke, false, None).unwrap();
            prop_assert!(rv.iter().all(|&b| b <= w_prime + 1e-9));
        }

        #[test]
        fn test_sub_cp_effort_never_depletes(
            value in 0.0f64..249.0,
            length in 1usize..200,
        ) {
            let stream = vec![value; length];
            for algorithm in WPrimeBalanceAlgorithm::ALL {
                let rv = w_prime_balance(&stream, 250.0, 20000.0, algorithm, false, None).unwrap();
                prop_assert!(rv.windows(2).all(|w| w[1] >= w[0]));
                prop_assert!(rv.iter().all(|&b| b <= 20000.0));
            }
        }
    }
}
