//! Power-duration (critical power) model fitting
//!
//! Each model predicts the best sustainable power for a duration `t` in
//! seconds. Models are fitted by Levenberg–Marquardt least squares either to
//! explicit `(duration, power)` pairs or to a mean-max curve on the implicit
//! time axis `1..=len`.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SweatError};
use crate::optimize::{self, SolverConfig};

/// Mean-max samples used for the extended models (90 minutes)
pub const EXTENDED_MODEL_MAX_SAMPLES: usize = 5400;

/// Default omni-domain duration (seconds) after which the CP decay applies
pub const DEFAULT_TCP_MAX: f64 = 1800.0;

/// Extended model predictions outside `[1, 2000]` W are treated as zero
const EXTENDED_MIN_POWER: f64 = 1.0;
const EXTENDED_MAX_POWER: f64 = 2000.0;

const EXTENDED_PARAMETERS: [&str; 8] = [
    "power_anaerobic_alactic",
    "power_anaerobic_decay",
    "cp",
    "cp_delay",
    "cp_decay",
    "cp_decay_delay",
    "tau",
    "tau_delay",
];

const EXTENDED_DEFAULTS: [f64; 8] = [811.0, -2.0, 280.0, -0.9, -0.583, -180.0, 1.208, -4.8];

/// Power-duration models
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CpModelKind {
    /// `cp + w'/t`
    #[default]
    TwoParameter,
    /// `w'/(t + w'/(p_max - cp)) + cp`
    ThreeParameter,
    /// `(p_max - cp) * e^(-t/tau) + cp`
    Exponential,
    /// Omni-domain model with a log decay past `tcp_max`
    Omni,
    /// Extended CP model, 5-3 variant
    Extended5,
    /// Extended CP model, 7-3 variant
    Extended7,
}

impl CpModelKind {
    pub const ALL: [CpModelKind; 6] = [
        CpModelKind::TwoParameter,
        CpModelKind::ThreeParameter,
        CpModelKind::Exponential,
        CpModelKind::Omni,
        CpModelKind::Extended5,
        CpModelKind::Extended7,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CpModelKind::TwoParameter => "2-parameter",
            CpModelKind::ThreeParameter => "3-parameter",
            CpModelKind::Exponential => "exponential",
            CpModelKind::Omni => "omni",
            CpModelKind::Extended5 => "extended-5-3",
            CpModelKind::Extended7 => "extended-7-3",
        }
    }

    /// Free parameters, in the order the solver sees them
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            CpModelKind::TwoParameter => &["cp", "w_prime"],
            CpModelKind::ThreeParameter => &["cp", "w_prime", "p_max"],
            CpModelKind::Exponential => &["cp", "p_max", "tau"],
            CpModelKind::Omni => &["cp", "p_max", "w_prime", "a"],
            CpModelKind::Extended5 | CpModelKind::Extended7 => &EXTENDED_PARAMETERS,
        }
    }

    /// Starting point for the solver
    pub fn default_parameters(&self) -> Vec<f64> {
        match self {
            CpModelKind::TwoParameter => vec![300.0, 20000.0],
            CpModelKind::ThreeParameter => vec![300.0, 20000.0, 1000.0],
            CpModelKind::Exponential => vec![300.0, 1000.0, 300.0],
            CpModelKind::Omni => vec![300.0, 1000.0, 20000.0, 50.0],
            CpModelKind::Extended5 | CpModelKind::Extended7 => EXTENDED_DEFAULTS.to_vec(),
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, CpModelKind::Extended5 | CpModelKind::Extended7)
    }
}

impl fmt::Display for CpModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CpModelKind {
    type Err = SweatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "2-parameter" | "2-parameter-non-linear" | "two-parameter" => Ok(CpModelKind::TwoParameter),
            "3-parameter" | "3-parameter-non-linear" | "three-parameter" => Ok(CpModelKind::ThreeParameter),
            "exponential" => Ok(CpModelKind::Exponential),
            "omni" | "omni-domain" => Ok(CpModelKind::Omni),
            "extended-5-3" | "extended-5" | "extended" => Ok(CpModelKind::Extended5),
            "extended-7-3" | "extended-7" => Ok(CpModelKind::Extended7),
            other => Err(SweatError::InvalidConfiguration(format!(
                "Unknown critical power model '{}'",
                other
            ))),
        }
    }
}

fn extended_guard(value: f64) -> f64 {
    if !value.is_finite() || value > EXTENDED_MAX_POWER || value < EXTENDED_MIN_POWER {
        0.0
    } else {
        value
    }
}

/// Evaluate a model at one duration from positional parameters
pub fn predict_point(kind: CpModelKind, params: &[f64], t: f64, tcp_max: f64) -> f64 {
    match kind {
        CpModelKind::TwoParameter => {
            let (cp, w_prime) = (params[0], params[1]);
            cp + w_prime / t
        }
        CpModelKind::ThreeParameter => {
            let (cp, w_prime, p_max) = (params[0], params[1], params[2]);
            w_prime / (t + w_prime / (p_max - cp)) + cp
        }
        CpModelKind::Exponential => {
            let (cp, p_max, tau) = (params[0], params[1], params[2]);
            (p_max - cp) * (-t / tau).exp() + cp
        }
        CpModelKind::Omni => {
            let (cp, p_max, w_prime, a) = (params[0], params[1], params[2], params[3]);
            let power = w_prime / t * (1.0 - (-t * (p_max - cp) / w_prime).exp()) + cp;
            if t <= tcp_max {
                power
            } else {
                power - a * (t / tcp_max).ln()
            }
        }
        CpModelKind::Extended5 => {
            let [pa, pa_decay, cp, cp_delay, cp_decay, cp_decay_delay, tau, tau_delay] = extended(params);
            let anaerobic = pa * (1.20 - 0.20 * (-t).exp()) * (pa_decay * t).exp();
            let aerobic = cp
                * (1.0 - (cp_delay * t).exp())
                * (1.0 + cp_decay * (cp_decay_delay / t).exp())
                * (1.0 - (tau_delay * t).exp())
                * (1.0 + tau / t);
            extended_guard(anaerobic + aerobic)
        }
        CpModelKind::Extended7 => {
            let [pa, pa_decay, cp, cp_delay, cp_decay, cp_decay_delay, tau, tau_delay] = extended(params);
            let anaerobic = pa * (pa_decay.exp() * t.powf(pa));
            let aerobic = cp
                * (1.0 - (tau_delay * t).exp())
                * (1.0 - (cp_delay * t).exp())
                * (1.0 + cp_decay * (cp_decay_delay / t).exp())
                * (1.0 + tau / t);
            extended_guard(anaerobic + aerobic)
        }
    }
}

fn extended(params: &[f64]) -> [f64; 8] {
    let mut values = [0.0; 8];
    values.copy_from_slice(&params[..8]);
    values
}

/// Evaluate a model from named parameters
///
/// Omni reads `tcp_max` from the map when present.
pub fn predict(kind: CpModelKind, params: &BTreeMap<String, f64>, durations: &[f64]) -> Result<Vec<f64>> {
    let positional = kind
        .parameter_names()
        .iter()
        .map(|name| {
            params
                .get(*name)
                .copied()
                .ok_or_else(|| SweatError::missing(*name, format!("{} prediction", kind)))
        })
        .collect::<Result<Vec<f64>>>()?;
    let tcp_max = params.get("tcp_max").copied().unwrap_or(DEFAULT_TCP_MAX);

    Ok(durations
        .iter()
        .map(|&t| predict_point(kind, &positional, t, tcp_max))
        .collect())
}

/// Critical power fitting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriticalPowerConfig {
    pub default_model: CpModelKind,

    /// Omni-domain model `tcp_max` in seconds (held fixed during fits)
    pub tcp_max: f64,
}

impl Default for CriticalPowerConfig {
    fn default() -> Self {
        Self {
            default_model: CpModelKind::TwoParameter,
            tcp_max: DEFAULT_TCP_MAX,
        }
    }
}

/// A fitted power-duration model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedModel {
    pub kind: CpModelKind,

    /// Fitted parameters by name (omni also carries its fixed `tcp_max`)
    pub parameters: BTreeMap<String, f64>,

    /// Sum of squared residuals at the solution
    pub cost: f64,

    pub iterations: usize,

    /// Number of `(duration, power)` pairs used in the fit
    pub samples: usize,
}

impl FittedModel {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    /// Predicted power at each duration
    pub fn predict(&self, durations: &[f64]) -> Result<Vec<f64>> {
        predict(self.kind, &self.parameters, durations)
    }

    /// Root mean squared error of the fit
    pub fn rmse(&self) -> f64 {
        if self.samples == 0 {
            return f64::NAN;
        }
        (self.cost / self.samples as f64).sqrt()
    }
}

/// Power-duration model fitter
pub struct CriticalPowerFitter {
    config: CriticalPowerConfig,
    solver: SolverConfig,
}

impl CriticalPowerFitter {
    pub fn new() -> Self {
        Self::with_config(CriticalPowerConfig::default(), SolverConfig::default())
    }

    pub fn with_config(config: CriticalPowerConfig, solver: SolverConfig) -> Self {
        Self { config, solver }
    }

    /// Fit `kind` to `(duration, power)` pairs from its default starting point
    pub fn fit(&self, durations: &[f64], powers: &[f64], kind: CpModelKind) -> Result<FittedModel> {
        self.fit_with_initial(durations, powers, kind, &BTreeMap::new())
    }

    /// Fit with some starting values overridden by name
    pub fn fit_with_initial(
        &self,
        durations: &[f64],
        powers: &[f64],
        kind: CpModelKind,
        initial: &BTreeMap<String, f64>,
    ) -> Result<FittedModel> {
        if durations.len() != powers.len() {
            return Err(SweatError::InvalidConfiguration(format!(
                "Got {} durations but {} powers",
                durations.len(),
                powers.len()
            )));
        }
        if let Some(unknown) = initial
            .keys()
            .find(|name| !kind.parameter_names().contains(&name.as_str()))
        {
            return Err(SweatError::InvalidConfiguration(format!(
                "'{}' is not a parameter of the {} model",
                unknown, kind
            )));
        }
        if durations.iter().any(|&t| !(t > 0.0 && t.is_finite())) {
            return Err(SweatError::divergence(
                kind.name(),
                "durations must be positive and finite",
            ));
        }

        // Gaps in the observed power carry no information
        let (times, observed): (Vec<f64>, Vec<f64>) = durations
            .iter()
            .zip(powers)
            .filter(|(_, p)| p.is_finite())
            .map(|(&t, &p)| (t, p))
            .unzip();

        let start: Vec<f64> = kind
            .parameter_names()
            .iter()
            .zip(kind.default_parameters())
            .map(|(name, default)| initial.get(*name).copied().unwrap_or(default))
            .collect();

        let tcp_max = self.config.tcp_max;

        tracing::debug!(model = %kind, samples = times.len(), "fitting critical power model");

        let residuals = |params: &[f64]| -> Vec<f64> {
            times
                .iter()
                .zip(&observed)
                .map(|(&t, &y)| predict_point(kind, params, t, tcp_max) - y)
                .collect()
        };

        let minimum = optimize::levenberg_marquardt(residuals, &start, &self.solver).map_err(|failure| {
            tracing::warn!(model = %kind, %failure, "critical power fit did not converge");
            SweatError::divergence(kind.name(), failure.to_string())
        })?;

        if minimum.params.iter().any(|p| !p.is_finite()) {
            return Err(SweatError::divergence(kind.name(), "non-finite parameters"));
        }
        if kind.is_extended() {
            // A curve that is mostly clamped to zero fits nothing
            let clamped = times
                .iter()
                .filter(|&&t| predict_point(kind, &minimum.params, t, tcp_max) == 0.0)
                .count();
            if clamped * 2 > times.len() {
                return Err(SweatError::divergence(
                    kind.name(),
                    format!("{} of {} predictions fall outside the plausible power range", clamped, times.len()),
                ));
            }
        }

        let mut parameters: BTreeMap<String, f64> = kind
            .parameter_names()
            .iter()
            .map(|name| name.to_string())
            .zip(minimum.params)
            .collect();
        if kind == CpModelKind::Omni {
            parameters.insert("tcp_max".to_string(), tcp_max);
        }

        tracing::debug!(
            model = %kind,
            cost = minimum.cost,
            iterations = minimum.iterations,
            "critical power model fitted"
        );

        Ok(FittedModel {
            kind,
            parameters,
            cost: minimum.cost,
            iterations: minimum.iterations,
            samples: times.len(),
        })
    }

    /// Fit against a mean-max curve (entry `i` is the best power for `i + 1` s)
    ///
    /// Extended models only see the first 90 minutes of the curve.
    pub fn fit_mean_max(&self, mean_max: &[f64], kind: CpModelKind) -> Result<FittedModel> {
        let curve = if kind.is_extended() {
            &mean_max[..mean_max.len().min(EXTENDED_MODEL_MAX_SAMPLES)]
        } else {
            mean_max
        };
        let durations: Vec<f64> = (1..=curve.len()).map(|t| t as f64).collect();
        self.fit(&durations, curve, kind)
    }

    /// Fit several models concurrently against the same mean-max curve
    pub fn fit_mean_max_many(
        &self,
        mean_max: &[f64],
        kinds: &[CpModelKind],
    ) -> Vec<(CpModelKind, Result<FittedModel>)> {
        kinds
            .par_iter()
            .map(|&kind| (kind, self.fit_mean_max(mean_max, kind)))
            .collect()
    }
}

impl Default for CriticalPowerFitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fit `kind` to `(duration, power)` pairs with default settings
pub fn fit_critical_power_model(
    durations: &[f64],
    powers: &[f64],
    kind: CpModelKind,
) -> Result<BTreeMap<String, f64>> {
    Ok(CriticalPowerFitter::new().fit(durations, powers, kind)?.parameters)
}
