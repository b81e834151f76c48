//! Heart rate response model
//!
//! Heart rate relaxes toward a power-driven steady state with separate rise
//! and fall time constants. A drift term inflates the effective power as work
//! accumulates. The six parameters are fitted with Nelder–Mead because the
//! `min(hr_max, ...)` cap and the rise/fall switch make the residuals
//! non-smooth.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Result, SweatError};
use crate::optimize::{self, SolverConfig};

/// Model parameters; `Default` gives the solver's starting point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateModelParams {
    /// Resting heart rate (bpm)
    pub hr_rest: f64,
    /// Heart rate ceiling (bpm)
    pub hr_max: f64,
    /// Heart rate gain per watt (bpm/W)
    pub dhr: f64,
    /// Time constant while effective power rises (s)
    pub tau_rise: f64,
    /// Time constant while effective power falls or holds (s)
    pub tau_fall: f64,
    /// Effective power gain per joule of accumulated work
    pub hr_drift: f64,
}

impl Default for HeartRateModelParams {
    fn default() -> Self {
        Self {
            hr_rest: 75.0,
            hr_max: 200.0,
            dhr: 0.30,
            tau_rise: 24.0,
            tau_fall: 30.0,
            hr_drift: 3e-5,
        }
    }
}

impl HeartRateModelParams {
    pub const NAMES: [&'static str; 6] = ["hr_rest", "hr_max", "dhr", "tau_rise", "tau_fall", "hr_drift"];

    fn to_vec(self) -> Vec<f64> {
        vec![
            self.hr_rest,
            self.hr_max,
            self.dhr,
            self.tau_rise,
            self.tau_fall,
            self.hr_drift,
        ]
    }

    fn from_slice(values: &[f64]) -> Self {
        Self {
            hr_rest: values[0],
            hr_max: values[1],
            dhr: values[2],
            tau_rise: values[3],
            tau_fall: values[4],
            hr_drift: values[5],
        }
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        Self::NAMES
            .iter()
            .map(|name| name.to_string())
            .zip(self.to_vec())
            .collect()
    }
}

/// Simulate heart rate for a power stream
///
/// Gaps in the power stream count as zero power.
pub fn predict(params: &HeartRateModelParams, power: &[f64]) -> Vec<f64> {
    let mut accumulated = 0.0;
    let effective: Vec<f64> = power
        .iter()
        .map(|&p| {
            let p = if p.is_nan() { 0.0 } else { p };
            accumulated += p;
            p + accumulated * params.hr_drift
        })
        .collect();

    let mut heart_rate = params.hr_rest;
    let mut previous_power = None;

    effective
        .iter()
        .map(|&p| {
            let steady_state = params.hr_max.min(p * params.dhr + params.hr_rest);
            let tau = match previous_power {
                Some(previous) if p - previous > 0.0 => params.tau_rise,
                _ => params.tau_fall,
            };
            previous_power = Some(p);

            heart_rate += (steady_state - heart_rate) / tau;
            heart_rate
        })
        .collect()
}

/// A fitted heart rate model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateModel {
    pub params: HeartRateModelParams,

    /// Simulated heart rate with the fitted parameters
    pub predictions: Vec<f64>,

    /// Sum of squared residuals over the observed samples
    pub cost: f64,

    pub evaluations: usize,
}

/// Nelder–Mead fitter for [`HeartRateModelParams`]
pub struct HeartRateModelFitter {
    solver: SolverConfig,
    initial: HeartRateModelParams,
}

impl HeartRateModelFitter {
    pub fn new() -> Self {
        Self::with_solver(SolverConfig::default())
    }

    pub fn with_solver(solver: SolverConfig) -> Self {
        Self {
            solver,
            initial: HeartRateModelParams::default(),
        }
    }

    /// Start the search from `initial` instead of the defaults
    pub fn with_initial(mut self, initial: HeartRateModelParams) -> Self {
        self.initial = initial;
        self
    }

    /// Fit the model to observed heart rate; NaN heart rate samples are ignored
    pub fn fit(&self, heartrate: &[f64], power: &[f64]) -> Result<HeartRateModel> {
        const MODEL: &str = "heart rate";

        if heartrate.len() != power.len() {
            return Err(SweatError::InvalidConfiguration(format!(
                "Heart rate has {} samples but power has {}",
                heartrate.len(),
                power.len()
            )));
        }

        let observed = heartrate.iter().filter(|h| !h.is_nan()).count();
        if observed < HeartRateModelParams::NAMES.len() {
            return Err(SweatError::divergence(
                MODEL,
                format!("{} heart rate samples cannot determine 6 parameters", observed),
            ));
        }

        let objective = |values: &[f64]| -> f64 {
            let params = HeartRateModelParams::from_slice(values);
            predict(&params, power)
                .iter()
                .zip(heartrate)
                .filter(|(_, h)| !h.is_nan())
                .map(|(p, h)| (h - p).powi(2))
                .sum()
        };

        tracing::debug!(samples = heartrate.len(), observed, "fitting heart rate model");

        let minimum = optimize::nelder_mead(objective, &self.initial.to_vec(), &self.solver).map_err(|failure| {
            tracing::warn!(%failure, "heart rate model fit did not converge");
            SweatError::divergence(MODEL, failure.to_string())
        })?;

        if !minimum.cost.is_finite() {
            return Err(SweatError::divergence(MODEL, "non-finite residuals"));
        }

        let params = HeartRateModelParams::from_slice(&minimum.params);
        tracing::debug!(
            cost = minimum.cost,
            evaluations = minimum.evaluations,
            "heart rate model fitted"
        );

        Ok(HeartRateModel {
            params,
            predictions: predict(&params, power),
            cost: minimum.cost,
            evaluations: minimum.evaluations,
        })
    }
}

impl Default for HeartRateModelFitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Fit with default settings, returning named parameters and predictions
pub fn fit_heart_rate_model(heartrate: &[f64], power: &[f64]) -> Result<(BTreeMap<String, f64>, Vec<f64>)> {
    let model = HeartRateModelFitter::new().fit(heartrate, power)?;
    Ok((model.params.to_map(), model.predictions))
}
