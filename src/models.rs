use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SweatError};
use crate::heart_rate_model::{HeartRateModel, HeartRateModelFitter};
use crate::optimize::SolverConfig;
use crate::power::{PowerAnalyzer, WapAlgorithm};
use crate::w_prime_balance::{WPrimeBalance, WPrimeBalanceCalculator, WPrimeBalanceConfig};
use crate::zones::{ZoneCalculator, ZoneSpec};

/// A located value in a stream, e.g. the end index and mean of a best interval
///
/// `index` is `None` (and `value` NaN) for the "nothing found" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct DataPoint {
    pub index: Option<usize>,
    pub value: f64,
}

impl DataPoint {
    pub fn new(index: usize, value: f64) -> Self {
        Self {
            index: Some(index),
            value,
        }
    }

    /// The `(NaN, NaN)` sentinel
    pub fn missing() -> Self {
        Self {
            index: None,
            value: f64::NAN,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.index.is_none()
    }
}

/// Athlete thresholds used by the workout computations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Athlete {
    /// Display name
    pub name: Option<String>,

    /// Body weight in kilograms
    pub weight: Option<f64>,

    /// Functional Threshold Power (watts)
    pub ftp: Option<f64>,

    /// Critical Power (watts)
    pub cp: Option<f64>,

    /// Anaerobic work capacity above CP (joules)
    pub w_prime: Option<f64>,

    /// Lactate Threshold Heart Rate (bpm)
    pub lthr: Option<f64>,
}

/// Athlete threshold identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    Weight,
    Ftp,
    Cp,
    WPrime,
    Lthr,
}

impl Threshold {
    pub fn name(&self) -> &'static str {
        match self {
            Threshold::Weight => "weight",
            Threshold::Ftp => "ftp",
            Threshold::Cp => "cp",
            Threshold::WPrime => "w_prime",
            Threshold::Lthr => "lthr",
        }
    }
}

impl Athlete {
    pub fn get(&self, threshold: Threshold) -> Option<f64> {
        match threshold {
            Threshold::Weight => self.weight,
            Threshold::Ftp => self.ftp,
            Threshold::Cp => self.cp,
            Threshold::WPrime => self.w_prime,
            Threshold::Lthr => self.lthr,
        }
    }

    /// Take every threshold that is unset here from `other`
    pub fn fill_missing(&mut self, other: &Athlete) {
        if self.name.is_none() {
            self.name = other.name.clone();
        }
        self.weight = self.weight.or(other.weight);
        self.ftp = self.ftp.or(other.ftp);
        self.cp = self.cp.or(other.cp);
        self.w_prime = self.w_prime.or(other.w_prime);
        self.lthr = self.lthr.or(other.lthr);
    }

    /// Threshold value or a `MissingParameter` error naming `operation`
    pub fn require(&self, threshold: Threshold, operation: &str) -> Result<f64> {
        self.get(threshold)
            .ok_or_else(|| SweatError::missing(threshold.name(), operation))
    }
}

/// Named 1 Hz sample streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Power,
    HeartRate,
    Cadence,
    Speed,
}

impl StreamKind {
    pub const ALL: [StreamKind; 4] = [
        StreamKind::Power,
        StreamKind::HeartRate,
        StreamKind::Cadence,
        StreamKind::Speed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Power => "power",
            StreamKind::HeartRate => "heartrate",
            StreamKind::Cadence => "cadence",
            StreamKind::Speed => "speed",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = SweatError;

    /// Accepts the canonical names and the common column aliases
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "power" | "watts" => Ok(StreamKind::Power),
            "heartrate" | "heart_rate" | "hr" => Ok(StreamKind::HeartRate),
            "cadence" | "rpm" => Ok(StreamKind::Cadence),
            "speed" | "velocity" => Ok(StreamKind::Speed),
            other => Err(SweatError::InvalidConfiguration(format!(
                "Unknown stream '{}'",
                other
            ))),
        }
    }
}

/// A recorded workout: equal-length streams on a shared 1 s time axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    streams: BTreeMap<StreamKind, Vec<f64>>,

    #[serde(default)]
    pub athlete: Athlete,
}

impl Workout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_athlete(mut self, athlete: Athlete) -> Self {
        self.athlete = athlete;
        self
    }

    /// Builder form of [`Workout::insert_stream`]
    pub fn with_stream(mut self, kind: StreamKind, samples: Vec<f64>) -> Result<Self> {
        self.insert_stream(kind, samples)?;
        Ok(self)
    }

    /// Add or replace a stream; its length must match the existing streams
    pub fn insert_stream(&mut self, kind: StreamKind, samples: Vec<f64>) -> Result<()> {
        if let Some((other, existing)) = self.streams.iter().find(|(k, _)| **k != kind) {
            if existing.len() != samples.len() {
                return Err(SweatError::InvalidConfiguration(format!(
                    "Stream '{}' has {} samples but '{}' has {}",
                    kind,
                    samples.len(),
                    other,
                    existing.len()
                )));
            }
        }

        self.streams.insert(kind, samples);
        Ok(())
    }

    pub fn stream(&self, kind: StreamKind) -> Option<&[f64]> {
        self.streams.get(&kind).map(Vec::as_slice)
    }

    pub fn stream_kinds(&self) -> impl Iterator<Item = StreamKind> + '_ {
        self.streams.keys().copied()
    }

    /// Number of samples (seconds) in the workout
    pub fn len(&self) -> usize {
        self.streams.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn require_stream(&self, kind: StreamKind, operation: &str) -> Result<&[f64]> {
        self.stream(kind)
            .ok_or_else(|| SweatError::missing(kind.name(), operation))
    }

    pub fn compute_mean_max_power(&self, monotonic: bool) -> Result<Vec<f64>> {
        let power = self.require_stream(StreamKind::Power, "mean_max_power")?;
        Ok(PowerAnalyzer::mean_max(power, monotonic))
    }

    pub fn compute_mean_max_bests(&self, duration: usize, count: usize) -> Result<Vec<DataPoint>> {
        let power = self.require_stream(StreamKind::Power, "mean_max_bests")?;
        PowerAnalyzer::multiple_best_intervals(power, duration, count)
    }

    pub fn compute_weighted_average_power(&self, algorithm: WapAlgorithm) -> Result<f64> {
        let power = self.require_stream(StreamKind::Power, "weighted_average_power")?;
        PowerAnalyzer::weighted_average_power(power, None, algorithm, 0.0)
    }

    pub fn compute_power_per_kg(&self) -> Result<Vec<f64>> {
        let power = self.require_stream(StreamKind::Power, "power_per_kg")?;
        let weight = self.athlete.require(Threshold::Weight, "power_per_kg")?;
        Ok(PowerAnalyzer::wpk(power, weight))
    }

    /// Intensity factor and stress score over the whole workout, using FTP
    pub fn compute_stress_score(&self, algorithm: WapAlgorithm) -> Result<(f64, f64)> {
        let ftp = self.athlete.require(Threshold::Ftp, "stress_score")?;
        let wap = self.compute_weighted_average_power(algorithm)?;
        Ok((
            PowerAnalyzer::relative_intensity(wap, ftp),
            PowerAnalyzer::stress_score(wap, ftp, self.len() as f64),
        ))
    }

    pub fn compute_w_prime_balance(&self, config: &WPrimeBalanceConfig) -> Result<WPrimeBalance> {
        let operation = "w_prime_balance";
        let power = self.require_stream(StreamKind::Power, operation)?;
        let cp = self.athlete.require(Threshold::Cp, operation)?;
        let w_prime = self.athlete.require(Threshold::WPrime, operation)?;

        WPrimeBalanceCalculator::with_config(config.clone()).calculate(power, cp, w_prime)
    }

    pub fn compute_heartrate_model(&self, solver: &SolverConfig) -> Result<HeartRateModel> {
        self.compute_heartrate_model_with(&HeartRateModelFitter::with_solver(solver.clone()))
    }

    /// Fit the heart rate model with a preconfigured fitter
    pub fn compute_heartrate_model_with(&self, fitter: &HeartRateModelFitter) -> Result<HeartRateModel> {
        let operation = "heartrate_model";
        let heartrate = self.require_stream(StreamKind::HeartRate, operation)?;
        let power = self.require_stream(StreamKind::Power, operation)?;

        fitter.fit(heartrate, power)
    }

    pub fn compute_time_in_power_zones(&self) -> Result<Vec<usize>> {
        let power = self.require_stream(StreamKind::Power, "time_in_power_zones")?;
        let ftp = self.athlete.require(Threshold::Ftp, "time_in_power_zones")?;
        ZoneCalculator::time_in_zones(power, &ZoneSpec::Ftp(ftp))
    }

    pub fn compute_time_in_heart_rate_zones(&self) -> Result<Vec<usize>> {
        let heartrate = self.require_stream(StreamKind::HeartRate, "time_in_heart_rate_zones")?;
        let lthr = self.athlete.require(Threshold::Lthr, "time_in_heart_rate_zones")?;
        ZoneCalculator::time_in_zones(heartrate, &ZoneSpec::Lthr(lthr))
    }
}
