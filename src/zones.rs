use serde::{Deserialize, Serialize};

use crate::error::{Result, SweatError};

/// FTP based 7-zone edges, left edge set just below zero
pub const POWER_ZONES_THRESHOLD: [f64; 8] = [-0.001, 0.55, 0.75, 0.9, 1.05, 1.2, 1.5, 10.0];

pub const POWER_ZONES_DESC: [&str; 7] = [
    "Active Recovery",
    "Endurance",
    "Tempo",
    "Threshold",
    "VO2Max",
    "Anaerobic",
    "Neuromuscular",
];

pub const POWER_ZONES_NAME: [&str; 7] = ["Z1", "Z2", "Z3", "Z4", "Z5", "Z6", "Z7"];

/// LTHR based 5-zone edges, left edge set just below zero
pub const HEART_RATE_ZONES_THRESHOLD: [f64; 6] = [-0.001, 0.68, 0.83, 0.94, 1.05, 10.0];

pub const HEART_RATE_ZONES_DESC: [&str; 5] = [
    "Active Recovery",
    "Endurance",
    "Tempo",
    "Threshold",
    "VO2Max",
];

pub const HEART_RATE_ZONES_NAME: [&str; 5] = ["Z1", "Z2", "Z3", "Z4", "Z5"];

/// How zone edges are derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneSpec {
    /// Explicit absolute bin edges
    Edges(Vec<f64>),
    /// Coggan 7-zone model scaled by FTP
    Ftp(f64),
    /// 5-zone heart rate model scaled by LTHR
    Lthr(f64),
}

impl ZoneSpec {
    /// Build a spec from optional inputs; exactly one must be present
    pub fn from_options(zones: Option<Vec<f64>>, ftp: Option<f64>, lthr: Option<f64>) -> Result<Self> {
        match (zones, ftp, lthr) {
            (Some(edges), None, None) => Ok(ZoneSpec::Edges(edges)),
            (None, Some(ftp), None) => Ok(ZoneSpec::Ftp(ftp)),
            (None, None, Some(lthr)) => Ok(ZoneSpec::Lthr(lthr)),
            (None, None, None) => Err(SweatError::InvalidConfiguration(
                "One of zones, ftp or lthr must be provided".to_string(),
            )),
            _ => Err(SweatError::InvalidConfiguration(
                "Only one of zones, ftp or lthr may be provided".to_string(),
            )),
        }
    }

    /// Absolute bin edges
    pub fn edges(&self) -> Vec<f64> {
        match self {
            ZoneSpec::Edges(edges) => edges.clone(),
            ZoneSpec::Ftp(ftp) => POWER_ZONES_THRESHOLD.iter().map(|e| e * ftp).collect(),
            ZoneSpec::Lthr(lthr) => HEART_RATE_ZONES_THRESHOLD.iter().map(|e| e * lthr).collect(),
        }
    }

    /// Number of zones described by the edges
    pub fn zone_count(&self) -> usize {
        self.edges().len().saturating_sub(1)
    }
}

/// Zone bucketing utilities
pub struct ZoneCalculator;

impl ZoneCalculator {
    /// Bucket every sample into a 1-based zone number
    ///
    /// Zones are half-open on the left, `(edge[i], edge[i+1]]`, so a sample
    /// equal to a zone's right edge belongs to that zone. Samples outside all
    /// zones (or gaps) map to `None`.
    pub fn compute_zones(y: &[f64], spec: &ZoneSpec) -> Result<Vec<Option<u32>>> {
        let labels: Vec<u32> = (1..=spec.zone_count() as u32).collect();
        Self::compute_zones_labeled(y, spec, &labels)
    }

    /// Bucket every sample and map it to a caller-supplied label
    pub fn compute_zones_labeled<T: Clone>(
        y: &[f64],
        spec: &ZoneSpec,
        labels: &[T],
    ) -> Result<Vec<Option<T>>> {
        let edges = Self::validated_edges(spec)?;

        if labels.len() + 1 != edges.len() {
            return Err(SweatError::InvalidConfiguration(format!(
                "Expected {} zone labels for {} edges, got {}",
                edges.len() - 1,
                edges.len(),
                labels.len()
            )));
        }

        Ok(y.iter()
            .map(|&v| Self::zone_index(v, &edges).map(|i| labels[i].clone()))
            .collect())
    }

    /// Seconds spent in each zone, one entry per zone (zeros included)
    pub fn time_in_zones(y: &[f64], spec: &ZoneSpec) -> Result<Vec<usize>> {
        let edges = Self::validated_edges(spec)?;
        let mut counts = vec![0usize; edges.len() - 1];

        for &v in y {
            if let Some(i) = Self::zone_index(v, &edges) {
                counts[i] += 1;
            }
        }

        Ok(counts)
    }

    fn validated_edges(spec: &ZoneSpec) -> Result<Vec<f64>> {
        let edges = spec.edges();

        if edges.len() < 2 {
            return Err(SweatError::InvalidConfiguration(
                "At least two zone edges are required".to_string(),
            ));
        }
        if edges.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(SweatError::InvalidConfiguration(
                "Zone edges must be strictly increasing".to_string(),
            ));
        }

        Ok(edges)
    }

    fn zone_index(value: f64, edges: &[f64]) -> Option<usize> {
        if value.is_nan() {
            return None;
        }
        edges
            .windows(2)
            .position(|w| value > w[0] && value <= w[1])
    }
}
