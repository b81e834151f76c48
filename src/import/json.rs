use serde_json::Value;
use std::fs;
use std::path::Path;

use crate::error::{Result, SweatError};
use crate::import::{has_extension, ImportFormat};
use crate::models::{Athlete, StreamKind, Workout};

/// JSON importer
///
/// Expects an object of named sample arrays, e.g.
/// `{"power": [200, 210, null], "heartrate": [120, 121, 122]}`, with an
/// optional `"athlete"` object holding thresholds. `null` entries are gaps.
pub struct JsonImporter;

impl JsonImporter {
    pub fn new() -> Self {
        Self
    }

    fn import_error(file_path: &Path, reason: impl Into<String>) -> SweatError {
        SweatError::Import {
            path: file_path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn parse_samples(file_path: &Path, name: &str, values: &[Value]) -> Result<Vec<f64>> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| match value {
                Value::Null => Ok(f64::NAN),
                Value::Number(n) => n
                    .as_f64()
                    .ok_or_else(|| Self::import_error(file_path, format!("{}[{}] is out of range", name, i))),
                other => Err(Self::import_error(
                    file_path,
                    format!("{}[{}] is not a number: {}", name, i, other),
                )),
            })
            .collect()
    }

    /// Build a workout from an already parsed document
    pub fn workout_from_value(&self, file_path: &Path, document: Value) -> Result<Workout> {
        let Value::Object(fields) = document else {
            return Err(Self::import_error(file_path, "top level must be an object"));
        };

        let mut workout = Workout::new();

        for (name, value) in fields {
            if name == "athlete" {
                let athlete: Athlete = serde_json::from_value(value)?;
                workout.athlete = athlete;
                continue;
            }

            let Ok(kind) = name.parse::<StreamKind>() else {
                tracing::debug!(field = %name, "ignoring JSON field");
                continue;
            };

            let Value::Array(values) = value else {
                return Err(Self::import_error(file_path, format!("'{}' must be an array", name)));
            };

            let samples = Self::parse_samples(file_path, &name, &values)?;
            workout.insert_stream(kind, samples)?;
        }

        if workout.stream_kinds().next().is_none() {
            return Err(Self::import_error(
                file_path,
                "no power, heart rate, cadence or speed array found",
            ));
        }

        Ok(workout)
    }
}

impl ImportFormat for JsonImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "json")
    }

    fn import_file(&self, file_path: &Path) -> Result<Workout> {
        let content = fs::read_to_string(file_path)?;
        let document: Value = serde_json::from_str(&content)?;
        self.workout_from_value(file_path, document)
    }

    fn get_format_name(&self) -> &'static str {
        "JSON"
    }
}

impl Default for JsonImporter {
    fn default() -> Self {
        Self::new()
    }
}
