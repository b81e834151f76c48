use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Result, SweatError};
use crate::import::{has_extension, ImportFormat};
use crate::models::{StreamKind, Workout};

/// Column roles understood by the CSV importer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Time,
    Stream(StreamKind),
}

/// CSV importer with flexible column mapping
///
/// One row per sample. Without a time column rows are taken to be one second
/// apart; with one, rows are placed at their elapsed second and skipped
/// seconds become gaps. Empty cells are gaps too.
pub struct CsvImporter {
    column_mapping: HashMap<String, Column>,
}

impl CsvImporter {
    pub fn new() -> Self {
        let mut column_mapping = HashMap::new();

        Self::add_mapping(
            &mut column_mapping,
            Column::Time,
            &["time", "timestamp", "elapsed_time", "elapsed", "seconds", "secs"],
        );
        Self::add_mapping(
            &mut column_mapping,
            Column::Stream(StreamKind::Power),
            &["power", "watts", "power_watts"],
        );
        Self::add_mapping(
            &mut column_mapping,
            Column::Stream(StreamKind::HeartRate),
            &["heartrate", "heart_rate", "hr", "bpm"],
        );
        Self::add_mapping(
            &mut column_mapping,
            Column::Stream(StreamKind::Cadence),
            &["cadence", "rpm", "spm"],
        );
        Self::add_mapping(
            &mut column_mapping,
            Column::Stream(StreamKind::Speed),
            &["speed", "velocity", "speed_ms"],
        );

        Self { column_mapping }
    }

    fn add_mapping(mapping: &mut HashMap<String, Column>, column: Column, variations: &[&str]) {
        for variation in variations {
            mapping.insert(variation.to_lowercase(), column);
        }
    }

    fn normalize_column_name(&self, name: &str) -> Option<Column> {
        let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
        self.column_mapping.get(&normalized).copied()
    }

    fn import_error(file_path: &Path, reason: impl Into<String>) -> SweatError {
        SweatError::Import {
            path: file_path.to_path_buf(),
            reason: reason.into(),
        }
    }

    fn parse_cell(file_path: &Path, row: usize, header: &str, cell: &str) -> Result<f64> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(f64::NAN);
        }
        cell.parse::<f64>().map_err(|_| {
            Self::import_error(
                file_path,
                format!("row {}: '{}' is not a number in column '{}'", row, cell, header),
            )
        })
    }
}

impl ImportFormat for CsvImporter {
    fn can_import(&self, file_path: &Path) -> bool {
        has_extension(file_path, "csv")
    }

    fn import_file(&self, file_path: &Path) -> Result<Workout> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_path(file_path)?;

        let headers = reader.headers()?.clone();

        let mut time_column = None;
        let mut stream_columns: Vec<(usize, StreamKind)> = Vec::new();
        for (index, header) in headers.iter().enumerate() {
            match self.normalize_column_name(header) {
                Some(Column::Time) if time_column.is_none() => time_column = Some(index),
                Some(Column::Stream(kind)) if !stream_columns.iter().any(|(_, k)| *k == kind) => {
                    stream_columns.push((index, kind))
                }
                _ => tracing::debug!(column = header, "ignoring CSV column"),
            }
        }

        if stream_columns.is_empty() {
            return Err(Self::import_error(
                file_path,
                "no power, heart rate, cadence or speed column found",
            ));
        }

        let mut times: Vec<usize> = Vec::new();
        let mut columns: Vec<Vec<f64>> = vec![Vec::new(); stream_columns.len()];

        for (row_index, record) in reader.records().enumerate() {
            let record = record?;
            // Header is line 1
            let row = row_index + 2;

            if let Some(time_index) = time_column {
                let time = Self::parse_cell(file_path, row, &headers[time_index], record.get(time_index).unwrap_or(""))?;
                if !(time.is_finite() && time >= 0.0) {
                    return Err(Self::import_error(file_path, format!("row {}: invalid time", row)));
                }
                times.push(time.round() as usize);
            }

            for (slot, (index, _)) in stream_columns.iter().enumerate() {
                let value = Self::parse_cell(file_path, row, &headers[*index], record.get(*index).unwrap_or(""))?;
                columns[slot].push(value);
            }
        }

        let columns = match time_column {
            Some(_) => place_on_time_axis(file_path, &times, columns)?,
            None => columns,
        };

        let mut workout = Workout::new();
        for ((_, kind), samples) in stream_columns.into_iter().zip(columns) {
            workout.insert_stream(kind, samples)?;
        }

        Ok(workout)
    }

    fn get_format_name(&self) -> &'static str {
        "CSV"
    }
}

/// Spread rows over a regular 1 s axis starting at the first timestamp
fn place_on_time_axis(file_path: &Path, times: &[usize], columns: Vec<Vec<f64>>) -> Result<Vec<Vec<f64>>> {
    let Some(&start) = times.first() else {
        return Ok(columns);
    };

    if times.windows(2).any(|w| w[1] <= w[0]) {
        return Err(CsvImporter::import_error(
            file_path,
            "time column must be strictly increasing",
        ));
    }

    let length = times[times.len() - 1] - start + 1;
    Ok(columns
        .into_iter()
        .map(|values| {
            let mut regular = vec![f64::NAN; length];
            for (&time, value) in times.iter().zip(values) {
                regular[time - start] = value;
            }
            regular
        })
        .collect())
}

impl Default for CsvImporter {
    fn default() -> Self {
        Self::new()
    }
}
