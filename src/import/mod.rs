use crate::error::{Result, SweatError};
use crate::models::Workout;
use std::path::Path;

pub mod csv;
pub mod json;

/// Trait for loading workout streams from different file formats
pub trait ImportFormat {
    /// Check if this importer can handle the given file
    fn can_import(&self, file_path: &Path) -> bool;

    /// Load the workout stored in the file
    fn import_file(&self, file_path: &Path) -> Result<Workout>;

    /// Get the format name for this importer
    fn get_format_name(&self) -> &'static str;
}

/// Manager for coordinating different import formats
pub struct ImportManager {
    importers: Vec<Box<dyn ImportFormat>>,
}

impl ImportManager {
    /// Create a new import manager with all available importers
    pub fn new() -> Self {
        let importers: Vec<Box<dyn ImportFormat>> = vec![
            Box::new(csv::CsvImporter::new()),
            Box::new(json::JsonImporter::new()),
        ];

        Self { importers }
    }

    /// Import a single file, auto-detecting the format
    pub fn import_file(&self, file_path: &Path) -> Result<Workout> {
        let importer = self
            .importers
            .iter()
            .find(|importer| importer.can_import(file_path))
            .ok_or_else(|| SweatError::Import {
                path: file_path.to_path_buf(),
                reason: "no importer for this file type (expected .csv or .json)".to_string(),
            })?;

        tracing::info!(
            file = %file_path.display(),
            format = importer.get_format_name(),
            "importing workout streams"
        );

        let workout = importer.import_file(file_path)?;

        tracing::debug!(
            samples = workout.len(),
            streams = ?workout.stream_kinds().collect::<Vec<_>>(),
            "import complete"
        );

        Ok(workout)
    }

    /// Check if this manager can import a given file
    pub fn can_import_file(&self, file_path: &Path) -> bool {
        self.importers.iter().any(|importer| importer.can_import(file_path))
    }
}

impl Default for ImportManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Case-insensitive extension check shared by the importers
pub(crate) fn has_extension(file_path: &Path, extension: &str) -> bool {
    file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
}
