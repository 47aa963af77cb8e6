use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PudError>;

#[derive(Debug, Error)]
pub enum PudError {
    /// The source could not be read or is not a valid table/vector file.
    #[error("failed to load {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// A required column or identifier field is missing.
    #[error("schema error: {0}")]
    Schema(String),

    /// CRS metadata is missing or unusable, or a reprojection failed.
    #[error("crs error: {0}")]
    Crs(String),

    /// A stage produced no rows. Callers may treat this as a warning.
    #[error("{0} produced no rows")]
    EmptyResult(&'static str),

    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<PudError>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    GeoJson(#[from] geojson::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),
}

impl PudError {
    pub fn load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        PudError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Tag the error with the pipeline stage it came from.
    pub fn in_stage(self, stage: &'static str) -> Self {
        PudError::Stage {
            stage,
            source: Box::new(self),
        }
    }
}
