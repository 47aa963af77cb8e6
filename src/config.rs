use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PudError, Result};
use crate::geometry::Crs;
use crate::join::BoundaryPolicy;
use crate::pud::DateRange;
use crate::traits::MergeKind;

/// Everything a pipeline run needs. Loaded from TOML, or assembled by the CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Photo record table (CSV)
    pub records: PathBuf,

    /// Gridded area of interest (GeoJSON polygons)
    pub grid: PathBuf,

    /// Grid property holding the cell identifier
    pub fid_column: String,

    /// Optional area of interest the records are clipped to first
    #[serde(default)]
    pub mask: Option<PathBuf>,

    /// Where the PUD table is written
    pub output: PathBuf,

    /// Optional GeoJSON dump of the deduplicated observations
    #[serde(default)]
    pub observations_output: Option<PathBuf>,

    /// CRS of the latitude/longitude columns
    #[serde(default = "default_source_crs")]
    pub source_crs: String,

    /// Overrides the CRS declared by the grid file
    #[serde(default)]
    pub grid_crs: Option<String>,

    /// Overrides the CRS declared by the mask file
    #[serde(default)]
    pub mask_crs: Option<String>,

    #[serde(default)]
    pub boundary: BoundaryPolicy,

    #[serde(default)]
    pub merge: MergeKind,

    /// Report every day of this range for every cell
    #[serde(default)]
    pub date_range: Option<DateRange>,

    #[serde(default)]
    pub drop_tags: Vec<String>,

    #[serde(default)]
    pub drop_titles: Vec<String>,

    #[serde(default)]
    pub drop_owners: Vec<String>,

    /// When false an empty PUD table fails the run
    #[serde(default = "default_allow_empty")]
    pub allow_empty: bool,
}

fn default_source_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_allow_empty() -> bool {
    true
}

impl PipelineConfig {
    /// A config with defaults for everything but the required paths.
    pub fn new(
        records: impl Into<PathBuf>,
        grid: impl Into<PathBuf>,
        fid_column: impl Into<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            records: records.into(),
            grid: grid.into(),
            fid_column: fid_column.into(),
            mask: None,
            output: output.into(),
            observations_output: None,
            source_crs: default_source_crs(),
            grid_crs: None,
            mask_crs: None,
            boundary: BoundaryPolicy::default(),
            merge: MergeKind::default(),
            date_range: None,
            drop_tags: Vec::new(),
            drop_titles: Vec::new(),
            drop_owners: Vec::new(),
            allow_empty: default_allow_empty(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PudError::load(path, e))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        tracing::debug!("loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fid_column.trim().is_empty() {
            return Err(PudError::Schema("fid_column must not be empty".to_string()));
        }
        if let Some(range) = self.date_range {
            DateRange::new(range.start, range.end)?;
        }
        Ok(())
    }

    pub fn source_crs(&self) -> Crs {
        Crs::new(&self.source_crs)
    }

    pub fn grid_crs(&self) -> Option<Crs> {
        self.grid_crs.as_deref().map(Crs::new)
    }

    pub fn mask_crs(&self) -> Option<Crs> {
        self.mask_crs.as_deref().map(Crs::new)
    }
}
