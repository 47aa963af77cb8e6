use crate::config::PipelineConfig;
use crate::error::Result;
use crate::geometry::{GeoTable, Mask};
use crate::grid::Grid;
use crate::join::join;
use crate::photo_user::{photo_user, PhotoUserObservation};
use crate::pud::{aggregate_with_days, PudTable};
use crate::record::RecordTable;

/// Load, clean, clip, deduplicate, join and aggregate, then write the table.
///
/// Each stage hands a new table to the next. A failing stage aborts the run
/// and the error names the stage.
pub fn run(config: &PipelineConfig) -> Result<PudTable> {
    config.validate()?;
    let start = std::time::Instant::now();

    let records = RecordTable::load(&config.records).map_err(|e| e.in_stage("load records"))?;
    let records = clean(&records, config);

    let grid = Grid::load(&config.grid, config.grid_crs()).map_err(|e| e.in_stage("load grid"))?;
    let pud = compute(&records, &grid, config)?;

    pud.save_csv(&config.output)
        .map_err(|e| e.in_stage("export"))?;
    tracing::info!("done in {:?}", start.elapsed());
    Ok(pud)
}

/// The pipeline past loading, for callers that already hold the tables.
pub fn compute(records: &RecordTable, grid: &Grid, config: &PipelineConfig) -> Result<PudTable> {
    let records = match &config.mask {
        Some(path) => {
            let mask = Mask::load(path, config.mask_crs()).map_err(|e| e.in_stage("load mask"))?;
            let bound = GeoTable::bind(records.records().to_vec(), config.source_crs());
            let clipped = bound.clip(&mask).map_err(|e| e.in_stage("clip"))?;
            RecordTable::new(clipped.into_data())
        }
        None => records.clone(),
    };

    let observations = photo_user(&records, &config.merge);
    // days with observations outside the grid still get their zero rows
    let observed_days = observations.days();
    let observations = GeoTable::bind(observations.into_rows(), config.source_crs());

    if let Some(path) = &config.observations_output {
        observations
            .save_geojson(path, PhotoUserObservation::properties)
            .map_err(|e| e.in_stage("export"))?;
    }

    let joined = join(&observations, grid, config.boundary).map_err(|e| e.in_stage("grid join"))?;

    let extra_days = observed_days
        .into_iter()
        .chain(config.date_range.iter().flat_map(|r| r.days()));
    let pud = aggregate_with_days(&joined, &config.fid_column, extra_days)
        .map_err(|e| e.in_stage("aggregate"))?;

    if config.allow_empty {
        Ok(pud)
    } else {
        pud.ensure_non_empty()
    }
}

/// Apply the configured owner, tag and title removals.
pub fn clean(records: &RecordTable, config: &PipelineConfig) -> RecordTable {
    let mut table = records.clone();
    if !config.drop_owners.is_empty() {
        table = table.drop_owners(&config.drop_owners);
    }
    if !config.drop_tags.is_empty() {
        table = table.drop_tags(&config.drop_tags);
    }
    if !config.drop_titles.is_empty() {
        table = table.drop_titles(&config.drop_titles);
    }
    if table.len() != records.len() {
        tracing::info!("removed {} records", records.len() - table.len());
    }
    table
}
