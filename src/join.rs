use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use geo::{Contains, Intersects, Point};
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;

use crate::error::Result;
use crate::geometry::GeoTable;
use crate::grid::Grid;
use crate::photo_user::PhotoUserObservation;

/// Which points belong to a cell.
///
/// `Intersects` counts points on the cell boundary, so a point on an edge
/// shared by two cells joins both of them and is counted once in each.
/// `Contains` only counts interior points, so a point exactly on an edge
/// joins no cell at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryPolicy {
    #[default]
    Intersects,
    Contains,
}

impl BoundaryPolicy {
    fn accepts(&self, cell: &geo::MultiPolygon<f64>, point: &Point<f64>) -> bool {
        match self {
            BoundaryPolicy::Intersects => point.intersects(cell),
            BoundaryPolicy::Contains => cell.contains(point),
        }
    }
}

/// One cell paired with one observation, or a cell on its own when nothing
/// fell in it (owner, timestamp and date are then None).
#[derive(Debug, Clone, PartialEq)]
pub struct CellDayRecord {
    /// Position of the cell in the grid.
    pub cell: usize,
    pub owner: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
    /// The calendar day of `timestamp`.
    pub date: Option<NaiveDate>,
    /// 0 for an unmatched cell.
    pub photo_count: f64,
}

#[derive(Debug, Clone)]
pub struct CellDayTable<'g> {
    grid: &'g Grid,
    rows: Vec<CellDayRecord>,
}

impl<'g> CellDayTable<'g> {
    pub fn grid(&self) -> &'g Grid {
        self.grid
    }

    pub fn rows(&self) -> &[CellDayRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Calendar days carried by matched rows.
    pub fn days(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().filter_map(|r| r.date).collect()
    }
}

struct CellEnvelope {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for CellEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Left spatial join of the grid against the observations.
///
/// The observations are reprojected into the grid's CRS first. Every cell
/// appears at least once in the output: once per observation that falls in
/// it, or once with empty observation fields.
pub fn join<'g>(
    observations: &GeoTable<PhotoUserObservation>,
    grid: &'g Grid,
    policy: BoundaryPolicy,
) -> Result<CellDayTable<'g>> {
    let observations = observations.reproject(grid.crs())?;

    let tree = RTree::bulk_load(
        grid.cells()
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| {
                let bounds = cell.bounds()?;
                let (min, max) = (bounds.min(), bounds.max());
                Some(CellEnvelope {
                    index,
                    envelope: AABB::from_corners([min.x, min.y], [max.x, max.y]),
                })
            })
            .collect(),
    );

    let located: Vec<_> = observations.located().collect();

    // the tree only narrows the candidates, the policy decides
    let matches: Vec<Vec<usize>> = located
        .par_iter()
        .map(|(_, point)| {
            tree.locate_in_envelope_intersecting(&AABB::from_point([point.x(), point.y()]))
                .filter(|c| policy.accepts(&grid.cells()[c.index].geometry, point))
                .map(|c| c.index)
                .collect()
        })
        .collect();

    let mut per_cell: Vec<Vec<usize>> = vec![Vec::new(); grid.len()];
    for (obs, cells) in matches.iter().enumerate() {
        for &cell in cells {
            per_cell[cell].push(obs);
        }
    }

    let mut rows = Vec::new();
    let mut unmatched = 0usize;
    for (cell, hits) in per_cell.iter().enumerate() {
        if hits.is_empty() {
            unmatched += 1;
            rows.push(CellDayRecord {
                cell,
                owner: None,
                timestamp: None,
                date: None,
                photo_count: 0.0,
            });
            continue;
        }
        for &obs in hits {
            let (o, _) = located[obs];
            rows.push(CellDayRecord {
                cell,
                owner: Some(o.owner.clone()),
                timestamp: Some(o.date),
                date: Some(o.day()),
                photo_count: o.photo_count,
            });
        }
    }

    let outside = matches.iter().filter(|m| m.is_empty()).count();
    tracing::info!(
        "grid join: {} rows, {} of {} cells empty, {} observations outside the grid",
        rows.len(),
        unmatched,
        grid.len(),
        outside
    );
    Ok(CellDayTable { grid, rows })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geometry::Crs;
    use crate::photo_user::PhotoUserTable;
    use std::collections::BTreeMap;

    fn obs(owner: &str, ts: &str, lon: f64, lat: f64) -> PhotoUserObservation {
        PhotoUserObservation {
            date: crate::record::parse_date(ts).unwrap(),
            owner: owner.to_string(),
            latitude: lat,
            longitude: lon,
            photo_count: 1.0,
            numeric: BTreeMap::new(),
        }
    }

    fn bound(rows: Vec<PhotoUserObservation>) -> GeoTable<PhotoUserObservation> {
        GeoTable::bind(PhotoUserTable::new(rows).into_rows(), Crs::wgs84())
    }

    // two unit cells side by side, sharing the edge x = 1
    fn grid() -> Grid {
        Grid::regular(0.0, 0.0, 2, 1, 1.0, Crs::wgs84(), "FID")
    }

    #[test]
    fn test_every_cell_is_kept() {
        let grid = grid();
        let table = join(&bound(vec![obs("A", "2020-01-01", 0.5, 0.5)]), &grid, BoundaryPolicy::Intersects)
            .unwrap();
        assert_eq!(table.len(), 2);
        let empty = &table.rows()[1];
        assert_eq!(empty.cell, 1);
        assert!(empty.owner.is_none() && empty.date.is_none());
        assert_eq!(empty.photo_count, 0.0);
    }

    #[test]
    fn test_date_is_the_calendar_day() {
        let grid = grid();
        let table = join(&bound(vec![obs("A", "2020-01-01 23:59:00", 0.5, 0.5)]), &grid, BoundaryPolicy::Intersects)
            .unwrap();
        let row = &table.rows()[0];
        assert_eq!(row.date, NaiveDate::from_ymd_opt(2020, 1, 1));
        assert_eq!(row.timestamp.unwrap().format("%H:%M").to_string(), "23:59");
    }

    #[test]
    fn test_shared_edge_joins_both_cells_when_intersecting() {
        let grid = grid();
        let table = join(&bound(vec![obs("A", "2020-01-01", 1.0, 0.5)]), &grid, BoundaryPolicy::Intersects)
            .unwrap();
        let cells: Vec<_> = table.rows().iter().filter(|r| r.owner.is_some()).map(|r| r.cell).collect();
        assert_eq!(cells, vec![0, 1]);
    }

    #[test]
    fn test_shared_edge_joins_no_cell_when_containing() {
        let grid = grid();
        let table = join(&bound(vec![obs("A", "2020-01-01", 1.0, 0.5)]), &grid, BoundaryPolicy::Contains)
            .unwrap();
        assert!(table.rows().iter().all(|r| r.owner.is_none()));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_points_outside_the_grid_are_dropped() {
        let grid = grid();
        let table = join(
            &bound(vec![obs("A", "2020-01-01", 5.0, 5.0), obs("B", "2020-01-02", 1.5, 0.5)]),
            &grid,
            BoundaryPolicy::Intersects,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1].owner.as_deref(), Some("B"));
        assert_eq!(table.days().len(), 1);
    }

    #[test]
    fn test_points_are_reprojected_into_the_grid_crs() {
        // 1 km cells around the origin in web mercator
        let grid = Grid::regular(-1000.0, -1000.0, 2, 2, 1000.0, Crs::new("EPSG:3857"), "FID");
        // roughly 556 m east, 556 m north
        let table = join(&bound(vec![obs("A", "2020-01-01", 0.005, 0.005)]), &grid, BoundaryPolicy::Intersects)
            .unwrap();
        let hit: Vec<_> = table.rows().iter().filter(|r| r.owner.is_some()).map(|r| r.cell).collect();
        assert_eq!(hit, vec![3]);
    }
}
