use std::fs;
use std::path::Path;

use geo::{BoundingRect, Geometry, MultiPolygon, Rect};
use geojson::{FeatureCollection, GeoJson, JsonObject};
use serde_json::Value;

use crate::error::{PudError, Result};
use crate::geometry::Crs;

/// One polygon of the gridded area of interest. Its properties are carried
/// through untouched; the identifier is whichever property the caller names.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    pub geometry: MultiPolygon<f64>,
    pub attributes: JsonObject,
}

impl GridCell {
    pub fn new(geometry: impl Into<MultiPolygon<f64>>, attributes: JsonObject) -> Self {
        Self {
            geometry: geometry.into(),
            attributes,
        }
    }

    /// The value of `fid_column` rendered as text, if the cell has it.
    pub fn id(&self, fid_column: &str) -> Option<String> {
        match self.attributes.get(fid_column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }
}

/// The polygon grid, all cells in one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    crs: Crs,
    cells: Vec<GridCell>,
}

impl Grid {
    pub fn new(cells: Vec<GridCell>, crs: Crs) -> Self {
        Self { crs, cells }
    }

    /// Load a polygon FeatureCollection. `crs` overrides the file's own
    /// "crs" member; without either the file is taken as WGS84 (RFC 7946).
    pub fn load(path: impl AsRef<Path>, crs: Option<Crs>) -> Result<Self> {
        let path = path.as_ref();
        let collection = read_feature_collection(path)?;
        let crs = match crs {
            Some(crs) => crs,
            None => crs_of(&collection)?,
        };

        let mut cells = Vec::with_capacity(collection.features.len());
        for (i, feature) in collection.features.into_iter().enumerate() {
            let geometry = feature
                .geometry
                .ok_or_else(|| PudError::load(path, format!("feature {} has no geometry", i)))?;
            let geometry: Geometry<f64> = geometry.try_into()?;
            let geometry = polygons_of(geometry)
                .ok_or_else(|| PudError::load(path, format!("feature {} is not a polygon", i)))?;
            cells.push(GridCell {
                geometry,
                attributes: feature.properties.unwrap_or_default(),
            });
        }

        tracing::info!("loaded grid of {} cells in {} from {:?}", cells.len(), crs, path);
        Ok(Self { crs, cells })
    }

    /// A regular grid of `cols` x `rows` square cells of side `size`, starting
    /// at (`min_x`, `min_y`) and numbered row by row in `fid_column`.
    pub fn regular(
        min_x: f64,
        min_y: f64,
        cols: usize,
        rows: usize,
        size: f64,
        crs: Crs,
        fid_column: &str,
    ) -> Self {
        let cells = (0..rows)
            .flat_map(|r| (0..cols).map(move |c| (r, c)))
            .enumerate()
            .map(|(fid, (r, c))| {
                let x = min_x + c as f64 * size;
                let y = min_y + r as f64 * size;
                let rect = Rect::new((x, y), (x + size, y + size));
                let mut attributes = JsonObject::new();
                attributes.insert(fid_column.to_string(), Value::from(fid));
                GridCell::new(rect.to_polygon(), attributes)
            })
            .collect();
        Self { crs, cells }
    }

    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// The identifier of every cell, in grid order. Fails when any cell lacks
    /// `fid_column`.
    pub fn ids(&self, fid_column: &str) -> Result<Vec<String>> {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                cell.id(fid_column).ok_or_else(|| {
                    PudError::Schema(format!(
                        "grid cell {} has no identifier column `{}`",
                        i, fid_column
                    ))
                })
            })
            .collect()
    }
}

pub(crate) fn read_feature_collection(path: &Path) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path).map_err(|e| PudError::load(path, e))?;
    let geojson: GeoJson = text.parse().map_err(|e| PudError::load(path, e))?;
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        _ => Err(PudError::load(path, "expected a FeatureCollection")),
    }
}

/// The CRS named by a collection's legacy "crs" member, WGS84 when there is none.
pub(crate) fn crs_of(collection: &FeatureCollection) -> Result<Crs> {
    let Some(member) = collection
        .foreign_members
        .as_ref()
        .and_then(|m| m.get("crs"))
    else {
        tracing::debug!("no crs member, assuming EPSG:4326");
        return Ok(Crs::wgs84());
    };
    member
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .map(Crs::new)
        .ok_or_else(|| PudError::Crs(format!("unsupported crs member: {}", member)))
}

pub(crate) fn polygons_of(geometry: Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(p.into()),
        Geometry::MultiPolygon(mp) => Some(mp),
        Geometry::Rect(r) => Some(r.to_polygon().into()),
        Geometry::GeometryCollection(gc) => {
            let mut polygons = Vec::new();
            for g in gc.0 {
                polygons.extend(polygons_of(g)?.0);
            }
            Some(MultiPolygon(polygons))
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    const GRID: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::3857" } },
        "features": [
            { "type": "Feature", "properties": { "FID": 7, "name": "a" },
              "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]] } },
            { "type": "Feature", "properties": { "FID": "x" },
              "geometry": { "type": "MultiPolygon", "coordinates": [[[[1,0],[2,0],[2,1],[1,1],[1,0]]]] } }
        ]
    }"#;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_load_grid() {
        let f = write(GRID);
        let grid = Grid::load(f.path(), None).unwrap();
        assert_eq!(grid.crs(), &Crs::new("EPSG:3857"));
        assert_eq!(grid.len(), 2);
        assert_eq!(grid.ids("FID").unwrap(), vec!["7", "x"]);
        assert_eq!(grid.cells()[0].attributes["name"], "a");
    }

    #[test]
    fn test_crs_override() {
        let f = write(GRID);
        let grid = Grid::load(f.path(), Some(Crs::new("EPSG:25830"))).unwrap();
        assert_eq!(grid.crs().as_str(), "EPSG:25830");
    }

    #[test]
    fn test_missing_identifier_column() {
        let f = write(GRID);
        let grid = Grid::load(f.path(), None).unwrap();
        let err = grid.ids("name").unwrap_err();
        assert!(matches!(err, PudError::Schema(_)));
    }

    #[test]
    fn test_rejects_non_polygon_features() {
        let f = write(
            r#"{"type":"FeatureCollection","features":[
                {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[0,0]}}]}"#,
        );
        let err = Grid::load(f.path(), None).unwrap_err();
        assert!(matches!(err, PudError::Load { .. }));
    }

    #[test]
    fn test_default_crs_is_wgs84() {
        let f = write(r#"{"type":"FeatureCollection","features":[]}"#);
        assert_eq!(Grid::load(f.path(), None).unwrap().crs(), &Crs::wgs84());
    }

    #[test]
    fn test_regular_grid() {
        let grid = Grid::regular(0.0, 0.0, 3, 2, 10.0, Crs::new("EPSG:3857"), "FID");
        assert_eq!(grid.len(), 6);
        assert_eq!(grid.ids("FID").unwrap(), vec!["0", "1", "2", "3", "4", "5"]);
        let b = grid.cells()[4].bounds().unwrap();
        assert_eq!((b.min().x, b.min().y, b.max().x, b.max().y), (10.0, 10.0, 20.0, 20.0));
    }
}
