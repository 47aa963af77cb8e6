use std::fmt;
use std::path::Path;

use geo::{Intersects, MultiPoint, MultiPolygon, Point, Transform};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde_json::{json, Value};

use crate::error::{PudError, Result};
use crate::grid::{crs_of, polygons_of, read_feature_collection};
use crate::traits::Located;

/// A coordinate reference system identifier, e.g. "EPSG:4326".
///
/// EPSG URNs and the "CRS84" alias are normalised so that two spellings of the
/// same system compare equal. Anything else (PROJ strings, WKT) is kept as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Crs(String);

impl Crs {
    pub fn new(code: impl AsRef<str>) -> Self {
        let code = code.as_ref().trim();
        let upper = code.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Self::wgs84();
        }
        // urn:ogc:def:crs:EPSG::3857 and urn:ogc:def:crs:EPSG:9.9.1:3857
        if let Some(rest) = upper.strip_prefix("URN:OGC:DEF:CRS:EPSG:") {
            if let Some(number) = rest.rsplit(':').next().filter(|n| !n.is_empty()) {
                return Self(format!("EPSG:{}", number));
            }
        }
        if let Some(number) = upper.strip_prefix("EPSG:") {
            return Self(format!("EPSG:{}", number));
        }
        Self(code.to_string())
    }

    pub fn wgs84() -> Self {
        Self("EPSG:4326".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoRow<T> {
    pub data: T,
    /// None when the row has no usable coordinates.
    pub geometry: Option<Point<f64>>,
}

/// Rows with a bound point geometry, all in the same CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTable<T> {
    crs: Crs,
    rows: Vec<GeoRow<T>>,
}

impl<T: Located> GeoTable<T> {
    /// Attach a point (longitude, latitude) to every row, in `crs`.
    pub fn bind(rows: impl IntoIterator<Item = T>, crs: Crs) -> Self {
        let rows: Vec<_> = rows
            .into_iter()
            .map(|data| {
                let geometry = data.lon_lat().map(|(x, y)| Point::new(x, y));
                GeoRow { data, geometry }
            })
            .collect();
        tracing::debug!(
            "bound {} of {} rows to points in {}",
            rows.iter().filter(|r| r.geometry.is_some()).count(),
            rows.len(),
            crs
        );
        Self { crs, rows }
    }
}

impl<T: Clone> GeoTable<T> {
    pub fn crs(&self) -> &Crs {
        &self.crs
    }

    pub fn rows(&self) -> &[GeoRow<T>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows that have a geometry.
    pub fn located(&self) -> impl Iterator<Item = (&T, Point<f64>)> {
        self.rows
            .iter()
            .filter_map(|r| r.geometry.map(|g| (&r.data, g)))
    }

    /// A copy of the table with every geometry expressed in `target`.
    pub fn reproject(&self, target: &Crs) -> Result<Self> {
        if &self.crs == target {
            return Ok(self.clone());
        }

        // one transformation for the whole table
        let points: MultiPoint<f64> = self.rows.iter().filter_map(|r| r.geometry).collect();
        let projected = points
            .transformed_crs_to_crs(self.crs.as_str(), target.as_str())
            .map_err(|e| {
                PudError::Crs(format!(
                    "cannot reproject from {} to {}: {:?}",
                    self.crs, target, e
                ))
            })?;

        let mut projected = projected.0.into_iter();
        let rows = self
            .rows
            .iter()
            .map(|r| GeoRow {
                data: r.data.clone(),
                geometry: r.geometry.and_then(|_| projected.next()),
            })
            .collect();

        tracing::debug!("reprojected {} rows from {} to {}", self.rows.len(), self.crs, target);
        Ok(Self {
            crs: target.clone(),
            rows,
        })
    }

    /// Keep the rows whose point intersects the mask. The table is first
    /// reprojected to the mask's CRS when the two differ; the result is
    /// always in the mask's CRS.
    pub fn clip(&self, mask: &Mask) -> Result<Self> {
        let table = self.reproject(&mask.crs)?;
        let rows: Vec<_> = table
            .rows
            .into_iter()
            .filter(|r| r.geometry.map_or(false, |p| p.intersects(&mask.geometry)))
            .collect();
        tracing::info!("clip kept {} of {} rows", rows.len(), self.rows.len());
        Ok(Self {
            crs: table.crs,
            rows,
        })
    }

    pub fn into_data(self) -> Vec<T> {
        self.rows.into_iter().map(|r| r.data).collect()
    }

    /// Points as a GeoJSON FeatureCollection, tagged with the table's CRS.
    /// Rows without geometry are written with a null geometry.
    pub fn to_feature_collection(&self, properties: impl Fn(&T) -> JsonObject) -> FeatureCollection {
        let features = self
            .rows
            .iter()
            .map(|r| Feature {
                bbox: None,
                geometry: r
                    .geometry
                    .as_ref()
                    .map(|p| geojson::Geometry::new(geojson::Value::from(p))),
                id: None,
                properties: Some(properties(&r.data)),
                foreign_members: None,
            })
            .collect();

        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            json!({ "type": "name", "properties": { "name": self.crs.as_str() } }),
        );
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(members),
        }
    }

    pub fn save_geojson(
        &self,
        path: impl AsRef<Path>,
        properties: impl Fn(&T) -> JsonObject,
    ) -> Result<()> {
        let geojson = GeoJson::from(self.to_feature_collection(properties));
        std::fs::write(path.as_ref(), geojson.to_string())?;
        tracing::info!("wrote {} features to {:?}", self.rows.len(), path.as_ref());
        Ok(())
    }
}

/// A polygon mask (the area of interest) with its CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    pub crs: Crs,
    pub geometry: MultiPolygon<f64>,
}

impl Mask {
    pub fn new(geometry: MultiPolygon<f64>, crs: Crs) -> Self {
        Self { crs, geometry }
    }

    /// Every polygon of a GeoJSON FeatureCollection, taken together.
    /// `crs` overrides the file's own "crs" member.
    pub fn load(path: impl AsRef<Path>, crs: Option<Crs>) -> Result<Self> {
        let path = path.as_ref();
        let collection = read_feature_collection(path)?;
        let crs = match crs {
            Some(crs) => crs,
            None => crs_of(&collection)?,
        };

        let mut polygons = Vec::new();
        for feature in collection.features {
            let Some(geometry) = feature.geometry else {
                continue;
            };
            let geometry: geo::Geometry<f64> = geometry.try_into()?;
            match polygons_of(geometry) {
                Some(mp) => polygons.extend(mp.0),
                None => return Err(PudError::load(path, "mask features must be polygons")),
            }
        }
        if polygons.is_empty() {
            return Err(PudError::load(path, "mask has no polygons"));
        }
        tracing::info!("loaded mask with {} polygons in {}", polygons.len(), crs);
        Ok(Self::new(MultiPolygon(polygons), crs))
    }
}

/// Build a JSON property map from (key, value) pairs.
pub fn properties<I, K>(pairs: I) -> JsonObject
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use geo::polygon;

    #[derive(Debug, Clone, PartialEq)]
    struct Pt(Option<(f64, f64)>);

    impl Located for Pt {
        fn lon_lat(&self) -> Option<(f64, f64)> {
            self.0
        }
    }

    fn table() -> GeoTable<Pt> {
        GeoTable::bind(
            vec![Pt(Some((0.5, 0.5))), Pt(None), Pt(Some((5.0, 5.0))), Pt(Some((1.0, 0.2)))],
            Crs::wgs84(),
        )
    }

    fn unit_square() -> Mask {
        let p = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        Mask::new(p.into(), Crs::wgs84())
    }

    #[test]
    fn test_crs_normalisation() {
        assert_eq!(Crs::new("urn:ogc:def:crs:EPSG::3857"), Crs::new("EPSG:3857"));
        assert_eq!(Crs::new("epsg:4326"), Crs::wgs84());
        assert_eq!(Crs::new("urn:ogc:def:crs:OGC:1.3:CRS84"), Crs::wgs84());
        assert_eq!(Crs::new("+proj=longlat").as_str(), "+proj=longlat");
    }

    #[test]
    fn test_bind_skips_missing_coordinates() {
        let t = table();
        assert_eq!(t.len(), 4);
        assert!(t.rows()[1].geometry.is_none());
        assert_eq!(t.rows()[0].geometry, Some(Point::new(0.5, 0.5)));
        assert_eq!(t.located().count(), 3);
    }

    #[test]
    fn test_reproject_same_crs_is_noop() {
        let t = table();
        assert_eq!(t.reproject(&Crs::wgs84()).unwrap(), t);
    }

    #[test]
    fn test_reproject_to_web_mercator() {
        let t = table().reproject(&Crs::new("EPSG:3857")).unwrap();
        assert_eq!(t.crs(), &Crs::new("EPSG:3857"));
        assert!(t.rows()[1].geometry.is_none());
        let p = t.rows()[2].geometry.unwrap();
        // 5 degrees of longitude on the equatorial sphere radius
        assert!((p.x() - 556_597.45).abs() < 1.0);
        // the input table keeps its own CRS
        assert_eq!(table().crs(), &Crs::wgs84());
    }

    #[test]
    fn test_reproject_unknown_crs_fails() {
        let err = table().reproject(&Crs::new("EPSG:999999")).unwrap_err();
        assert!(matches!(err, PudError::Crs(_)));
    }

    #[test]
    fn test_clip_keeps_points_on_mask_boundary() {
        let clipped = table().clip(&unit_square()).unwrap();
        let kept: Vec<_> = clipped.rows().iter().map(|r| r.data.clone()).collect();
        assert_eq!(kept, vec![Pt(Some((0.5, 0.5))), Pt(Some((1.0, 0.2)))]);
        assert_eq!(clipped.crs(), &unit_square().crs);
    }

    #[test]
    fn test_feature_collection_carries_crs() {
        let fc = table().to_feature_collection(|_| JsonObject::new());
        assert_eq!(fc.features.len(), 4);
        assert!(fc.features[1].geometry.is_none());
        let crs = fc.foreign_members.unwrap()["crs"].clone();
        assert_eq!(crs["properties"]["name"], "EPSG:4326");
    }
}
