use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};
use geojson::JsonObject;
use ordered_float::OrderedFloat;
use serde_json::Value;

use crate::geometry::properties;
use crate::record::RecordTable;
use crate::traits::{Located, MergePolicy};

/// One owner seen at one location at one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUserObservation {
    pub date: NaiveDateTime,
    pub owner: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 1 under the mean policy, whatever the number of photos behind it.
    pub photo_count: f64,
    pub numeric: BTreeMap<String, f64>,
}

impl PhotoUserObservation {
    pub fn day(&self) -> NaiveDate {
        self.date.date()
    }

    pub fn properties(&self) -> JsonObject {
        let mut props = properties([
            ("date", Value::from(self.date.format("%Y-%m-%d %H:%M:%S").to_string())),
            ("owner", Value::from(self.owner.clone())),
            ("latitude", Value::from(self.latitude)),
            ("longitude", Value::from(self.longitude)),
            ("photo_count", Value::from(self.photo_count)),
        ]);
        for (k, v) in &self.numeric {
            props.insert(k.clone(), Value::from(*v));
        }
        props
    }
}

impl Located for PhotoUserObservation {
    fn lon_lat(&self) -> Option<(f64, f64)> {
        Some((self.longitude, self.latitude))
    }
}

/// Deduplicated observations, sorted by (date, owner, latitude, longitude).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoUserTable {
    rows: Vec<PhotoUserObservation>,
}

type Key = (NaiveDateTime, String, OrderedFloat<f64>, OrderedFloat<f64>);

#[derive(Default)]
struct Group {
    photo_counts: Vec<f64>,
    numeric: BTreeMap<String, Vec<f64>>,
}

/// Collapse the record table to one row per (date, owner, latitude, longitude).
///
/// Rows without an owner are dropped first. Every remaining row weighs 1, and
/// the rows of a group are fused by `policy` (photo_count and every extra
/// numeric column). Rows missing the date or a coordinate cannot form a key
/// and are dropped as well.
pub fn photo_user<M: MergePolicy>(table: &RecordTable, policy: &M) -> PhotoUserTable {
    let owned = table.iter().filter(|r| r.owner.is_some()).count();
    tracing::debug!("{} of {} records have an owner", owned, table.len());

    let rows = table.iter().filter(|r| r.is_complete()).filter_map(|r| {
        let key = (
            r.date?,
            r.owner.clone()?,
            OrderedFloat(r.latitude?),
            OrderedFloat(r.longitude?),
        );
        Some((key, 1.0, &r.numeric))
    });
    let out = collapse(rows, policy);
    tracing::info!(
        "photo-user: {} records -> {} observations",
        table.len(),
        out.len()
    );
    out
}

fn collapse<'a, M: MergePolicy>(
    rows: impl Iterator<Item = (Key, f64, &'a BTreeMap<String, f64>)>,
    policy: &M,
) -> PhotoUserTable {
    let mut groups: BTreeMap<Key, Group> = BTreeMap::new();
    for (key, weight, numeric) in rows {
        let group = groups.entry(key).or_default();
        group.photo_counts.push(weight);
        for (name, value) in numeric {
            group.numeric.entry(name.clone()).or_default().push(*value);
        }
    }

    let rows = groups
        .into_iter()
        .map(|((date, owner, lat, lon), group)| PhotoUserObservation {
            date,
            owner,
            latitude: lat.into_inner(),
            longitude: lon.into_inner(),
            photo_count: policy.merge(&group.photo_counts),
            numeric: group
                .numeric
                .into_iter()
                .map(|(name, values)| (name, policy.merge(&values)))
                .collect(),
        })
        .collect();
    PhotoUserTable { rows }
}

impl PhotoUserTable {
    pub fn new(rows: Vec<PhotoUserObservation>) -> Self {
        Self { rows }
    }

    /// Run the collapse again over already deduplicated rows. With the mean
    /// or first policy this is a fixed point.
    pub fn dedup<M: MergePolicy>(&self, policy: &M) -> Self {
        let rows = self.rows.iter().map(|r| {
            let key = (
                r.date,
                r.owner.clone(),
                OrderedFloat(r.latitude),
                OrderedFloat(r.longitude),
            );
            (key, r.photo_count, &r.numeric)
        });
        collapse(rows, policy)
    }

    pub fn rows(&self) -> &[PhotoUserObservation] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<PhotoUserObservation> {
        self.rows
    }

    /// Calendar days with at least one observation.
    pub fn days(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(PhotoUserObservation::day).collect()
    }
}
