use serde::Deserialize;

/// Describes how a group of duplicate rows is fused into one representative row.
/// The deduplicator collects the values of one numeric field across every row
/// of a group (photo_count, and any extra numeric attribute) and asks the policy
/// for the single value the collapsed row carries.
///
/// Mean is what the photo-user tables have always been built with: the weight
/// of every raw row is 1, so the mean keeps photo_count at 1 and the result
/// describes presence rather than volume.
pub trait MergePolicy {
    /// Fuse the values of one field across a group. `values` is never empty.
    fn merge(&self, values: &[f64]) -> f64;
}

/// Arithmetic mean of the group.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mean;

/// Keep the value of the first row of the group, in input order.
#[derive(Debug, Clone, Copy, Default)]
pub struct First;

/// Sum across the group. With unit weights this turns photo_count into the
/// number of photos taken by an owner at a location on a given timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sum;

impl MergePolicy for Mean {
    fn merge(&self, values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl MergePolicy for First {
    fn merge(&self, values: &[f64]) -> f64 {
        values[0]
    }
}

impl MergePolicy for Sum {
    fn merge(&self, values: &[f64]) -> f64 {
        values.iter().sum()
    }
}

/// The merge policy as it is named in a config file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum MergeKind {
    #[default]
    Mean,
    First,
    Sum,
}

impl MergePolicy for MergeKind {
    fn merge(&self, values: &[f64]) -> f64 {
        match self {
            MergeKind::Mean => Mean.merge(values),
            MergeKind::First => First.merge(values),
            MergeKind::Sum => Sum.merge(values),
        }
    }
}

/// Anything that carries a longitude/latitude pair and can therefore have a
/// point geometry bound to it.
/// Returns None when either coordinate is missing, in which case the row gets
/// no geometry and never takes part in a spatial join.
pub trait Located {
    /// (longitude, latitude), i.e. (x, y)
    fn lon_lat(&self) -> Option<(f64, f64)>;
}
