use std::collections::HashMap;
use std::fmt;

use crate::record::{Field, RecordTable};

/// Data-quality figures for a record table.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub photos: usize,
    pub owners: usize,
    pub without_owner: f64,
    pub without_date: f64,
    pub without_coordinates: f64,
    pub without_tags: f64,
    pub without_title: f64,
}

pub fn summarize(table: &RecordTable) -> Summary {
    Summary {
        photos: table.len(),
        owners: table.distinct_owners(),
        without_owner: table.null_fraction(Field::Owner),
        without_date: table.null_fraction(Field::Date),
        without_coordinates: table.null_fraction(Field::Coordinates),
        without_tags: table.null_fraction(Field::Tags),
        without_title: table.null_fraction(Field::Title),
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total number of photos: {}", self.photos)?;
        writeln!(f, "Total number of owners: {}", self.owners)?;
        writeln!(f, "Fraction of photos without owner: {:.4}", self.without_owner)?;
        writeln!(f, "Fraction of photos without date: {:.4}", self.without_date)?;
        writeln!(f, "Fraction of photos without coordinates: {:.4}", self.without_coordinates)?;
        writeln!(f, "Fraction of photos without tags: {:.4}", self.without_tags)?;
        write!(f, "Fraction of photos without title: {:.4}", self.without_title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerActivity {
    pub name: String,
    pub photos: usize,
}

/// Photos per owner name, for owners with more than `threshold` photos,
/// least active first. Rows without an owner name are not counted.
pub fn owner_activity(table: &RecordTable, threshold: usize) -> Vec<OwnerActivity> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in table.iter().filter_map(|r| r.owner_name.as_deref()) {
        *counts.entry(name).or_insert(0) += 1;
    }
    let mut activity: Vec<_> = counts
        .into_iter()
        .filter(|(_, photos)| *photos > threshold)
        .map(|(name, photos)| OwnerActivity {
            name: name.to_string(),
            photos,
        })
        .collect();
    activity.sort_by(|a, b| a.photos.cmp(&b.photos).then_with(|| a.name.cmp(&b.name)));
    activity
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::record::PhotoRecord;

    fn rec(owner: Option<&str>, name: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            owner: owner.map(str::to_string),
            owner_name: name.map(str::to_string),
            date: crate::record::parse_date("2020-01-01"),
            latitude: Some(1.0),
            longitude: Some(1.0),
            tags: Some("x".to_string()),
            title: None,
            ..Default::default()
        }
    }

    #[test]
    fn test_summary_counts_ownerless_rows() {
        let table = RecordTable::new(vec![
            rec(Some("A"), Some("alice")),
            rec(Some("A"), Some("alice")),
            rec(Some("B"), Some("bob")),
            rec(None, None),
        ]);
        let s = summarize(&table);
        assert_eq!(s.photos, 4);
        assert_eq!(s.owners, 2);
        assert_eq!(s.without_owner, 0.25);
        assert_eq!(s.without_date, 0.0);
        assert_eq!(s.without_title, 1.0);
        assert!(s.to_string().contains("without owner: 0.2500"));
    }

    #[test]
    fn test_summary_of_empty_table() {
        let s = summarize(&RecordTable::default());
        assert_eq!(s.photos, 0);
        assert_eq!(s.without_owner, 0.0);
    }

    #[test]
    fn test_owner_activity() {
        let table = RecordTable::new(vec![
            rec(Some("A"), Some("alice")),
            rec(Some("A"), Some("alice")),
            rec(Some("A"), Some("alice")),
            rec(Some("B"), Some("bob")),
            rec(Some("B"), Some("bob")),
            rec(Some("C"), Some("carol")),
        ]);
        let activity = owner_activity(&table, 1);
        let names: Vec<_> = activity.iter().map(|a| (a.name.as_str(), a.photos)).collect();
        assert_eq!(names, vec![("bob", 2), ("alice", 3)]);
    }
}
