use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::StringRecord;

use crate::error::{PudError, Result};
use crate::traits::Located;

const TITLE_COLUMNS: [&str; 2] = ["title", "Title"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

/// One photo as it comes out of the source table. Every field may be missing.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhotoRecord {
    pub owner: Option<String>,
    pub owner_name: Option<String>,
    pub date: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub tags: Option<String>,
    pub title: Option<String>,
    /// Extra numeric columns of the source, keyed by header. Missing values are absent.
    pub numeric: BTreeMap<String, f64>,
}

impl PhotoRecord {
    /// A record that can take part in the aggregation: owner, date and both
    /// coordinates are present.
    pub fn is_complete(&self) -> bool {
        self.owner.is_some()
            && self.date.is_some()
            && self.latitude.is_some()
            && self.longitude.is_some()
    }
}

impl Located for PhotoRecord {
    fn lon_lat(&self) -> Option<(f64, f64)> {
        Some((self.longitude?, self.latitude?))
    }
}

/// Columns the null-rate queries know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Owner,
    Date,
    Coordinates,
    Tags,
    Title,
}

impl Field {
    fn is_null(&self, record: &PhotoRecord) -> bool {
        match self {
            Field::Owner => record.owner.is_none(),
            Field::Date => record.date.is_none(),
            // a half-missing pair is as unusable as a missing one
            Field::Coordinates => record.latitude.is_none() || record.longitude.is_none(),
            Field::Tags => record.tags.is_none(),
            Field::Title => record.title.is_none(),
        }
    }
}

/// The raw photo table. Every operation returns a new table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    records: Vec<PhotoRecord>,
}

impl RecordTable {
    pub fn new(records: Vec<PhotoRecord>) -> Self {
        Self { records }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| PudError::load(path, e))?;
        let table = Self::from_reader(file, path)?;
        tracing::info!("loaded {} records from {:?}", table.len(), path);
        Ok(table)
    }

    /// Read a delimited table. `source` only labels errors.
    pub fn from_reader<R: Read>(reader: R, source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        // short rows read as trailing nulls, long rows keep the named columns
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = rdr
            .headers()
            .map_err(|e| PudError::load(source, e))?
            .clone();
        let columns = Columns::resolve(&headers)?;

        let mut rows = Vec::new();
        let mut skipped = 0usize;
        for row in rdr.records() {
            match row {
                Ok(row) => rows.push(row),
                Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                    skipped += 1;
                    tracing::warn!("{:?}: skipping unreadable row: {}", source, e);
                }
                Err(e) => return Err(PudError::load(source, e)),
            }
        }
        if skipped > 0 {
            tracing::warn!("{} rows of {:?} were skipped", skipped, source);
        }

        let numeric_columns = columns.numeric_candidates(&headers, &rows);
        tracing::debug!("extra numeric columns: {:?}", numeric_columns);

        let mut malformed = 0usize;
        let records = rows
            .iter()
            .map(|row| {
                let (record, ok) = columns.parse_row(row, &numeric_columns);
                if !ok {
                    malformed += 1;
                    let line = row.position().map_or(0, |p| p.line());
                    tracing::warn!("{:?} line {}: malformed value(s) set to null", source, line);
                }
                record
            })
            .collect();

        if malformed > 0 {
            tracing::warn!("{} rows of {:?} had malformed values", malformed, source);
        }
        Ok(Self { records })
    }

    pub fn records(&self) -> &[PhotoRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhotoRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn filter(&self, predicate: impl Fn(&PhotoRecord) -> bool) -> Self {
        Self {
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        }
    }

    /// Drop every row with at least one tag word in `words`.
    pub fn drop_tags<S: AsRef<str>>(&self, words: &[S]) -> Self {
        let words = word_set(words);
        self.filter(|r| !contains_any_word(r.tags.as_deref(), &words))
    }

    /// Drop every row with at least one title word in `words`.
    pub fn drop_titles<S: AsRef<str>>(&self, words: &[S]) -> Self {
        let words = word_set(words);
        self.filter(|r| !contains_any_word(r.title.as_deref(), &words))
    }

    /// Drop every row posted under one of the given owner names.
    pub fn drop_owners<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let names = word_set(names);
        self.filter(|r| {
            r.owner_name
                .as_deref()
                .map_or(true, |name| !names.contains(name))
        })
    }

    /// Fraction of rows where `field` is null. 0 for an empty table.
    pub fn null_fraction(&self, field: Field) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let nulls = self.records.iter().filter(|r| field.is_null(r)).count();
        nulls as f64 / self.records.len() as f64
    }

    pub fn distinct_owners(&self) -> usize {
        self.records
            .iter()
            .filter_map(|r| r.owner.as_deref())
            .collect::<HashSet<_>>()
            .len()
    }
}

fn word_set<S: AsRef<str>>(words: &[S]) -> HashSet<&str> {
    words.iter().map(|w| w.as_ref()).collect()
}

fn contains_any_word(text: Option<&str>, words: &HashSet<&str>) -> bool {
    text.map_or(false, |t| t.split_whitespace().any(|w| words.contains(w)))
}

/// Header positions of the columns the loader understands.
struct Columns {
    owner: usize,
    date: usize,
    latitude: usize,
    longitude: usize,
    owner_name: Option<usize>,
    tags: Option<usize>,
    title: Option<usize>,
}

impl Columns {
    fn resolve(headers: &StringRecord) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let required = |name: &str| {
            find(name).ok_or_else(|| PudError::Schema(format!("missing required column `{}`", name)))
        };
        Ok(Self {
            owner: required("owner")?,
            date: required("date")?,
            latitude: required("latitude")?,
            longitude: required("longitude")?,
            owner_name: find("owner_name"),
            tags: find("tags"),
            title: TITLE_COLUMNS.iter().find_map(|name| find(*name)),
        })
    }

    fn known(&self, i: usize) -> bool {
        [self.owner, self.date, self.latitude, self.longitude].contains(&i)
            || [self.owner_name, self.tags, self.title].contains(&Some(i))
    }

    /// Extra columns whose non-empty values all parse as numbers, with at least one value.
    fn numeric_candidates(&self, headers: &StringRecord, rows: &[StringRecord]) -> Vec<(usize, String)> {
        headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !self.known(*i))
            .filter(|(i, _)| {
                let mut values = rows.iter().filter_map(|r| non_empty(r.get(*i))).peekable();
                values.peek().is_some() && values.all(|v| v.parse::<f64>().is_ok())
            })
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect()
    }

    /// Returns the record and whether every present value parsed.
    fn parse_row(&self, row: &StringRecord, numeric: &[(usize, String)]) -> (PhotoRecord, bool) {
        let text = |i: usize| non_empty(row.get(i)).map(str::to_string);
        let mut ok = true;
        let mut number = |i: usize| {
            let raw = non_empty(row.get(i))?;
            let parsed = raw.parse::<f64>().ok().filter(|v| v.is_finite());
            ok &= parsed.is_some();
            parsed
        };
        let latitude = number(self.latitude);
        let longitude = number(self.longitude);

        let date = match non_empty(row.get(self.date)) {
            Some(raw) => {
                let parsed = parse_date(raw);
                ok &= parsed.is_some();
                parsed
            }
            None => None,
        };

        let numeric = numeric
            .iter()
            .filter_map(|(i, name)| {
                let v = non_empty(row.get(*i))?.parse::<f64>().ok()?;
                Some((name.clone(), v))
            })
            .collect();

        let record = PhotoRecord {
            owner: text(self.owner),
            owner_name: self.owner_name.and_then(text),
            date,
            latitude,
            longitude,
            tags: self.tags.and_then(text),
            title: self.title.and_then(text),
            numeric,
        };
        (record, ok)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty() && *v != "NaN" && *v != "nan")
}

/// Parse an ISO-like timestamp. A bare date is taken at midnight.
pub fn parse_date(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod test {
    use super::*;

    const CSV: &str = "\
owner,owner_name,date,latitude,longitude,tags,Title,views
A,alice,2020-01-01 10:00:00,1.0,1.0,beach sun,Sunny day,10
B,bob,2020-01-01,2.0,2.0,,,
,carol,2020-01-02 09:30:00,3.0,3.0,wedding party,Wedding,4
C,dave,not a date,abc,4.0,sun,,2
";

    fn table() -> RecordTable {
        RecordTable::from_reader(CSV.as_bytes(), "test.csv").unwrap()
    }

    #[test]
    fn test_load_types_columns() {
        let t = table();
        assert_eq!(t.len(), 4);
        let a = &t.records()[0];
        assert_eq!(a.owner.as_deref(), Some("A"));
        assert_eq!(a.title.as_deref(), Some("Sunny day"));
        assert_eq!(a.numeric.get("views"), Some(&10.0));
        assert_eq!(
            a.date,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(10, 0, 0)
        );
        let b = &t.records()[1];
        assert_eq!(b.date, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0));
        assert!(b.tags.is_none());
        assert!(b.numeric.is_empty());
    }

    #[test]
    fn test_malformed_values_become_null() {
        let t = table();
        let c = &t.records()[3];
        assert!(c.date.is_none());
        assert!(c.latitude.is_none());
        assert_eq!(c.longitude, Some(4.0));
        assert!(!c.is_complete());
    }

    #[test]
    fn test_missing_required_column() {
        let csv = "owner,date,latitude\nA,2020-01-01,1.0\n";
        let err = RecordTable::from_reader(csv.as_bytes(), "bad.csv").unwrap_err();
        assert!(matches!(err, PudError::Schema(ref m) if m.contains("longitude")));
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let csv = "owner,date,latitude,longitude,tags\n\
                   A,2020-01-01,1.0,1.0,sun\n\
                   B,2020-01-01,2.0,2.0\n\
                   C,2020-01-02,3.0,3.0,sea,extra\n";
        let t = RecordTable::from_reader(csv.as_bytes(), "ragged.csv").unwrap();
        assert_eq!(t.len(), 3);
        assert!(t.records()[1].tags.is_none());
        assert_eq!(t.records()[1].longitude, Some(2.0));
        assert_eq!(t.records()[2].tags.as_deref(), Some("sea"));
        assert!(t.records()[2].numeric.is_empty());
    }

    #[test]
    fn test_unreadable_row_is_skipped() {
        let csv: &[u8] = b"owner,date,latitude,longitude\n\
                           A,2020-01-01,1.0,1.0\n\
                           \xff,2020-01-01,2.0,2.0\n\
                           B,2020-01-02,3.0,3.0\n";
        let t = RecordTable::from_reader(csv, "bytes.csv").unwrap();
        let owners: Vec<_> = t.iter().map(|r| r.owner.clone().unwrap()).collect();
        assert_eq!(owners, vec!["A", "B"]);
    }

    #[test]
    fn test_missing_file() {
        let err = RecordTable::load("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, PudError::Load { .. }));
    }

    #[test]
    fn test_null_fractions() {
        let t = table();
        assert_eq!(t.null_fraction(Field::Owner), 0.25);
        assert_eq!(t.null_fraction(Field::Date), 0.25);
        assert_eq!(t.null_fraction(Field::Coordinates), 0.25);
        assert_eq!(t.null_fraction(Field::Tags), 0.25);
        assert_eq!(t.null_fraction(Field::Title), 0.5);
        assert_eq!(RecordTable::default().null_fraction(Field::Owner), 0.0);
    }

    #[test]
    fn test_drop_tags_and_titles() {
        let t = table();
        let no_sun = t.drop_tags(&["sun"]);
        assert_eq!(no_sun.len(), 2);
        // untagged rows stay
        assert!(no_sun.iter().any(|r| r.owner.as_deref() == Some("B")));

        let no_wedding = t.drop_titles(&["Wedding"]);
        assert_eq!(no_wedding.len(), 3);
        // the input is untouched
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_drop_owners() {
        let t = table().drop_owners(&["alice", "carol"]);
        let owners: Vec<_> = t.iter().map(|r| r.owner_name.clone().unwrap()).collect();
        assert_eq!(owners, vec!["bob", "dave"]);
    }

    #[test]
    fn test_distinct_owners() {
        assert_eq!(table().distinct_owners(), 3);
    }

    #[test]
    fn test_parse_date_formats() {
        assert!(parse_date("2020-01-01T10:00:00Z").is_some());
        assert!(parse_date("2020-01-01T10:00:00").is_some());
        assert!(parse_date("2020-01-01 10:00:00.250").is_some());
        assert!(parse_date("01/01/2020").is_none());
    }
}
