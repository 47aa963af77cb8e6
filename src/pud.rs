use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{PudError, Result};
use crate::join::CellDayTable;

/// Photo-user-days of one cell on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PudRecord {
    pub cell_id: String,
    pub date: NaiveDate,
    /// Number of distinct owners seen in the cell that day.
    pub pud: u64,
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(PudError::Schema(format!(
                "date range ends ({}) before it starts ({})",
                end, start
            )));
        }
        Ok(Self { start, end })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PudTable {
    fid_column: String,
    rows: Vec<PudRecord>,
}

/// Photo-user-days per (cell, day), for every cell of the grid and every day
/// that has at least one joined observation.
pub fn aggregate(table: &CellDayTable<'_>, fid_column: &str) -> Result<PudTable> {
    aggregate_with_days(table, fid_column, std::iter::empty())
}

/// Like [`aggregate`], also reporting every day in `extra_days`, so a cell
/// gets a 0 row on days nobody visited any cell. The pipeline passes the days
/// of all observations here, matched or not, plus the configured range.
pub fn aggregate_with_days(
    table: &CellDayTable<'_>,
    fid_column: &str,
    extra_days: impl IntoIterator<Item = NaiveDate>,
) -> Result<PudTable> {
    let ids = table.grid().ids(fid_column)?;

    // (cell id, day) -> owners with a positive weight. An owner counts once
    // per cell-day however many rows the join produced for them.
    let mut owners: HashMap<(&str, NaiveDate), HashSet<&str>> = HashMap::new();
    for row in table.rows() {
        let (Some(date), Some(owner)) = (row.date, row.owner.as_deref()) else {
            continue;
        };
        if row.photo_count > 0.0 {
            owners
                .entry((ids[row.cell].as_str(), date))
                .or_default()
                .insert(owner);
        }
    }

    let mut days: BTreeSet<NaiveDate> = table.days();
    days.extend(extra_days);

    // several cells may share an id; they are reported as one, in grid order
    let mut seen = HashSet::new();
    let cells: Vec<&str> = ids
        .iter()
        .map(String::as_str)
        .filter(|id| seen.insert(*id))
        .collect();

    let rows: Vec<PudRecord> = cells
        .iter()
        .flat_map(|id| days.iter().map(move |day| (*id, *day)))
        .map(|(id, day)| PudRecord {
            cell_id: id.to_string(),
            date: day,
            pud: owners.get(&(id, day)).map_or(0, |o| o.len() as u64),
        })
        .collect();

    tracing::info!(
        "aggregated {} cells x {} days, {} cell-days visited",
        cells.len(),
        days.len(),
        owners.len()
    );
    if rows.is_empty() {
        tracing::warn!("photo-user-days table is empty");
    }
    Ok(PudTable {
        fid_column: fid_column.to_string(),
        rows,
    })
}

impl PudTable {
    pub fn rows(&self) -> &[PudRecord] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, cell_id: &str, date: NaiveDate) -> Option<u64> {
        self.rows
            .iter()
            .find(|r| r.cell_id == cell_id && r.date == date)
            .map(|r| r.pud)
    }

    /// Total PUD per cell over all days.
    pub fn totals(&self) -> BTreeMap<&str, u64> {
        let mut totals = BTreeMap::new();
        for r in &self.rows {
            *totals.entry(r.cell_id.as_str()).or_insert(0) += r.pud;
        }
        totals
    }

    pub fn ensure_non_empty(self) -> Result<Self> {
        if self.rows.is_empty() {
            return Err(PudError::EmptyResult("photo-user-days aggregation"));
        }
        Ok(self)
    }

    /// Columns `[fid_column, Date, PUD]`.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record([self.fid_column.as_str(), "Date", "PUD"])?;
        for r in &self.rows {
            wtr.write_record([
                r.cell_id.clone(),
                r.date.format("%Y-%m-%d").to_string(),
                r.pud.to_string(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.write_csv(File::create(path)?)?;
        tracing::info!("wrote {} rows to {:?}", self.rows.len(), path);
        Ok(())
    }
}
