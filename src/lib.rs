//! Photo-user-days (PUD) from geotagged photo records.
//!
//! Records -> point geometries -> one row per owner, timestamp and location
//! -> left spatial join onto a polygon grid -> distinct owners per cell and day.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod grid;
pub mod join;
pub mod logging;
pub mod photo_user;
pub mod pipeline;
pub mod pud;
pub mod record;
pub mod traits;

pub use config::PipelineConfig;
pub use diagnostics::{owner_activity, summarize, Summary};
pub use error::{PudError, Result};
pub use geometry::{Crs, GeoTable, Mask};
pub use grid::{Grid, GridCell};
pub use join::{join, BoundaryPolicy, CellDayRecord, CellDayTable};
pub use photo_user::{photo_user, PhotoUserObservation, PhotoUserTable};
pub use pud::{aggregate, aggregate_with_days, DateRange, PudRecord, PudTable};
pub use record::{Field, PhotoRecord, RecordTable};
pub use traits::{Located, MergeKind, MergePolicy};
