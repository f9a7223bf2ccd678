//! # tsdfile
//!
//! Append-only binary storage for ordered time-series metric snapshots.
//!
//! tsdfile stores *collections* — timestamped snapshots of named metric
//! groups — in a compact, versioned binary file format. Producers append
//! collections in timestamp order; consumers read them back exactly as
//! written, including NaN payloads and histogram bucket order, bit for bit.
//!
//! ## Key Properties
//!
//! - Rich value model: booleans, integers, doubles, strings, histograms,
//!   and an explicit empty value, under one sum type
//! - Dimensional group names: a dotted path plus a tag set of scalar values
//! - Deterministic encoding — the same logical collection always produces
//!   the same bytes, regardless of construction order
//! - Versioned headers with magic bytes; corrupt or truncated input fails
//!   with a diagnosable offset, never a panic
//! - Two storage strategies behind one facade: a single growing file, or a
//!   manifest plus discrete segment files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tsdfile::{
//!     CreateOptions, GroupName, GroupPath, History, MetricName, MetricValue,
//!     StrategyKind, TimeSeriesCollection, TimeSeriesValue, Timestamp,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create a history backed by a single file.
//! let mut history = History::create(
//!     "./metrics.tsd",
//!     StrategyKind::SingleFile,
//!     CreateOptions::default(),
//! )?;
//!
//! // Build a snapshot: one group, one metric.
//! let collection = TimeSeriesCollection::builder(Timestamp::from_unix_millis(1_700_000_000_000))
//!     .push(TimeSeriesValue::from_metrics(
//!         GroupName::untagged(GroupPath::new(["host", "cpu"])?),
//!         [(MetricName::new(["usage"])?, MetricValue::Dbl(85.5))],
//!     )?)
//!     .build()?;
//!
//! history.append(&collection)?;
//! history.close()?;
//!
//! // Read everything back.
//! for collection in History::read_all("./metrics.tsd")? {
//!     let collection = collection?;
//!     println!("{:?}: {} groups", collection.timestamp(), collection.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`History`] — Top-level handle; create, open, append, read
//! - [`TimeSeriesCollection`] — One timestamped snapshot of metric groups
//! - [`MetricValue`] — The value sum type stored for every metric and tag
//! - [`HistoryReader`] — Lazy iterator over a stored history
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`history`] — History lifecycle, append, read
//! - [`collection`] — Collections, builders, timestamps
//! - [`name`] — Group paths, metric names, tags, group names
//! - [`value`] — Metric values and histograms
//! - [`codec`] — The versioned binary wire format
//! - [`strategy`] — Storage strategies and file naming conventions
//! - [`error`] — Error types

pub mod codec;
pub mod collection;
pub mod error;
pub mod history;
pub mod name;
pub mod strategy;
pub mod value;

// Re-export primary API types at crate root for convenience.
pub use codec::{FORMAT_MAJOR, FORMAT_MINOR};
pub use collection::{CollectionBuilder, TimeSeriesCollection, TimeSeriesValue, Timestamp};
pub use error::{Result, TsdError};
pub use history::{CreateOptions, History, HistoryReader};
pub use name::{GroupName, GroupPath, MetricName, Tags};
pub use strategy::{conventional_file_name, StrategyKind};
pub use value::{Histogram, MetricValue, RangeWithCount};
