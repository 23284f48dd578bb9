//! # perfshift - change-point aggregation for benchmark histories
//!
//! perfshift takes per-test benchmark series (measurements of one test across
//! an ordered list of revisions), asks an external analysis oracle which
//! revisions look like change points, and aggregates the answers into one
//! deduplicated set per revision, direction and magnitude.
//!
//! ## Overview
//!
//! - [`series`] stores measurements per test and revision.
//! - [`filter`] drops series that are too short or too fast to be worth
//!   analysing.
//! - [`analysis`] runs an [`AnalysisOracle`](analysis::AnalysisOracle) over
//!   every series with a bounded worker pool and cooperative cancellation.
//! - [`changepoint`] classifies flagged revisions, merges detections of the
//!   same revision and type, and exports the result as JSON or a per-revision
//!   summary table.
//! - [`config`] and [`runner`] describe and execute a whole pipeline of
//!   `filter`, `merge`, `analyse` and `save` stages.
//!
//! ## Quick Start
//!
//! ```rust
//! use perfshift::prelude::*;
//!
//! # fn main() -> perfshift::error::Result<()> {
//! let mut set = SeriesSet::new();
//! set.insert(
//!     SeriesBuilder::new("parser", "bench::parse")
//!         .revision("a1", &[10.0, 10.1])
//!         .revision("b2", &[100.0, 99.0])
//!         .revision("c3", &[100.0])
//!         .build(),
//! )?;
//!
//! let filtered = FilterPipeline::new()
//!     .add(MinVersions::new(3))
//!     .add(MinMean::new(1.0))
//!     .apply(&set)?;
//!
//! let series = filtered.get("bench::parse").unwrap().clone();
//! let change_points = ChangePointSet::new();
//! change_points.add(ChangePoint::detect("a1", series)?)?;
//!
//! assert_eq!(change_points.all()[0].change_type().to_string(), "regression: 80-89%");
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//!
//! perfshift logs through `tracing`. Install a subscriber of your own or use
//! [`logging::setup::init_logging`]; [`logging::LogConfig`] controls how much
//! per-series detail the pipelines emit.

pub mod analysis;
pub mod changepoint;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod prelude;
pub mod runner;
pub mod series;
