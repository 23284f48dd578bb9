//! Change point aggregation.
//!
//! A [`ChangePoint`] is a revision flagged by the analysis oracle in one or
//! more tests, classified by [`ChangePointType`] (direction plus a 10%-wide
//! magnitude bucket). A [`ChangePointSet`] keeps one change point per
//! (revision, type) and merges repeated detections of the same key.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use perfshift::changepoint::{ChangePoint, ChangePointSet};
//! use perfshift::series::SeriesBuilder;
//!
//! let parse = Arc::new(
//!     SeriesBuilder::new("parser", "bench::parse")
//!         .revision("r1", &[10.0])
//!         .revision("r2", &[15.0])
//!         .build(),
//! );
//! let lex = Arc::new(
//!     SeriesBuilder::new("parser", "bench::lex")
//!         .revision("r1", &[4.0])
//!         .revision("r2", &[6.0])
//!         .build(),
//! );
//!
//! let set = ChangePointSet::new();
//! set.add(ChangePoint::detect("r1", parse)?)?;
//! set.add(ChangePoint::detect("r1", lex)?)?;
//!
//! assert_eq!(set.len(), 1);
//! assert_eq!(set.all()[0].test_names(), ["bench::parse", "bench::lex"]);
//! assert_eq!(set.all()[0].change_type().to_string(), "regression: 30-39%");
//! # Ok::<(), perfshift::error::PerfShiftError>(())
//! ```

pub mod export;
pub mod kind;
pub mod point;
pub mod set;

pub use kind::{classify, ChangeCategory, ChangePointType, Direction};
pub use point::{ChangePoint, ChangePointKey, ChangePointRecord};
pub use set::{remove_duplicate_tests, ChangePointSet};
