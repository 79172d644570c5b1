//! meterplex core: metric capabilities, fan-out wrappers, and registry composition.
//!
//! This crate turns N independently configured metric backends into a single
//! instrumentation surface. Callers always receive a usable metric, whether zero,
//! one or many backends registered it, so request-handling code never checks for
//! "metrics off". It carries no backend wire formats; those live in
//! `meterplex-backends`.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. The only fallible
//! paths are construction-time (`MeterError`), so a bad unit or a label schema
//! conflict stops startup instead of producing mis-scaled series.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod fanout;
pub mod metric;
pub mod registry;
pub mod scalable;

/// Shared result type.
pub use error::{MeterError, Result};

pub use metric::{Counter, CounterWithHeaders, Gauge, Histogram, ScalableHistogram};
pub use registry::{MetricsBackend, Registry};
